pub mod assembler;
pub mod cache;
pub mod config;
pub mod detection;
pub mod error;
pub mod onset;
pub mod pipeline;
pub mod pitch;
pub mod quantize;
pub mod runner;
pub mod separation;
pub mod tempo;

pub use assembler::{AssemblerConfig, StemTranscription, TranscriptionAssembler};
pub use cache::{CacheKey, ResultCache};
pub use config::TranscriptionConfig;
pub use detection::{
    DetectedPitch, DetectionConfig, DetectionError, EventDetector, PitchOnsetDetector, RawEvent,
};
pub use error::TranscriptionError;
pub use pipeline::{TranscriptionJob, TranscriptionPipeline};
pub use quantize::{GridResolution, NoteQuantizer, QuantizerConfig};
pub use runner::AnalysisRunner;
pub use separation::{
    HarmonicBand, SeparationBackend, SeparationConfig, SeparationError, SpectralMaskSeparator,
    Stem, StemSet, UnavailableBackend,
};
pub use tempo::{TempoConfig, TempoEstimate, TempoEstimator};
