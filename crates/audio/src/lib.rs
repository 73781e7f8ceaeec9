pub mod buffer;
pub mod dsp;
pub mod error;
pub mod io;
pub mod loader;
pub mod spectral;

pub use buffer::WaveformBuffer;
pub use dsp::{normalize_channels, resample, PeakLevel};
pub use error::AudioError;
pub use io::{AudioDecoder, DecodeBudget, DecodedAudio};
pub use loader::{LoaderConfig, WaveformLoader, DEFAULT_SAMPLE_RATE};
pub use spectral::{spectral_flux, Stft};
