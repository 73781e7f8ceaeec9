use std::fs;
use std::path::Path;
use std::sync::Arc;

use rayon::prelude::*;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use stemscore_audio::{WaveformBuffer, WaveformLoader};
use stemscore_domain::{AnalysisResult, ErrorKind, StemFailure};

use crate::assembler::{StemTranscription, TranscriptionAssembler};
use crate::cache::{CacheKey, ResultCache};
use crate::config::TranscriptionConfig;
use crate::detection::{DetectionError, EventDetector, PitchOnsetDetector};
use crate::quantize::NoteQuantizer;
use crate::separation::{SeparationBackend, SpectralMaskSeparator};
use crate::tempo::TempoEstimator;
use crate::TranscriptionError;

/// Encoded audio to transcribe. The extension is only a container hint.
#[derive(Debug, Clone, Default)]
pub struct TranscriptionJob {
    pub bytes: Vec<u8>,
    pub extension: Option<String>,
}

impl TranscriptionJob {
    pub fn new(bytes: Vec<u8>, extension: Option<String>) -> Self {
        Self { bytes, extension }
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, TranscriptionError> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|err| {
            TranscriptionError::Decode(format!("cannot read {}: {err}", path.display()))
        })?;
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);
        Ok(Self { bytes, extension })
    }
}

/// Decode, separate, detect, quantize and assemble. Components are built once
/// per pipeline and hold no state between runs.
pub struct TranscriptionPipeline {
    config: TranscriptionConfig,
    loader: WaveformLoader,
    separator: Arc<dyn SeparationBackend>,
    detector: Arc<dyn EventDetector>,
    tempo: TempoEstimator,
    quantizer: NoteQuantizer,
    assembler: TranscriptionAssembler,
    cache: Option<Arc<ResultCache>>,
}

impl TranscriptionPipeline {
    pub fn new(config: TranscriptionConfig) -> Result<Self, TranscriptionError> {
        config.validate()?;
        let separator = SpectralMaskSeparator::new(config.separation.clone())
            .map_err(|err| TranscriptionError::config(err.to_string()))?;
        Self::with_backend(config, Arc::new(separator))
    }

    pub fn with_backend(
        config: TranscriptionConfig,
        separator: Arc<dyn SeparationBackend>,
    ) -> Result<Self, TranscriptionError> {
        config.validate()?;
        let detector = PitchOnsetDetector::new(config.detection.clone())
            .map_err(|err| TranscriptionError::config(err.to_string()))?;
        Ok(Self {
            loader: WaveformLoader::new(config.loader.clone()),
            tempo: TempoEstimator::new(config.tempo.clone()),
            quantizer: NoteQuantizer::new(config.quantizer.clone()),
            assembler: TranscriptionAssembler::new(config.assembler.clone()),
            detector: Arc::new(detector),
            separator,
            cache: None,
            config,
        })
    }

    pub fn with_cache(mut self, cache: Arc<ResultCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Replaces the built-in detector, keeping every other stage.
    pub fn with_detector(mut self, detector: Arc<dyn EventDetector>) -> Self {
        self.detector = detector;
        self
    }

    pub fn config(&self) -> &TranscriptionConfig {
        &self.config
    }

    pub fn backend(&self) -> &dyn SeparationBackend {
        self.separator.as_ref()
    }

    #[instrument(skip(self, job, cancel), fields(bytes = job.bytes.len()))]
    pub fn transcribe(
        &self,
        job: TranscriptionJob,
        cancel: &CancellationToken,
    ) -> Result<AnalysisResult, TranscriptionError> {
        let key = self.cache.as_ref().map(|_| {
            CacheKey::new(
                &job.bytes,
                &self.config,
                self.separator.name(),
                self.separator.version(),
            )
        });
        if let (Some(cache), Some(key)) = (&self.cache, &key) {
            if let Some(result) = cache.get(key) {
                info!(key = key.as_str(), "serving cached transcription");
                return Ok(result);
            }
        }

        let mix = self
            .loader
            .load(job.bytes, job.extension.as_deref(), cancel)?;
        let result = self.transcribe_waveform(&mix, cancel)?;

        if let (Some(cache), Some(key)) = (&self.cache, key) {
            cache.insert(key, result.clone());
        }
        Ok(result)
    }

    /// Runs every stage after decoding on an already loaded mix.
    #[instrument(skip(self, mix, cancel), fields(duration = mix.duration()))]
    pub fn transcribe_waveform(
        &self,
        mix: &WaveformBuffer,
        cancel: &CancellationToken,
    ) -> Result<AnalysisResult, TranscriptionError> {
        if cancel.is_cancelled() {
            return Err(TranscriptionError::Cancelled);
        }
        let (estimate, stems) = rayon::join(
            || self.tempo.estimate(mix),
            || self.separator.separate(mix, cancel),
        );
        let stems = stems?;
        if cancel.is_cancelled() {
            return Err(TranscriptionError::Cancelled);
        }
        debug!(
            backend = self.separator.name(),
            stems = stems.len(),
            "detecting stems"
        );

        let duration = stems
            .values()
            .map(|stem| stem.duration())
            .fold(mix.duration(), f64::max);
        let detected: Vec<_> = stems
            .into_values()
            .collect::<Vec<_>>()
            .into_par_iter()
            .map(|stem| {
                let outcome = self.detector.detect(&stem, cancel);
                (stem.instrument(), stem.duration(), outcome)
            })
            .collect();

        let mut transcriptions = Vec::with_capacity(detected.len());
        let mut failures = Vec::new();
        for (instrument, stem_duration, outcome) in detected {
            match outcome {
                Ok(events) => {
                    let notes = self.quantizer.quantize(
                        &events,
                        estimate.tempo,
                        estimate.time_signature,
                        duration,
                    );
                    debug!(%instrument, events = events.len(), notes = notes.len(), "quantized stem");
                    transcriptions.push(StemTranscription {
                        instrument,
                        duration: stem_duration,
                        notes,
                    });
                }
                Err(DetectionError::Cancelled) => return Err(TranscriptionError::Cancelled),
                Err(err) => {
                    warn!(%instrument, error = %err, "detection failed, omitting track");
                    failures.push(StemFailure {
                        instrument,
                        kind: ErrorKind::Detection,
                        message: err.to_string(),
                    });
                }
            }
        }

        self.assembler
            .assemble(transcriptions, mix.duration(), &estimate, failures)
    }
}
