use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use stemscore_audio::LoaderConfig;

use crate::assembler::AssemblerConfig;
use crate::detection::DetectionConfig;
use crate::quantize::QuantizerConfig;
use crate::separation::SeparationConfig;
use crate::tempo::TempoConfig;
use crate::TranscriptionError;

/// Every tunable of one analysis run. An empty document deserializes to the
/// defaults.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TranscriptionConfig {
    pub loader: LoaderConfig,
    pub separation: SeparationConfig,
    pub detection: DetectionConfig,
    pub tempo: TempoConfig,
    pub quantizer: QuantizerConfig,
    pub assembler: AssemblerConfig,
}

impl TranscriptionConfig {
    /// Parses YAML (or JSON, which YAML accepts) and validates the result.
    pub fn from_yaml_str(contents: &str) -> Result<Self, TranscriptionError> {
        let config: Self = serde_yaml::from_str(contents)
            .map_err(|err| TranscriptionError::config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, TranscriptionError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|err| {
            TranscriptionError::config(format!("cannot read {}: {err}", path.display()))
        })?;
        let config = Self::from_yaml_str(&contents)?;
        info!(path = %path.display(), "loaded transcription config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), TranscriptionError> {
        if self.loader.target_sample_rate == 0 {
            return Err(TranscriptionError::config("loader.target_sample_rate must be positive"));
        }
        if !(self.loader.silence_floor >= 0.0) {
            return Err(TranscriptionError::config("loader.silence_floor must be non-negative"));
        }
        check_frames("separation", self.separation.n_fft, self.separation.hop)?;
        check_frames("detection", self.detection.n_fft, self.detection.hop)?;
        check_frames("tempo", self.tempo.n_fft, self.tempo.hop)?;

        if self.separation.harmonic_kernel == 0 || self.separation.percussive_kernel == 0 {
            return Err(TranscriptionError::config("separation kernels must be at least one frame"));
        }
        if !(self.separation.mask_power > 0.0) {
            return Err(TranscriptionError::config("separation.mask_power must be positive"));
        }
        let bands = &self.separation.harmonic_bands;
        if bands.is_empty() {
            return Err(TranscriptionError::config(
                "separation.harmonic_bands needs at least one band",
            ));
        }
        let mut seen = BTreeSet::new();
        seen.insert(self.separation.percussive_instrument);
        for band in bands {
            if !seen.insert(band.instrument) {
                return Err(TranscriptionError::config(format!(
                    "instrument {} is assigned to more than one stem",
                    band.instrument
                )));
            }
        }
        let (last, inner) = bands.split_last().map_or((None, &[][..]), |(l, i)| (Some(l), i));
        if last.is_some_and(|band| band.upper_hz.is_some()) {
            return Err(TranscriptionError::config(
                "the last harmonic band must be open-ended",
            ));
        }
        let mut previous = 0.0f32;
        for band in inner {
            match band.upper_hz {
                Some(edge) if edge > previous => previous = edge,
                _ => {
                    return Err(TranscriptionError::config(
                        "harmonic band edges must be set and strictly increasing",
                    ))
                }
            }
        }

        let detection = &self.detection;
        if !(detection.min_frequency_hz > 0.0 && detection.min_frequency_hz < detection.max_frequency_hz) {
            return Err(TranscriptionError::config(
                "detection frequency range must be positive and non-empty",
            ));
        }
        if detection.max_polyphony == 0 {
            return Err(TranscriptionError::config("detection.max_polyphony must be at least one"));
        }

        let tempo = &self.tempo;
        if !(tempo.min_raw_bpm > 0.0 && tempo.min_raw_bpm < tempo.max_raw_bpm) {
            return Err(TranscriptionError::config("tempo search bounds are inverted"));
        }
        if !(tempo.prior_octaves > 0.0) {
            return Err(TranscriptionError::config("tempo.prior_octaves must be positive"));
        }
        Ok(())
    }
}

fn check_frames(section: &str, n_fft: usize, hop: usize) -> Result<(), TranscriptionError> {
    if n_fft < 2 || n_fft % 2 != 0 {
        return Err(TranscriptionError::config(format!(
            "{section}.n_fft must be an even size of at least 2"
        )));
    }
    if hop == 0 || hop > n_fft {
        return Err(TranscriptionError::config(format!(
            "{section}.hop must be within 1..=n_fft"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quantize::GridResolution;
    use stemscore_domain::{ErrorKind, InstrumentClass};

    #[test]
    fn empty_document_is_default() {
        let config = TranscriptionConfig::from_yaml_str("{}").unwrap();
        assert_eq!(config, TranscriptionConfig::default());
        assert_eq!(config.loader.target_sample_rate, 44_100);
        assert_eq!(config.quantizer.grid, GridResolution::Sixteenth);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let yaml = "loader:\n  timeout_ms: 2500\nquantizer:\n  grid: eighth\n";
        let config = TranscriptionConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.loader.timeout_ms, Some(2500));
        assert_eq!(config.loader.target_sample_rate, 44_100);
        assert_eq!(config.quantizer.grid, GridResolution::Eighth);
        assert_eq!(config.detection, DetectionConfig::default());
    }

    #[test]
    fn rejects_impossible_values() {
        let mut config = TranscriptionConfig::default();
        config.detection.hop = config.detection.n_fft + 1;
        assert_eq!(config.validate().unwrap_err().kind(), ErrorKind::Config);

        let mut config = TranscriptionConfig::default();
        config.tempo.min_raw_bpm = 400.0;
        assert!(config.validate().is_err());

        let mut config = TranscriptionConfig::default();
        config.loader.target_sample_rate = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_duplicate_stem_classes() {
        let mut config = TranscriptionConfig::default();
        config.separation.harmonic_bands[0].instrument = InstrumentClass::Drums;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("drums"));
    }

    #[test]
    fn malformed_yaml_is_a_config_error() {
        let err = TranscriptionConfig::from_yaml_str("loader: [1, 2").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }
}
