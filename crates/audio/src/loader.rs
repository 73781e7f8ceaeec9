use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::dsp::{normalize_channels, resample};
use crate::io::{AudioDecoder, DecodeBudget};
use crate::{AudioError, WaveformBuffer};

pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoaderConfig {
    /// Rate every decoded stream is resampled to.
    pub target_sample_rate: u32,
    /// Wall-clock budget for decoding and resampling.
    pub timeout_ms: Option<u64>,
    /// Peaks at or below this are treated as digital silence.
    pub silence_floor: f32,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: DEFAULT_SAMPLE_RATE,
            timeout_ms: None,
            silence_floor: 1e-6,
        }
    }
}

impl LoaderConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// Turns encoded bytes into a peak-normalized [`WaveformBuffer`] at the
/// configured rate.
pub struct WaveformLoader {
    config: LoaderConfig,
}

impl WaveformLoader {
    pub fn new(config: LoaderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    #[instrument(skip(self, bytes, cancel), fields(bytes = bytes.len()))]
    pub fn load(
        &self,
        bytes: Vec<u8>,
        extension: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<WaveformBuffer, AudioError> {
        if bytes.is_empty() {
            return Err(AudioError::EmptyInput);
        }
        let budget = DecodeBudget::new(self.config.timeout(), cancel.clone());
        let decoded = AudioDecoder::decode(bytes, extension, &budget)?;
        debug!(
            sample_rate = decoded.sample_rate,
            channels = decoded.channels.len(),
            frames = decoded.frames(),
            "decoded audio"
        );

        let mut channels = resample(
            &decoded.channels,
            decoded.sample_rate,
            self.config.target_sample_rate,
        )?;
        budget.check()?;
        let peak = normalize_channels(&mut channels, self.config.silence_floor);

        let buffer = WaveformBuffer::new(self.config.target_sample_rate, channels)?;
        info!(
            duration = buffer.duration(),
            channels = buffer.channel_count(),
            source_peak = peak.absolute(),
            "loaded waveform"
        );
        Ok(buffer)
    }
}

impl Default for WaveformLoader {
    fn default() -> Self {
        Self::new(LoaderConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::io::Cursor;

    fn wav_bytes(samples: &[i16], sample_rate: u32) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for &sample in samples {
                writer.write_sample(sample).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn empty_bytes_are_rejected() {
        let loader = WaveformLoader::default();
        let result = loader.load(Vec::new(), None, &CancellationToken::new());
        assert!(matches!(result, Err(AudioError::EmptyInput)));
    }

    #[test]
    fn normalizes_peak_to_unity() {
        let samples: Vec<i16> = (0..4410).map(|i| ((i % 100) as i16 - 50) * 100).collect();
        let loader = WaveformLoader::default();
        let buffer = loader
            .load(wav_bytes(&samples, 44_100), Some("wav"), &CancellationToken::new())
            .unwrap();
        assert_abs_diff_eq!(buffer.peak(), 1.0);
        assert_abs_diff_eq!(buffer.duration(), 0.1, epsilon = 1e-9);
    }

    #[test]
    fn resamples_to_target_rate() {
        let samples = vec![1000i16; 22_050];
        let loader = WaveformLoader::default();
        let buffer = loader
            .load(wav_bytes(&samples, 22_050), None, &CancellationToken::new())
            .unwrap();
        assert_eq!(buffer.sample_rate(), 44_100);
        assert_abs_diff_eq!(buffer.duration(), 1.0, epsilon = 1e-3);
    }

    #[test]
    fn silence_stays_silent() {
        let loader = WaveformLoader::default();
        let buffer = loader
            .load(wav_bytes(&vec![0i16; 44_100], 44_100), None, &CancellationToken::new())
            .unwrap();
        assert!(buffer.is_silent());
        assert_abs_diff_eq!(buffer.duration(), 1.0);
    }

    #[test]
    fn zero_timeout_surfaces_timeout() {
        let loader = WaveformLoader::new(LoaderConfig {
            timeout_ms: Some(0),
            ..LoaderConfig::default()
        });
        let result = loader.load(
            wav_bytes(&vec![0i16; 44_100], 44_100),
            None,
            &CancellationToken::new(),
        );
        assert!(matches!(result, Err(AudioError::Timeout(_))));
    }
}
