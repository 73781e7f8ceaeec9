use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

use crate::AudioError;

const SINC_LEN: usize = 256;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PeakLevel {
    pub max: f32,
    pub min: f32,
}

impl PeakLevel {
    pub fn silence() -> Self {
        Self { max: 0.0, min: 0.0 }
    }

    pub fn absolute(&self) -> f32 {
        self.max.abs().max(self.min.abs())
    }
}

/// Scales every channel by one gain so the loudest sample reaches 1.0.
/// Buffers whose peak stays under `silence_floor` are zeroed instead.
pub fn normalize_channels(channels: &mut [Vec<f32>], silence_floor: f32) -> PeakLevel {
    let mut peak = PeakLevel::silence();
    for sample in channels.iter().flat_map(|channel| channel.iter()) {
        peak.max = peak.max.max(*sample);
        peak.min = peak.min.min(*sample);
    }
    let gain = peak.absolute();
    for sample in channels.iter_mut().flat_map(|channel| channel.iter_mut()) {
        if gain <= silence_floor {
            *sample = 0.0;
        } else {
            *sample /= gain;
        }
    }
    peak
}

/// Band-limited sinc resampling of planar channels. The filter delay is
/// removed so sample `n` of the output lines up with time `n / to`.
pub fn resample(channels: &[Vec<f32>], from: u32, to: u32) -> Result<Vec<Vec<f32>>, AudioError> {
    let frames = channels.first().map_or(0, Vec::len);
    if from == to || frames == 0 {
        return Ok(channels.to_vec());
    }
    let ratio = to as f64 / from as f64;
    let expected = (frames as f64 * ratio).round() as usize;
    let delay = (SINC_LEN as f64 / 2.0 * ratio).round() as usize;

    let params = SincInterpolationParameters {
        sinc_len: SINC_LEN,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };
    let padded: Vec<Vec<f32>> = channels
        .iter()
        .map(|channel| {
            let mut padded = Vec::with_capacity(frames + SINC_LEN);
            padded.extend_from_slice(channel);
            padded.resize(frames + SINC_LEN, 0.0);
            padded
        })
        .collect();
    let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, frames + SINC_LEN, channels.len())
        .map_err(|err| AudioError::Resample(err.to_string()))?;
    let output = resampler
        .process(&padded, None)
        .map_err(|err| AudioError::Resample(err.to_string()))?;

    Ok(output
        .into_iter()
        .map(|channel| {
            let mut aligned: Vec<f32> = channel.into_iter().skip(delay).take(expected).collect();
            aligned.resize(expected, 0.0);
            aligned
        })
        .collect())
}

/// Root-mean-square of consecutive `block` sized windows advanced by `hop`.
pub fn block_rms(samples: &[f32], block: usize, hop: usize) -> Vec<f32> {
    if samples.is_empty() || block == 0 || hop == 0 {
        return Vec::new();
    }
    let count = samples.len().div_ceil(hop);
    (0..count)
        .map(|index| {
            let start = index * hop;
            let end = (start + block).min(samples.len());
            let window = &samples[start..end];
            let sum: f32 = window.iter().map(|s| s * s).sum();
            (sum / window.len() as f32).sqrt()
        })
        .collect()
}

/// Root-mean-square of a whole slice.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn normalize_scales_to_unity() {
        let mut channels = vec![vec![0.5, -0.25, 0.125], vec![0.1, 0.2, -0.3]];
        let peak = normalize_channels(&mut channels, 1e-6);
        assert_abs_diff_eq!(peak.max, 0.5);
        assert_eq!(channels[0][0], 1.0);
        assert!(channels.iter().flatten().all(|s| s.abs() <= 1.0));
    }

    #[test]
    fn normalize_keeps_silence_silent() {
        let mut channels = vec![vec![0.0; 16]];
        normalize_channels(&mut channels, 1e-6);
        assert!(channels[0].iter().all(|&s| s == 0.0));
        let mut hiss = vec![vec![1e-8, -1e-8]];
        normalize_channels(&mut hiss, 1e-6);
        assert!(hiss[0].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn resample_preserves_duration_and_tone() {
        let from = 22_050u32;
        let tone: Vec<f32> = (0..from as usize)
            .map(|i| (2.0 * std::f32::consts::PI * 441.0 * i as f32 / from as f32).sin())
            .collect();
        let out = resample(&[tone], from, 44_100).unwrap();
        assert_eq!(out[0].len(), 44_100);
        let middle = &out[0][10_000..30_000];
        assert_abs_diff_eq!(rms(middle), std::f32::consts::FRAC_1_SQRT_2, epsilon = 0.05);
    }

    #[test]
    fn resample_is_identity_at_same_rate() {
        let channels = vec![vec![0.1, 0.2, 0.3]];
        assert_eq!(resample(&channels, 44_100, 44_100).unwrap(), channels);
    }

    #[test]
    fn block_rms_covers_tail() {
        let samples = vec![1.0; 10];
        let blocks = block_rms(&samples, 4, 4);
        assert_eq!(blocks.len(), 3);
        assert_abs_diff_eq!(blocks[2], 1.0);
    }
}
