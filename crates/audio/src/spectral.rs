//! Short-time Fourier analysis built on `realfft`.
//!
//! Frames are centred: the signal is padded with `n_fft / 2` zeros on both
//! sides, so frame `t` is centred on sample `t * hop`.

use std::f32::consts::PI;
use std::sync::Arc;

use ndarray::Array2;
use realfft::num_complex::Complex32;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};

use crate::AudioError;

/// Sums of squared windows below this are treated as uncovered samples.
const WINDOW_SUM_FLOOR: f32 = 1e-10;

/// Periodic Hann window.
pub fn hann_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / size as f32).cos()))
        .collect()
}

pub struct Stft {
    n_fft: usize,
    hop: usize,
    window: Vec<f32>,
    forward: Arc<dyn RealToComplex<f32>>,
    inverse: Arc<dyn ComplexToReal<f32>>,
}

impl Stft {
    pub fn new(n_fft: usize, hop: usize) -> Result<Self, AudioError> {
        if n_fft < 2 || n_fft % 2 != 0 {
            return Err(AudioError::Spectral(format!(
                "fft size must be even and at least 2, got {n_fft}"
            )));
        }
        if hop == 0 || hop > n_fft {
            return Err(AudioError::Spectral(format!(
                "hop {hop} must be within 1..={n_fft}"
            )));
        }
        let mut planner = RealFftPlanner::<f32>::new();
        Ok(Self {
            n_fft,
            hop,
            window: hann_window(n_fft),
            forward: planner.plan_fft_forward(n_fft),
            inverse: planner.plan_fft_inverse(n_fft),
        })
    }

    pub fn n_fft(&self) -> usize {
        self.n_fft
    }

    pub fn hop(&self) -> usize {
        self.hop
    }

    pub fn bin_count(&self) -> usize {
        self.n_fft / 2 + 1
    }

    pub fn frame_count(&self, samples: usize) -> usize {
        1 + samples / self.hop
    }

    pub fn bin_frequency(&self, bin: usize, sample_rate: u32) -> f32 {
        bin as f32 * sample_rate as f32 / self.n_fft as f32
    }

    /// Seconds at the centre of frame `frame`.
    pub fn frame_time(&self, frame: usize, sample_rate: u32) -> f64 {
        (frame * self.hop) as f64 / sample_rate as f64
    }

    /// Complex spectrogram shaped `(frames, bins)`.
    pub fn forward(&self, samples: &[f32]) -> Result<Array2<Complex32>, AudioError> {
        let frames = self.frame_count(samples.len());
        let half = self.n_fft / 2;
        let mut spectrum = Array2::<Complex32>::zeros((frames, self.bin_count()));
        let mut input = self.forward.make_input_vec();
        let mut output = self.forward.make_output_vec();
        for frame in 0..frames {
            let start = (frame * self.hop) as isize - half as isize;
            for (i, slot) in input.iter_mut().enumerate() {
                let index = start + i as isize;
                *slot = if index >= 0 && (index as usize) < samples.len() {
                    samples[index as usize] * self.window[i]
                } else {
                    0.0
                };
            }
            self.forward
                .process(&mut input, &mut output)
                .map_err(|err| AudioError::Spectral(err.to_string()))?;
            for (bin, value) in output.iter().enumerate() {
                spectrum[[frame, bin]] = *value;
            }
        }
        Ok(spectrum)
    }

    /// Magnitude spectrogram shaped `(frames, bins)`.
    pub fn magnitudes(&self, samples: &[f32]) -> Result<Array2<f32>, AudioError> {
        Ok(self.forward(samples)?.mapv(|value| value.norm()))
    }

    /// Weighted overlap-add resynthesis to exactly `length` samples.
    pub fn inverse(&self, spectrum: &Array2<Complex32>, length: usize) -> Result<Vec<f32>, AudioError> {
        let (frames, bins) = spectrum.dim();
        if bins != self.bin_count() {
            return Err(AudioError::Spectral(format!(
                "expected {} bins, got {bins}",
                self.bin_count()
            )));
        }
        let half = self.n_fft / 2;
        let padded_len = length + self.n_fft;
        let mut output = vec![0.0f32; padded_len];
        let mut window_sum = vec![0.0f32; padded_len];
        let mut input = self.inverse.make_input_vec();
        let mut frame_out = self.inverse.make_output_vec();
        let scale = 1.0 / self.n_fft as f32;

        for frame in 0..frames {
            for (bin, slot) in input.iter_mut().enumerate() {
                *slot = spectrum[[frame, bin]];
            }
            input[0].im = 0.0;
            if let Some(last) = input.last_mut() {
                last.im = 0.0;
            }
            self.inverse
                .process(&mut input, &mut frame_out)
                .map_err(|err| AudioError::Spectral(err.to_string()))?;
            let start = frame * self.hop;
            for (i, sample) in frame_out.iter().enumerate() {
                let index = start + i;
                if index >= padded_len {
                    break;
                }
                output[index] += sample * scale * self.window[i];
                window_sum[index] += self.window[i] * self.window[i];
            }
        }

        Ok((0..length)
            .map(|i| {
                let index = i + half;
                if window_sum[index] > WINDOW_SUM_FLOOR {
                    output[index] / window_sum[index]
                } else {
                    0.0
                }
            })
            .collect())
    }
}

/// Half-wave rectified spectral flux per frame. With `compression = Some(g)`
/// magnitudes are mapped through `ln(1 + g * m)` first.
pub fn spectral_flux(magnitudes: &Array2<f32>, compression: Option<f32>) -> Vec<f32> {
    let (frames, bins) = magnitudes.dim();
    let compress = |value: f32| match compression {
        Some(gamma) => (1.0 + gamma * value).ln(),
        None => value,
    };
    let mut flux = vec![0.0; frames];
    for t in 1..frames {
        let mut sum = 0.0;
        for b in 0..bins {
            let diff = compress(magnitudes[[t, b]]) - compress(magnitudes[[t - 1, b]]);
            if diff > 0.0 {
                sum += diff;
            }
        }
        flux[t] = sum;
    }
    flux
}
