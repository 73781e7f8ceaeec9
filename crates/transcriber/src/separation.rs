//! Source separation behind the [`SeparationBackend`] seam.
//!
//! The built-in [`SpectralMaskSeparator`] splits a mix with soft
//! time-frequency masks: median-filtered harmonic/percussive separation on the
//! mixdown magnitude, then the harmonic part is divided into frequency bands
//! with raised-cosine crossovers. Every mask set sums to one per bin, so the
//! stems add back up to the mix.

use std::collections::BTreeMap;

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use stemscore_audio::{AudioError, Stft, WaveformBuffer};
use stemscore_domain::InstrumentClass;

/// Rows processed between cancellation checks.
const CHUNK_FRAMES: usize = 64;

#[derive(Debug, Error)]
pub enum SeparationError {
    #[error("separation backend unavailable: {0}")]
    Unavailable(String),
    #[error("separation backend failed: {0}")]
    Backend(String),
    #[error("separation was cancelled")]
    Cancelled,
}

impl From<AudioError> for SeparationError {
    fn from(err: AudioError) -> Self {
        SeparationError::Backend(err.to_string())
    }
}

/// One isolated source and the class it was assigned.
#[derive(Clone, Debug, PartialEq)]
pub struct Stem {
    instrument: InstrumentClass,
    waveform: WaveformBuffer,
}

impl Stem {
    pub fn new(instrument: InstrumentClass, waveform: WaveformBuffer) -> Self {
        Self {
            instrument,
            waveform,
        }
    }

    pub fn instrument(&self) -> InstrumentClass {
        self.instrument
    }

    pub fn waveform(&self) -> &WaveformBuffer {
        &self.waveform
    }

    pub fn duration(&self) -> f64 {
        self.waveform.duration()
    }

    pub fn into_waveform(self) -> WaveformBuffer {
        self.waveform
    }
}

/// Stems keyed by class; iteration follows the canonical track priority.
pub type StemSet = BTreeMap<InstrumentClass, Stem>;

pub trait SeparationBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Identifies the model or algorithm revision; results are only
    /// reproducible for a fixed name and version.
    fn version(&self) -> &str;

    fn separate(
        &self,
        mix: &WaveformBuffer,
        cancel: &CancellationToken,
    ) -> Result<StemSet, SeparationError>;
}

/// A harmonic band ending at `upper_hz`; `None` marks the open top band.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct HarmonicBand {
    pub instrument: InstrumentClass,
    pub upper_hz: Option<f32>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SeparationConfig {
    pub n_fft: usize,
    pub hop: usize,
    /// Frames in the time-direction median filter.
    pub harmonic_kernel: usize,
    /// Bins in the frequency-direction median filter.
    pub percussive_kernel: usize,
    /// Exponent applied to both medians before forming soft masks.
    pub mask_power: f32,
    pub percussive_instrument: InstrumentClass,
    /// Harmonic bands in ascending order.
    pub harmonic_bands: Vec<HarmonicBand>,
    /// Width of each crossover, in octaves.
    pub crossover_octaves: f32,
    /// Stems quieter than this RMS are dropped.
    pub min_stem_rms: f32,
}

impl Default for SeparationConfig {
    fn default() -> Self {
        Self {
            n_fft: 2048,
            hop: 512,
            harmonic_kernel: 17,
            percussive_kernel: 17,
            mask_power: 2.0,
            percussive_instrument: InstrumentClass::Drums,
            harmonic_bands: vec![
                HarmonicBand {
                    instrument: InstrumentClass::Bass,
                    upper_hz: Some(220.0),
                },
                HarmonicBand {
                    instrument: InstrumentClass::Other,
                    upper_hz: None,
                },
            ],
            crossover_octaves: 1.0,
            min_stem_rms: 1e-3,
        }
    }
}

pub struct SpectralMaskSeparator {
    config: SeparationConfig,
    stft: Stft,
}

impl SpectralMaskSeparator {
    pub fn new(config: SeparationConfig) -> Result<Self, SeparationError> {
        let stft = Stft::new(config.n_fft, config.hop)?;
        Ok(Self { config, stft })
    }

    pub fn config(&self) -> &SeparationConfig {
        &self.config
    }

    /// Soft masks shaped `(frames, bins)`, one per output class.
    fn masks(
        &self,
        magnitudes: &Array2<f32>,
        sample_rate: u32,
        cancel: &CancellationToken,
    ) -> Result<Vec<(InstrumentClass, Array2<f32>)>, SeparationError> {
        let harmonic = median_along_time(magnitudes, self.config.harmonic_kernel, cancel)?;
        let percussive = median_along_frequency(magnitudes, self.config.percussive_kernel, cancel)?;
        let (frames, bins) = magnitudes.dim();
        let power = self.config.mask_power;

        let mut harmonic_mask = Array2::<f32>::zeros((frames, bins));
        let mut percussive_mask = Array2::<f32>::zeros((frames, bins));
        for ((index, h), p) in harmonic.indexed_iter().zip(percussive.iter()) {
            let h = h.powf(power);
            let p = p.powf(power);
            let total = h + p;
            let (mh, mp) = if total > f32::MIN_POSITIVE {
                (h / total, p / total)
            } else {
                (0.5, 0.5)
            };
            harmonic_mask[index] = mh;
            percussive_mask[index] = mp;
        }

        let weights = self.band_weights(bins, sample_rate);
        let mut masks = Vec::with_capacity(weights.len() + 1);
        masks.push((self.config.percussive_instrument, percussive_mask));
        for (band, band_weights) in self.config.harmonic_bands.iter().zip(weights) {
            let mut mask = harmonic_mask.clone();
            for mut row in mask.rows_mut() {
                for (value, weight) in row.iter_mut().zip(&band_weights) {
                    *value *= weight;
                }
            }
            masks.push((band.instrument, mask));
        }
        Ok(masks)
    }

    /// Per-bin weight of every harmonic band. Weights are non-negative and
    /// sum to one in each bin.
    fn band_weights(&self, bins: usize, sample_rate: u32) -> Vec<Vec<f32>> {
        let edges: Vec<f32> = self
            .config
            .harmonic_bands
            .iter()
            .filter_map(|band| band.upper_hz)
            .collect();
        let width = self.config.crossover_octaves.max(f32::EPSILON);
        let band_count = self.config.harmonic_bands.len();
        let mut weights = vec![vec![0.0; bins]; band_count];
        for bin in 0..bins {
            let freq = self.stft.bin_frequency(bin, sample_rate);
            let below: Vec<f32> = edges.iter().map(|&edge| lowpass(freq, edge, width)).collect();
            let mut previous = 0.0;
            for (band, slot) in weights.iter_mut().enumerate() {
                let cumulative = below.get(band).copied().unwrap_or(1.0);
                slot[bin] = (cumulative - previous).max(0.0);
                previous = cumulative;
            }
        }
        weights
    }
}

impl SeparationBackend for SpectralMaskSeparator {
    fn name(&self) -> &str {
        "spectral-mask"
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    #[instrument(skip(self, mix, cancel), fields(duration = mix.duration()))]
    fn separate(
        &self,
        mix: &WaveformBuffer,
        cancel: &CancellationToken,
    ) -> Result<StemSet, SeparationError> {
        if mix.is_silent() {
            debug!("mix is silent, no stems");
            return Ok(StemSet::new());
        }
        let sample_rate = mix.sample_rate();
        let magnitudes = self.stft.magnitudes(&mix.mixdown())?;
        check(cancel)?;
        let masks = self.masks(&magnitudes, sample_rate, cancel)?;

        let mut rendered: Vec<Vec<Vec<f32>>> = vec![Vec::with_capacity(mix.channel_count()); masks.len()];
        for channel in mix.channels() {
            let spectrum = self.stft.forward(channel)?;
            for ((_, mask), out) in masks.iter().zip(rendered.iter_mut()) {
                check(cancel)?;
                let mut masked = spectrum.clone();
                masked.zip_mut_with(mask, |value, &weight| *value *= weight);
                out.push(self.stft.inverse(&masked, channel.len())?);
            }
        }

        let mut stems = StemSet::new();
        for ((instrument, _), channels) in masks.into_iter().zip(rendered) {
            let waveform = WaveformBuffer::new(sample_rate, channels)?;
            let level = waveform.rms();
            if level < self.config.min_stem_rms {
                debug!(%instrument, rms = level, "dropping quiet stem");
                continue;
            }
            stems.insert(instrument, Stem::new(instrument, waveform));
        }
        info!(stems = stems.len(), "separated mix");
        Ok(stems)
    }
}

/// Backend that always reports itself as unavailable, for deployments
/// without a separation model.
#[derive(Clone, Debug)]
pub struct UnavailableBackend {
    reason: String,
}

impl UnavailableBackend {
    pub fn new<T: Into<String>>(reason: T) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl SeparationBackend for UnavailableBackend {
    fn name(&self) -> &str {
        "unavailable"
    }

    fn version(&self) -> &str {
        "0"
    }

    fn separate(
        &self,
        _mix: &WaveformBuffer,
        _cancel: &CancellationToken,
    ) -> Result<StemSet, SeparationError> {
        Err(SeparationError::Unavailable(self.reason.clone()))
    }
}

fn check(cancel: &CancellationToken) -> Result<(), SeparationError> {
    if cancel.is_cancelled() {
        Err(SeparationError::Cancelled)
    } else {
        Ok(())
    }
}

/// Raised-cosine lowpass in the log-frequency domain: 1 well below `edge`,
/// 0 well above it, 0.5 at the edge.
fn lowpass(freq: f32, edge: f32, width_octaves: f32) -> f32 {
    if freq <= 0.0 {
        return 1.0;
    }
    let position = (freq / edge).log2() / width_octaves + 0.5;
    if position <= 0.0 {
        1.0
    } else if position >= 1.0 {
        0.0
    } else {
        0.5 * (1.0 + (std::f32::consts::PI * position).cos())
    }
}

fn median(window: &mut [f32]) -> f32 {
    let mid = window.len() / 2;
    let (_, value, _) = window.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
    *value
}

fn median_along_time(
    magnitudes: &Array2<f32>,
    kernel: usize,
    cancel: &CancellationToken,
) -> Result<Array2<f32>, SeparationError> {
    let (frames, bins) = magnitudes.dim();
    let half = kernel / 2;
    let mut out = Array2::<f32>::zeros((frames, bins));
    let mut window = Vec::with_capacity(kernel);
    for t in 0..frames {
        if t % CHUNK_FRAMES == 0 {
            check(cancel)?;
        }
        let lo = t.saturating_sub(half);
        let hi = (t + half + 1).min(frames);
        for b in 0..bins {
            window.clear();
            window.extend((lo..hi).map(|i| magnitudes[[i, b]]));
            out[[t, b]] = median(&mut window);
        }
    }
    Ok(out)
}

fn median_along_frequency(
    magnitudes: &Array2<f32>,
    kernel: usize,
    cancel: &CancellationToken,
) -> Result<Array2<f32>, SeparationError> {
    let (frames, bins) = magnitudes.dim();
    let half = kernel / 2;
    let mut out = Array2::<f32>::zeros((frames, bins));
    let mut window = Vec::with_capacity(kernel);
    for t in 0..frames {
        if t % CHUNK_FRAMES == 0 {
            check(cancel)?;
        }
        let row = magnitudes.row(t);
        for b in 0..bins {
            let lo = b.saturating_sub(half);
            let hi = (b + half + 1).min(bins);
            window.clear();
            window.extend(row.iter().skip(lo).take(hi - lo).copied());
            out[[t, b]] = median(&mut window);
        }
    }
    Ok(out)
}
