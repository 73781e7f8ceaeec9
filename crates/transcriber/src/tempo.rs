use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use stemscore_audio::{spectral_flux, Stft, WaveformBuffer};
use stemscore_domain::{Tempo, TimeSignature};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TempoConfig {
    pub n_fft: usize,
    pub hop: usize,
    /// Raw search range before clamping to the notated range.
    pub min_raw_bpm: f64,
    pub max_raw_bpm: f64,
    /// Centre of the log-normal tempo preference.
    pub prior_center_bpm: f64,
    pub prior_octaves: f64,
    /// Normalized autocorrelation below which the estimate is not trusted.
    pub min_confidence: f32,
    pub fallback_bpm: f64,
    /// Triple meter wins when the three-beat lag beats the four-beat lag by
    /// this factor.
    pub triple_meter_ratio: f32,
}

impl Default for TempoConfig {
    fn default() -> Self {
        Self {
            n_fft: 2048,
            hop: 512,
            min_raw_bpm: 20.0,
            max_raw_bpm: 320.0,
            prior_center_bpm: 120.0,
            prior_octaves: 1.0,
            min_confidence: 0.1,
            fallback_bpm: 120.0,
            triple_meter_ratio: 1.1,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TempoEstimate {
    pub tempo: Tempo,
    pub time_signature: TimeSignature,
    /// Tempo before clamping; `None` for the fallback.
    pub raw_bpm: Option<f64>,
    pub confidence: f32,
}

impl TempoEstimate {
    pub fn is_fallback(&self) -> bool {
        self.raw_bpm.is_none()
    }
}

/// Global tempo and meter from the autocorrelation of the mix's onset
/// strength.
pub struct TempoEstimator {
    config: TempoConfig,
}

impl TempoEstimator {
    pub fn new(config: TempoConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TempoConfig {
        &self.config
    }

    pub fn fallback(&self) -> TempoEstimate {
        TempoEstimate {
            tempo: Tempo::clamped(self.config.fallback_bpm),
            time_signature: TimeSignature::COMMON,
            raw_bpm: None,
            confidence: 0.0,
        }
    }

    #[instrument(skip(self, mix), fields(duration = mix.duration()))]
    pub fn estimate(&self, mix: &WaveformBuffer) -> TempoEstimate {
        match self.analyse(mix) {
            Some(estimate) => {
                info!(
                    bpm = estimate.tempo.bpm(),
                    time_signature = %estimate.time_signature,
                    confidence = estimate.confidence,
                    "estimated tempo"
                );
                estimate
            }
            None => {
                let estimate = self.fallback();
                info!(bpm = estimate.tempo.bpm(), "tempo unclear, using fallback");
                estimate
            }
        }
    }

    fn analyse(&self, mix: &WaveformBuffer) -> Option<TempoEstimate> {
        if mix.is_silent() {
            return None;
        }
        let stft = match Stft::new(self.config.n_fft, self.config.hop) {
            Ok(stft) => stft,
            Err(err) => {
                warn!(error = %err, "invalid tempo frame geometry");
                return None;
            }
        };
        let magnitudes = stft.magnitudes(&mix.mixdown()).ok()?;
        let mut envelope = spectral_flux(&magnitudes, None);
        let mean = envelope.iter().sum::<f32>() / envelope.len().max(1) as f32;
        envelope.iter_mut().for_each(|value| *value -= mean);

        let frame_rate = mix.sample_rate() as f64 / self.config.hop as f64;
        let lag_for = |bpm: f64| 60.0 * frame_rate / bpm;
        let min_lag = (lag_for(self.config.max_raw_bpm).floor() as usize).max(1);
        let max_lag = (lag_for(self.config.min_raw_bpm).ceil() as usize).min(envelope.len() / 2);
        if max_lag <= min_lag + 1 {
            debug!(frames = envelope.len(), "too short for tempo analysis");
            return None;
        }

        let ac = autocorrelation(&envelope, 4 * max_lag + 4);
        if ac[0] <= 0.0 {
            return None;
        }

        let mut best: Option<(usize, f64)> = None;
        for lag in min_lag..=max_lag {
            if !(ac[lag] > 0.0 && ac[lag] >= ac[lag - 1] && ac[lag] >= ac[lag + 1]) {
                continue;
            }
            let bpm = 60.0 * frame_rate / lag as f64;
            let score = ac[lag] as f64 * self.prior(bpm);
            if best.map_or(true, |(_, top)| score > top) {
                best = Some((lag, score));
            }
        }
        let (lag, _) = best?;
        let confidence = ac[lag] / ac[0];
        debug!(lag, confidence, "autocorrelation peak");
        if confidence < self.config.min_confidence {
            return None;
        }

        let precise_lag = lag as f64 + parabolic_offset(ac[lag - 1], ac[lag], ac[lag + 1]);
        let raw = 60.0 * frame_rate / precise_lag;
        let raw = (raw * 100.0).round() / 100.0;
        let tempo = Tempo::clamped(raw);
        if tempo.bpm() != raw {
            debug!(raw, clamped = tempo.bpm(), "tempo clamped to notated range");
        }

        let triple = peak_near(&ac, precise_lag * 3.0);
        let quadruple = peak_near(&ac, precise_lag * 4.0);
        let time_signature = match (triple, quadruple) {
            (Some(three), Some(four))
                if three / ac[0] >= self.config.min_confidence
                    && three > self.config.triple_meter_ratio * four.max(0.0) =>
            {
                TimeSignature::WALTZ
            }
            _ => TimeSignature::COMMON,
        };

        Some(TempoEstimate {
            tempo,
            time_signature,
            raw_bpm: Some(raw),
            confidence,
        })
    }

    /// Log-normal preference around the configured centre tempo.
    fn prior(&self, bpm: f64) -> f64 {
        let octaves = (bpm / self.config.prior_center_bpm).log2() / self.config.prior_octaves;
        (-0.5 * octaves * octaves).exp()
    }
}

impl Default for TempoEstimator {
    fn default() -> Self {
        Self::new(TempoConfig::default())
    }
}

/// Unbiased autocorrelation for lags `0..=max_lag`; lags past the signal
/// are zero.
fn autocorrelation(signal: &[f32], max_lag: usize) -> Vec<f32> {
    (0..=max_lag)
        .map(|lag| {
            if lag >= signal.len() {
                return 0.0;
            }
            let count = signal.len() - lag;
            let sum: f64 = signal[..count]
                .iter()
                .zip(&signal[lag..])
                .map(|(&a, &b)| a as f64 * b as f64)
                .sum();
            (sum / count as f64) as f32
        })
        .collect()
}

fn parabolic_offset(a: f32, b: f32, c: f32) -> f64 {
    let denom = (a - 2.0 * b + c) as f64;
    if denom.abs() < f64::EPSILON {
        0.0
    } else {
        (0.5 * (a - c) as f64 / denom).clamp(-0.5, 0.5)
    }
}

/// Largest autocorrelation value within one lag of `lag`.
fn peak_near(ac: &[f32], lag: f64) -> Option<f32> {
    let center = lag.round() as usize;
    if center + 1 >= ac.len() || center == 0 {
        return None;
    }
    Some(ac[center - 1].max(ac[center]).max(ac[center + 1]))
}
