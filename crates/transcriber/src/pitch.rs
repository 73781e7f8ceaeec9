//! Fundamental-frequency estimation: YIN for monophonic stems, iterative
//! harmonic salience for polyphonic ones, and per-instrument range priors.

use stemscore_domain::pitch::{frequency_to_midi, midi_to_frequency};
use stemscore_domain::InstrumentClass;

/// Weight of the `h`-th harmonic relative to the previous one.
const HARMONIC_DECAY: f32 = 0.8;
/// A candidate only counts if its own fundamental carries this share of the
/// loudest bin.
const FUNDAMENTAL_FLOOR: f32 = 0.1;
/// Bins cleared on each side of a harmonic once its voice is taken.
const SUPPRESS_BINS: usize = 2;

/// A frequency estimate with a 0..=1 confidence.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PitchEstimate {
    pub frequency: f64,
    pub confidence: f32,
}

/// YIN over one frame. Returns `None` when no lag dips under `threshold`,
/// i.e. the frame is unvoiced.
pub fn yin(
    frame: &[f32],
    sample_rate: u32,
    min_hz: f64,
    max_hz: f64,
    threshold: f32,
) -> Option<PitchEstimate> {
    let rate = sample_rate as f64;
    let tau_min = ((rate / max_hz).floor() as usize).max(2);
    let mut tau_max = (rate / min_hz).ceil() as usize;
    if frame.len() < 2 * tau_max {
        tau_max = frame.len() / 2;
    }
    if tau_max <= tau_min + 1 {
        return None;
    }
    let window = frame.len() - tau_max;

    let mut cmnd = vec![1.0f32; tau_max + 1];
    let mut running = 0.0f32;
    for tau in 1..=tau_max {
        let diff: f32 = (0..window)
            .map(|j| {
                let delta = frame[j] - frame[j + tau];
                delta * delta
            })
            .sum();
        running += diff;
        cmnd[tau] = if running > 0.0 {
            diff * tau as f32 / running
        } else {
            1.0
        };
    }

    let mut tau = tau_min;
    let found = loop {
        if tau >= tau_max {
            break None;
        }
        if cmnd[tau] < threshold {
            while tau + 1 < tau_max && cmnd[tau + 1] < cmnd[tau] {
                tau += 1;
            }
            break Some(tau);
        }
        tau += 1;
    }?;

    let refined = parabolic_peak(&cmnd, found);
    Some(PitchEstimate {
        frequency: rate / refined,
        confidence: (1.0 - cmnd[found]).clamp(0.0, 1.0),
    })
}

/// Sub-sample position of the extremum at `index` from its two neighbours.
fn parabolic_peak(values: &[f32], index: usize) -> f64 {
    if index == 0 || index + 1 >= values.len() {
        return index as f64;
    }
    let (a, b, c) = (
        values[index - 1] as f64,
        values[index] as f64,
        values[index + 1] as f64,
    );
    let denom = a - 2.0 * b + c;
    if denom.abs() < f64::EPSILON {
        return index as f64;
    }
    index as f64 + (0.5 * (a - c) / denom).clamp(-0.5, 0.5)
}

/// Magnitude spectrum with its bin spacing.
pub struct Spectrum<'a> {
    pub magnitudes: &'a [f32],
    pub bin_hz: f32,
}

impl Spectrum<'_> {
    fn bin_of(&self, hz: f64) -> usize {
        (hz / self.bin_hz as f64).round() as usize
    }

    /// Largest bin within one bin of `hz` in `values`.
    fn peak_near(&self, values: &[f32], hz: f64) -> Option<(usize, f32)> {
        let center = self.bin_of(hz);
        if center >= values.len() {
            return None;
        }
        let lo = center.saturating_sub(1);
        let hi = (center + 1).min(values.len() - 1);
        (lo..=hi)
            .map(|bin| (bin, values[bin]))
            .max_by(|a, b| a.1.total_cmp(&b.1).then(b.0.cmp(&a.0)))
    }
}

/// Iteratively picks the most salient harmonic series, removes its partials
/// and repeats until `max_voices` are found or the next voice is weaker than
/// `ratio` times the first. Confidence is salience relative to the first
/// voice.
pub fn polyphonic_pitches(
    spectrum: &Spectrum<'_>,
    min_hz: f64,
    max_hz: f64,
    max_voices: usize,
    ratio: f32,
    harmonics: usize,
) -> Vec<PitchEstimate> {
    let global = spectrum.magnitudes.iter().copied().fold(0.0f32, f32::max);
    if global <= 0.0 {
        return Vec::new();
    }
    let nyquist = spectrum.bin_hz as f64 * (spectrum.magnitudes.len() - 1) as f64;
    let low_key = frequency_to_midi(min_hz).ceil() as i32;
    let high_key = frequency_to_midi(max_hz.min(nyquist)).floor() as i32;
    let candidates: Vec<f64> = (low_key..=high_key)
        .map(|key| midi_to_frequency(key as f64))
        .collect();

    let mut residual = spectrum.magnitudes.to_vec();
    let mut voices = Vec::new();
    let mut first: Option<f32> = None;

    while voices.len() < max_voices {
        let mut best: Option<(f64, f32)> = None;
        for &f0 in &candidates {
            let Some((_, fundamental)) = spectrum.peak_near(&residual, f0) else {
                continue;
            };
            if fundamental < FUNDAMENTAL_FLOOR * global {
                continue;
            }
            let salience = harmonic_sum(spectrum, &residual, f0, harmonics, nyquist);
            if best.map_or(true, |(_, score)| salience > score) {
                best = Some((f0, salience));
            }
        }
        let Some((f0, salience)) = best else {
            break;
        };
        let reference = *first.get_or_insert(salience);
        if salience <= 0.0 || salience < ratio * reference {
            break;
        }

        let Some((bin, _)) = spectrum.peak_near(&residual, f0) else {
            break;
        };
        let refined = parabolic_peak(&residual, bin) * spectrum.bin_hz as f64;
        voices.push(PitchEstimate {
            frequency: refined,
            confidence: (salience / reference).min(1.0),
        });

        for h in 1..=harmonics {
            let center = spectrum.bin_of(refined * h as f64);
            if center >= residual.len() {
                break;
            }
            let lo = center.saturating_sub(SUPPRESS_BINS);
            let hi = (center + SUPPRESS_BINS).min(residual.len() - 1);
            residual[lo..=hi].iter_mut().for_each(|value| *value = 0.0);
        }
    }
    voices
}

fn harmonic_sum(spectrum: &Spectrum<'_>, residual: &[f32], f0: f64, harmonics: usize, nyquist: f64) -> f32 {
    let mut weight = 1.0f32;
    let mut total = 0.0f32;
    for h in 1..=harmonics {
        let hz = f0 * h as f64;
        if hz > nyquist {
            break;
        }
        if let Some((_, value)) = spectrum.peak_near(residual, hz) {
            total += weight * value;
        }
        weight *= HARMONIC_DECAY;
    }
    total
}

/// Typical sounding range of an instrument class. Estimates outside the
/// range are kept but trusted less.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PitchPrior {
    pub low_hz: f64,
    pub high_hz: f64,
}

impl PitchPrior {
    pub fn for_instrument(instrument: InstrumentClass) -> Option<Self> {
        let (low, high) = match instrument {
            InstrumentClass::Vocals => (60, 76),
            InstrumentClass::Piano => (48, 67),
            InstrumentClass::Bass => (28, 43),
            InstrumentClass::Guitar => (40, 64),
            InstrumentClass::Other => (60, 67),
            InstrumentClass::Drums | InstrumentClass::Unknown => return None,
        };
        Some(Self {
            low_hz: midi_to_frequency(low as f64),
            high_hz: midi_to_frequency(high as f64),
        })
    }

    /// 1 inside the range, halving for every two octaves outside it.
    pub fn weight(&self, hz: f64) -> f32 {
        let octaves = if hz < self.low_hz {
            (self.low_hz / hz).log2()
        } else if hz > self.high_hz {
            (hz / self.high_hz).log2()
        } else {
            0.0
        };
        0.5f64.powf(octaves / 2.0) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::f32::consts::PI;

    fn sine(freq: f32, rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * PI * freq * i as f32 / rate as f32).sin())
            .collect()
    }

    #[test]
    fn yin_finds_a440() {
        let frame = sine(440.0, 44_100, 4096);
        let estimate = yin(&frame, 44_100, 30.0, 4200.0, 0.15).unwrap();
        assert_abs_diff_eq!(estimate.frequency, 440.0, epsilon = 2.0);
        assert!(estimate.confidence > 0.9);
    }

    #[test]
    fn yin_handles_low_bass() {
        let frame = sine(55.0, 44_100, 4096);
        let estimate = yin(&frame, 44_100, 30.0, 4200.0, 0.15).unwrap();
        assert_abs_diff_eq!(estimate.frequency, 55.0, epsilon = 0.5);
    }

    #[test]
    fn yin_rejects_silence() {
        assert!(yin(&vec![0.0; 4096], 44_100, 30.0, 4200.0, 0.15).is_none());
    }

    fn peaks(spec: &mut [f32], bin_hz: f32, freqs: &[(f32, f32)]) {
        for &(freq, level) in freqs {
            let bin = (freq / bin_hz).round() as usize;
            spec[bin] = level;
            spec[bin - 1] = level * 0.5;
            spec[bin + 1] = level * 0.5;
        }
    }

    #[test]
    fn salience_separates_two_voices() {
        let bin_hz = 44_100.0 / 8192.0;
        let mut mags = vec![0.0f32; 4097];
        // C4 and E4, each with two overtones
        peaks(
            &mut mags,
            bin_hz,
            &[
                (261.63, 1.0),
                (523.25, 0.5),
                (784.88, 0.3),
                (329.63, 0.9),
                (659.26, 0.45),
                (988.88, 0.25),
            ],
        );
        let spectrum = Spectrum {
            magnitudes: &mags,
            bin_hz,
        };
        let voices = polyphonic_pitches(&spectrum, 27.5, 4200.0, 4, 0.5, 8);
        assert_eq!(voices.len(), 2);
        let mut keys: Vec<i32> = voices
            .iter()
            .map(|v| frequency_to_midi(v.frequency).round() as i32)
            .collect();
        keys.sort();
        assert_eq!(keys, vec![60, 64]);
        assert_abs_diff_eq!(voices[0].confidence, 1.0);
    }

    #[test]
    fn salience_of_silence_is_empty() {
        let mags = vec![0.0f32; 1025];
        let spectrum = Spectrum {
            magnitudes: &mags,
            bin_hz: 21.5,
        };
        assert!(polyphonic_pitches(&spectrum, 30.0, 4000.0, 4, 0.5, 8).is_empty());
    }

    #[test]
    fn priors_bias_without_excluding() {
        let bass = PitchPrior::for_instrument(InstrumentClass::Bass).unwrap();
        assert_abs_diff_eq!(bass.weight(55.0), 1.0);
        let two_octaves_up = bass.high_hz * 4.0;
        assert_abs_diff_eq!(bass.weight(two_octaves_up), 0.5, epsilon = 1e-6);
        assert!(bass.weight(2000.0) > 0.0);
        assert!(PitchPrior::for_instrument(InstrumentClass::Drums).is_none());
    }
}
