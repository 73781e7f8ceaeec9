use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use stemscore_audio::dsp::{block_rms, rms};
use stemscore_audio::{spectral_flux, AudioError, Stft};

use crate::onset::{adaptive_threshold, normalize, pick_peaks, refine_onset};
use crate::pitch::{polyphonic_pitches, yin, PitchEstimate, PitchPrior, Spectrum};
use crate::separation::Stem;

/// Samples per block when refining onsets.
const REFINE_BLOCK: usize = 64;
/// Samples per block when searching for the release.
const RELEASE_BLOCK: usize = 512;
/// Post-onset energy must reach this share of the pre-onset energy.
const RISE_RATIO: f32 = 0.8;
/// Pitch analysis starts this long after the onset to skip the attack.
const ATTACK_SKIP_S: f64 = 0.01;
/// Voices are estimated from at most this much of each note.
const SALIENCE_SPAN_S: f64 = 0.5;
/// Drum timbre is measured over the first part of each hit.
const CENTROID_SPAN_S: f64 = 0.05;
const YIN_FRAMES: usize = 3;

#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("onset analysis failed: {0}")]
    Analysis(String),
    #[error("detection was cancelled")]
    Cancelled,
}

impl From<AudioError> for DetectionError {
    fn from(err: AudioError) -> Self {
        DetectionError::Analysis(err.to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DetectedPitch {
    Frequency(f64),
    /// Percussive hit, described by its spectral centroid.
    Unpitched { centroid_hz: f64 },
}

/// Detected event before quantization. Times are seconds from the start
/// of the stem.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RawEvent {
    pub onset: f64,
    pub offset: f64,
    pub pitch: DetectedPitch,
    /// Peak absolute sample between onset and the next onset.
    pub amplitude: f32,
    pub confidence: f32,
}

impl RawEvent {
    pub fn frequency(&self) -> Option<f64> {
        match self.pitch {
            DetectedPitch::Frequency(hz) => Some(hz),
            DetectedPitch::Unpitched { .. } => None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DetectionConfig {
    pub n_fft: usize,
    pub hop: usize,
    /// Gain inside `ln(1 + g * m)` before the spectral flux.
    pub flux_compression: f32,
    pub threshold_past_ms: f64,
    pub threshold_ahead_ms: f64,
    /// Standard deviations above the local mean an onset must reach.
    pub threshold_k: f32,
    pub threshold_delta: f32,
    pub min_onset_gap_ms: f64,
    /// Frames quieter than this RMS never start a note.
    pub onset_gate_rms: f32,
    /// A note ends once its level falls below this share of its peak.
    pub release_ratio: f32,
    pub min_frequency_hz: f64,
    pub max_frequency_hz: f64,
    pub yin_threshold: f32,
    pub yin_window: usize,
    pub salience_n_fft: usize,
    pub harmonics: usize,
    pub max_polyphony: usize,
    /// Further voices must reach this share of the strongest voice.
    pub polyphony_ratio: f32,
    pub min_confidence: f32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            n_fft: 1024,
            hop: 256,
            flux_compression: 10.0,
            threshold_past_ms: 500.0,
            threshold_ahead_ms: 30.0,
            threshold_k: 1.5,
            threshold_delta: 0.05,
            min_onset_gap_ms: 50.0,
            onset_gate_rms: 3e-3,
            release_ratio: 0.1,
            min_frequency_hz: 30.0,
            max_frequency_hz: 4200.0,
            yin_threshold: 0.15,
            yin_window: 1024,
            salience_n_fft: 8192,
            harmonics: 8,
            max_polyphony: 4,
            polyphony_ratio: 0.5,
            min_confidence: 0.3,
        }
    }
}

/// Turns one stem into raw events. The pipeline runs one call per stem and
/// treats an `Analysis` error as a failure of that stem alone.
pub trait EventDetector: Send + Sync {
    fn detect(&self, stem: &Stem, cancel: &CancellationToken) -> Result<Vec<RawEvent>, DetectionError>;
}

impl EventDetector for PitchOnsetDetector {
    fn detect(&self, stem: &Stem, cancel: &CancellationToken) -> Result<Vec<RawEvent>, DetectionError> {
        PitchOnsetDetector::detect(self, stem, cancel)
    }
}

/// Finds note events in one stem.
pub struct PitchOnsetDetector {
    config: DetectionConfig,
    stft: Stft,
    salience: Stft,
}

impl PitchOnsetDetector {
    pub fn new(config: DetectionConfig) -> Result<Self, DetectionError> {
        let stft = Stft::new(config.n_fft, config.hop)?;
        let salience = Stft::new(config.salience_n_fft, config.salience_n_fft / 4)?;
        Ok(Self {
            config,
            stft,
            salience,
        })
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    #[instrument(skip(self, stem, cancel), fields(instrument = %stem.instrument()))]
    pub fn detect(&self, stem: &Stem, cancel: &CancellationToken) -> Result<Vec<RawEvent>, DetectionError> {
        check(cancel)?;
        let instrument = stem.instrument();
        let sample_rate = stem.waveform().sample_rate();
        let samples = stem.waveform().mixdown();
        if samples.iter().all(|&s| s == 0.0) {
            return Ok(Vec::new());
        }

        let onsets = self.onsets(&samples, sample_rate)?;
        debug!(onsets = onsets.len(), "picked onsets");
        check(cancel)?;

        let prior = PitchPrior::for_instrument(instrument);
        let mut events = Vec::new();
        for (index, &onset) in onsets.iter().enumerate() {
            check(cancel)?;
            let segment_end = onsets.get(index + 1).copied().unwrap_or(samples.len());
            let offset = self.release(&samples[onset..segment_end]) + onset;
            let amplitude = samples[onset..segment_end]
                .iter()
                .fold(0.0f32, |peak, s| peak.max(s.abs()));
            let onset_s = onset as f64 / sample_rate as f64;
            let offset_s = offset as f64 / sample_rate as f64;

            if instrument.is_percussive() {
                let centroid_hz = self.centroid(&samples, onset, segment_end, sample_rate)?;
                events.push(RawEvent {
                    onset: onset_s,
                    offset: offset_s,
                    pitch: DetectedPitch::Unpitched { centroid_hz },
                    amplitude,
                    confidence: 1.0,
                });
                continue;
            }

            let estimates = if instrument.is_polyphonic() {
                self.voices(&samples[onset..offset], sample_rate)?
            } else {
                self.monophonic(&samples[onset..offset], sample_rate)
                    .into_iter()
                    .collect()
            };
            if estimates.is_empty() {
                debug!(onset = onset_s, "no pitch found, skipping onset");
            }
            for estimate in estimates {
                let weight = prior.map_or(1.0, |prior| prior.weight(estimate.frequency));
                let confidence = estimate.confidence * weight;
                if confidence < self.config.min_confidence {
                    debug!(onset = onset_s, frequency = estimate.frequency, confidence, "low confidence");
                    continue;
                }
                events.push(RawEvent {
                    onset: onset_s,
                    offset: offset_s,
                    pitch: DetectedPitch::Frequency(estimate.frequency),
                    amplitude,
                    confidence,
                });
            }
        }

        events.sort_by(|a, b| {
            a.onset
                .total_cmp(&b.onset)
                .then_with(|| a.frequency().unwrap_or(0.0).total_cmp(&b.frequency().unwrap_or(0.0)))
        });
        info!(events = events.len(), "detected events");
        Ok(events)
    }

    /// Onset positions in samples, ascending and at least one refractory gap
    /// apart.
    fn onsets(&self, samples: &[f32], sample_rate: u32) -> Result<Vec<usize>, DetectionError> {
        let magnitudes = self.stft.magnitudes(samples)?;
        let mut envelope = spectral_flux(&magnitudes, Some(self.config.flux_compression));
        normalize(&mut envelope);

        let frames_per_ms = sample_rate as f64 / self.config.hop as f64 / 1000.0;
        let past = (self.config.threshold_past_ms * frames_per_ms).round() as usize;
        let ahead = (self.config.threshold_ahead_ms * frames_per_ms).round() as usize;
        let gap = ((self.config.min_onset_gap_ms * frames_per_ms).round() as usize).max(1);
        let threshold = adaptive_threshold(
            &envelope,
            past,
            ahead,
            self.config.threshold_k,
            self.config.threshold_delta,
        );
        let peaks = pick_peaks(&envelope, &threshold, gap);

        let n_fft = self.config.n_fft;
        let min_gap_samples = gap * self.config.hop;
        let mut onsets: Vec<usize> = Vec::with_capacity(peaks.len());
        for frame in peaks {
            let coarse = (frame * self.config.hop).min(samples.len() - 1);
            let onset = refine_onset(samples, coarse, n_fft, REFINE_BLOCK).min(samples.len() - 1);
            let after = rms(&samples[onset..(onset + n_fft).min(samples.len())]);
            let before = rms(&samples[onset.saturating_sub(n_fft)..onset]);
            if after < self.config.onset_gate_rms || after < RISE_RATIO * before {
                continue;
            }
            if onsets.last().is_some_and(|&last| onset < last + min_gap_samples) {
                continue;
            }
            onsets.push(onset);
        }
        Ok(onsets)
    }

    /// Samples from the start of `segment` until its level decays below the
    /// release ratio, or the whole segment.
    fn release(&self, segment: &[f32]) -> usize {
        let blocks = block_rms(segment, RELEASE_BLOCK, RELEASE_BLOCK);
        let (loudest, peak) = blocks
            .iter()
            .copied()
            .enumerate()
            .fold((0, 0.0f32), |best, (i, v)| if v > best.1 { (i, v) } else { best });
        blocks
            .iter()
            .enumerate()
            .skip(loudest + 1)
            .find(|(_, &level)| level < self.config.release_ratio * peak)
            .map(|(index, _)| index * RELEASE_BLOCK)
            .unwrap_or(segment.len())
            .clamp(1, segment.len().max(1))
    }

    fn monophonic(&self, note: &[f32], sample_rate: u32) -> Option<PitchEstimate> {
        let config = &self.config;
        let lag = (sample_rate as f64 / config.min_frequency_hz).ceil() as usize;
        let frame_len = config.yin_window + lag;
        let skip = ((ATTACK_SKIP_S * sample_rate as f64) as usize).min(note.len() / 4);
        let step = (config.yin_window / 2).max(1);

        let mut estimates: Vec<PitchEstimate> = (0..YIN_FRAMES)
            .map(|i| skip + i * step)
            .take_while(|&start| start + frame_len <= note.len())
            .filter_map(|start| {
                yin(
                    &note[start..start + frame_len],
                    sample_rate,
                    config.min_frequency_hz,
                    config.max_frequency_hz,
                    config.yin_threshold,
                )
            })
            .collect();
        if estimates.is_empty() && note.len() < frame_len + skip {
            // shorter than one full frame
            estimates.extend(yin(
                &note[skip..],
                sample_rate,
                config.min_frequency_hz,
                config.max_frequency_hz,
                config.yin_threshold,
            ));
        }
        if estimates.is_empty() {
            return None;
        }
        estimates.sort_by(|a, b| a.frequency.total_cmp(&b.frequency));
        Some(estimates[estimates.len() / 2])
    }

    fn voices(&self, note: &[f32], sample_rate: u32) -> Result<Vec<PitchEstimate>, DetectionError> {
        let skip = ((ATTACK_SKIP_S * sample_rate as f64) as usize).min(note.len() / 4);
        let span = (SALIENCE_SPAN_S * sample_rate as f64) as usize;
        let body = &note[skip..(skip + span).min(note.len())];
        if body.is_empty() {
            return Ok(Vec::new());
        }
        let magnitudes = self.salience.magnitudes(body)?;
        let frames = magnitudes.nrows().max(1) as f32;
        let average: Vec<f32> = magnitudes
            .columns()
            .into_iter()
            .map(|column| column.sum() / frames)
            .collect();
        let spectrum = Spectrum {
            magnitudes: &average,
            bin_hz: self.salience.bin_frequency(1, sample_rate),
        };
        Ok(polyphonic_pitches(
            &spectrum,
            self.config.min_frequency_hz,
            self.config.max_frequency_hz,
            self.config.max_polyphony,
            self.config.polyphony_ratio,
            self.config.harmonics,
        ))
    }

    fn centroid(
        &self,
        samples: &[f32],
        onset: usize,
        segment_end: usize,
        sample_rate: u32,
    ) -> Result<f64, DetectionError> {
        let span = (CENTROID_SPAN_S * sample_rate as f64) as usize;
        let end = (onset + span.max(self.config.n_fft)).min(segment_end.max(onset + 1));
        let magnitudes = self.stft.magnitudes(&samples[onset..end])?;
        let mut weighted = 0.0f64;
        let mut total = 0.0f64;
        for row in magnitudes.rows() {
            for (bin, &value) in row.iter().enumerate() {
                weighted += self.stft.bin_frequency(bin, sample_rate) as f64 * value as f64;
                total += value as f64;
            }
        }
        Ok(if total > 0.0 { weighted / total } else { 0.0 })
    }
}

fn check(cancel: &CancellationToken) -> Result<(), DetectionError> {
    if cancel.is_cancelled() {
        Err(DetectionError::Cancelled)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::f32::consts::PI;
    use stemscore_audio::WaveformBuffer;
    use stemscore_domain::InstrumentClass;

    const RATE: u32 = 44_100;

    fn detector() -> PitchOnsetDetector {
        PitchOnsetDetector::new(DetectionConfig::default()).unwrap()
    }

    fn add_tone(samples: &mut [f32], freq: f32, start: f64, end: f64, level: f32) {
        let first = (start * RATE as f64) as usize;
        let last = ((end * RATE as f64) as usize).min(samples.len());
        for i in first..last {
            samples[i] += level * (2.0 * PI * freq * (i - first) as f32 / RATE as f32).sin();
        }
    }

    fn stem(instrument: InstrumentClass, samples: Vec<f32>) -> Stem {
        Stem::new(instrument, WaveformBuffer::mono(RATE, samples).unwrap())
    }

    #[test]
    fn single_tone_yields_one_event() {
        let mut samples = vec![0.0; 2 * RATE as usize];
        add_tone(&mut samples, 440.0, 0.5, 1.5, 0.8);
        let events = detector()
            .detect(&stem(InstrumentClass::Other, samples), &CancellationToken::new())
            .unwrap();
        assert_eq!(events.len(), 1);
        let event = events[0];
        assert_abs_diff_eq!(event.onset, 0.5, epsilon = 0.02);
        assert_abs_diff_eq!(event.offset, 1.5, epsilon = 0.03);
        assert_abs_diff_eq!(event.frequency().unwrap(), 440.0, epsilon = 3.0);
        assert_abs_diff_eq!(event.amplitude, 0.8, epsilon = 0.01);
    }

    #[test]
    fn melody_yields_ordered_events() {
        let mut samples = vec![0.0; 2 * RATE as usize];
        add_tone(&mut samples, 220.0, 0.25, 0.7, 0.7);
        add_tone(&mut samples, 330.0, 1.0, 1.5, 0.7);
        let events = detector()
            .detect(&stem(InstrumentClass::Vocals, samples), &CancellationToken::new())
            .unwrap();
        assert_eq!(events.len(), 2);
        assert!(events[0].onset < events[1].onset);
        assert_abs_diff_eq!(events[0].frequency().unwrap(), 220.0, epsilon = 2.0);
        assert_abs_diff_eq!(events[1].frequency().unwrap(), 330.0, epsilon = 3.0);
    }

    #[test]
    fn percussive_stems_are_unpitched() {
        let mut samples = vec![0.0f32; 2 * RATE as usize];
        for hit in [0.25, 0.75, 1.25, 1.75] {
            let start = (hit * RATE as f64) as usize;
            for (offset, sample) in samples.iter_mut().skip(start).take(64).enumerate() {
                *sample = if offset % 2 == 0 { 0.5 } else { -0.5 };
            }
        }
        let events = detector()
            .detect(&stem(InstrumentClass::Drums, samples), &CancellationToken::new())
            .unwrap();
        assert_eq!(events.len(), 4);
        for (event, hit) in events.iter().zip([0.25, 0.75, 1.25, 1.75]) {
            assert_abs_diff_eq!(event.onset, hit, epsilon = 0.01);
            assert!(matches!(event.pitch, DetectedPitch::Unpitched { centroid_hz } if centroid_hz > 2000.0));
        }
    }

    #[test]
    fn polyphonic_stems_report_chords() {
        let mut samples = vec![0.0; RATE as usize];
        add_tone(&mut samples, 261.63, 0.2, 0.9, 0.4);
        add_tone(&mut samples, 392.0, 0.2, 0.9, 0.4);
        let events = detector()
            .detect(&stem(InstrumentClass::Piano, samples), &CancellationToken::new())
            .unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].onset, events[1].onset);
        assert_abs_diff_eq!(events[0].frequency().unwrap(), 261.63, epsilon = 4.0);
        assert_abs_diff_eq!(events[1].frequency().unwrap(), 392.0, epsilon = 4.0);
    }

    #[test]
    fn silence_has_no_events() {
        let events = detector()
            .detect(
                &stem(InstrumentClass::Bass, vec![0.0; RATE as usize]),
                &CancellationToken::new(),
            )
            .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn detection_is_deterministic() {
        let mut samples = vec![0.0; RATE as usize];
        add_tone(&mut samples, 110.0, 0.1, 0.6, 0.9);
        let stem = stem(InstrumentClass::Bass, samples);
        let first = detector().detect(&stem, &CancellationToken::new()).unwrap();
        let second = detector().detect(&stem, &CancellationToken::new()).unwrap();
        assert_eq!(first, second);
        assert!(!first.is_empty());
    }

    #[test]
    fn cancelled_detection_stops() {
        let token = CancellationToken::new();
        token.cancel();
        let mut samples = vec![0.0; RATE as usize];
        add_tone(&mut samples, 440.0, 0.1, 0.6, 0.9);
        let result = detector().detect(&stem(InstrumentClass::Other, samples), &token);
        assert!(matches!(result, Err(DetectionError::Cancelled)));
    }
}
