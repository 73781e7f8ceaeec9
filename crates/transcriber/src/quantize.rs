use serde::{Deserialize, Serialize};
use tracing::debug;

use stemscore_domain::{Accidental, Letter, NoteEvent, Pitch, Tempo, TimeSignature};

use crate::detection::{DetectedPitch, RawEvent};

/// Keeps exact midpoints on the later grid point despite rounding noise.
const SNAP_EPSILON: f64 = 1e-9;
/// Below this centroid a drum hit is notated as a kick.
const KICK_CENTROID_HZ: f64 = 150.0;
/// Below this centroid (and above the kick) it is notated as a snare.
const SNARE_CENTROID_HZ: f64 = 2000.0;

/// Rhythmic subdivision notes are snapped to.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GridResolution {
    Quarter,
    Eighth,
    #[default]
    Sixteenth,
    ThirtySecond,
    EighthTriplet,
    SixteenthTriplet,
}

impl GridResolution {
    /// Grid cells per whole note.
    pub fn divisions_per_whole(&self) -> u32 {
        match self {
            GridResolution::Quarter => 4,
            GridResolution::Eighth => 8,
            GridResolution::Sixteenth => 16,
            GridResolution::ThirtySecond => 32,
            GridResolution::EighthTriplet => 12,
            GridResolution::SixteenthTriplet => 24,
        }
    }

    /// Length of one grid cell. A beat is one `1/denominator` note.
    pub fn seconds(&self, tempo: Tempo, signature: TimeSignature) -> f64 {
        let whole = tempo.seconds_per_beat() * signature.denominator() as f64;
        whole / self.divisions_per_whole() as f64
    }
}

impl std::str::FromStr for GridResolution {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "quarter" | "1/4" => Ok(GridResolution::Quarter),
            "eighth" | "1/8" => Ok(GridResolution::Eighth),
            "sixteenth" | "1/16" => Ok(GridResolution::Sixteenth),
            "thirty_second" | "1/32" => Ok(GridResolution::ThirtySecond),
            "eighth_triplet" => Ok(GridResolution::EighthTriplet),
            "sixteenth_triplet" => Ok(GridResolution::SixteenthTriplet),
            other => Err(format!("unknown grid resolution `{other}`")),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QuantizerConfig {
    pub grid: GridResolution,
    /// Floor applied to velocities so quiet notes stay audible.
    pub min_velocity: u8,
}

impl Default for QuantizerConfig {
    fn default() -> Self {
        Self {
            grid: GridResolution::default(),
            min_velocity: 1,
        }
    }
}

/// Drum key for an unpitched hit, chosen by brightness.
pub fn drum_pitch(centroid_hz: f64) -> Pitch {
    if centroid_hz < KICK_CENTROID_HZ {
        Pitch::natural(Letter::C, 2)
    } else if centroid_hz < SNARE_CENTROID_HZ {
        Pitch::natural(Letter::D, 2)
    } else {
        Pitch::new(Letter::F, Accidental::Sharp, 2)
    }
}

pub fn velocity_from_amplitude(amplitude: f32, floor: u8) -> u8 {
    let scaled = (amplitude.clamp(0.0, 1.0) * 127.0).round() as u8;
    scaled.clamp(floor.min(127), 127)
}

/// Snaps events to a tempo grid.
pub struct NoteQuantizer {
    config: QuantizerConfig,
}

impl NoteQuantizer {
    pub fn new(config: QuantizerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &QuantizerConfig {
        &self.config
    }

    /// Notes in track order with onsets inside `[0, track_duration)` and ends
    /// at or before `track_duration`.
    pub fn quantize(
        &self,
        events: &[RawEvent],
        tempo: Tempo,
        signature: TimeSignature,
        track_duration: f64,
    ) -> Vec<NoteEvent> {
        let notes = events.iter().filter_map(|event| {
            let pitch = match event.pitch {
                DetectedPitch::Frequency(hz) => Pitch::from_frequency(hz)?,
                DetectedPitch::Unpitched { centroid_hz } => drum_pitch(centroid_hz),
            };
            let velocity = velocity_from_amplitude(event.amplitude, self.config.min_velocity);
            Some((pitch, event.onset, event.offset, velocity))
        });
        self.snap_all(notes, tempo, signature, track_duration)
    }

    /// Snaps already-notated events again. Quantized input comes back
    /// unchanged.
    pub fn requantize(
        &self,
        notes: &[NoteEvent],
        tempo: Tempo,
        signature: TimeSignature,
        track_duration: f64,
    ) -> Vec<NoteEvent> {
        let notes = notes
            .iter()
            .map(|note| (note.pitch, note.onset, note.end(), note.velocity));
        self.snap_all(notes, tempo, signature, track_duration)
    }

    fn snap_all(
        &self,
        notes: impl Iterator<Item = (Pitch, f64, f64, u8)>,
        tempo: Tempo,
        signature: TimeSignature,
        track_duration: f64,
    ) -> Vec<NoteEvent> {
        if !(track_duration > 0.0) {
            return Vec::new();
        }
        let grid = Grid::new(self.config.grid.seconds(tempo, signature), track_duration);
        let mut snapped: Vec<NoteEvent> = notes
            .filter_map(|(pitch, onset, offset, velocity)| grid.snap(pitch, onset, offset, velocity))
            .collect();
        snapped.sort_by(NoteEvent::track_order);

        // one note per pitch and onset: the longest, at the loudest velocity
        let mut merged: Vec<NoteEvent> = Vec::with_capacity(snapped.len());
        for note in snapped {
            match merged.last_mut() {
                Some(last) if last.pitch == note.pitch && last.onset == note.onset => {
                    last.duration = last.duration.max(note.duration);
                    last.velocity = last.velocity.max(note.velocity);
                }
                _ => merged.push(note),
            }
        }
        debug!(notes = merged.len(), grid = grid.step, "quantized notes");
        merged
    }
}

impl Default for NoteQuantizer {
    fn default() -> Self {
        Self::new(QuantizerConfig::default())
    }
}

struct Grid {
    step: f64,
    end: f64,
    /// Latest cell whose start lies strictly before the end of the track.
    last_cell: i64,
}

impl Grid {
    fn new(step: f64, end: f64) -> Self {
        let mut last_cell = ((end / step).ceil() as i64 - 1).max(0);
        while last_cell > 0 && last_cell as f64 * step >= end {
            last_cell -= 1;
        }
        Self {
            step,
            end,
            last_cell,
        }
    }

    fn cell(&self, time: f64) -> i64 {
        (time / self.step + 0.5 + SNAP_EPSILON).floor() as i64
    }

    fn snap(&self, pitch: Pitch, onset: f64, offset: f64, velocity: u8) -> Option<NoteEvent> {
        if !onset.is_finite() || !offset.is_finite() {
            return None;
        }
        let start_cell = self.cell(onset.max(0.0)).clamp(0, self.last_cell);
        let start = start_cell as f64 * self.step;
        if start >= self.end {
            return None;
        }

        let tolerance = SNAP_EPSILON * self.end.max(1.0);
        let mut stop = if offset >= self.end - tolerance {
            self.end
        } else {
            self.cell(offset) as f64 * self.step
        };
        if stop <= start {
            stop = (start_cell + 1) as f64 * self.step;
        }
        // a cell boundary a few ulps short of the end is the end
        if stop >= self.end - tolerance {
            stop = self.end;
        }
        let mut duration = stop.min(self.end) - start;
        while duration > 0.0 && start + duration > self.end {
            duration = f64::from_bits(duration.to_bits() - 1);
        }
        NoteEvent::new(pitch, start, duration, velocity).ok()
    }
}
