use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::{DomainError, InstrumentClass, Pitch};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum Dynamic {
    Pianissimo,
    Piano,
    MezzoPiano,
    MezzoForte,
    Forte,
    Fortissimo,
}

impl Dynamic {
    pub fn from_velocity(velocity: u8) -> Self {
        match velocity {
            0..=20 => Dynamic::Pianissimo,
            21..=50 => Dynamic::Piano,
            51..=80 => Dynamic::MezzoPiano,
            81..=100 => Dynamic::MezzoForte,
            101..=115 => Dynamic::Forte,
            _ => Dynamic::Fortissimo,
        }
    }

    /// Conventional score abbreviation (`pp`, `mf`, ...).
    pub fn mark(&self) -> &'static str {
        match self {
            Dynamic::Pianissimo => "pp",
            Dynamic::Piano => "p",
            Dynamic::MezzoPiano => "mp",
            Dynamic::MezzoForte => "mf",
            Dynamic::Forte => "f",
            Dynamic::Fortissimo => "ff",
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct NoteEvent {
    pub pitch: Pitch,
    /// Seconds from the start of the recording.
    pub onset: f64,
    /// Seconds, strictly positive.
    pub duration: f64,
    pub velocity: u8,
}

impl NoteEvent {
    pub fn new(pitch: Pitch, onset: f64, duration: f64, velocity: u8) -> Result<Self, DomainError> {
        if !onset.is_finite() || onset < 0.0 {
            return Err(DomainError::validation("note onset must be finite and non-negative"));
        }
        if !duration.is_finite() || duration <= 0.0 {
            return Err(DomainError::validation("note duration must be positive"));
        }
        if velocity > 127 {
            return Err(DomainError::validation("note velocity must be within 0..=127"));
        }
        Ok(Self {
            pitch,
            onset,
            duration,
            velocity,
        })
    }

    pub fn end(&self) -> f64 {
        self.onset + self.duration
    }

    pub fn dynamic(&self) -> Dynamic {
        Dynamic::from_velocity(self.velocity)
    }

    pub fn onset_millis(&self) -> u64 {
        (self.onset * 1000.0).round() as u64
    }

    pub fn duration_millis(&self) -> u64 {
        ((self.duration * 1000.0).round() as u64).max(1)
    }

    /// Track order: onset ascending, then pitch ascending, then duration.
    pub fn track_order(a: &NoteEvent, b: &NoteEvent) -> Ordering {
        a.onset
            .total_cmp(&b.onset)
            .then_with(|| a.pitch.cmp(&b.pitch))
            .then_with(|| a.duration.total_cmp(&b.duration))
            .then_with(|| a.velocity.cmp(&b.velocity))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub name: String,
    pub instrument: InstrumentClass,
    pub notes: Vec<NoteEvent>,
    /// Serialized note data kept alongside the notes for caching.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_notes: Option<String>,
}

impl Track {
    /// Builds a track named after its instrument, sorting notes into track order.
    pub fn new(instrument: InstrumentClass, mut notes: Vec<NoteEvent>) -> Self {
        notes.sort_by(NoteEvent::track_order);
        Self {
            name: instrument.display_name().to_string(),
            instrument,
            notes,
            raw_notes: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    pub fn is_sorted(&self) -> bool {
        self.notes
            .windows(2)
            .all(|pair| NoteEvent::track_order(&pair[0], &pair[1]) != Ordering::Greater)
    }

    /// First `limit` pitch names, space separated.
    pub fn pitch_preview(&self, limit: usize) -> String {
        self.notes
            .iter()
            .take(limit)
            .map(|note| note.pitch.to_string())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(pitch: &str, onset: f64) -> NoteEvent {
        NoteEvent::new(pitch.parse().unwrap(), onset, 0.25, 90).unwrap()
    }

    #[test]
    fn dynamic_from_velocity() {
        assert_eq!(Dynamic::from_velocity(10), Dynamic::Pianissimo);
        assert_eq!(Dynamic::from_velocity(55), Dynamic::MezzoPiano);
        assert_eq!(Dynamic::from_velocity(120), Dynamic::Fortissimo);
        assert_eq!(Dynamic::MezzoForte.mark(), "mf");
    }

    #[test]
    fn note_event_validation() {
        let pitch: Pitch = "A4".parse().unwrap();
        assert!(NoteEvent::new(pitch, -0.1, 0.5, 90).is_err());
        assert!(NoteEvent::new(pitch, 0.0, 0.0, 90).is_err());
        assert!(NoteEvent::new(pitch, 0.0, 0.5, 128).is_err());
        let event = NoteEvent::new(pitch, 1.0, 0.5, 90).unwrap();
        assert_eq!(event.onset_millis(), 1000);
        assert_eq!(event.duration_millis(), 500);
    }

    #[test]
    fn track_sorts_by_onset_then_pitch() {
        let track = Track::new(
            InstrumentClass::Piano,
            vec![note("G4", 1.0), note("C4", 1.0), note("E4", 0.5)],
        );
        let names: Vec<String> = track.notes.iter().map(|n| n.pitch.to_string()).collect();
        assert_eq!(names, vec!["E4", "C4", "G4"]);
        assert!(track.is_sorted());
        assert_eq!(track.name, "Piano");
        assert_eq!(track.pitch_preview(2), "E4 C4");
    }
}
