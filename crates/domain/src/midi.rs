use serde::{Deserialize, Serialize};

use crate::{DomainError, Track};

/// One note as a MIDI writer consumes it.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MidiNote {
    pub key: u8,
    pub onset_ms: u64,
    pub duration_ms: u64,
    pub velocity: u8,
}

/// Converts a track's notes to MIDI note records in track order.
pub fn midi_notes(track: &Track) -> Result<Vec<MidiNote>, DomainError> {
    track
        .notes
        .iter()
        .map(|note| {
            let key = note.pitch.midi_number();
            if !(0..=127).contains(&key) {
                return Err(DomainError::validation(format!(
                    "pitch {} has no MIDI key",
                    note.pitch
                )));
            }
            Ok(MidiNote {
                key: key as u8,
                onset_ms: note.onset_millis(),
                duration_ms: note.duration_millis(),
                velocity: note.velocity,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InstrumentClass, NoteEvent};

    #[test]
    fn converts_pitch_and_times() {
        let track = Track::new(
            InstrumentClass::Vocals,
            vec![
                NoteEvent::new("A4".parse().unwrap(), 1.0, 0.25, 100).unwrap(),
                NoteEvent::new("Bb3".parse().unwrap(), 0.1234, 0.0004, 64).unwrap(),
            ],
        );
        let notes = midi_notes(&track).unwrap();
        assert_eq!(
            notes[0],
            MidiNote {
                key: 58,
                onset_ms: 123,
                duration_ms: 1,
                velocity: 64
            }
        );
        assert_eq!(notes[1].key, 69);
        assert_eq!(notes[1].onset_ms, 1000);
        assert_eq!(notes[1].duration_ms, 250);
    }

    #[test]
    fn rejects_keys_outside_midi_range() {
        let track = Track::new(
            InstrumentClass::Piano,
            vec![NoteEvent::new("Cb-1".parse().unwrap(), 0.0, 0.5, 64).unwrap()],
        );
        assert!(midi_notes(&track).is_err());
    }
}
