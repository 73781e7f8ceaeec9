use serde::{Deserialize, Serialize};

use crate::{DomainError, ErrorKind, InstrumentClass, Tempo, TimeSignature, Track};

/// A stem that was separated but could not be transcribed.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StemFailure {
    pub instrument: InstrumentClass,
    pub kind: ErrorKind,
    pub message: String,
}

/// The assembled transcription of one recording. Deserialized results go
/// through the same checks as [`AnalysisResult::new`].
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", try_from = "AnalysisResultRecord")]
pub struct AnalysisResult {
    tracks: Vec<Track>,
    duration: f64,
    tempo: Tempo,
    time_signature: TimeSignature,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    failures: Vec<StemFailure>,
}

impl AnalysisResult {
    /// Validates every track against the recording duration before building
    /// the result.
    pub fn new(
        tracks: Vec<Track>,
        duration: f64,
        tempo: Tempo,
        time_signature: TimeSignature,
        failures: Vec<StemFailure>,
    ) -> Result<Self, DomainError> {
        if !duration.is_finite() || duration < 0.0 {
            return Err(DomainError::validation("duration must be finite and non-negative"));
        }
        let mut seen = Vec::with_capacity(tracks.len());
        for track in &tracks {
            if seen.contains(&track.instrument) {
                return Err(DomainError::validation(format!(
                    "duplicate track for instrument {}",
                    track.instrument
                )));
            }
            seen.push(track.instrument);
            validate_track(track, duration)?;
        }
        Ok(Self {
            tracks,
            duration,
            tempo,
            time_signature,
            failures,
        })
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn track(&self, instrument: InstrumentClass) -> Option<&Track> {
        self.tracks.iter().find(|track| track.instrument == instrument)
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn tempo(&self) -> Tempo {
        self.tempo
    }

    pub fn time_signature(&self) -> TimeSignature {
        self.time_signature
    }

    pub fn failures(&self) -> &[StemFailure] {
        &self.failures
    }

    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }

    pub fn note_count(&self) -> usize {
        self.tracks.iter().map(|track| track.notes.len()).sum()
    }
}

/// Wire shape of [`AnalysisResult`] before validation.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalysisResultRecord {
    tracks: Vec<Track>,
    duration: f64,
    tempo: Tempo,
    time_signature: TimeSignature,
    #[serde(default)]
    failures: Vec<StemFailure>,
}

impl TryFrom<AnalysisResultRecord> for AnalysisResult {
    type Error = DomainError;

    fn try_from(record: AnalysisResultRecord) -> Result<Self, Self::Error> {
        AnalysisResult::new(
            record.tracks,
            record.duration,
            record.tempo,
            record.time_signature,
            record.failures,
        )
    }
}

fn validate_track(track: &Track, duration: f64) -> Result<(), DomainError> {
    if !track.is_sorted() {
        return Err(DomainError::validation(format!(
            "{} notes are not in onset order",
            track.instrument
        )));
    }
    for note in &track.notes {
        if note.onset < 0.0 || note.onset >= duration {
            return Err(DomainError::validation(format!(
                "{} note {} starts at {:.6}s outside the {:.6}s recording",
                track.instrument, note.pitch, note.onset, duration
            )));
        }
        if note.duration <= 0.0 {
            return Err(DomainError::validation(format!(
                "{} note {} at {:.6}s has no duration",
                track.instrument, note.pitch, note.onset
            )));
        }
        if note.end() > duration {
            return Err(DomainError::validation(format!(
                "{} note {} at {:.6}s ends at {:.6}s past the {:.6}s recording",
                track.instrument,
                note.pitch,
                note.onset,
                note.end(),
                duration
            )));
        }
        if note.velocity > 127 {
            return Err(DomainError::validation(format!(
                "{} note {} has velocity {}",
                track.instrument, note.pitch, note.velocity
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NoteEvent;

    fn track_with(onset: f64, duration: f64) -> Track {
        Track::new(
            InstrumentClass::Bass,
            vec![NoteEvent::new("E1".parse().unwrap(), onset, duration, 80).unwrap()],
        )
    }

    #[test]
    fn accepts_notes_inside_duration() {
        let result = AnalysisResult::new(
            vec![track_with(1.0, 1.0)],
            2.0,
            Tempo::default(),
            TimeSignature::default(),
            Vec::new(),
        )
        .unwrap();
        assert_eq!(result.note_count(), 1);
        assert!(result.track(InstrumentClass::Bass).is_some());
        assert!(!result.is_partial());
    }

    #[test]
    fn rejects_notes_past_end() {
        let result = AnalysisResult::new(
            vec![track_with(1.5, 1.0)],
            2.0,
            Tempo::default(),
            TimeSignature::default(),
            Vec::new(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn rejects_duplicate_instruments() {
        let result = AnalysisResult::new(
            vec![track_with(0.0, 0.5), track_with(0.5, 0.5)],
            2.0,
            Tempo::default(),
            TimeSignature::default(),
            Vec::new(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn serializes_with_transport_field_names() {
        let result = AnalysisResult::new(
            vec![track_with(0.0, 0.5)],
            2.0,
            Tempo::default(),
            TimeSignature::default(),
            Vec::new(),
        )
        .unwrap();
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"timeSignature\":\"4/4\""));
        assert!(json.contains("\"tempo\":120.0"));
        assert!(!json.contains("failures"));
        let back: AnalysisResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, result);
    }

    #[test]
    fn deserializing_checks_notes_against_duration() {
        let result = AnalysisResult::new(
            vec![track_with(1.0, 1.0)],
            2.0,
            Tempo::default(),
            TimeSignature::default(),
            Vec::new(),
        )
        .unwrap();
        let mut value = serde_json::to_value(&result).unwrap();
        value["duration"] = serde_json::json!(1.5);
        let err = serde_json::from_value::<AnalysisResult>(value).unwrap_err();
        assert!(err.to_string().contains("past the"));
    }

    #[test]
    fn deserializing_rejects_duplicate_tracks() {
        let track = serde_json::to_value(track_with(0.0, 0.5)).unwrap();
        let value = serde_json::json!({
            "tracks": [track.clone(), track],
            "duration": 2.0,
            "tempo": 120.0,
            "timeSignature": "4/4",
        });
        assert!(serde_json::from_value::<AnalysisResult>(value).is_err());
    }
}
