use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use stemscore_domain::{AnalysisResult, InstrumentClass, NoteEvent, StemFailure, Track};

use crate::tempo::TempoEstimate;
use crate::TranscriptionError;

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AssemblerConfig {
    /// Attach each track's notes as compact JSON in `rawNotes`.
    pub embed_raw_notes: bool,
}

/// Quantized notes of one stem.
#[derive(Clone, Debug, PartialEq)]
pub struct StemTranscription {
    pub instrument: InstrumentClass,
    /// Seconds of audio the stem covers.
    pub duration: f64,
    pub notes: Vec<NoteEvent>,
}

pub struct TranscriptionAssembler {
    config: AssemblerConfig,
}

impl TranscriptionAssembler {
    pub fn new(config: AssemblerConfig) -> Self {
        Self { config }
    }

    /// Builds the final result. The total duration is the longest of the mix
    /// and its stems; any note reaching past it is an assembly error.
    #[instrument(skip(self, stems, estimate, failures), fields(stems = stems.len()))]
    pub fn assemble(
        &self,
        mut stems: Vec<StemTranscription>,
        mix_duration: f64,
        estimate: &TempoEstimate,
        failures: Vec<StemFailure>,
    ) -> Result<AnalysisResult, TranscriptionError> {
        let duration = stems
            .iter()
            .map(|stem| stem.duration)
            .fold(mix_duration, f64::max);
        stems.sort_by_key(|stem| stem.instrument);

        let mut tracks = Vec::with_capacity(stems.len());
        for stem in stems {
            let mut track = Track::new(stem.instrument, stem.notes);
            if self.config.embed_raw_notes {
                let raw = serde_json::to_string(&track.notes)
                    .map_err(|err| TranscriptionError::Assembly(err.to_string()))?;
                track.raw_notes = Some(raw);
            }
            tracks.push(track);
        }

        let result = AnalysisResult::new(
            tracks,
            duration,
            estimate.tempo,
            estimate.time_signature,
            failures,
        )
        .map_err(|err| TranscriptionError::Assembly(err.to_string()))?;
        info!(
            tracks = result.tracks().len(),
            notes = result.note_count(),
            duration = result.duration(),
            bpm = result.tempo().bpm(),
            "assembled transcription"
        );
        Ok(result)
    }
}

impl Default for TranscriptionAssembler {
    fn default() -> Self {
        Self::new(AssemblerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stemscore_domain::{ErrorKind, Tempo, TimeSignature};

    fn estimate() -> TempoEstimate {
        TempoEstimate {
            tempo: Tempo::new(120.0).unwrap(),
            time_signature: TimeSignature::COMMON,
            raw_bpm: Some(120.0),
            confidence: 0.8,
        }
    }

    fn note(pitch: &str, onset: f64, duration: f64) -> NoteEvent {
        NoteEvent::new(pitch.parse().unwrap(), onset, duration, 90).unwrap()
    }

    #[test]
    fn tracks_follow_priority_order() {
        let stems = vec![
            StemTranscription {
                instrument: InstrumentClass::Drums,
                duration: 2.0,
                notes: vec![note("C2", 0.0, 0.125)],
            },
            StemTranscription {
                instrument: InstrumentClass::Vocals,
                duration: 2.0,
                notes: vec![note("E4", 0.5, 0.25), note("C4", 0.5, 0.25)],
            },
        ];
        let result = TranscriptionAssembler::default()
            .assemble(stems, 2.0, &estimate(), Vec::new())
            .unwrap();
        let names: Vec<&str> = result.tracks().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["Vocals", "Drums"]);
        assert_eq!(result.tracks()[0].notes[0].pitch.to_string(), "C4");
        assert_eq!(result.duration(), 2.0);
    }

    #[test]
    fn note_past_the_end_is_rejected() {
        let stems = vec![StemTranscription {
            instrument: InstrumentClass::Bass,
            duration: 1.0,
            notes: vec![note("E1", 0.75, 0.5)],
        }];
        let err = TranscriptionAssembler::default()
            .assemble(stems, 1.0, &estimate(), Vec::new())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Assembly);
    }

    #[test]
    fn embeds_raw_notes_on_request() {
        let assembler = TranscriptionAssembler::new(AssemblerConfig {
            embed_raw_notes: true,
        });
        let stems = vec![StemTranscription {
            instrument: InstrumentClass::Piano,
            duration: 1.0,
            notes: vec![note("A4", 0.0, 0.5)],
        }];
        let result = assembler.assemble(stems, 1.0, &estimate(), Vec::new()).unwrap();
        let raw = result.tracks()[0].raw_notes.as_deref().unwrap();
        let decoded: Vec<NoteEvent> = serde_json::from_str(raw).unwrap();
        assert_eq!(decoded, result.tracks()[0].notes);
    }

    #[test]
    fn failures_mark_partial_results() {
        let failure = StemFailure {
            instrument: InstrumentClass::Guitar,
            kind: ErrorKind::Detection,
            message: "analysis failed".into(),
        };
        let result = TranscriptionAssembler::default()
            .assemble(Vec::new(), 3.0, &estimate(), vec![failure])
            .unwrap();
        assert!(result.is_partial());
        assert!(result.tracks().is_empty());
    }
}
