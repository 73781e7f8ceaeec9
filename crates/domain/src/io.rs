use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::{error::DomainError, result::AnalysisResult};

/// Number of pitch names listed per track in the text summary.
pub const SUMMARY_PREVIEW_NOTES: usize = 30;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Text,
    Abc,
}

pub trait ResultExporter {
    fn export(&self, result: &AnalysisResult, format: ExportFormat)
        -> Result<Vec<u8>, DomainError>;
}

pub struct JsonExporter;

impl ResultExporter for JsonExporter {
    fn export(
        &self,
        result: &AnalysisResult,
        format: ExportFormat,
    ) -> Result<Vec<u8>, DomainError> {
        match format {
            ExportFormat::Json => serde_json::to_vec_pretty(result)
                .map_err(|err| DomainError::Serialization(err.to_string())),
            other => Err(DomainError::validation(format!(
                "JsonExporter cannot handle {:?}",
                other
            ))),
        }
    }
}

/// Plain-text report used by document exporters: duration, tempo, time
/// signature, then a block per track.
pub struct TextSummary;

impl TextSummary {
    pub fn render(result: &AnalysisResult) -> String {
        let mut out = String::new();
        let total_seconds = result.duration().round() as u64;
        let _ = writeln!(
            out,
            "Duration: {}:{:02}",
            total_seconds / 60,
            total_seconds % 60
        );
        let _ = writeln!(out, "Tempo: {} BPM", round_to(result.tempo().bpm(), 2));
        let _ = writeln!(out, "Time Signature: {}", result.time_signature());
        for track in result.tracks() {
            let _ = writeln!(out);
            let _ = writeln!(out, "{} ({})", track.name, track.instrument);
            let _ = writeln!(out, "Notes: {}", track.notes.len());
            let preview = track.pitch_preview(SUMMARY_PREVIEW_NOTES);
            if !preview.is_empty() {
                let _ = writeln!(out, "{preview}");
            }
        }
        for failure in result.failures() {
            let _ = writeln!(out);
            let _ = writeln!(
                out,
                "Failed: {} ({}): {}",
                failure.instrument, failure.kind, failure.message
            );
        }
        out
    }
}

impl ResultExporter for TextSummary {
    fn export(
        &self,
        result: &AnalysisResult,
        format: ExportFormat,
    ) -> Result<Vec<u8>, DomainError> {
        match format {
            ExportFormat::Text => Ok(Self::render(result).into_bytes()),
            other => Err(DomainError::validation(format!(
                "TextSummary cannot handle {:?}",
                other
            ))),
        }
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ErrorKind, InstrumentClass, NoteEvent, StemFailure, Tempo, TimeSignature, Track,
    };

    fn sample_result() -> AnalysisResult {
        let notes = vec![
            NoteEvent::new("C4".parse().unwrap(), 0.0, 0.5, 90).unwrap(),
            NoteEvent::new("E4".parse().unwrap(), 0.5, 0.5, 90).unwrap(),
        ];
        AnalysisResult::new(
            vec![
                Track::new(InstrumentClass::Piano, notes),
                Track::new(InstrumentClass::Bass, Vec::new()),
            ],
            75.4,
            Tempo::new(96.5).unwrap(),
            TimeSignature::WALTZ,
            vec![StemFailure {
                instrument: InstrumentClass::Drums,
                kind: ErrorKind::Detection,
                message: "analysis failed".into(),
            }],
        )
        .unwrap()
    }

    #[test]
    fn exports_json() {
        let bytes = JsonExporter
            .export(&sample_result(), ExportFormat::Json)
            .unwrap();
        let output = String::from_utf8(bytes).unwrap();
        assert!(output.contains("\"name\": \"Piano\""));
        assert!(output.contains("\"pitch\": \"E4\""));
        assert!(JsonExporter
            .export(&sample_result(), ExportFormat::Text)
            .is_err());
    }

    #[test]
    fn summary_lists_metadata_and_tracks() {
        let text = TextSummary::render(&sample_result());
        assert!(text.starts_with("Duration: 1:15\nTempo: 96.5 BPM\nTime Signature: 3/4\n"));
        assert!(text.contains("Piano (piano)\nNotes: 2\nC4 E4\n"));
        assert!(text.contains("Bass (bass)\nNotes: 0\n"));
        assert!(text.contains("Failed: drums (detection): analysis failed"));
    }
}
