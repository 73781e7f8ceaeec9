pub mod error;
pub mod events;
pub mod instrument;
pub mod io;
pub mod midi;
pub mod pitch;
pub mod result;
pub mod source;
pub mod tempo;

pub use crate::error::{DomainError, ErrorKind};
pub use crate::events::{Dynamic, NoteEvent, Track};
pub use crate::instrument::InstrumentClass;
pub use crate::io::{ExportFormat, JsonExporter, ResultExporter, TextSummary};
pub use crate::midi::{midi_notes, MidiNote};
pub use crate::pitch::{Accidental, Letter, Pitch};
pub use crate::result::{AnalysisResult, StemFailure};
pub use crate::source::VideoUrl;
pub use crate::tempo::{Tempo, TimeSignature, DEFAULT_TEMPO_BPM, MAX_TEMPO_BPM, MIN_TEMPO_BPM};
