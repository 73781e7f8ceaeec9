//! ABC staff notation for transcribed tracks.
//!
//! Each track becomes one tune whose unit length divides the quantization
//! grid. Notes that cross a bar line are split and tied; gaps are filled with
//! rests.

use std::collections::HashMap;
use std::fmt::Write as _;

use stemscore_domain::{
    Accidental, AnalysisResult, DomainError, Dynamic, ExportFormat, Letter, NoteEvent, Pitch,
    ResultExporter, Tempo, TimeSignature, Track,
};
use tracing::debug;

/// Unit note length when no finer grid is requested (`L:1/16`).
pub const DEFAULT_UNITS_PER_WHOLE: u32 = 16;
const BARS_PER_LINE: usize = 4;

/// Renders tracks with a unit note length fine enough for the grid the notes
/// were quantized to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AbcExporter {
    units_per_whole: u32,
}

impl AbcExporter {
    /// Exporter for notes snapped to `divisions_per_whole` cells per whole
    /// note. The unit is the smallest one that holds both the grid and a
    /// sixteenth, so triplet grids use `L:1/48`.
    pub fn for_grid(divisions_per_whole: u32) -> Self {
        let divisions = divisions_per_whole.max(1);
        Self {
            units_per_whole: lcm(divisions, DEFAULT_UNITS_PER_WHOLE),
        }
    }

    pub fn units_per_whole(&self) -> u32 {
        self.units_per_whole
    }

    /// Every track of the result as its own tune, numbered from 1.
    pub fn render(&self, result: &AnalysisResult) -> String {
        result
            .tracks()
            .iter()
            .enumerate()
            .map(|(index, track)| {
                self.render_track(track, index + 1, result.tempo(), result.time_signature())
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn render_track(
        &self,
        track: &Track,
        index: usize,
        tempo: Tempo,
        signature: TimeSignature,
    ) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "X:{index}");
        let _ = writeln!(out, "T:{}", track.name);
        let _ = writeln!(out, "M:{signature}");
        let _ = writeln!(out, "L:1/{}", self.units_per_whole);
        let _ = writeln!(
            out,
            "Q:1/{}={}",
            signature.denominator(),
            (tempo.bpm() * 100.0).round() / 100.0
        );
        let _ = writeln!(out, "K:C");

        let unit = tempo.seconds_per_beat() * signature.denominator() as f64
            / self.units_per_whole as f64;
        let measure = (signature.numerator() as u32 * self.units_per_whole
            / signature.denominator() as u32)
            .max(1);

        let mut body = Body::new(measure);
        for slot in slots(&track.notes, unit) {
            if slot.start > body.cursor {
                body.rest(slot.start - body.cursor);
            }
            body.chord(&slot.pitches, slot.length, slot.dynamic);
        }
        let bars = body.finish();
        debug!(track = %track.instrument, bars = bars.len(), "rendered abc");

        let line_count = bars.len().div_ceil(BARS_PER_LINE);
        for (line, chunk) in bars.chunks(BARS_PER_LINE).enumerate() {
            let ending = if line + 1 == line_count { "|]" } else { "|" };
            let _ = writeln!(out, "{} {ending}", chunk.join(" | "));
        }
        out
    }
}

impl ResultExporter for AbcExporter {
    fn export(
        &self,
        result: &AnalysisResult,
        format: ExportFormat,
    ) -> Result<Vec<u8>, DomainError> {
        match format {
            ExportFormat::Abc => Ok(self.render(result).into_bytes()),
            other => Err(DomainError::validation(format!(
                "AbcExporter cannot handle {:?}",
                other
            ))),
        }
    }
}

/// Notes sharing a start unit, sounded together.
struct Slot {
    start: u32,
    length: u32,
    pitches: Vec<Pitch>,
    dynamic: Dynamic,
}

/// Groups notes by start unit and shortens each group so it ends no later
/// than the next one starts.
fn slots(notes: &[NoteEvent], unit: f64) -> Vec<Slot> {
    let mut slots: Vec<Slot> = Vec::new();
    for note in notes {
        let start = (note.onset / unit).round() as u32;
        let length = ((note.duration / unit).round() as u32).max(1);
        match slots.last_mut() {
            Some(slot) if slot.start == start => {
                if !slot.pitches.contains(&note.pitch) {
                    slot.pitches.push(note.pitch);
                }
                slot.length = slot.length.max(length);
            }
            _ => slots.push(Slot {
                start,
                length,
                pitches: vec![note.pitch],
                dynamic: note.dynamic(),
            }),
        }
    }
    for i in 1..slots.len() {
        let gap = slots[i].start - slots[i - 1].start;
        let previous = &mut slots[i - 1];
        previous.length = previous.length.min(gap);
    }
    slots
}

struct Body {
    measure: u32,
    cursor: u32,
    bars: Vec<String>,
    current: Vec<String>,
    /// Accidentals in force for the current bar.
    accidentals: HashMap<(Letter, i8), Accidental>,
    dynamic: Option<Dynamic>,
}

impl Body {
    fn new(measure: u32) -> Self {
        Self {
            measure,
            cursor: 0,
            bars: Vec::new(),
            current: Vec::new(),
            accidentals: HashMap::new(),
            dynamic: None,
        }
    }

    fn room(&self) -> u32 {
        self.measure - self.cursor % self.measure
    }

    fn advance(&mut self, units: u32) {
        self.cursor += units;
        if self.cursor % self.measure == 0 {
            self.bars.push(self.current.join(" "));
            self.current.clear();
            self.accidentals.clear();
        }
    }

    fn rest(&mut self, mut length: u32) {
        while length > 0 {
            let take = length.min(self.room());
            length -= take;
            self.current.push(format!("z{}", length_suffix(take)));
            self.advance(take);
        }
    }

    fn chord(&mut self, pitches: &[Pitch], mut length: u32, dynamic: Dynamic) {
        let mut decoration = String::new();
        if self.dynamic != Some(dynamic) {
            self.dynamic = Some(dynamic);
            decoration = format!("!{}!", dynamic.mark());
        }
        while length > 0 {
            let take = length.min(self.room());
            length -= take;
            let mut token = std::mem::take(&mut decoration);
            let names: Vec<String> = pitches.iter().map(|&pitch| self.note_name(pitch)).collect();
            if names.len() == 1 {
                token.push_str(&names[0]);
            } else {
                token.push('[');
                token.push_str(&names.concat());
                token.push(']');
            }
            token.push_str(&length_suffix(take));
            if length > 0 {
                token.push('-');
            }
            self.current.push(token);
            self.advance(take);
        }
    }

    /// Spells a pitch, writing an accidental only when it differs from the
    /// one in force for that staff position.
    fn note_name(&mut self, pitch: Pitch) -> String {
        let key = (pitch.letter, pitch.octave);
        let in_force = self
            .accidentals
            .get(&key)
            .copied()
            .unwrap_or(Accidental::Natural);
        let mut name = String::new();
        if pitch.accidental != in_force {
            name.push(match pitch.accidental {
                Accidental::Sharp => '^',
                Accidental::Flat => '_',
                Accidental::Natural => '=',
            });
            self.accidentals.insert(key, pitch.accidental);
        }
        let letter = letter_char(pitch.letter);
        if pitch.octave >= 5 {
            name.push(letter.to_ascii_lowercase());
            name.extend(std::iter::repeat('\'').take((pitch.octave - 5) as usize));
        } else {
            name.push(letter);
            name.extend(std::iter::repeat(',').take((4 - pitch.octave as i32) as usize));
        }
        name
    }

    /// Pads the last bar with a rest and returns the bars. An empty body is a
    /// single whole-measure rest.
    fn finish(mut self) -> Vec<String> {
        if self.cursor == 0 || self.cursor % self.measure != 0 {
            let room = self.room();
            self.rest(room);
        }
        self.bars
    }
}

impl Default for AbcExporter {
    fn default() -> Self {
        Self::for_grid(DEFAULT_UNITS_PER_WHOLE)
    }
}

fn gcd(a: u32, b: u32) -> u32 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

fn lcm(a: u32, b: u32) -> u32 {
    a / gcd(a, b) * b
}

fn letter_char(letter: Letter) -> char {
    match letter {
        Letter::C => 'C',
        Letter::D => 'D',
        Letter::E => 'E',
        Letter::F => 'F',
        Letter::G => 'G',
        Letter::A => 'A',
        Letter::B => 'B',
    }
}

fn length_suffix(units: u32) -> String {
    if units == 1 {
        String::new()
    } else {
        units.to_string()
    }
}
