use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::DomainError;

pub const A4_FREQUENCY_HZ: f64 = 440.0;
pub const A4_MIDI_NUMBER: i32 = 69;

/// Slack used when rounding values that should sit exactly on a half step.
const HALF_STEP_EPSILON: f64 = 1e-9;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Letter {
    C,
    D,
    E,
    F,
    G,
    A,
    B,
}

impl Letter {
    /// Semitone offset of the natural note within an octave.
    pub fn semitone(&self) -> i32 {
        match self {
            Letter::C => 0,
            Letter::D => 2,
            Letter::E => 4,
            Letter::F => 5,
            Letter::G => 7,
            Letter::A => 9,
            Letter::B => 11,
        }
    }

    fn as_char(&self) -> char {
        match self {
            Letter::C => 'C',
            Letter::D => 'D',
            Letter::E => 'E',
            Letter::F => 'F',
            Letter::G => 'G',
            Letter::A => 'A',
            Letter::B => 'B',
        }
    }

    fn from_char(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            'C' => Some(Letter::C),
            'D' => Some(Letter::D),
            'E' => Some(Letter::E),
            'F' => Some(Letter::F),
            'G' => Some(Letter::G),
            'A' => Some(Letter::A),
            'B' => Some(Letter::B),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Accidental {
    Flat,
    Natural,
    Sharp,
}

impl Accidental {
    pub fn offset(&self) -> i32 {
        match self {
            Accidental::Flat => -1,
            Accidental::Natural => 0,
            Accidental::Sharp => 1,
        }
    }
}

/// A notated pitch: letter, accidental and scientific octave number.
///
/// Serialized in the `C#4` / `Bb3` text form.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Pitch {
    pub letter: Letter,
    pub accidental: Accidental,
    pub octave: i8,
}

/// Sharp spelling for each pitch class starting at C.
const SHARP_SPELLING: [(Letter, Accidental); 12] = [
    (Letter::C, Accidental::Natural),
    (Letter::C, Accidental::Sharp),
    (Letter::D, Accidental::Natural),
    (Letter::D, Accidental::Sharp),
    (Letter::E, Accidental::Natural),
    (Letter::F, Accidental::Natural),
    (Letter::F, Accidental::Sharp),
    (Letter::G, Accidental::Natural),
    (Letter::G, Accidental::Sharp),
    (Letter::A, Accidental::Natural),
    (Letter::A, Accidental::Sharp),
    (Letter::B, Accidental::Natural),
];

impl Pitch {
    pub fn new(letter: Letter, accidental: Accidental, octave: i8) -> Self {
        Self {
            letter,
            accidental,
            octave,
        }
    }

    pub fn natural(letter: Letter, octave: i8) -> Self {
        Self::new(letter, Accidental::Natural, octave)
    }

    /// MIDI key number: letter base + (octave + 1) * 12, ±1 for accidentals.
    pub fn midi_number(&self) -> i32 {
        self.letter.semitone() + (self.octave as i32 + 1) * 12 + self.accidental.offset()
    }

    /// Spells a MIDI key number using sharps.
    pub fn from_midi(number: u8) -> Self {
        let number = number.min(127) as i32;
        let (letter, accidental) = SHARP_SPELLING[(number % 12) as usize];
        Self {
            letter,
            accidental,
            octave: (number / 12 - 1) as i8,
        }
    }

    /// Nearest semitone to `hz` against A4 = 440 Hz. A frequency exactly
    /// between two semitones resolves to the upper one.
    pub fn from_frequency(hz: f64) -> Option<Self> {
        nearest_midi(hz).map(Self::from_midi)
    }

    /// Equal-tempered frequency of this pitch.
    pub fn frequency(&self) -> f64 {
        midi_to_frequency(self.midi_number() as f64)
    }

    fn sort_key(&self) -> (i32, Letter, Accidental) {
        (self.midi_number(), self.letter, self.accidental)
    }
}

/// Continuous MIDI value for a frequency.
pub fn frequency_to_midi(hz: f64) -> f64 {
    A4_MIDI_NUMBER as f64 + 12.0 * (hz / A4_FREQUENCY_HZ).log2()
}

pub fn midi_to_frequency(midi: f64) -> f64 {
    A4_FREQUENCY_HZ * 2f64.powf((midi - A4_MIDI_NUMBER as f64) / 12.0)
}

/// Rounds a frequency to the nearest MIDI key, half steps going up.
pub fn nearest_midi(hz: f64) -> Option<u8> {
    if !hz.is_finite() || hz <= 0.0 {
        return None;
    }
    let rounded = (frequency_to_midi(hz) + 0.5 + HALF_STEP_EPSILON).floor();
    Some(rounded.clamp(0.0, 127.0) as u8)
}

impl Ord for Pitch {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

impl PartialOrd for Pitch {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Pitch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let accidental = match self.accidental {
            Accidental::Flat => "b",
            Accidental::Natural => "",
            Accidental::Sharp => "#",
        };
        write!(f, "{}{}{}", self.letter.as_char(), accidental, self.octave)
    }
}

impl FromStr for Pitch {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let text = value.trim();
        let mut chars = text.chars();
        let letter = chars
            .next()
            .and_then(Letter::from_char)
            .ok_or_else(|| DomainError::validation(format!("invalid pitch `{value}`")))?;
        let rest = chars.as_str();
        let (accidental, octave_text) = match rest.chars().next() {
            Some('#') => (Accidental::Sharp, &rest[1..]),
            Some('b') => (Accidental::Flat, &rest[1..]),
            _ => (Accidental::Natural, rest),
        };
        let octave: i8 = octave_text
            .parse()
            .map_err(|_| DomainError::validation(format!("invalid octave in pitch `{value}`")))?;
        if !(-1..=9).contains(&octave) {
            return Err(DomainError::validation(format!(
                "octave out of range in pitch `{value}`"
            )));
        }
        let pitch = Self::new(letter, accidental, octave);
        if !(0..=127).contains(&pitch.midi_number()) {
            return Err(DomainError::validation(format!(
                "pitch `{value}` is outside the MIDI range"
            )));
        }
        Ok(pitch)
    }
}

impl From<Pitch> for String {
    fn from(pitch: Pitch) -> Self {
        pitch.to_string()
    }
}

impl TryFrom<String> for Pitch {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}
