use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::DomainError;

/// Source classes a mix can be separated into.
///
/// Declaration order is the canonical track priority, so the derived `Ord`
/// sorts vocals first and unknown last.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum InstrumentClass {
    Vocals,
    Piano,
    Bass,
    Guitar,
    Drums,
    Other,
    Unknown,
}

impl InstrumentClass {
    pub const ALL: [InstrumentClass; 7] = [
        InstrumentClass::Vocals,
        InstrumentClass::Piano,
        InstrumentClass::Bass,
        InstrumentClass::Guitar,
        InstrumentClass::Drums,
        InstrumentClass::Other,
        InstrumentClass::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InstrumentClass::Vocals => "vocals",
            InstrumentClass::Piano => "piano",
            InstrumentClass::Bass => "bass",
            InstrumentClass::Guitar => "guitar",
            InstrumentClass::Drums => "drums",
            InstrumentClass::Other => "other",
            InstrumentClass::Unknown => "unknown",
        }
    }

    /// Name shown on the track header.
    pub fn display_name(&self) -> &'static str {
        match self {
            InstrumentClass::Vocals => "Vocals",
            InstrumentClass::Piano => "Piano",
            InstrumentClass::Bass => "Bass",
            InstrumentClass::Guitar => "Guitar",
            InstrumentClass::Drums => "Drums",
            InstrumentClass::Other => "Other",
            InstrumentClass::Unknown => "Unknown",
        }
    }

    /// Percussive sources never carry a fundamental frequency.
    pub fn is_percussive(&self) -> bool {
        matches!(self, InstrumentClass::Drums)
    }

    /// Sources that may sound several pitches at once.
    pub fn is_polyphonic(&self) -> bool {
        matches!(self, InstrumentClass::Piano | InstrumentClass::Guitar)
    }
}

impl fmt::Display for InstrumentClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstrumentClass {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let lowered = value.trim().to_ascii_lowercase();
        InstrumentClass::ALL
            .iter()
            .copied()
            .find(|class| class.as_str() == lowered)
            .ok_or_else(|| DomainError::validation(format!("unknown instrument class `{value}`")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_follows_priority() {
        let mut classes = vec![
            InstrumentClass::Other,
            InstrumentClass::Drums,
            InstrumentClass::Vocals,
            InstrumentClass::Bass,
        ];
        classes.sort();
        assert_eq!(
            classes,
            vec![
                InstrumentClass::Vocals,
                InstrumentClass::Bass,
                InstrumentClass::Drums,
                InstrumentClass::Other,
            ]
        );
    }

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("Piano".parse::<InstrumentClass>().unwrap(), InstrumentClass::Piano);
        assert!("kazoo".parse::<InstrumentClass>().is_err());
    }
}
