use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::DomainError;

pub const MIN_TEMPO_BPM: f64 = 40.0;
pub const MAX_TEMPO_BPM: f64 = 240.0;
pub const DEFAULT_TEMPO_BPM: f64 = 120.0;

/// Global tempo in beats per minute, always inside [`MIN_TEMPO_BPM`, `MAX_TEMPO_BPM`].
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, PartialOrd)]
#[serde(try_from = "f64", into = "f64")]
pub struct Tempo(f64);

impl Tempo {
    pub fn new(bpm: f64) -> Result<Self, DomainError> {
        if !bpm.is_finite() || !(MIN_TEMPO_BPM..=MAX_TEMPO_BPM).contains(&bpm) {
            return Err(DomainError::validation(format!(
                "tempo bpm must be between {MIN_TEMPO_BPM} and {MAX_TEMPO_BPM}, got {bpm}"
            )));
        }
        Ok(Self(bpm))
    }

    /// Clamps a raw estimate to the supported range. Non-finite input falls
    /// back to the default tempo.
    pub fn clamped(raw_bpm: f64) -> Self {
        if raw_bpm.is_nan() {
            return Self::default();
        }
        Self(raw_bpm.clamp(MIN_TEMPO_BPM, MAX_TEMPO_BPM))
    }

    pub fn bpm(&self) -> f64 {
        self.0
    }

    /// Length of one beat (the time signature's denominator value).
    pub fn seconds_per_beat(&self) -> f64 {
        60.0 / self.0
    }
}

impl Default for Tempo {
    fn default() -> Self {
        Self(DEFAULT_TEMPO_BPM)
    }
}

impl From<Tempo> for f64 {
    fn from(tempo: Tempo) -> Self {
        tempo.0
    }
}

impl TryFrom<f64> for Tempo {
    type Error = DomainError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Tempo::new(value)
    }
}

/// Time signature serialized as `numerator/denominator`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(try_from = "String", into = "String")]
pub struct TimeSignature {
    numerator: u8,
    denominator: u8,
}

impl TimeSignature {
    pub const COMMON: TimeSignature = TimeSignature {
        numerator: 4,
        denominator: 4,
    };
    pub const WALTZ: TimeSignature = TimeSignature {
        numerator: 3,
        denominator: 4,
    };

    pub fn new(numerator: u8, denominator: u8) -> Result<Self, DomainError> {
        if numerator == 0 || !denominator.is_power_of_two() {
            return Err(DomainError::validation(
                "time signature denominator must be power of two",
            ));
        }
        Ok(Self {
            numerator,
            denominator,
        })
    }

    pub fn numerator(&self) -> u8 {
        self.numerator
    }

    pub fn denominator(&self) -> u8 {
        self.denominator
    }

    /// Measure length counted in beats.
    pub fn beats_per_measure(&self) -> u32 {
        self.numerator as u32
    }
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self::COMMON
    }
}

impl fmt::Display for TimeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

impl FromStr for TimeSignature {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (num, den) = value
            .split_once('/')
            .ok_or_else(|| DomainError::validation(format!("invalid time signature `{value}`")))?;
        let parse = |part: &str| {
            part.trim()
                .parse::<u8>()
                .map_err(|_| DomainError::validation(format!("invalid time signature `{value}`")))
        };
        TimeSignature::new(parse(num)?, parse(den)?)
    }
}

impl From<TimeSignature> for String {
    fn from(signature: TimeSignature) -> Self {
        signature.to_string()
    }
}

impl TryFrom<String> for TimeSignature {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tempo_validation() {
        assert!(Tempo::new(39.9).is_err());
        assert!(Tempo::new(f64::INFINITY).is_err());
        assert!(Tempo::new(120.0).is_ok());
    }

    #[test]
    fn tempo_clamps_to_nearest_bound() {
        assert_eq!(Tempo::clamped(20.0).bpm(), MIN_TEMPO_BPM);
        assert_eq!(Tempo::clamped(400.0).bpm(), MAX_TEMPO_BPM);
        assert_eq!(Tempo::clamped(97.5).bpm(), 97.5);
        assert_eq!(Tempo::clamped(f64::NAN).bpm(), DEFAULT_TEMPO_BPM);
    }

    #[test]
    fn signature_validation() {
        assert!(TimeSignature::new(0, 4).is_err());
        assert!(TimeSignature::new(3, 5).is_err());
        assert_eq!(TimeSignature::new(6, 8).unwrap().to_string(), "6/8");
        assert_eq!("3/4".parse::<TimeSignature>().unwrap(), TimeSignature::WALTZ);
        assert_eq!(TimeSignature::default(), TimeSignature::COMMON);
    }
}
