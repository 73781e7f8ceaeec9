use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl DomainError {
    pub fn validation<T: Into<String>>(message: T) -> Self {
        Self::Validation(message.into())
    }
}

/// Machine-checkable classification of every failure the engine can report.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Decode,
    EmptyInput,
    Separation,
    Detection,
    Timeout,
    Assembly,
    Cancelled,
    Config,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Decode => "decode",
            ErrorKind::EmptyInput => "empty_input",
            ErrorKind::Separation => "separation",
            ErrorKind::Detection => "detection",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Assembly => "assembly",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Config => "config",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_serializes_as_snake_case() {
        let json = serde_json::to_string(&ErrorKind::EmptyInput).unwrap();
        assert_eq!(json, "\"empty_input\"");
        assert_eq!(ErrorKind::EmptyInput.to_string(), "empty_input");
    }
}
