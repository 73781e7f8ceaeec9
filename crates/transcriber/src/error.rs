use std::time::Duration;

use thiserror::Error;

use stemscore_audio::AudioError;
use stemscore_domain::ErrorKind;

use crate::separation::SeparationError;

/// Failure surfaced at the engine boundary.
#[derive(Debug, Error)]
pub enum TranscriptionError {
    #[error("no audio bytes were supplied")]
    EmptyInput,
    #[error("could not decode audio: {0}")]
    Decode(String),
    #[error("source separation failed: {0}")]
    Separation(String),
    #[error("{stage} exceeded its {budget:?} budget")]
    Timeout {
        stage: &'static str,
        budget: Duration,
    },
    #[error("assembled result violates an invariant: {0}")]
    Assembly(String),
    #[error("analysis was cancelled")]
    Cancelled,
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl TranscriptionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TranscriptionError::EmptyInput => ErrorKind::EmptyInput,
            TranscriptionError::Decode(_) => ErrorKind::Decode,
            TranscriptionError::Separation(_) => ErrorKind::Separation,
            TranscriptionError::Timeout { .. } => ErrorKind::Timeout,
            TranscriptionError::Assembly(_) => ErrorKind::Assembly,
            TranscriptionError::Cancelled => ErrorKind::Cancelled,
            TranscriptionError::Config(_) => ErrorKind::Config,
        }
    }

    pub fn config<T: Into<String>>(message: T) -> Self {
        Self::Config(message.into())
    }
}

impl From<AudioError> for TranscriptionError {
    fn from(err: AudioError) -> Self {
        match err {
            AudioError::EmptyInput => TranscriptionError::EmptyInput,
            AudioError::Timeout(budget) => TranscriptionError::Timeout {
                stage: "audio loading",
                budget,
            },
            AudioError::Cancelled => TranscriptionError::Cancelled,
            other => TranscriptionError::Decode(other.to_string()),
        }
    }
}

impl From<SeparationError> for TranscriptionError {
    fn from(err: SeparationError) -> Self {
        match err {
            SeparationError::Cancelled => TranscriptionError::Cancelled,
            other => TranscriptionError::Separation(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_errors_map_to_kinds() {
        assert_eq!(
            TranscriptionError::from(AudioError::EmptyInput).kind(),
            ErrorKind::EmptyInput
        );
        assert_eq!(
            TranscriptionError::from(AudioError::decode("bad header")).kind(),
            ErrorKind::Decode
        );
        assert_eq!(
            TranscriptionError::from(AudioError::Timeout(Duration::from_millis(5))).kind(),
            ErrorKind::Timeout
        );
    }

    #[test]
    fn separation_cancel_is_cancel() {
        assert_eq!(
            TranscriptionError::from(SeparationError::Cancelled).kind(),
            ErrorKind::Cancelled
        );
        let err = TranscriptionError::from(SeparationError::Unavailable("demucs".into()));
        assert_eq!(err.kind(), ErrorKind::Separation);
        assert!(err.to_string().contains("demucs"));
    }
}
