use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("no audio bytes were supplied")]
    EmptyInput,
    #[error("could not decode audio: {0}")]
    Decode(String),
    #[error("audio loading exceeded its {0:?} budget")]
    Timeout(Duration),
    #[error("audio processing was cancelled")]
    Cancelled,
    #[error("invalid waveform: {0}")]
    InvalidBuffer(String),
    #[error("resampling failed: {0}")]
    Resample(String),
    #[error("spectral analysis failed: {0}")]
    Spectral(String),
    #[error("could not read audio file: {0}")]
    Io(#[from] std::io::Error),
}

impl AudioError {
    pub fn decode<T: ToString>(err: T) -> Self {
        Self::Decode(err.to_string())
    }
}
