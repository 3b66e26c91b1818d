//! Error types for decoding.

use thiserror::Error;

/// Broad classification of a [`DecodeError`].
///
/// Call sites match on the kind when they only care whether the failure is a
/// programming error (bad shapes, bad indices) or a misuse of the engine's
/// lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidInput,
    OutOfRange,
    InvalidState,
    Config,
}

/// Errors raised by the beam-search engine, the decoding loop and the
/// reference model.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("log-prob matrix shape mismatch: expected {expected_rows}x{expected_cols}, got {rows}x{cols}")]
    ShapeMismatch { expected_rows: usize, expected_cols: usize, rows: usize, cols: usize },

    #[error("invalid log-probability {value} at slot {slot}, token {token}")]
    InvalidLogProb { slot: usize, token: usize, value: f32 },

    #[error("step index out of order: expected {expected}, got {got}")]
    StepIndexMismatch { expected: usize, got: usize },

    #[error("token {token} is outside the vocabulary of size {vocab_size}")]
    UnknownToken { token: u32, vocab_size: usize },

    #[error("{what}: expected dimension {expected}, got {got}")]
    DimensionMismatch { what: &'static str, expected: usize, got: usize },

    #[error("index {index} out of range for length {len}")]
    OutOfRange { index: usize, len: usize },

    #[error("beam search already terminated after {steps} steps")]
    AlreadyTerminated { steps: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl DecodeError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ShapeMismatch { .. }
            | Self::InvalidLogProb { .. }
            | Self::StepIndexMismatch { .. }
            | Self::UnknownToken { .. }
            | Self::DimensionMismatch { .. } => ErrorKind::InvalidInput,
            Self::OutOfRange { .. } => ErrorKind::OutOfRange,
            Self::AlreadyTerminated { .. } => ErrorKind::InvalidState,
            Self::InvalidConfig(_) | Self::ConfigParse(_) | Self::Io(_) => ErrorKind::Config,
        }
    }
}

pub type Result<T> = std::result::Result<T, DecodeError>;
