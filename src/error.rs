//! Error types for KV-cached decoding.

use thiserror::Error;

/// Boxed error raised by a collaborator (forward step or tokenizer).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Forward step failed: {0}")]
    Collaborator(#[source] BoxError),

    #[error("Cache inconsistency: {0}")]
    CacheInconsistency(String),

    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    #[error("Invalid model: {0}")]
    InvalidModel(String),
}

impl DecodeError {
    /// Wrap any collaborator error.
    pub fn collaborator<E>(err: E) -> Self
    where
        E: Into<BoxError>,
    {
        DecodeError::Collaborator(err.into())
    }
}

/// Errors raised by the in-process reference model.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("token {token} is outside the vocabulary (size {vocab_size})")]
    TokenOutOfRange { token: i64, vocab_size: usize },

    #[error("position {pos} is outside the context window ({seq_len})")]
    PositionOutOfRange { pos: i64, seq_len: usize },

    #[error("expected {expected} layer caches, got {actual}")]
    LayerCount { expected: usize, actual: usize },

    #[error("malformed step input: {0}")]
    MalformedInput(String),
}

pub type Result<T> = std::result::Result<T, DecodeError>;
