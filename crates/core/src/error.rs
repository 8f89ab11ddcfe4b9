//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid token payload: {0}")]
    InvalidToken(String),

    #[error("invalid identifier: {0}")]
    InvalidId(String),

    #[error("no job matches `{key}`")]
    JobNotFound { key: String },

    #[error(
        "job `{key}` is ambiguous, matching {}; pass the job id instead",
        candidates.join(", ")
    )]
    AmbiguousJob { key: String, candidates: Vec<String> },

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
