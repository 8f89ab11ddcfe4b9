//! Signer error types.

use thiserror::Error;

/// Signing operation errors.
#[derive(Debug, Error)]
pub enum SignerError {
    #[error("key parsing error: {0}")]
    KeyParsing(String),

    #[error("malformed client token: {0}")]
    MalformedToken(String),

    #[error("verification failed")]
    VerificationFailed,

    #[error("client token expired")]
    Expired,
}

/// Result type for signing operations.
pub type SignerResult<T> = std::result::Result<T, SignerError>;
