//! Client token signing for direct-to-storage uploads.
//!
//! This crate provides:
//! - Ed25519 key generation and management
//! - Signing of upload client tokens
//! - Token verification

pub mod error;
pub mod key;
pub mod signer;

pub use error::{SignerError, SignerResult};
pub use key::{KeyPair, PublicKey};
pub use signer::{CLIENT_TOKEN_PREFIX, ClientTokenSigner, verify_client_token};
