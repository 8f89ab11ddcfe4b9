//! Named Ed25519 keys for client tokens.
//!
//! A secret key travels as `name:base64url(seed)`. The 64-byte
//! `seed || public` form and the standard base64 alphabet are accepted on
//! input so keys produced by other Ed25519 tooling load unchanged.

use crate::error::{SignerError, SignerResult};
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use ed25519_dalek::{Signature, Signer as _, SigningKey, VerifyingKey};
use std::fmt;

const SEED_LEN: usize = 32;

fn split_named(s: &str) -> SignerResult<(&str, &str)> {
    let (name, encoded) = s
        .trim()
        .split_once(':')
        .ok_or_else(|| SignerError::KeyParsing("expected `name:base64`".to_string()))?;
    if name.is_empty() {
        return Err(SignerError::KeyParsing("key name is empty".to_string()));
    }
    Ok((name, encoded))
}

fn decode_key_bytes(encoded: &str) -> SignerResult<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(encoded.trim_end_matches('='))
        .or_else(|_| STANDARD.decode(encoded))
        .map_err(|e| SignerError::KeyParsing(format!("invalid base64: {e}")))
}

/// Verifying half of a client token key.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey(VerifyingKey);

impl PublicKey {
    pub fn from_bytes(bytes: &[u8]) -> SignerResult<Self> {
        let bytes: [u8; 32] = bytes.try_into().map_err(|_| {
            SignerError::KeyParsing(format!("expected 32 public key bytes, got {}", bytes.len()))
        })?;
        VerifyingKey::from_bytes(&bytes)
            .map(Self)
            .map_err(|e| SignerError::KeyParsing(format!("invalid public key: {e}")))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }

    pub(crate) fn verifying_key(&self) -> &VerifyingKey {
        &self.0
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&URL_SAFE_NO_PAD.encode(self.0.as_bytes()))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let encoded = self.to_string();
        write!(f, "PublicKey({}...)", &encoded[..8])
    }
}

/// A named signing key.
pub struct KeyPair {
    name: String,
    signing: SigningKey,
    public: PublicKey,
}

impl KeyPair {
    /// Generate a fresh key, e.g. `KeyPair::generate("artifacts.example.com-1")`.
    pub fn generate(name: impl Into<String>) -> Self {
        let mut rng = rand_core::OsRng;
        Self::from_signing_key(name.into(), SigningKey::generate(&mut rng))
    }

    fn from_signing_key(name: String, signing: SigningKey) -> Self {
        let public = PublicKey(signing.verifying_key());
        Self {
            name,
            signing,
            public,
        }
    }

    /// Parse `name:base64(seed)` or `name:base64(seed || public)`.
    pub fn from_secret_key_string(s: &str) -> SignerResult<Self> {
        let (name, encoded) = split_named(s)?;
        let bytes = decode_key_bytes(encoded)?;
        if bytes.len() != SEED_LEN && bytes.len() != 2 * SEED_LEN {
            return Err(SignerError::KeyParsing(format!(
                "expected {SEED_LEN} or {} key bytes, got {}",
                2 * SEED_LEN,
                bytes.len()
            )));
        }

        let (seed, public) = bytes.split_at(SEED_LEN);
        let seed: [u8; SEED_LEN] = seed
            .try_into()
            .map_err(|_| SignerError::KeyParsing("invalid seed".to_string()))?;
        let pair = Self::from_signing_key(name.to_string(), SigningKey::from_bytes(&seed));
        if !public.is_empty() && public != pair.public.as_bytes() {
            return Err(SignerError::KeyParsing(
                "public half does not match the seed".to_string(),
            ));
        }
        Ok(pair)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn public(&self) -> &PublicKey {
        &self.public
    }

    pub fn secret_key_string(&self) -> String {
        format!("{}:{}", self.name, URL_SAFE_NO_PAD.encode(self.signing.to_bytes()))
    }

    pub fn public_key_string(&self) -> String {
        format!("{}:{}", self.name, self.public)
    }

    pub(crate) fn sign(&self, message: &[u8]) -> Signature {
        self.signing.sign(message)
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("name", &self.name)
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}
