//! Client token signing and verification.
//!
//! A client token is `artifactci_client_<claims>.<signature>` where both
//! parts are unpadded URL-safe base64: the claims JSON and the Ed25519
//! signature over the encoded claims segment.

use crate::error::{SignerError, SignerResult};
use crate::key::{KeyPair, PublicKey};
use artifactci_core::ClientTokenClaims;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use ed25519_dalek::Verifier;
use time::OffsetDateTime;

/// Prefix identifying client tokens.
pub const CLIENT_TOKEN_PREFIX: &str = "artifactci_client_";

/// Signs client tokens with one key pair.
pub struct ClientTokenSigner {
    keypair: KeyPair,
}

impl ClientTokenSigner {
    /// Create a new signer from a key pair.
    pub fn new(keypair: KeyPair) -> Self {
        Self { keypair }
    }

    /// Create from a `keyname:base64` secret key string.
    pub fn from_secret_key_string(s: &str) -> SignerResult<Self> {
        Ok(Self::new(KeyPair::from_secret_key_string(s)?))
    }

    /// Generate a new signer with a random key.
    pub fn generate(key_name: impl Into<String>) -> Self {
        Self::new(KeyPair::generate(key_name))
    }

    pub fn key_name(&self) -> &str {
        self.keypair.name()
    }

    pub fn public_key(&self) -> &PublicKey {
        self.keypair.public()
    }

    pub fn public_key_string(&self) -> String {
        self.keypair.public_key_string()
    }

    /// Sign `claims` into a client token.
    pub fn sign(&self, claims: &ClientTokenClaims) -> SignerResult<String> {
        let json = serde_json::to_vec(claims)
            .map_err(|e| SignerError::MalformedToken(format!("unserializable claims: {e}")))?;
        let body = URL_SAFE_NO_PAD.encode(json);
        let sig = self.keypair.sign(body.as_bytes());
        let sig = URL_SAFE_NO_PAD.encode(sig.to_bytes());
        Ok(format!("{CLIENT_TOKEN_PREFIX}{body}.{sig}"))
    }

    /// Verify a token issued by this signer at time `now`.
    pub fn verify(&self, token: &str, now: OffsetDateTime) -> SignerResult<ClientTokenClaims> {
        verify_client_token(token, self.keypair.public(), now)
    }
}

impl std::fmt::Debug for ClientTokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientTokenSigner")
            .field("keypair", &self.keypair)
            .finish()
    }
}

/// Verify a client token's signature and expiry.
pub fn verify_client_token(
    token: &str,
    public_key: &PublicKey,
    now: OffsetDateTime,
) -> SignerResult<ClientTokenClaims> {
    let rest = token
        .strip_prefix(CLIENT_TOKEN_PREFIX)
        .ok_or_else(|| SignerError::MalformedToken("missing prefix".to_string()))?;
    let (body, sig) = rest
        .split_once('.')
        .ok_or_else(|| SignerError::MalformedToken("missing signature".to_string()))?;

    let sig_bytes = URL_SAFE_NO_PAD
        .decode(sig)
        .map_err(|e| SignerError::MalformedToken(format!("invalid base64: {e}")))?;
    let sig_array: [u8; 64] = sig_bytes.try_into().map_err(|v: Vec<u8>| {
        SignerError::MalformedToken(format!("expected 64 signature bytes, got {}", v.len()))
    })?;
    let signature = ed25519_dalek::Signature::from_bytes(&sig_array);

    public_key
        .verifying_key()
        .verify(body.as_bytes(), &signature)
        .map_err(|_| SignerError::VerificationFailed)?;

    let json = URL_SAFE_NO_PAD
        .decode(body)
        .map_err(|e| SignerError::MalformedToken(format!("invalid base64: {e}")))?;
    let claims: ClientTokenClaims = serde_json::from_slice(&json)
        .map_err(|e| SignerError::MalformedToken(format!("invalid claims: {e}")))?;

    if claims.is_expired(now) {
        return Err(SignerError::Expired);
    }
    Ok(claims)
}
