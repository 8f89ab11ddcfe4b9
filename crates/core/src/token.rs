//! Token payloads carried inside signed client tokens.

use crate::upload::UploadRequestId;
use crate::{Error, MAX_RETENTION_DAYS, Result};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Authorization context riding inside a client token.
///
/// The encoded form is plain JSON; integrity comes from the signature over
/// the enclosing [`ClientTokenClaims`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPayload {
    pub upload_request_id: UploadRequestId,
    pub retention_days: u16,
}

impl TokenPayload {
    /// Encode to the opaque string form.
    pub fn stringify(&self) -> String {
        // Serializing a struct of a UUID and an integer cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Decode from the opaque string form.
    pub fn parse(text: &str) -> Result<Self> {
        let payload: Self = serde_json::from_str(text)
            .map_err(|e| Error::InvalidToken(format!("malformed token payload: {e}")))?;
        if !(1..=MAX_RETENTION_DAYS).contains(&payload.retention_days) {
            return Err(Error::InvalidToken(format!(
                "retentionDays {} out of range",
                payload.retention_days
            )));
        }
        Ok(payload)
    }

    /// Expiry for an upload completed at `completed_at`.
    pub fn expires_at(&self, completed_at: OffsetDateTime) -> OffsetDateTime {
        completed_at + time::Duration::days(i64::from(self.retention_days))
    }
}

/// Claims signed into a client token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientTokenClaims {
    /// Pathname the holder may write.
    pub pathname: String,
    pub allowed_content_types: Vec<String>,
    pub add_random_suffix: bool,
    /// Encoded [`TokenPayload`].
    pub token_payload: String,
    /// Where completion events are reported.
    #[serde(default)]
    pub callback_url: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub valid_until: OffsetDateTime,
}

impl ClientTokenClaims {
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        now >= self.valid_until
    }

    /// Whether `content_type` is one the holder may upload.
    pub fn allows_content_type(&self, content_type: &str) -> bool {
        self.allowed_content_types.is_empty()
            || crate::mime::matches_any(content_type, &self.allowed_content_types)
    }
}
