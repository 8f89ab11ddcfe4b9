//! Artifact aliases and HTTP caching policy.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for an artifact.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactId(Uuid);

impl ArtifactId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| Error::InvalidId(format!("invalid artifact ID: {e}")))
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ArtifactId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for ArtifactId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Debug for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArtifactId({})", self.0)
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable identifier category used in artifact URLs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AliasType {
    /// A specific workflow run.
    Run,
    /// A commit sha.
    Sha,
    /// A branch name; moves over time.
    Branch,
}

/// Cache-control for mutable aliases.
pub const CACHE_CONTROL_MUTABLE: &str = "max-age=300, must-revalidate";
/// Cache-control for immutable aliases.
pub const CACHE_CONTROL_IMMUTABLE: &str = "max-age=31536000, immutable";

impl AliasType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "run" => Some(Self::Run),
            "sha" => Some(Self::Sha),
            "branch" => Some(Self::Branch),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Run => "run",
            Self::Sha => "sha",
            Self::Branch => "branch",
        }
    }

    /// Content behind a run id or a commit never changes.
    pub fn is_immutable(&self) -> bool {
        matches!(self, Self::Run | Self::Sha)
    }

    pub fn cache_control(&self) -> &'static str {
        if self.is_immutable() {
            CACHE_CONTROL_IMMUTABLE
        } else {
            CACHE_CONTROL_MUTABLE
        }
    }
}

impl fmt::Display for AliasType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Content-disposition for a stored object: inline for renderable types,
/// an attachment otherwise.
pub fn content_disposition_for(content_type: &str, filename: &str) -> String {
    let filename = filename.replace(['"', '\\'], "_");
    let kind = if crate::mime::is_inline(content_type) {
        "inline"
    } else {
        "attachment"
    };
    format!("{kind}; filename=\"{filename}\"")
}
