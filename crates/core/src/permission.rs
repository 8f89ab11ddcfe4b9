//! Repository collaboration levels.

use serde::{Deserialize, Serialize};

/// Collaboration level of a user on a repository, ordered by privilege.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionLevel {
    None,
    Read,
    Triage,
    Write,
    Maintain,
    Admin,
}

impl PermissionLevel {
    /// Parse a GitHub `permission` or `role_name` value.
    ///
    /// Unknown values map to `None`.
    pub fn parse(s: &str) -> Self {
        match s {
            "admin" => Self::Admin,
            "maintain" => Self::Maintain,
            "write" | "push" => Self::Write,
            "triage" => Self::Triage,
            "read" | "pull" => Self::Read,
            _ => Self::None,
        }
    }

    pub fn can_read(&self) -> bool {
        *self >= Self::Read
    }
}
