//! CI job status model and job matching.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Normalized status of a CI job.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Success,
    Failed,
    Unexpected,
}

impl JobStatus {
    /// Map a REST API `(status, conclusion)` pair.
    pub fn from_api(status: &str, conclusion: Option<&str>) -> Self {
        match (status, conclusion) {
            ("in_progress", _) => Self::Running,
            ("completed", Some("success")) => Self::Success,
            ("completed", Some("failure")) => Self::Failed,
            _ => Self::Unexpected,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Unexpected => "unexpected",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A job of a workflow run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Numeric job id, when known.
    #[serde(default)]
    pub id: Option<u64>,
    /// Display name.
    pub name: String,
    pub status: JobStatus,
}

/// Find the job for `key`.
///
/// Exact name or id matches win. Otherwise a case-insensitive substring
/// match against display names is tried, and more than one hit is an error.
pub fn match_job<'a>(jobs: &'a [Job], key: &str) -> Result<&'a Job> {
    let exact: Vec<&Job> = jobs
        .iter()
        .filter(|j| j.name == key || j.id.is_some_and(|id| id.to_string() == key))
        .collect();
    let candidates = if exact.is_empty() {
        let needle = key.to_lowercase();
        jobs.iter()
            .filter(|j| j.name.to_lowercase().contains(&needle))
            .collect()
    } else {
        exact
    };

    match candidates.as_slice() {
        [job] => Ok(*job),
        [] => Err(Error::JobNotFound {
            key: key.to_string(),
        }),
        many => Err(Error::AmbiguousJob {
            key: key.to_string(),
            candidates: many.iter().map(|j| j.name.clone()).collect(),
        }),
    }
}
