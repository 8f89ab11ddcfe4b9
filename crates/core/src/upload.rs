//! Bulk upload protocol types and request validation.

use crate::{Error, MAX_RETENTION_DAYS, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for an upload request (ledger row).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UploadRequestId(Uuid);

impl UploadRequestId {
    /// Generate a new random ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from a string.
    pub fn parse(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| Error::InvalidId(format!("invalid upload request ID: {e}")))
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for UploadRequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for UploadRequestId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Debug for UploadRequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UploadRequestId({})", self.0)
    }
}

impl fmt::Display for UploadRequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The CI run a bulk request claims to come from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GithubActionsContext {
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub sha: String,
    pub run_id: u64,
    pub run_attempt: u32,
    /// Workflow job key (`GITHUB_JOB`).
    pub job: String,
    /// `owner/repo`.
    pub repository: String,
    pub github_origin: String,
    pub github_api_url: String,
    pub github_retention_days: u16,
}

impl GithubActionsContext {
    /// Split `repository` into `(owner, repo)`.
    pub fn owner_and_repo(&self) -> Result<(&str, &str)> {
        split_repository(&self.repository)
    }

    /// `{origin}/{owner}/{repo}`.
    pub fn html_url(&self) -> String {
        format!(
            "{}/{}",
            self.github_origin.trim_end_matches('/'),
            self.repository
        )
    }

    /// Prefix every pathname minted for this job starts with.
    pub fn pathname_prefix(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            self.repository, self.run_id, self.run_attempt, self.job
        )
    }

    pub fn validate(&self) -> Result<()> {
        split_repository(&self.repository)?;
        if self.git_ref.is_empty() {
            return Err(invalid("context.ref must not be empty"));
        }
        if self.sha.is_empty() || !self.sha.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(invalid("context.sha must be a hex commit sha"));
        }
        if self.run_id == 0 || self.run_attempt == 0 {
            return Err(invalid("context.runId and context.runAttempt must be positive"));
        }
        if !is_path_segment(&self.job) {
            return Err(invalid("context.job must be a single path segment"));
        }
        if !(1..=MAX_RETENTION_DAYS).contains(&self.github_retention_days) {
            return Err(invalid(format!(
                "context.githubRetentionDays must be between 1 and {MAX_RETENTION_DAYS}"
            )));
        }
        for (field, url) in [
            ("githubOrigin", &self.github_origin),
            ("githubApiUrl", &self.github_api_url),
        ] {
            if !(url.starts_with("https://") || url.starts_with("http://")) {
                return Err(invalid(format!("context.{field} must be an http(s) URL")));
            }
        }
        Ok(())
    }
}

/// Split `owner/repo`.
pub fn split_repository(repository: &str) -> Result<(&str, &str)> {
    match repository.split_once('/') {
        Some((owner, repo)) if is_path_segment(owner) && is_path_segment(repo) => Ok((owner, repo)),
        _ => Err(invalid(format!(
            "repository `{repository}` must look like owner/repo"
        ))),
    }
}

fn is_path_segment(s: &str) -> bool {
    !s.is_empty() && s != "." && s != ".." && !s.contains('/') && !s.contains('\\')
}

fn invalid(msg: impl Into<String>) -> Error {
    Error::InvalidRequest(msg.into())
}

/// Validate a client-supplied relative file path.
pub fn validate_local_path(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(invalid("localPath must not be empty"));
    }
    if path.starts_with('/') || path.starts_with('\\') {
        return Err(invalid(format!("localPath `{path}` must be relative")));
    }
    let bytes = path.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        return Err(invalid(format!(
            "localPath `{path}` must not start with a drive letter"
        )));
    }
    if path.split('/').any(|seg| seg == ".." || seg.is_empty()) {
        return Err(invalid(format!(
            "localPath `{path}` must not contain empty or `..` segments"
        )));
    }
    Ok(())
}

/// Deterministic storage pathname for one file of a job.
pub fn storage_pathname(context: &GithubActionsContext, local_path: &str) -> String {
    format!("{}/{}", context.pathname_prefix(), local_path)
}

/// Client payload attached to a bulk request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientPayload {
    #[serde(default)]
    pub github_token: Option<String>,
    pub context: GithubActionsContext,
}

/// One declared file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkFile {
    pub local_path: String,
    #[serde(default)]
    pub multipart: bool,
}

/// Body of a `bulk` upload request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkRequest {
    pub callback_url: String,
    pub client_payload: ClientPayload,
    pub files: Vec<BulkFile>,
}

impl BulkRequest {
    pub fn validate(&self) -> Result<()> {
        self.client_payload.context.validate()?;
        if self.files.is_empty() {
            return Err(invalid("files must not be empty"));
        }
        for file in &self.files {
            validate_local_path(&file.local_path)?;
        }
        Ok(())
    }
}

/// One entry of a bulk response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkResult {
    pub local_path: String,
    pub view_url: String,
    pub pathname: String,
    pub client_token: String,
    pub content_type: String,
}

/// Response to a `bulk` upload request.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkResponse {
    pub results: Vec<BulkResult>,
    pub entrypoints: Vec<String>,
}

/// Payload of a single-file `blob.generate-client-token` request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateClientTokenPayload {
    #[serde(default)]
    pub callback_url: Option<String>,
    /// Encoded [`crate::TokenPayload`].
    #[serde(default)]
    pub client_payload: Option<String>,
    pub pathname: String,
    #[serde(default)]
    pub multipart: bool,
}

/// Options the server attaches to a client token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientTokenOptions {
    pub allowed_content_types: Vec<String>,
    pub add_random_suffix: bool,
    /// Encoded [`crate::TokenPayload`].
    pub token_payload: String,
}

/// Response to `blob.generate-client-token`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateClientTokenResponse {
    #[serde(flatten)]
    pub options: ClientTokenOptions,
    pub client_token: String,
}

/// A stored blob, as reported after a direct upload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobResult {
    /// Public URL of the stored object.
    pub url: String,
    pub download_url: String,
    /// Requested pathname (without random suffix).
    pub pathname: String,
    pub content_type: String,
    pub content_disposition: String,
}

/// Body accepted by `POST /upload`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum UploadEvent {
    #[serde(rename = "bulk")]
    Bulk(BulkRequest),
    #[serde(rename = "blob.generate-client-token")]
    GenerateClientToken { payload: GenerateClientTokenPayload },
    #[serde(rename = "blob.upload-completed")]
    UploadCompleted {
        blob: BlobResult,
        #[serde(rename = "tokenPayload", default)]
        token_payload: Option<String>,
    },
}
