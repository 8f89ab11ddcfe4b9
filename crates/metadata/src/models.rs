//! Database models mapping to the metadata schema.

use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// Repositories
// =============================================================================

/// A code repository known to the service.
#[derive(Debug, Clone, FromRow)]
pub struct RepositoryRow {
    pub repo_id: Uuid,
    pub owner: String,
    pub name: String,
    pub html_url: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Identity of a repository as declared by a caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
    pub html_url: String,
}

// =============================================================================
// Upload ledger
// =============================================================================

/// One ingestion attempt of a CI job.
#[derive(Debug, Clone, FromRow)]
pub struct UploadRequestRow {
    pub upload_request_id: Uuid,
    pub repo_id: Uuid,
    pub git_ref: String,
    pub sha: String,
    pub run_id: i64,
    pub run_attempt: i64,
    pub job_id: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Input to the conditional ledger insert.
#[derive(Debug, Clone)]
pub struct NewUploadRequest {
    pub upload_request_id: Uuid,
    pub repo: RepoRef,
    pub git_ref: String,
    pub sha: String,
    pub run_id: i64,
    pub run_attempt: i64,
    pub job_id: String,
    pub now: OffsetDateTime,
}

/// A completed upload, one row per alias.
#[derive(Debug, Clone, FromRow)]
pub struct UploadRow {
    pub upload_id: Uuid,
    pub pathname: String,
    pub mime_type: String,
    pub blob_url: String,
    pub upload_request_id: Uuid,
    pub expires_at: OffsetDateTime,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

// =============================================================================
// Artifacts
// =============================================================================

/// A CI artifact recorded from webhook ingestion.
#[derive(Debug, Clone, FromRow)]
pub struct ArtifactRow {
    pub artifact_id: Uuid,
    pub repo_id: Uuid,
    /// Artifact id on the CI platform.
    pub external_id: i64,
    pub name: String,
    pub installation_id: Option<i64>,
    pub download_url: Option<String>,
    pub visibility: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// One alias (`run`, `sha` or `branch` value) of an artifact.
#[derive(Debug, Clone, FromRow)]
pub struct ArtifactIdentifierRow {
    pub artifact_id: Uuid,
    pub alias_type: String,
    pub value: String,
    pub created_at: OffsetDateTime,
}

/// One extracted file of an artifact.
#[derive(Debug, Clone, FromRow)]
pub struct ArtifactEntryRow {
    pub entry_id: Uuid,
    pub artifact_id: Uuid,
    pub entry_name: String,
    pub storage_key: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub created_at: OffsetDateTime,
}
