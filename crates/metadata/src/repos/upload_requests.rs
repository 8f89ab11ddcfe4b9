//! Upload request ledger.

use crate::error::MetadataResult;
use crate::models::{NewUploadRequest, UploadRequestRow};
use async_trait::async_trait;
use uuid::Uuid;

/// Ledger of ingestion attempts, at most one per
/// (repository, run, attempt, job).
#[async_trait]
pub trait UploadRequestRepo: Send + Sync {
    /// Upsert the repository and insert the ledger row unless one already
    /// exists for the same (repository, run, attempt, job).
    ///
    /// Returns `None` when a matching row exists. Callers treat that as a
    /// duplicate request, not as a failure.
    async fn record_upload_request(
        &self,
        request: &NewUploadRequest,
    ) -> MetadataResult<Option<UploadRequestRow>>;

    async fn get_upload_request(
        &self,
        upload_request_id: Uuid,
    ) -> MetadataResult<Option<UploadRequestRow>>;

    /// Number of ledger rows for a repository.
    async fn count_upload_requests(&self, repo_id: Uuid) -> MetadataResult<u64>;
}
