//! Completed upload records.

use crate::error::MetadataResult;
use crate::models::UploadRow;
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

#[async_trait]
pub trait UploadRepo: Send + Sync {
    /// Insert all alias rows of one completed upload atomically.
    async fn insert_uploads(&self, rows: &[UploadRow]) -> MetadataResult<()>;

    /// Newest unexpired upload answering to `pathname`.
    async fn find_upload(
        &self,
        pathname: &str,
        now: OffsetDateTime,
    ) -> MetadataResult<Option<UploadRow>>;

    /// All rows recorded under one ledger row, newest first.
    async fn list_uploads_for_request(
        &self,
        upload_request_id: Uuid,
    ) -> MetadataResult<Vec<UploadRow>>;

    /// Delete up to `limit` rows that expired at or before `now`.
    /// Returns the number of deleted rows.
    async fn delete_expired_uploads(&self, now: OffsetDateTime, limit: u32)
    -> MetadataResult<u64>;
}
