//! Repository (code repository) records.

use crate::error::MetadataResult;
use crate::models::{RepoRef, RepositoryRow};
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

#[async_trait]
pub trait RepositoryRepo: Send + Sync {
    /// Insert a repository or bump `updated_at` of the existing row with the
    /// same `html_url`.
    async fn upsert_repository(
        &self,
        repo: &RepoRef,
        now: OffsetDateTime,
    ) -> MetadataResult<RepositoryRow>;

    async fn get_repository(&self, repo_id: Uuid) -> MetadataResult<Option<RepositoryRow>>;

    async fn get_repository_by_name(
        &self,
        owner: &str,
        name: &str,
    ) -> MetadataResult<Option<RepositoryRow>>;
}
