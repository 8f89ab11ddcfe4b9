//! Artifact, identifier and entry records.

use crate::error::MetadataResult;
use crate::models::{ArtifactEntryRow, ArtifactIdentifierRow, ArtifactRow};
use async_trait::async_trait;
use uuid::Uuid;

#[async_trait]
pub trait ArtifactRepo: Send + Sync {
    /// Insert an artifact, or refresh the existing row with the same
    /// (repo_id, external_id). Returns the stored row.
    async fn upsert_artifact(&self, artifact: &ArtifactRow) -> MetadataResult<ArtifactRow>;

    async fn get_artifact(&self, artifact_id: Uuid) -> MetadataResult<Option<ArtifactRow>>;

    /// Attach identifiers; existing (artifact, type, value) triples are kept.
    async fn add_artifact_identifiers(
        &self,
        identifiers: &[ArtifactIdentifierRow],
    ) -> MetadataResult<()>;

    async fn list_artifact_identifiers(
        &self,
        artifact_id: Uuid,
    ) -> MetadataResult<Vec<ArtifactIdentifierRow>>;

    /// Newest artifact named `name` in `owner/repo` carrying the identifier.
    async fn find_artifact(
        &self,
        owner: &str,
        repo: &str,
        name: &str,
        alias_type: &str,
        value: &str,
    ) -> MetadataResult<Option<ArtifactRow>>;

    /// Record an extracted entry and the aliases that resolve to it.
    async fn insert_artifact_entry(
        &self,
        entry: &ArtifactEntryRow,
        aliases: &[String],
    ) -> MetadataResult<()>;

    async fn count_artifact_entries(&self, artifact_id: Uuid) -> MetadataResult<u64>;

    /// Newest entry of the artifact answering to `alias`.
    async fn find_artifact_entry(
        &self,
        artifact_id: Uuid,
        alias: &str,
    ) -> MetadataResult<Option<ArtifactEntryRow>>;

    /// Replace the alias rows of an artifact's entries with `aliases`, keyed
    /// by entry id. Entries left out keep no aliases.
    async fn replace_artifact_entry_aliases(
        &self,
        artifact_id: Uuid,
        aliases: &[(Uuid, Vec<String>)],
    ) -> MetadataResult<()>;

    /// All entries of an artifact, newest first.
    async fn list_artifact_entries(
        &self,
        artifact_id: Uuid,
    ) -> MetadataResult<Vec<ArtifactEntryRow>>;
}
