//! Metadata store trait and the SQLite implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::repos::{ArtifactRepo, RepositoryRepo, UploadRepo, UploadRequestRepo};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore:
    RepositoryRepo + UploadRequestRepo + UploadRepo + ArtifactRepo + Send + Sync
{
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
    query_timeout: Duration,
}

impl SqliteStore {
    /// Create a new SQLite store and apply the schema.
    pub async fn new(
        path: impl AsRef<Path>,
        query_timeout_secs: Option<u64>,
    ) -> MetadataResult<Self> {
        let path = path.as_ref();
        let query_timeout = Duration::from_secs(query_timeout_secs.unwrap_or(60));

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        // A single connection serializes writers, which is also what makes the
        // ledger's check-then-insert atomic on SQLite.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .acquire_timeout(query_timeout)
            .connect_with(opts)
            .await?;

        let store = Self {
            pool,
            query_timeout,
        };
        store.migrate().await?;

        tracing::debug!(
            path = %path.display(),
            query_timeout_secs = query_timeout.as_secs(),
            "SQLite metadata store ready"
        );

        Ok(store)
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::raw_sql(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

mod sqlite_impl {
    use super::*;
    use crate::models::*;
    use time::OffsetDateTime;
    use uuid::Uuid;

    #[async_trait]
    impl RepositoryRepo for SqliteStore {
        async fn upsert_repository(
            &self,
            repo: &RepoRef,
            now: OffsetDateTime,
        ) -> MetadataResult<RepositoryRow> {
            let row = sqlx::query_as::<_, RepositoryRow>(
                r#"
                INSERT INTO repositories (repo_id, owner, name, html_url, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(html_url) DO UPDATE SET updated_at = excluded.updated_at
                RETURNING *
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(&repo.owner)
            .bind(&repo.name)
            .bind(&repo.html_url)
            .bind(now)
            .bind(now)
            .fetch_one(&self.pool)
            .await?;
            Ok(row)
        }

        async fn get_repository(&self, repo_id: Uuid) -> MetadataResult<Option<RepositoryRow>> {
            let row = sqlx::query_as::<_, RepositoryRow>(
                "SELECT * FROM repositories WHERE repo_id = ?",
            )
            .bind(repo_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn get_repository_by_name(
            &self,
            owner: &str,
            name: &str,
        ) -> MetadataResult<Option<RepositoryRow>> {
            let row = sqlx::query_as::<_, RepositoryRow>(
                "SELECT * FROM repositories WHERE owner = ? AND name = ?",
            )
            .bind(owner)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }
    }

    #[async_trait]
    impl UploadRequestRepo for SqliteStore {
        async fn record_upload_request(
            &self,
            request: &NewUploadRequest,
        ) -> MetadataResult<Option<UploadRequestRow>> {
            let started = std::time::Instant::now();
            let mut tx = self.pool.begin().await?;

            let repo_id: Uuid = sqlx::query_scalar(
                r#"
                INSERT INTO repositories (repo_id, owner, name, html_url, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(html_url) DO UPDATE SET updated_at = excluded.updated_at
                RETURNING repo_id
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(&request.repo.owner)
            .bind(&request.repo.name)
            .bind(&request.repo.html_url)
            .bind(request.now)
            .bind(request.now)
            .fetch_one(&mut *tx)
            .await?;

            let row = sqlx::query_as::<_, UploadRequestRow>(
                r#"
                INSERT INTO upload_requests (
                    upload_request_id, repo_id, git_ref, sha, run_id, run_attempt,
                    job_id, created_at, updated_at
                )
                SELECT ?, ?, ?, ?, ?, ?, ?, ?, ?
                WHERE NOT EXISTS (
                    SELECT 1 FROM upload_requests
                    WHERE repo_id = ? AND run_id = ? AND run_attempt = ? AND job_id = ?
                )
                ON CONFLICT DO NOTHING
                RETURNING *
                "#,
            )
            .bind(request.upload_request_id)
            .bind(repo_id)
            .bind(&request.git_ref)
            .bind(&request.sha)
            .bind(request.run_id)
            .bind(request.run_attempt)
            .bind(&request.job_id)
            .bind(request.now)
            .bind(request.now)
            .bind(repo_id)
            .bind(request.run_id)
            .bind(request.run_attempt)
            .bind(&request.job_id)
            .fetch_optional(&mut *tx)
            .await?;

            tx.commit().await?;

            if started.elapsed() > self.query_timeout {
                tracing::warn!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "record_upload_request exceeded advisory query timeout"
                );
            }
            Ok(row)
        }

        async fn get_upload_request(
            &self,
            upload_request_id: Uuid,
        ) -> MetadataResult<Option<UploadRequestRow>> {
            let row = sqlx::query_as::<_, UploadRequestRow>(
                "SELECT * FROM upload_requests WHERE upload_request_id = ?",
            )
            .bind(upload_request_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn count_upload_requests(&self, repo_id: Uuid) -> MetadataResult<u64> {
            let count: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM upload_requests WHERE repo_id = ?")
                    .bind(repo_id)
                    .fetch_one(&self.pool)
                    .await?;
            Ok(count as u64)
        }
    }

    #[async_trait]
    impl UploadRepo for SqliteStore {
        async fn insert_uploads(&self, rows: &[UploadRow]) -> MetadataResult<()> {
            let mut tx = self.pool.begin().await?;
            for row in rows {
                sqlx::query(
                    r#"
                    INSERT INTO uploads (
                        upload_id, pathname, mime_type, blob_url, upload_request_id,
                        expires_at, created_at, updated_at
                    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(row.upload_id)
                .bind(&row.pathname)
                .bind(&row.mime_type)
                .bind(&row.blob_url)
                .bind(row.upload_request_id)
                .bind(row.expires_at)
                .bind(row.created_at)
                .bind(row.updated_at)
                .execute(&mut *tx)
                .await
                .map_err(|e| MetadataError::from_insert(e, format!("upload {}", row.upload_id)))?;
            }
            tx.commit().await?;
            Ok(())
        }

        async fn find_upload(
            &self,
            pathname: &str,
            now: OffsetDateTime,
        ) -> MetadataResult<Option<UploadRow>> {
            let row = sqlx::query_as::<_, UploadRow>(
                r#"
                SELECT * FROM uploads
                WHERE pathname = ? AND expires_at > ?
                ORDER BY created_at DESC
                LIMIT 1
                "#,
            )
            .bind(pathname)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn list_uploads_for_request(
            &self,
            upload_request_id: Uuid,
        ) -> MetadataResult<Vec<UploadRow>> {
            let rows = sqlx::query_as::<_, UploadRow>(
                "SELECT * FROM uploads WHERE upload_request_id = ? ORDER BY created_at DESC, pathname",
            )
            .bind(upload_request_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn delete_expired_uploads(
            &self,
            now: OffsetDateTime,
            limit: u32,
        ) -> MetadataResult<u64> {
            let result = sqlx::query(
                r#"
                DELETE FROM uploads WHERE upload_id IN (
                    SELECT upload_id FROM uploads WHERE expires_at <= ? LIMIT ?
                )
                "#,
            )
            .bind(now)
            .bind(i64::from(limit))
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected())
        }
    }

    #[async_trait]
    impl ArtifactRepo for SqliteStore {
        async fn upsert_artifact(&self, artifact: &ArtifactRow) -> MetadataResult<ArtifactRow> {
            let row = sqlx::query_as::<_, ArtifactRow>(
                r#"
                INSERT INTO artifacts (
                    artifact_id, repo_id, external_id, name, installation_id,
                    download_url, visibility, created_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(repo_id, external_id) DO UPDATE SET
                    name = excluded.name,
                    installation_id = excluded.installation_id,
                    download_url = excluded.download_url,
                    visibility = excluded.visibility,
                    updated_at = excluded.updated_at
                RETURNING *
                "#,
            )
            .bind(artifact.artifact_id)
            .bind(artifact.repo_id)
            .bind(artifact.external_id)
            .bind(&artifact.name)
            .bind(artifact.installation_id)
            .bind(&artifact.download_url)
            .bind(&artifact.visibility)
            .bind(artifact.created_at)
            .bind(artifact.updated_at)
            .fetch_one(&self.pool)
            .await?;
            Ok(row)
        }

        async fn get_artifact(&self, artifact_id: Uuid) -> MetadataResult<Option<ArtifactRow>> {
            let row =
                sqlx::query_as::<_, ArtifactRow>("SELECT * FROM artifacts WHERE artifact_id = ?")
                    .bind(artifact_id)
                    .fetch_optional(&self.pool)
                    .await?;
            Ok(row)
        }

        async fn add_artifact_identifiers(
            &self,
            identifiers: &[ArtifactIdentifierRow],
        ) -> MetadataResult<()> {
            let mut tx = self.pool.begin().await?;
            for ident in identifiers {
                sqlx::query(
                    r#"
                    INSERT INTO artifact_identifiers (artifact_id, alias_type, value, created_at)
                    VALUES (?, ?, ?, ?)
                    ON CONFLICT(artifact_id, alias_type, value) DO NOTHING
                    "#,
                )
                .bind(ident.artifact_id)
                .bind(&ident.alias_type)
                .bind(&ident.value)
                .bind(ident.created_at)
                .execute(&mut *tx)
                .await?;
            }
            tx.commit().await?;
            Ok(())
        }

        async fn list_artifact_identifiers(
            &self,
            artifact_id: Uuid,
        ) -> MetadataResult<Vec<ArtifactIdentifierRow>> {
            let rows = sqlx::query_as::<_, ArtifactIdentifierRow>(
                "SELECT * FROM artifact_identifiers WHERE artifact_id = ? ORDER BY alias_type, value",
            )
            .bind(artifact_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn find_artifact(
            &self,
            owner: &str,
            repo: &str,
            name: &str,
            alias_type: &str,
            value: &str,
        ) -> MetadataResult<Option<ArtifactRow>> {
            let row = sqlx::query_as::<_, ArtifactRow>(
                r#"
                SELECT a.* FROM artifacts a
                JOIN repositories r ON r.repo_id = a.repo_id
                JOIN artifact_identifiers i ON i.artifact_id = a.artifact_id
                WHERE r.owner = ? AND r.name = ? AND a.name = ?
                  AND i.alias_type = ? AND i.value = ?
                ORDER BY a.created_at DESC
                LIMIT 1
                "#,
            )
            .bind(owner)
            .bind(repo)
            .bind(name)
            .bind(alias_type)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn insert_artifact_entry(
            &self,
            entry: &ArtifactEntryRow,
            aliases: &[String],
        ) -> MetadataResult<()> {
            let mut tx = self.pool.begin().await?;
            sqlx::query(
                r#"
                INSERT INTO artifact_entries (
                    entry_id, artifact_id, entry_name, storage_key, content_type,
                    size_bytes, created_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(entry.entry_id)
            .bind(entry.artifact_id)
            .bind(&entry.entry_name)
            .bind(&entry.storage_key)
            .bind(&entry.content_type)
            .bind(entry.size_bytes)
            .bind(entry.created_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| MetadataError::from_insert(e, format!("entry {}", entry.entry_id)))?;

            for alias in aliases {
                sqlx::query(
                    "INSERT INTO artifact_entry_aliases (entry_id, alias) VALUES (?, ?) ON CONFLICT DO NOTHING",
                )
                .bind(entry.entry_id)
                .bind(alias)
                .execute(&mut *tx)
                .await?;
            }
            tx.commit().await?;
            Ok(())
        }

        async fn count_artifact_entries(&self, artifact_id: Uuid) -> MetadataResult<u64> {
            let count: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM artifact_entries WHERE artifact_id = ?")
                    .bind(artifact_id)
                    .fetch_one(&self.pool)
                    .await?;
            Ok(count as u64)
        }

        async fn find_artifact_entry(
            &self,
            artifact_id: Uuid,
            alias: &str,
        ) -> MetadataResult<Option<ArtifactEntryRow>> {
            let row = sqlx::query_as::<_, ArtifactEntryRow>(
                r#"
                SELECT e.* FROM artifact_entries e
                JOIN artifact_entry_aliases x ON x.entry_id = e.entry_id
                WHERE e.artifact_id = ? AND x.alias = ?
                ORDER BY e.created_at DESC
                LIMIT 1
                "#,
            )
            .bind(artifact_id)
            .bind(alias)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn replace_artifact_entry_aliases(
            &self,
            artifact_id: Uuid,
            aliases: &[(Uuid, Vec<String>)],
        ) -> MetadataResult<()> {
            let mut tx = self.pool.begin().await?;
            sqlx::query(
                "DELETE FROM artifact_entry_aliases WHERE entry_id IN (SELECT entry_id FROM artifact_entries WHERE artifact_id = ?)",
            )
            .bind(artifact_id)
            .execute(&mut *tx)
            .await?;

            for (entry_id, entry_aliases) in aliases {
                for alias in entry_aliases {
                    sqlx::query(
                        "INSERT INTO artifact_entry_aliases (entry_id, alias) VALUES (?, ?) ON CONFLICT DO NOTHING",
                    )
                    .bind(*entry_id)
                    .bind(alias)
                    .execute(&mut *tx)
                    .await?;
                }
            }
            tx.commit().await?;
            Ok(())
        }

        async fn list_artifact_entries(
            &self,
            artifact_id: Uuid,
        ) -> MetadataResult<Vec<ArtifactEntryRow>> {
            let rows = sqlx::query_as::<_, ArtifactEntryRow>(
                "SELECT * FROM artifact_entries WHERE artifact_id = ? ORDER BY created_at DESC, entry_name",
            )
            .bind(artifact_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }
    }
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS repositories (
    repo_id BLOB PRIMARY KEY,
    owner TEXT NOT NULL,
    name TEXT NOT NULL,
    html_url TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (owner, name)
);

-- Ledger: at most one row per (repo, run, attempt, job)
CREATE TABLE IF NOT EXISTS upload_requests (
    upload_request_id BLOB PRIMARY KEY,
    repo_id BLOB NOT NULL REFERENCES repositories(repo_id),
    git_ref TEXT NOT NULL,
    sha TEXT NOT NULL,
    run_id INTEGER NOT NULL,
    run_attempt INTEGER NOT NULL,
    job_id TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (repo_id, run_id, run_attempt, job_id)
);

CREATE TABLE IF NOT EXISTS uploads (
    upload_id BLOB PRIMARY KEY,
    pathname TEXT NOT NULL,
    mime_type TEXT NOT NULL,
    blob_url TEXT NOT NULL,
    upload_request_id BLOB NOT NULL REFERENCES upload_requests(upload_request_id),
    expires_at TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_uploads_pathname ON uploads(pathname, created_at);
CREATE INDEX IF NOT EXISTS idx_uploads_expires ON uploads(expires_at);
CREATE INDEX IF NOT EXISTS idx_uploads_request ON uploads(upload_request_id);

CREATE TABLE IF NOT EXISTS artifacts (
    artifact_id BLOB PRIMARY KEY,
    repo_id BLOB NOT NULL REFERENCES repositories(repo_id),
    external_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    installation_id INTEGER,
    download_url TEXT,
    visibility TEXT NOT NULL DEFAULT 'private',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (repo_id, external_id)
);
CREATE INDEX IF NOT EXISTS idx_artifacts_repo_name ON artifacts(repo_id, name);

CREATE TABLE IF NOT EXISTS artifact_identifiers (
    artifact_id BLOB NOT NULL REFERENCES artifacts(artifact_id) ON DELETE CASCADE,
    alias_type TEXT NOT NULL,
    value TEXT NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (artifact_id, alias_type, value)
);
CREATE INDEX IF NOT EXISTS idx_artifact_identifiers_lookup ON artifact_identifiers(alias_type, value);

CREATE TABLE IF NOT EXISTS artifact_entries (
    entry_id BLOB PRIMARY KEY,
    artifact_id BLOB NOT NULL REFERENCES artifacts(artifact_id) ON DELETE CASCADE,
    entry_name TEXT NOT NULL,
    storage_key TEXT NOT NULL,
    content_type TEXT NOT NULL,
    size_bytes INTEGER NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_artifact_entries_artifact ON artifact_entries(artifact_id, created_at);

CREATE TABLE IF NOT EXISTS artifact_entry_aliases (
    entry_id BLOB NOT NULL REFERENCES artifact_entries(entry_id) ON DELETE CASCADE,
    alias TEXT NOT NULL,
    PRIMARY KEY (entry_id, alias)
);
CREATE INDEX IF NOT EXISTS idx_artifact_entry_aliases_alias ON artifact_entry_aliases(alias);
"#;
