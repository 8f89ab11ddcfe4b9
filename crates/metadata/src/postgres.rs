//! PostgreSQL-based metadata store implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::models::*;
use crate::repos::{ArtifactRepo, RepositoryRepo, UploadRepo, UploadRequestRepo};
use crate::store::MetadataStore;
use artifactci_core::config::PgSslMode;
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode as SqlxPgSslMode};
use sqlx::{Pool, Postgres};
use std::str::FromStr;
use time::OffsetDateTime;
use uuid::Uuid;

/// PostgreSQL schema (embedded).
const POSTGRES_SCHEMA: &str = include_str!("postgres_schema.sql");

fn postgres_schema_statements(schema: &str) -> Vec<&str> {
    schema
        .split(';')
        .filter_map(|statement| {
            let trimmed = statement.trim();
            if trimmed.is_empty() {
                return None;
            }
            let has_sql = trimmed.lines().any(|line| {
                let line = line.trim();
                !line.is_empty() && !line.starts_with("--")
            });
            has_sql.then_some(trimmed)
        })
        .collect()
}

/// PostgreSQL-based metadata store.
pub struct PostgresStore {
    pool: Pool<Postgres>,
}

impl PostgresStore {
    /// Create a new PostgreSQL store from a connection URL.
    pub async fn from_url(
        url: &str,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        let opts = PgConnectOptions::from_str(url)?;
        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    /// Create a new PostgreSQL store from individual connection parameters.
    ///
    /// Lets the password come from its own environment variable instead of
    /// being embedded in a URL.
    #[allow(clippy::too_many_arguments)]
    pub async fn from_params(
        host: &str,
        port: u16,
        username: Option<&str>,
        password: Option<&str>,
        database: &str,
        ssl_mode: Option<PgSslMode>,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        let mut opts = PgConnectOptions::new()
            .host(host)
            .port(port)
            .database(database);

        if let Some(user) = username {
            opts = opts.username(user);
        }

        if let Some(pass) = password {
            opts = opts.password(pass);
        }

        if let Some(mode) = ssl_mode {
            let sqlx_mode = match mode {
                PgSslMode::Disable => SqlxPgSslMode::Disable,
                PgSslMode::Prefer => SqlxPgSslMode::Prefer,
                PgSslMode::Require => SqlxPgSslMode::Require,
            };
            opts = opts.ssl_mode(sqlx_mode);
        }

        // Log connection info without password
        tracing::info!(
            host = host,
            port = port,
            database = database,
            username = username.unwrap_or("<none>"),
            ssl_mode = ?ssl_mode,
            "Connecting to PostgreSQL with individual parameters"
        );

        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    async fn connect(
        mut opts: PgConnectOptions,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        if let Some(timeout_ms) = statement_timeout_ms {
            opts = opts.options([("statement_timeout", format!("{}ms", timeout_ms))]);
            tracing::info!("PostgreSQL statement_timeout set to {}ms", timeout_ms);
        }

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        Ok(store)
    }
}

#[async_trait]
impl MetadataStore for PostgresStore {
    async fn migrate(&self) -> MetadataResult<()> {
        // PostgreSQL doesn't allow multiple statements in a single prepared statement.
        for statement in postgres_schema_statements(POSTGRES_SCHEMA) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl RepositoryRepo for PostgresStore {
    async fn upsert_repository(
        &self,
        repo: &RepoRef,
        now: OffsetDateTime,
    ) -> MetadataResult<RepositoryRow> {
        let row = sqlx::query_as::<_, RepositoryRow>(
            r#"
            INSERT INTO repositories (repo_id, owner, name, html_url, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $5)
            ON CONFLICT (html_url) DO UPDATE SET updated_at = EXCLUDED.updated_at
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&repo.owner)
        .bind(&repo.name)
        .bind(&repo.html_url)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn get_repository(&self, repo_id: Uuid) -> MetadataResult<Option<RepositoryRow>> {
        let row =
            sqlx::query_as::<_, RepositoryRow>("SELECT * FROM repositories WHERE repo_id = $1")
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
            "SELECT * FROM repositories WHERE owner = $1 AND name = $2",
        )
        .bind(owner)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }
}

#[async_trait]
impl UploadRequestRepo for PostgresStore {
    async fn record_upload_request(
        &self,
        request: &NewUploadRequest,
    ) -> MetadataResult<Option<UploadRequestRow>> {
        // One statement: the repository upsert and the conditional ledger
        // insert either both apply or neither does.
        let row = sqlx::query_as::<_, UploadRequestRow>(
            r#"
            WITH repo AS (
                INSERT INTO repositories (repo_id, owner, name, html_url, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $5)
                ON CONFLICT (html_url) DO UPDATE SET updated_at = EXCLUDED.updated_at
                RETURNING repo_id
            )
            INSERT INTO upload_requests (
                upload_request_id, repo_id, git_ref, sha, run_id, run_attempt,
                job_id, created_at, updated_at
            )
            SELECT $6, repo.repo_id, $7, $8, $9, $10, $11, $5, $5
            FROM repo
            WHERE NOT EXISTS (
                SELECT 1 FROM upload_requests u
                WHERE u.repo_id = repo.repo_id
                  AND u.run_id = $9
                  AND u.run_attempt = $10
                  AND u.job_id = $11
            )
            ON CONFLICT DO NOTHING
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&request.repo.owner)
        .bind(&request.repo.name)
        .bind(&request.repo.html_url)
        .bind(request.now)
        .bind(request.upload_request_id)
        .bind(&request.git_ref)
        .bind(&request.sha)
        .bind(request.run_id)
        .bind(request.run_attempt)
        .bind(&request.job_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn get_upload_request(
        &self,
        upload_request_id: Uuid,
    ) -> MetadataResult<Option<UploadRequestRow>> {
        let row = sqlx::query_as::<_, UploadRequestRow>(
            "SELECT * FROM upload_requests WHERE upload_request_id = $1",
        )
        .bind(upload_request_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn count_upload_requests(&self, repo_id: Uuid) -> MetadataResult<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM upload_requests WHERE repo_id = $1")
                .bind(repo_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count as u64)
    }
}

#[async_trait]
impl UploadRepo for PostgresStore {
    async fn insert_uploads(&self, rows: &[UploadRow]) -> MetadataResult<()> {
        let mut tx = self.pool.begin().await?;
        for row in rows {
            sqlx::query(
                r#"
                INSERT INTO uploads (
                    upload_id, pathname, mime_type, blob_url, upload_request_id,
                    expires_at, created_at, updated_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
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
            WHERE pathname = $1 AND expires_at > $2
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
            "SELECT * FROM uploads WHERE upload_request_id = $1 ORDER BY created_at DESC, pathname",
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
                SELECT upload_id FROM uploads WHERE expires_at <= $1 LIMIT $2
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
impl ArtifactRepo for PostgresStore {
    async fn upsert_artifact(&self, artifact: &ArtifactRow) -> MetadataResult<ArtifactRow> {
        let row = sqlx::query_as::<_, ArtifactRow>(
            r#"
            INSERT INTO artifacts (
                artifact_id, repo_id, external_id, name, installation_id,
                download_url, visibility, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (repo_id, external_id) DO UPDATE SET
                name = EXCLUDED.name,
                installation_id = EXCLUDED.installation_id,
                download_url = EXCLUDED.download_url,
                visibility = EXCLUDED.visibility,
                updated_at = EXCLUDED.updated_at
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
        let row = sqlx::query_as::<_, ArtifactRow>("SELECT * FROM artifacts WHERE artifact_id = $1")
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
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (artifact_id, alias_type, value) DO NOTHING
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
            "SELECT * FROM artifact_identifiers WHERE artifact_id = $1 ORDER BY alias_type, value",
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
            WHERE r.owner = $1 AND r.name = $2 AND a.name = $3
              AND i.alias_type = $4 AND i.value = $5
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
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
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
                "INSERT INTO artifact_entry_aliases (entry_id, alias) VALUES ($1, $2) ON CONFLICT DO NOTHING",
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
            sqlx::query_scalar("SELECT COUNT(*) FROM artifact_entries WHERE artifact_id = $1")
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
            WHERE e.artifact_id = $1 AND x.alias = $2
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
            "DELETE FROM artifact_entry_aliases WHERE entry_id IN (SELECT entry_id FROM artifact_entries WHERE artifact_id = $1)",
        )
        .bind(artifact_id)
        .execute(&mut *tx)
        .await?;

        for (entry_id, entry_aliases) in aliases {
            for alias in entry_aliases {
                sqlx::query(
                    "INSERT INTO artifact_entry_aliases (entry_id, alias) VALUES ($1, $2) ON CONFLICT DO NOTHING",
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
            "SELECT * FROM artifact_entries WHERE artifact_id = $1 ORDER BY created_at DESC, entry_name",
        )
        .bind(artifact_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
