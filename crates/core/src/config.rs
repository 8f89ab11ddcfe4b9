//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use time::Duration;

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Externally visible base URL used to build view and upload URLs.
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    /// SECURITY: When enabled, ensure this endpoint is network-restricted
    /// to authorized Prometheus scraper IPs only at the infrastructure level.
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
    /// Maximum request body size in bytes for blob and entry uploads.
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_public_base_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_max_body_size() -> usize {
    32 * 1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            public_base_url: default_public_base_url(),
            metrics_enabled: default_metrics_enabled(),
            max_body_size: default_max_body_size(),
        }
    }
}

impl ServerConfig {
    /// Base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.public_base_url.trim_end_matches('/')
    }
}

/// Storage backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage.
    Filesystem {
        /// Root directory for storage.
        path: PathBuf,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/storage"),
        }
    }
}

/// PostgreSQL SSL mode configuration.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PgSslMode {
    /// Disable SSL/TLS entirely.
    Disable,
    /// Prefer SSL/TLS but allow unencrypted connections (default).
    #[default]
    Prefer,
    /// Require SSL/TLS for all connections.
    Require,
}

/// Metadata store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database (recommended for testing and small deployments only).
    Sqlite {
        /// Database file path.
        path: PathBuf,
        /// Query timeout in seconds (advisory only - SQLite cannot force-cancel queries).
        #[serde(default = "default_sqlite_query_timeout_secs")]
        query_timeout_secs: Option<u64>,
    },
    /// PostgreSQL database.
    Postgres {
        /// Connection URL. Takes precedence over individual fields.
        url: Option<String>,
        /// Database host.
        host: Option<String>,
        /// Database port (default: 5432).
        #[serde(default = "default_pg_port")]
        port: Option<u16>,
        /// Database username.
        username: Option<String>,
        /// Database password.
        /// WARNING: Prefer ARTIFACTCI_METADATA__PASSWORD env var over storing in config.
        password: Option<String>,
        /// Database name.
        database: Option<String>,
        /// SSL mode for connections.
        ssl_mode: Option<PgSslMode>,
        /// Maximum connections in the pool.
        #[serde(default = "default_max_connections")]
        max_connections: u32,
        /// Statement timeout in milliseconds.
        #[serde(default = "default_statement_timeout_ms")]
        statement_timeout_ms: Option<u64>,
    },
}

fn default_max_connections() -> u32 {
    10
}

fn default_pg_port() -> Option<u16> {
    Some(5432)
}

fn default_statement_timeout_ms() -> Option<u64> {
    Some(30_000)
}

fn default_sqlite_query_timeout_secs() -> Option<u64> {
    Some(60)
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/metadata.db"),
            query_timeout_secs: default_sqlite_query_timeout_secs(),
        }
    }
}

impl MetadataConfig {
    /// Validate metadata configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            MetadataConfig::Sqlite { .. } => Ok(()),
            MetadataConfig::Postgres {
                url,
                host,
                database,
                ..
            } => match (url.as_ref(), host.as_ref(), database.as_ref()) {
                (Some(_), _, _) => Ok(()),
                (None, Some(_), Some(_)) => Ok(()),
                (None, None, _) => {
                    Err("postgres config requires either 'url' or 'host' + 'database'".to_string())
                }
                (None, Some(_), None) => Err(
                    "postgres config requires 'database' when using individual fields".to_string(),
                ),
            },
        }
    }
}

/// GitHub integration configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GithubConfig {
    /// REST API base URL used for server-initiated calls.
    #[serde(default = "default_github_api_url")]
    pub api_url: String,
    /// Web origin used for server-initiated calls.
    #[serde(default = "default_github_origin")]
    pub origin: String,
    /// API base URLs a CI client may declare in its context.
    #[serde(default = "default_trusted_api_urls")]
    pub trusted_api_urls: Vec<String>,
    /// Web origins a CI client may declare in its context.
    #[serde(default = "default_trusted_origins")]
    pub trusted_origins: Vec<String>,
    /// Installation-scoped token for permission checks and artifact listing.
    #[serde(default)]
    pub app_token: Option<String>,
    /// Shared secret for `x-hub-signature-256` webhook verification.
    #[serde(default)]
    pub webhook_secret: Option<String>,
    /// User agent sent on outbound requests.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Timeout for a single outbound request in seconds.
    #[serde(default = "default_github_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_github_api_url() -> String {
    "https://api.github.com".to_string()
}

fn default_github_origin() -> String {
    "https://github.com".to_string()
}

fn default_trusted_api_urls() -> Vec<String> {
    vec![default_github_api_url()]
}

fn default_trusted_origins() -> Vec<String> {
    vec![default_github_origin()]
}

fn default_user_agent() -> String {
    concat!("artifactci/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_github_request_timeout_secs() -> u64 {
    30
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            api_url: default_github_api_url(),
            origin: default_github_origin(),
            trusted_api_urls: default_trusted_api_urls(),
            trusted_origins: default_trusted_origins(),
            app_token: None,
            webhook_secret: None,
            user_agent: default_user_agent(),
            request_timeout_secs: default_github_request_timeout_secs(),
        }
    }
}

impl GithubConfig {
    /// Whether a client-declared API URL may be contacted.
    pub fn is_trusted_api_url(&self, url: &str) -> bool {
        let url = url.trim_end_matches('/');
        self.trusted_api_urls
            .iter()
            .any(|u| u.trim_end_matches('/') == url)
    }

    /// Whether a client-declared web origin may be contacted.
    pub fn is_trusted_origin(&self, origin: &str) -> bool {
        let origin = origin.trim_end_matches('/');
        self.trusted_origins
            .iter()
            .any(|o| o.trim_end_matches('/') == origin)
    }

    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_timeout_secs)
    }
}

/// How the declared content type of an upload is checked against
/// [`UploadConfig::allowed_content_types`].
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ContentTypePolicy {
    /// Log unknown types and allow them.
    #[default]
    Advisory,
    /// Reject unknown types.
    Enforce,
}

/// Upload protocol configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Number of per-file client tokens minted concurrently.
    #[serde(default = "default_token_concurrency")]
    pub token_concurrency: usize,
    /// Wall-clock budget for a whole bulk request in seconds.
    #[serde(default = "default_upload_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Lifetime of a client token in seconds.
    #[serde(default = "default_client_token_ttl_secs")]
    pub client_token_ttl_secs: u64,
    /// Content type policy.
    #[serde(default)]
    pub content_type_policy: ContentTypePolicy,
    /// Allowed content types; `type/*` wildcards are supported.
    #[serde(default = "default_allowed_content_types")]
    pub allowed_content_types: Vec<String>,
}

fn default_token_concurrency() -> usize {
    10
}

fn default_upload_request_timeout_secs() -> u64 {
    60
}

fn default_client_token_ttl_secs() -> u64 {
    3600
}

fn default_allowed_content_types() -> Vec<String> {
    [
        "text/*",
        "image/*",
        "video/*",
        "audio/*",
        "font/*",
        "application/json",
        "application/javascript",
        "application/pdf",
        "application/xml",
        "application/zip",
        "application/gzip",
        "application/wasm",
        "application/octet-stream",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            token_concurrency: default_token_concurrency(),
            request_timeout_secs: default_upload_request_timeout_secs(),
            client_token_ttl_secs: default_client_token_ttl_secs(),
            content_type_policy: ContentTypePolicy::default(),
            allowed_content_types: default_allowed_content_types(),
        }
    }
}

impl UploadConfig {
    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_timeout_secs)
    }

    pub fn client_token_ttl(&self) -> Duration {
        let secs = i64::try_from(self.client_token_ttl_secs).unwrap_or(i64::MAX);
        Duration::seconds(secs)
    }

    /// Whether `content_type` matches the allow-list.
    pub fn is_allowed_content_type(&self, content_type: &str) -> bool {
        crate::mime::matches_any(content_type, &self.allowed_content_types)
    }

    /// Validate upload configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.token_concurrency == 0 {
            return Err("upload.token_concurrency must be at least 1".to_string());
        }
        if self.request_timeout_secs == 0 {
            return Err("upload.request_timeout_secs must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Signing configuration for client tokens.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SigningConfig {
    /// Key name (e.g., "artifacts.example.com-1").
    pub key_name: String,
    /// Private key source.
    pub private_key: PrivateKeyConfig,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            key_name: "artifactci-dev".to_string(),
            private_key: PrivateKeyConfig::Generate,
        }
    }
}

/// Private key source configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PrivateKeyConfig {
    /// Key stored in a file.
    File {
        /// Path to the private key file.
        path: PathBuf,
    },
    /// Key stored in environment variable.
    Env {
        /// Environment variable name.
        var: String,
    },
    /// Key provided directly as a value (NOT recommended for production).
    Value {
        /// The signing key in `name:base64` format.
        key: String,
    },
    /// Generate a new key on startup (tokens do not survive restarts).
    Generate,
}

/// Identity configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Header carrying the verified GitHub login set by the session layer.
    #[serde(default = "default_identity_header")]
    pub identity_header: String,
}

fn default_identity_header() -> String {
    "x-artifactci-user".to_string()
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            identity_header: default_identity_header(),
        }
    }
}

/// Retention sweeper configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Periodically delete expired upload rows (disabled by default).
    #[serde(default)]
    pub sweep_enabled: bool,
    /// Interval in seconds between sweeps.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Maximum rows deleted per batch.
    #[serde(default = "default_sweep_batch_size")]
    pub batch_size: u32,
}

fn default_sweep_interval_secs() -> u64 {
    3600
}

fn default_sweep_batch_size() -> u32 {
    1000
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            sweep_enabled: false,
            sweep_interval_secs: default_sweep_interval_secs(),
            batch_size: default_sweep_batch_size(),
        }
    }
}

impl RetentionConfig {
    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_secs)
    }

    /// Validate retention configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.sweep_enabled && self.sweep_interval_secs == 0 {
            return Err("retention.sweep_interval_secs cannot be 0 when sweeping is enabled. \
                 Use a value >= 1 second."
                .to_string());
        }
        if self.batch_size == 0 {
            return Err("retention.batch_size must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub github: GithubConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub signing: SigningConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
}

impl AppConfig {
    /// Create a test configuration with sensible defaults.
    ///
    /// **For testing only.** Uses filesystem storage, SQLite metadata
    /// and a freshly generated signing key.
    pub fn for_testing() -> Self {
        Self::default()
    }

    /// Validate every section, returning the first error.
    pub fn validate(&self) -> Result<(), String> {
        self.metadata.validate()?;
        self.upload.validate()?;
        self.retention.validate()?;
        Ok(())
    }
}
