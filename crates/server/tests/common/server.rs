//! Server test utilities.

use artifactci_core::config::{AppConfig, MetadataConfig, StorageConfig};
use artifactci_metadata::{MetadataStore, SqliteStore};
use artifactci_server::{AppState, create_router};
use artifactci_signer::ClientTokenSigner;
use artifactci_storage::{FilesystemBackend, ObjectStore};
use httpmock::MockServer;
use std::sync::Arc;
use tempfile::TempDir;

/// Public base URL every test server announces.
pub const TEST_BASE_URL: &str = "http://artifacts.test";

/// Header carrying the signed-in login.
pub const IDENTITY_HEADER: &str = "x-artifactci-user";

/// A test server wrapper with all dependencies.
///
/// GitHub (API and web) is replaced by an `httpmock` server; the trusted
/// URL lists point at it.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    pub github: MockServer,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Create a new test server with temporary storage.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test server with custom config modifications.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let github = MockServer::start_async().await;

        let storage_path = temp_dir.path().join("storage");
        std::fs::create_dir_all(&storage_path).expect("Failed to create storage directory");
        let storage: Arc<dyn ObjectStore> = Arc::new(
            FilesystemBackend::new(&storage_path)
                .await
                .expect("Failed to create storage backend"),
        );

        let db_path = temp_dir.path().join("metadata.db");
        let metadata: Arc<dyn MetadataStore> = Arc::new(
            SqliteStore::new(&db_path, None)
                .await
                .expect("Failed to create metadata store"),
        );

        let mut config = AppConfig::for_testing();
        config.server.public_base_url = TEST_BASE_URL.to_string();
        config.storage = StorageConfig::Filesystem {
            path: storage_path.clone(),
        };
        config.metadata = MetadataConfig::Sqlite {
            path: db_path,
            query_timeout_secs: None,
        };
        config.github.api_url = github.base_url();
        config.github.origin = github.base_url();
        config.github.trusted_api_urls = vec![github.base_url()];
        config.github.trusted_origins = vec![github.base_url()];
        config.github.app_token = Some("ghs_test_installation".to_string());

        modifier(&mut config);

        artifactci_server::metrics::register_metrics();
        let signer = ClientTokenSigner::generate("artifacts.test-1");
        let state =
            AppState::new(config, storage, metadata, signer).expect("Failed to build state");
        let router = create_router(state.clone());

        Self {
            router,
            state,
            github,
            _temp_dir: temp_dir,
        }
    }

    /// Get access to the underlying metadata.
    pub fn metadata(&self) -> Arc<dyn MetadataStore> {
        self.state.metadata.clone()
    }

    /// Base URL of the mocked GitHub.
    pub fn github_url(&self) -> String {
        self.github.base_url()
    }
}
