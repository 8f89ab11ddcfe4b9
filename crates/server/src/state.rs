//! Application state shared across handlers.

use crate::github::{GithubClient, GithubError};
use artifactci_core::config::AppConfig;
use artifactci_metadata::MetadataStore;
use artifactci_signer::ClientTokenSigner;
use artifactci_storage::ObjectStore;
use std::sync::Arc;

/// Shared application state.
///
/// Every collaborator is built once at startup and injected here; handlers
/// never reach for process-wide singletons.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Object storage backend.
    pub storage: Arc<dyn ObjectStore>,
    /// Metadata store.
    pub metadata: Arc<dyn MetadataStore>,
    /// Client token signer.
    pub signer: Arc<ClientTokenSigner>,
    /// GitHub client for permission checks, artifact listing and job status.
    pub github: Arc<GithubClient>,
}

impl AppState {
    /// Create a new application state.
    pub fn new(
        config: AppConfig,
        storage: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
        signer: ClientTokenSigner,
    ) -> Result<Self, GithubError> {
        let github = GithubClient::new(&config.github)?;
        Ok(Self {
            config: Arc::new(config),
            storage,
            metadata,
            signer: Arc::new(signer),
            github: Arc::new(github),
        })
    }

    /// Public base URL without trailing slash.
    pub fn base_url(&self) -> &str {
        self.config.server.base_url()
    }

    /// URL a stored blob is downloaded from.
    pub fn blob_url(&self, key: &str) -> String {
        format!("{}/blob/{key}", self.base_url())
    }

    /// Storage key of a blob URL minted by [`AppState::blob_url`].
    pub fn blob_key<'a>(&self, blob_url: &'a str) -> Option<&'a str> {
        blob_url
            .strip_prefix(self.base_url())
            .and_then(|rest| rest.strip_prefix("/blob/"))
            .or_else(|| blob_url.split_once("/blob/").map(|(_, key)| key))
            .filter(|key| !key.is_empty())
    }

    /// Public view URL of an uploaded pathname.
    pub fn view_url(&self, pathname: &str) -> String {
        format!("{}/artifact/blob/{pathname}", self.base_url())
    }
}
