//! artifactci server binary.

use anyhow::{Context, Result};
use artifactci_core::config::{AppConfig, PrivateKeyConfig, SigningConfig};
use artifactci_server::sweeper::spawn_retention_sweeper;
use artifactci_server::{AppState, create_router};
use artifactci_signer::ClientTokenSigner;
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// artifactci - CI artifact upload and browsing server
#[derive(Parser, Debug)]
#[command(name = "artifactcid")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "ARTIFACTCI_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,
}

/// Load configuration from the optional file, then `ARTIFACTCI_*` env vars.
fn load_config(path: &str) -> Result<AppConfig> {
    let mut figment = Figment::new();
    if std::path::Path::new(path).exists() {
        tracing::info!(config_path = %path, "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    } else {
        tracing::info!(config_path = %path, "No config file found, using defaults and environment");
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("ARTIFACTCI_").split("__"))
        .extract()
        .context("failed to load configuration")?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("artifactci v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args.config)?;

    artifactci_server::metrics::register_metrics();
    tracing::info!("Prometheus metrics registered");

    let storage = artifactci_storage::from_config(&config.storage)
        .await
        .context("failed to initialize storage")?;
    storage
        .health_check()
        .await
        .context("storage health check failed")?;
    tracing::info!(backend = storage.backend_name(), "Storage backend ready");

    let metadata = artifactci_metadata::from_config(&config.metadata)
        .await
        .context("failed to initialize metadata store")?;
    tracing::info!("Metadata store initialized");

    let signer = load_signer(&config.signing).await?;

    if config.github.app_token.is_none() {
        tracing::warn!("No GitHub app token configured, permission checks use anonymous requests");
    }
    if config.github.webhook_secret.is_none() {
        tracing::warn!("No webhook secret configured, webhook signatures are not verified");
    }

    if config.retention.sweep_enabled {
        let interval = config.retention.sweep_interval();
        spawn_retention_sweeper(metadata.clone(), interval, config.retention.batch_size);
        tracing::info!(
            interval_secs = interval.as_secs(),
            "Retention sweeper spawned"
        );
    }

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    let state = AppState::new(config, storage, metadata, signer)
        .context("failed to build application state")?;
    let app = create_router(state);

    tracing::info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Load the client token signer from configuration.
async fn load_signer(config: &SigningConfig) -> Result<ClientTokenSigner> {
    match &config.private_key {
        PrivateKeyConfig::File { path } => {
            let key_data = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("failed to read key file: {}", path.display()))?;
            let signer = ClientTokenSigner::from_secret_key_string(key_data.trim())
                .context("failed to parse signing key")?;
            tracing::info!("Loaded signing key: {}", signer.key_name());
            Ok(signer)
        }
        PrivateKeyConfig::Env { var } => {
            let key_data = std::env::var(var)
                .with_context(|| format!("signing key env var not set: {var}"))?;
            let signer = ClientTokenSigner::from_secret_key_string(key_data.trim())
                .context("failed to parse signing key")?;
            tracing::info!("Loaded signing key from env: {}", signer.key_name());
            Ok(signer)
        }
        PrivateKeyConfig::Generate => {
            tracing::warn!(
                "Generating ephemeral signing key, client tokens will not survive a restart"
            );
            let signer = ClientTokenSigner::generate(&config.key_name);
            tracing::info!("Public key: {}", signer.public_key_string());
            Ok(signer)
        }
        PrivateKeyConfig::Value { key } => {
            tracing::warn!("Using inline signing key (not recommended for production)");
            let signer = ClientTokenSigner::from_secret_key_string(key.trim())
                .context("failed to parse signing key")?;
            tracing::info!("Loaded signing key: {}", signer.key_name());
            Ok(signer)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use artifactci_signer::KeyPair;
    use tempfile::tempdir;

    #[tokio::test]
    async fn load_signer_from_file() {
        let secret = KeyPair::generate("artifacts-test").secret_key_string();
        let temp = tempdir().unwrap();
        let key_path = temp.path().join("signing.key");
        tokio::fs::write(&key_path, format!("{secret}\n")).await.unwrap();

        let config = SigningConfig {
            key_name: "ignored".to_string(),
            private_key: PrivateKeyConfig::File { path: key_path },
        };

        let loaded = load_signer(&config).await.unwrap();
        assert_eq!(loaded.key_name(), "artifacts-test");
    }

    #[tokio::test]
    async fn load_signer_generate() {
        let config = SigningConfig {
            key_name: "ephemeral".to_string(),
            private_key: PrivateKeyConfig::Generate,
        };

        let loaded = load_signer(&config).await.unwrap();
        assert_eq!(loaded.key_name(), "ephemeral");
    }

    #[tokio::test]
    async fn load_signer_from_value() {
        let pair = KeyPair::generate("inline-test");
        let config = SigningConfig {
            key_name: "inline-test".to_string(),
            private_key: PrivateKeyConfig::Value {
                key: pair.secret_key_string(),
            },
        };

        let loaded = load_signer(&config).await.unwrap();
        assert_eq!(loaded.public_key_string(), pair.public_key_string());
    }

    #[tokio::test]
    async fn load_signer_rejects_garbage() {
        let config = SigningConfig {
            key_name: "bad".to_string(),
            private_key: PrivateKeyConfig::Value {
                key: "not-a-key".to_string(),
            },
        };
        assert!(load_signer(&config).await.is_err());
    }

    #[test]
    fn load_config_reads_toml_file() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("server.toml");
        std::fs::write(
            &path,
            r#"
[server]
bind = "0.0.0.0:9090"
public_base_url = "https://artifacts.example.com"

[upload]
token_concurrency = 4
"#,
        )
        .unwrap();

        let config = load_config(path.to_str().unwrap()).unwrap();
        assert_eq!(config.server.bind, "0.0.0.0:9090");
        assert_eq!(config.upload.token_concurrency, 4);
    }

    #[test]
    fn load_config_rejects_invalid_values() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("server.toml");
        std::fs::write(&path, "[upload]\ntoken_concurrency = 0\n").unwrap();
        assert!(load_config(path.to_str().unwrap()).is_err());
    }
}
