//! Metadata store backends for tests.

use artifactci_metadata::{MetadataResult, MetadataStore, PostgresStore, SqliteStore};
use std::sync::Arc;
use tempfile::TempDir;
use testcontainers::{ContainerAsync, ImageExt, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;

/// A store plus whatever keeps it alive.
#[allow(dead_code)]
enum Backend {
    Sqlite { _dir: TempDir },
    Postgres { _container: ContainerAsync<Postgres> },
}

#[allow(dead_code)]
struct TestStore {
    store: Arc<dyn MetadataStore>,
    _backend: Backend,
}

#[allow(dead_code)]
impl TestStore {
    async fn sqlite() -> MetadataResult<Self> {
        let temp_dir = tempfile::tempdir()?;
        let store = SqliteStore::new(temp_dir.path().join("ledger.db"), None).await?;
        Ok(Self {
            store: Arc::new(store),
            _backend: Backend::Sqlite { _dir: temp_dir },
        })
    }

    async fn postgres() -> Result<Self, String> {
        let container = Postgres::default()
            .with_tag("15-alpine")
            .start()
            .await
            .map_err(|e| format!("container did not start: {e}"))?;
        let host = container
            .get_host()
            .await
            .map_err(|e| format!("container host: {e}"))?;
        let port = container
            .get_host_port_ipv4(5432)
            .await
            .map_err(|e| format!("container port: {e}"))?;

        let url = format!("postgres://postgres:postgres@{host}:{port}/postgres");
        let store = PostgresStore::from_url(&url, 5, None)
            .await
            .map_err(|e| format!("connect: {e}"))?;
        Ok(Self {
            store: Arc::new(store),
            _backend: Backend::Postgres {
                _container: container,
            },
        })
    }
}

/// Run `test_fn` against SQLite, then against PostgreSQL in a container.
///
/// PostgreSQL needs Docker; set `SKIP_POSTGRES_TESTS` to skip it.
#[allow(dead_code)]
pub async fn run_metadata_test_both<F, Fut>(test_fn: F)
where
    F: Fn(Arc<dyn MetadataStore>) -> Fut + Clone,
    Fut: std::future::Future<Output = ()>,
{
    let sqlite = TestStore::sqlite()
        .await
        .expect("sqlite test store should open");
    test_fn.clone()(sqlite.store.clone()).await;

    if std::env::var_os("SKIP_POSTGRES_TESTS").is_some() {
        return;
    }
    match TestStore::postgres().await {
        Ok(postgres) => test_fn(postgres.store.clone()).await,
        Err(err) => eprintln!("skipping PostgreSQL metadata tests: {err}"),
    }
}
