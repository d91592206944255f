//! Application state wiring the engine to its SQLite store.
//!
//! AppState holds the concrete instances used by both CLI and HTTP handlers.
//! The engine is generic over `JobStore`; AppState pins it to
//! `SqliteJobStore`.

use std::path::PathBuf;
use std::sync::Arc;

use taskloom_core::access::{AccessPolicy, AllowAll, DenyAll, SharedSecretPolicy};
use taskloom_core::engine::runner::{Runner, RunnerSettings};
use taskloom_core::queue::JobQueue;
use taskloom_core::registry::DefinitionRegistry;
use taskloom_infra::config::database_url;
use taskloom_infra::sqlite::job::SqliteJobStore;
use taskloom_infra::sqlite::pool::DatabasePool;
use taskloom_types::config::{ServerConfig, TaskloomConfig};
use tokio_util::sync::CancellationToken;

use crate::builtin;

pub type ConcreteRunner = Runner<SqliteJobStore>;
pub type ConcreteQueue = JobQueue<SqliteJobStore>;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<SqliteJobStore>,
    pub runner: ConcreteRunner,
    pub queue: ConcreteQueue,
    pub access: Arc<dyn AccessPolicy>,
    pub config: Arc<TaskloomConfig>,
    pub data_dir: PathBuf,
}

impl AppState {
    /// Connect to `{data_dir}/taskloom.db` and wire the engine.
    pub async fn init(
        data_dir: PathBuf,
        config: TaskloomConfig,
        shutdown: CancellationToken,
    ) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(&data_dir).await?;

        let db_pool = DatabasePool::new(&database_url(&data_dir)).await?;
        let registry = builtin::registry()?;

        let mut state = Self::from_parts(SqliteJobStore::new(db_pool), registry, config, data_dir);
        state.runner = state.runner.with_shutdown(shutdown);
        Ok(state)
    }

    pub fn from_parts(
        store: SqliteJobStore,
        registry: DefinitionRegistry,
        config: TaskloomConfig,
        data_dir: PathBuf,
    ) -> Self {
        let store = Arc::new(store);
        let registry = Arc::new(registry);
        let runner = Runner::new(store.clone(), registry.clone())
            .with_settings(RunnerSettings::from(&config.runner));
        let queue = JobQueue::new(store.clone(), registry);
        let access = access_policy(&config.server);

        Self {
            store,
            runner,
            queue,
            access,
            config: Arc::new(config),
            data_dir,
        }
    }
}

/// The run trigger requires the shared secret when one is configured.
/// Without one it is open on loopback and closed everywhere else.
pub fn access_policy(server: &ServerConfig) -> Arc<dyn AccessPolicy> {
    match server.run_secret.as_deref() {
        Some(secret) => Arc::new(SharedSecretPolicy::new(secret)),
        None if is_loopback(&server.host) => Arc::new(AllowAll),
        None => {
            tracing::warn!(
                host = %server.host,
                "no run secret configured; HTTP job endpoints are disabled on non-loopback hosts"
            );
            Arc::new(DenyAll)
        }
    }
}

fn is_loopback(host: &str) -> bool {
    host == "localhost"
        || host
            .parse::<std::net::IpAddr>()
            .is_ok_and(|ip| ip.is_loopback())
}
