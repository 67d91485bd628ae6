//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize subsystems in dependency order from a validated config
//! - Rehydrate breakers from snapshots before any call is admitted
//! - Start background tasks (checkpointer, config reload)
//! - Stop them again in order on shutdown
//!
//! # Design Decisions
//! - Fail fast: an invalid config or a watcher error is fatal
//! - Snapshot problems are not fatal; breakers start closed
//! - Shutdown has a timeout: tasks still running after it are abandoned

use notify::RecommendedWatcher;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::{load_config, ConfigError, ResilienceConfig};
use crate::config::watcher::ConfigWatcher;
use crate::lifecycle::shutdown::Shutdown;
use crate::observability::metrics;
use crate::pipeline::ResilientPipeline;
use crate::resilience::persistence::{Checkpointer, FileSnapshotStore, SnapshotStore};
use crate::resilience::registry::CircuitBreakerRegistry;

/// How long shutdown waits for background tasks.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors that abort startup.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid metrics address '{0}'")]
    MetricsAddress(String),

    #[error("config watcher failed: {0}")]
    Watch(#[from] notify::Error),
}

/// Running services and their background tasks.
pub struct Services {
    pub breakers: Arc<CircuitBreakerRegistry>,
    pub pipeline: Arc<ResilientPipeline>,
    pub shutdown: Arc<Shutdown>,
    config_path: Option<PathBuf>,
    tasks: Vec<JoinHandle<()>>,
    _watcher: Option<RecommendedWatcher>,
}

/// Bring up every subsystem for `config`.
///
/// With a `config_path`, the file is watched and changes are applied to the
/// breakers as they happen.
pub async fn start(config: ResilienceConfig, config_path: Option<&Path>) -> Result<Services, StartupError> {
    if config.observability.metrics_enabled {
        let addr = config
            .observability
            .metrics_address
            .parse()
            .map_err(|_| StartupError::MetricsAddress(config.observability.metrics_address.clone()))?;
        metrics::init_metrics(addr);
    }

    let breakers = Arc::new(CircuitBreakerRegistry::new(config.clone()));
    let shutdown = Arc::new(Shutdown::new());
    let mut tasks = Vec::new();

    if config.persistence.enabled {
        let store: Arc<dyn SnapshotStore> = Arc::new(FileSnapshotStore::new(&config.persistence.directory));
        breakers.rehydrate(store.as_ref()).await;

        let checkpointer = Checkpointer::new(
            Arc::clone(&breakers),
            store,
            config.persistence.checkpoint_interval(),
        );
        tasks.push(checkpointer.spawn(shutdown.subscribe()));
        tracing::info!(
            directory = %config.persistence.directory,
            interval_ms = config.persistence.checkpoint_interval_ms,
            "Breaker checkpointing enabled"
        );
    }

    let watcher = match config_path {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            let watcher = watcher.run()?;
            tasks.push(spawn_reloader(Arc::clone(&breakers), updates, &shutdown));
            Some(watcher)
        }
        None => None,
    };

    let pipeline = Arc::new(ResilientPipeline::new(config, Arc::clone(&breakers)));

    Ok(Services {
        breakers,
        pipeline,
        shutdown,
        config_path: config_path.map(Path::to_path_buf),
        tasks,
        _watcher: watcher,
    })
}

fn spawn_reloader(
    breakers: Arc<CircuitBreakerRegistry>,
    mut updates: mpsc::UnboundedReceiver<ResilienceConfig>,
    shutdown: &Shutdown,
) -> JoinHandle<()> {
    let mut stop = shutdown.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                update = updates.recv() => match update {
                    Some(config) => {
                        breakers.apply_config(config);
                        tracing::info!("Breaker configuration reloaded");
                    }
                    None => break,
                },
                _ = stop.recv() => break,
            }
        }
    })
}

impl Services {
    /// Re-read the config file and apply it to the breakers.
    pub fn reload(&self) -> Result<(), ConfigError> {
        let Some(path) = &self.config_path else {
            tracing::warn!("Reload requested but no config file is in use");
            return Ok(());
        };
        let config = load_config(path)?;
        self.breakers.apply_config(config);
        tracing::info!(path = ?path, "Configuration reloaded");
        Ok(())
    }

    /// Signal every background task and wait for it, up to [`SHUTDOWN_TIMEOUT`].
    pub async fn stop(self) {
        self.shutdown.trigger();
        let drain = futures_util::future::join_all(self.tasks);
        match tokio::time::timeout(SHUTDOWN_TIMEOUT, drain).await {
            Ok(results) => {
                for result in results.into_iter().filter_map(Result::err) {
                    tracing::error!(error = %result, "Background task ended abnormally");
                }
            }
            Err(_) => tracing::warn!(timeout = ?SHUTDOWN_TIMEOUT, "Background tasks did not stop in time"),
        }
        tracing::info!("Shutdown complete");
    }
}
