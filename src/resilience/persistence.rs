//! Breaker snapshot persistence.
//!
//! # Responsibilities
//! - Serialize breaker state, counters and audit trail as versioned JSON
//! - Store one file per breaker, written atomically
//! - Run the periodic checkpoint task and flush on shutdown
//!
//! # Layout
//! ```text
//! <directory>/
//!   database.json       BreakerSnapshot
//!   platform_api.json   BreakerSnapshot
//! ```
//!
//! # Design Decisions
//! - Best effort: failures are logged and never reach the call path
//! - Readers reject unknown schema versions instead of guessing

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::CircuitBreakerConfig;
use crate::observability::metrics;
use crate::resilience::circuit_breaker::{CircuitBreakerMetrics, CircuitState, StateTransition};
use crate::resilience::registry::CircuitBreakerRegistry;

/// Version written into every snapshot.
pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

/// Persisted view of one breaker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub schema_version: u32,
    pub name: String,
    pub state: CircuitState,
    pub last_state_change: DateTime<Utc>,
    pub circuit_breaker_trips: u64,
    #[serde(default)]
    pub transitions: Vec<StateTransition>,
    pub metrics: CircuitBreakerMetrics,
    pub config: CircuitBreakerConfig,
    pub saved_at: DateTime<Utc>,
}

/// Errors from the persistence layer.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("snapshot schema version {found} is not supported (expected {expected})")]
    SchemaMismatch { found: u32, expected: u32 },

    #[error("snapshot belongs to breaker '{found}', not '{expected}'")]
    NameMismatch { found: String, expected: String },

    #[error("breaker name '{0}' cannot be used as a file name")]
    InvalidName(String),
}

/// Storage backend for breaker snapshots.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Load the snapshot for `name`. `Ok(None)` when none exists.
    async fn load(&self, name: &str) -> Result<Option<BreakerSnapshot>, PersistenceError>;

    /// Persist a snapshot, replacing any previous one.
    async fn save(&self, snapshot: &BreakerSnapshot) -> Result<(), PersistenceError>;

    /// Names of all stored snapshots.
    async fn list(&self) -> Result<Vec<String>, PersistenceError>;
}

/// One JSON file per breaker in a directory.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    directory: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path_for(&self, name: &str) -> Result<PathBuf, PersistenceError> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
            && !name.starts_with('.');
        if !valid {
            return Err(PersistenceError::InvalidName(name.to_string()));
        }
        Ok(self.directory.join(format!("{name}.json")))
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn load(&self, name: &str) -> Result<Option<BreakerSnapshot>, PersistenceError> {
        let path = self.path_for(name)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        // Check the version before the full decode so a newer layout is
        // reported as a version problem, not a parse error.
        let raw: serde_json::Value = serde_json::from_slice(&bytes)?;
        let found = raw
            .get("schema_version")
            .and_then(serde_json::Value::as_u64)
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(0);
        if found != SNAPSHOT_SCHEMA_VERSION {
            return Err(PersistenceError::SchemaMismatch {
                found,
                expected: SNAPSHOT_SCHEMA_VERSION,
            });
        }

        Ok(Some(serde_json::from_value(raw)?))
    }

    async fn save(&self, snapshot: &BreakerSnapshot) -> Result<(), PersistenceError> {
        let path = self.path_for(&snapshot.name)?;
        tokio::fs::create_dir_all(&self.directory).await?;

        let json = serde_json::to_vec_pretty(snapshot)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>, PersistenceError> {
        let mut entries = match tokio::fs::read_dir(&self.directory).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

/// Periodic snapshot writer.
///
/// Owns its task explicitly; the handle completes after the final flush
/// that follows the shutdown signal.
pub struct Checkpointer {
    registry: Arc<CircuitBreakerRegistry>,
    store: Arc<dyn SnapshotStore>,
    interval: Duration,
}

impl Checkpointer {
    pub fn new(registry: Arc<CircuitBreakerRegistry>, store: Arc<dyn SnapshotStore>, interval: Duration) -> Self {
        Self {
            registry,
            store,
            interval,
        }
    }

    /// Save every breaker once. Returns the number of snapshots written.
    pub async fn checkpoint(&self) -> usize {
        let mut written = 0;
        for snapshot in self.registry.snapshots() {
            match self.store.save(&snapshot).await {
                Ok(()) => {
                    written += 1;
                    metrics::record_checkpoint(true);
                }
                Err(e) => {
                    metrics::record_checkpoint(false);
                    tracing::warn!(breaker = %snapshot.name, error = %e, "Failed to write breaker snapshot");
                }
            }
        }
        tracing::debug!(written, "Checkpoint complete");
        written
    }

    /// Spawn the checkpoint loop.
    pub fn spawn(self, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.checkpoint().await;
                    }
                    _ = shutdown.recv() => {
                        tracing::info!("Checkpointer shutting down, flushing snapshots");
                        self.checkpoint().await;
                        break;
                    }
                }
            }
        })
    }
}
