//! Resilience core daemon.
//!
//! # Architecture Overview
//!
//! ```text
//!     Caller operation
//!     ─────────────────▶ ┌──────────────────────────────────────────────────┐
//!                        │                 RESILIENT PIPELINE                │
//!                        │  ┌─────────┐   ┌──────────┐   ┌───────────────┐  │
//!                        │  │  retry  │──▶│ circuit  │──▶│   operation   │  │
//!                        │  │executor │   │ breaker  │   │ (db, remote)  │  │
//!                        │  └────┬────┘   └──────────┘   └───────────────┘  │
//!                        │       │ exhausted / not retryable                 │
//!                        │       ▼                                           │
//!                        │  ┌──────────┐   ┌─────────────┐                   │
//!                        │  │ recovery │──▶│ degradation │                   │
//!                        │  │strategies│   │   handler   │                   │
//!                        │  └──────────┘   └─────────────┘                   │
//!                        │                                                   │
//!                        │  config (hot reload) · observability · lifecycle  │
//!                        │  breaker snapshots (checkpoint / rehydrate)       │
//!                        └──────────────────────────────────────────────────┘
//! ```
//!
//! The daemon owns the breaker registry: it rehydrates breakers from
//! snapshots, keeps their configuration in sync with the config file, and
//! checkpoints them until SIGINT/SIGTERM.

use clap::Parser;
use std::path::PathBuf;

use resilience_core::config::{load_config, ResilienceConfig};
use resilience_core::lifecycle::{self, SignalEvent};
use resilience_core::observability::init_logging;

#[derive(Parser)]
#[command(name = "resilience-core")]
#[command(about = "Resilience execution core daemon", long_about = None)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, env = "RESILIENCE_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => ResilienceConfig::default(),
    };

    init_logging(&config.observability)?;
    tracing::info!("resilience-core v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        config = ?args.config,
        default_failure_threshold = config.circuit_breaker.failure_threshold,
        resources = config.resources.len(),
        persistence = config.persistence.enabled,
        metrics = config.observability.metrics_enabled,
        "Configuration loaded"
    );

    let services = lifecycle::start(config, args.config.as_deref()).await?;
    tracing::info!(breakers = services.breakers.all().len(), "Resilience core ready");

    loop {
        match lifecycle::next_signal().await? {
            SignalEvent::Reload => {
                if let Err(e) = services.reload() {
                    tracing::error!(error = %e, "Reload failed, keeping current configuration");
                }
            }
            SignalEvent::Shutdown => break,
        }
    }

    services.stop().await;
    Ok(())
}
