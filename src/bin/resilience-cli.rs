//! Operator CLI for breaker snapshots and retry policies.
//!
//! Works offline against the snapshot directory the daemon checkpoints into.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use resilience_core::config::{load_config, ResilienceConfig};
use resilience_core::error::ErrorKind;
use resilience_core::resilience::backoff::calculate_backoff;
use resilience_core::resilience::{CircuitBreaker, FileSnapshotStore, RetryPolicyRegistry, SnapshotStore};

#[derive(Parser)]
#[command(name = "resilience-cli")]
#[command(about = "Inspect and manage persisted circuit breakers", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, env = "RESILIENCE_CONFIG")]
    config: Option<PathBuf>,

    /// Snapshot directory; overrides the configured one.
    #[arg(short, long)]
    dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Summarize every persisted breaker
    Status,
    /// Print one breaker snapshot as JSON
    Inspect { name: String },
    /// Close a persisted breaker and clear its window
    Reset { name: String },
    /// Print the backoff schedule of a retry policy
    Backoff {
        /// Error kind whose policy to show (e.g. database, network)
        #[arg(short, long, default_value = "database")]
        kind: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ResilienceConfig::default(),
    };
    let dir = cli
        .dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(&config.persistence.directory));
    let store = FileSnapshotStore::new(dir);

    match cli.command {
        Commands::Status => {
            let names = store.list().await?;
            if names.is_empty() {
                println!("No breaker snapshots in {}", store.directory().display());
                return Ok(());
            }
            println!(
                "{:<24} {:<10} {:>6} {:>8} {:>10} {:>8}",
                "BREAKER", "STATE", "TRIPS", "CALLS", "FAIL RATE", "P95 MS"
            );
            for name in names {
                match store.load(&name).await {
                    Ok(Some(s)) => println!(
                        "{:<24} {:<10} {:>6} {:>8} {:>9.1}% {:>8}",
                        s.name,
                        s.state.as_str(),
                        s.circuit_breaker_trips,
                        s.metrics.total_calls,
                        s.metrics.failure_rate * 100.0,
                        s.metrics.p95_response_ms
                    ),
                    Ok(None) => {}
                    Err(e) => println!("{name:<24} unreadable: {e}"),
                }
            }
        }
        Commands::Inspect { name } => match store.load(&name).await? {
            Some(snapshot) => println!("{}", serde_json::to_string_pretty(&snapshot)?),
            None => {
                eprintln!("Error: no snapshot for breaker '{name}'");
                std::process::exit(1);
            }
        },
        Commands::Reset { name } => {
            let Some(snapshot) = store.load(&name).await? else {
                eprintln!("Error: no snapshot for breaker '{name}'");
                std::process::exit(1);
            };
            let breaker = CircuitBreaker::new(&name, snapshot.config.clone());
            breaker.restore(&snapshot)?;
            breaker.reset();
            store.save(&breaker.snapshot()).await?;
            println!("Breaker '{name}' reset to {}", breaker.state());
        }
        Commands::Backoff { kind } => {
            let kind: ErrorKind = kind.parse()?;
            let registry = RetryPolicyRegistry::from_config(&config.retry);
            let policy = registry.for_kind(kind);
            println!(
                "Policy for {kind}: max_retries={} multiplier={} jitter={} overall_timeout={}ms",
                policy.max_retries, policy.backoff_multiplier, policy.jitter_enabled, policy.overall_timeout_ms
            );
            let mut total = Duration::ZERO;
            for attempt in 1..=policy.max_retries {
                let delay = calculate_backoff(
                    attempt,
                    Duration::from_millis(policy.base_delay_ms),
                    policy.backoff_multiplier,
                    Duration::from_millis(policy.max_delay_ms),
                );
                total += delay;
                println!("  retry {attempt:>2}: {:>7}ms (cumulative {:>7}ms)", delay.as_millis(), total.as_millis());
            }
        }
    }

    Ok(())
}
