//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ResilienceConfig (validated)
//!     → breaker registry, retry policies, recovery, degradation
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → registry swaps each breaker's config atomically
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Durations are plain millisecond integers in the file

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    BackoffRecoveryConfig, CircuitBreakerConfig, DegradationConfig, ObservabilityConfig,
    PersistenceConfig, RecoveryConfig, ResilienceConfig, RetryConfig,
};
pub use validation::{validate_breaker, validate_config, ValidationError};
