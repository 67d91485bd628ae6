//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to a protected resource:
//!     → registry.rs (breaker for the resource)
//!     → retries.rs (attempt loop under a policy)
//!         → circuit_breaker.rs (admission, request timeout, outcome recording)
//!         → timeouts.rs (attempt limit and overall deadline)
//!         → backoff.rs (delay before the next attempt)
//!     → window.rs (rolling call records behind breaker metrics)
//!     → persistence.rs (periodic snapshots, rehydration at startup)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every wait has a deadline
//! - Circuit breaker prevents cascading failures
//! - Breaker state is per process; there is no cross-process coordination

pub mod backoff;
pub mod circuit_breaker;
pub mod persistence;
pub mod registry;
pub mod retries;
pub mod timeouts;
pub mod window;

pub use circuit_breaker::{BreakerError, CircuitBreaker, CircuitBreakerMetrics, CircuitState, Permit, StateTransition};
pub use persistence::{BreakerSnapshot, Checkpointer, FileSnapshotStore, PersistenceError, SnapshotStore};
pub use registry::CircuitBreakerRegistry;
pub use retries::{RetryAttempt, RetryExecutor, RetryPolicy, RetryPolicyRegistry, RetryResult};
