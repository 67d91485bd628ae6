//! Resilience execution core.
//!
//! Wraps outbound operations (database queries, remote API calls) in a
//! single fault-tolerance pipeline: circuit breaker admission, policy-driven
//! retries with backoff and jitter, per-error-kind recovery strategies, and
//! confidence-scored graceful degradation.

pub mod config;
pub mod context;
pub mod degradation;
pub mod error;
pub mod lifecycle;
pub mod observability;
pub mod pipeline;
pub mod recovery;
pub mod resilience;

pub use config::ResilienceConfig;
pub use context::RequestContext;
pub use degradation::{DegradationHandler, FallbackResponse};
pub use error::{BoxError, ErrorKind, ErrorRecord};
pub use lifecycle::Shutdown;
pub use pipeline::{Outcome, ResilientPipeline};
pub use recovery::{RecoveryRegistry, RecoveryResult, RecoveryStrategy};
pub use resilience::{
    BreakerError, CircuitBreaker, CircuitBreakerRegistry, CircuitState, RetryExecutor, RetryPolicy, RetryResult,
};
