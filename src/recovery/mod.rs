//! Recovery strategy subsystem.
//!
//! # Data Flow
//! ```text
//! Retries exhausted or error not retryable
//!     → RecoveryRegistry::recover(error, ctx)
//!     → first strategy whose can_recover() matches
//!         → cache.rs (previously successful response)
//!         → fallback.rs (secondary data source)
//!         → or a delayed-retry recommendation
//!     → RecoveryResult back to the retry executor
//! ```
//!
//! # Design Decisions
//! - Strategies are trait objects registered in order at startup
//! - A strategy that errors or panics is skipped, the next match is tried
//! - Recovery never raises; the worst outcome is an unsuccessful result
//! - "Nothing matched" and "everything that matched failed" are reported
//!   under different strategy names

pub mod cache;
pub mod fallback;
pub mod strategies;

use async_trait::async_trait;
use futures_util::FutureExt;
use serde::Serialize;
use serde_json::{Map, Value};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use crate::config::RecoveryConfig;
use crate::context::RequestContext;
use crate::error::{BoxError, ErrorRecord};
use crate::observability::metrics;

pub use cache::{cache_key, MemoryCache, ResponseCache};
pub use fallback::{FallbackProvider, StaticFallback};
pub use strategies::{CircuitOpenRecovery, DatabaseRecovery, TransientRecovery};

/// Strategy name reported when no strategy claims an error.
pub const NO_STRATEGY_FOUND: &str = "NoStrategyFound";

/// Strategy name reported when every matching strategy errored or panicked.
pub const ALL_STRATEGIES_FAILED: &str = "AllStrategiesFailed";

/// Strategy name reported when the caller's deadline cut recovery short.
pub const RECOVERY_TIMED_OUT: &str = "RecoveryTimedOut";

/// Outcome of a recovery attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecoveryResult {
    pub success: bool,
    pub value: Option<Value>,
    pub fallback_used: bool,
    pub retry_recommended: bool,
    pub retry_delay: Option<Duration>,
    pub strategy_name: String,
    pub metadata: Map<String, Value>,
}

impl RecoveryResult {
    /// Recovered with substitute data.
    pub fn recovered(strategy: &str, value: Value, source: &str) -> Self {
        Self {
            success: true,
            value: Some(value),
            fallback_used: true,
            retry_recommended: false,
            retry_delay: None,
            strategy_name: strategy.to_string(),
            metadata: Map::new(),
        }
        .with_metadata("source", source)
    }

    /// Not recovered; try again after `delay`.
    pub fn retry_after(strategy: &str, delay: Duration) -> Self {
        Self {
            success: false,
            value: None,
            fallback_used: false,
            retry_recommended: true,
            retry_delay: Some(delay),
            strategy_name: strategy.to_string(),
            metadata: Map::new(),
        }
    }

    /// Not recovered.
    pub fn failed(strategy: &str, reason: &str) -> Self {
        Self {
            success: false,
            value: None,
            fallback_used: false,
            retry_recommended: false,
            retry_delay: None,
            strategy_name: strategy.to_string(),
            metadata: Map::new(),
        }
        .with_metadata("reason", reason)
    }

    pub fn with_retry_delay(mut self, delay: Option<Duration>) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// A way of recovering from one family of errors.
#[async_trait]
pub trait RecoveryStrategy: Send + Sync {
    fn name(&self) -> &str;

    fn can_recover(&self, error: &ErrorRecord) -> bool;

    /// Attempt recovery. An `Err` hands the error to the next matching strategy.
    async fn recover(&self, error: &ErrorRecord, ctx: &RequestContext) -> Result<RecoveryResult, BoxError>;
}

/// Ordered collection of recovery strategies.
#[derive(Default)]
pub struct RecoveryRegistry {
    strategies: Vec<Arc<dyn RecoveryStrategy>>,
}

impl RecoveryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in strategies in dispatch order: database/resource exhaustion,
    /// circuit open, timeout, network.
    pub fn with_defaults(
        cache: Arc<dyn ResponseCache>,
        provider: Option<Arc<dyn FallbackProvider>>,
        config: &RecoveryConfig,
    ) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(DatabaseRecovery::new(
            cache.clone(),
            provider.clone(),
            config.database.clone(),
        )));
        registry.register(Arc::new(CircuitOpenRecovery::new(cache, provider)));
        registry.register(Arc::new(TransientRecovery::timeout(config.timeout.clone())));
        registry.register(Arc::new(TransientRecovery::network(config.network.clone())));
        registry
    }

    /// Append a strategy; earlier registrations take precedence.
    pub fn register(&mut self, strategy: Arc<dyn RecoveryStrategy>) {
        tracing::debug!(strategy = strategy.name(), "Registered recovery strategy");
        self.strategies.push(strategy);
    }

    pub fn strategy_names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Dispatch `error` to the first strategy that claims it.
    pub async fn recover(&self, error: &ErrorRecord, ctx: &RequestContext) -> RecoveryResult {
        let mut matched = false;

        for strategy in self.strategies.iter().filter(|s| s.can_recover(error)) {
            matched = true;
            let name = strategy.name();

            match AssertUnwindSafe(strategy.recover(error, ctx)).catch_unwind().await {
                Ok(Ok(result)) => {
                    tracing::info!(
                        request_id = %ctx.request_id,
                        strategy = name,
                        kind = %error.kind(),
                        success = result.success,
                        fallback_used = result.fallback_used,
                        retry_recommended = result.retry_recommended,
                        "Recovery strategy finished"
                    );
                    metrics::record_recovery(name, result.success);
                    return result;
                }
                Ok(Err(e)) => {
                    tracing::warn!(request_id = %ctx.request_id, strategy = name, error = %e, "Recovery strategy failed, trying next");
                }
                Err(_) => {
                    tracing::error!(request_id = %ctx.request_id, strategy = name, "Recovery strategy panicked, trying next");
                }
            }
            metrics::record_recovery(name, false);
        }

        if matched {
            RecoveryResult::failed(ALL_STRATEGIES_FAILED, "every matching strategy failed")
        } else {
            tracing::debug!(request_id = %ctx.request_id, kind = %error.kind(), "No recovery strategy for error");
            RecoveryResult::failed(NO_STRATEGY_FOUND, "no strategy handles this error")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    struct Fixed {
        name: &'static str,
        kind: ErrorKind,
        behaviour: Behaviour,
    }

    enum Behaviour {
        Succeed,
        Fail,
        Panic,
    }

    #[async_trait]
    impl RecoveryStrategy for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        fn can_recover(&self, error: &ErrorRecord) -> bool {
            error.kind() == self.kind
        }

        async fn recover(&self, _error: &ErrorRecord, _ctx: &RequestContext) -> Result<RecoveryResult, BoxError> {
            match self.behaviour {
                Behaviour::Succeed => Ok(RecoveryResult::recovered(self.name, json!(1), "test")),
                Behaviour::Fail => Err("strategy broke".into()),
                Behaviour::Panic => panic!("strategy exploded"),
            }
        }
    }

    fn strategy(name: &'static str, kind: ErrorKind, behaviour: Behaviour) -> Arc<dyn RecoveryStrategy> {
        Arc::new(Fixed { name, kind, behaviour })
    }

    fn ctx() -> RequestContext {
        RequestContext::new("/orders", "GET")
    }

    #[tokio::test]
    async fn test_no_strategy_found() {
        let registry = RecoveryRegistry::new();
        let result = registry.recover(&ErrorRecord::new(ErrorKind::Validation, "bad"), &ctx()).await;
        assert!(!result.success);
        assert_eq!(result.strategy_name, NO_STRATEGY_FOUND);
    }

    #[tokio::test]
    async fn test_first_match_wins() {
        let mut registry = RecoveryRegistry::new();
        registry.register(strategy("network", ErrorKind::Network, Behaviour::Succeed));
        registry.register(strategy("db-a", ErrorKind::Database, Behaviour::Succeed));
        registry.register(strategy("db-b", ErrorKind::Database, Behaviour::Succeed));

        let result = registry.recover(&ErrorRecord::new(ErrorKind::Database, "down"), &ctx()).await;
        assert!(result.success);
        assert_eq!(result.strategy_name, "db-a");
    }

    #[tokio::test]
    async fn test_failing_and_panicking_strategies_fall_through() {
        let mut registry = RecoveryRegistry::new();
        registry.register(strategy("broken", ErrorKind::Database, Behaviour::Fail));
        registry.register(strategy("explosive", ErrorKind::Database, Behaviour::Panic));
        registry.register(strategy("steady", ErrorKind::Database, Behaviour::Succeed));

        let result = registry.recover(&ErrorRecord::new(ErrorKind::Database, "down"), &ctx()).await;
        assert!(result.success);
        assert_eq!(result.strategy_name, "steady");
    }

    #[tokio::test]
    async fn test_all_matches_failing() {
        let mut registry = RecoveryRegistry::new();
        registry.register(strategy("broken", ErrorKind::Database, Behaviour::Fail));

        registry.register(strategy("explosive", ErrorKind::Database, Behaviour::Panic));

        let result = registry.recover(&ErrorRecord::new(ErrorKind::Database, "down"), &ctx()).await;
        assert!(!result.success);
        assert_eq!(result.strategy_name, ALL_STRATEGIES_FAILED);
        assert_ne!(result.strategy_name, NO_STRATEGY_FOUND);
    }

    #[test]
    fn test_default_order() {
        let registry = RecoveryRegistry::with_defaults(Arc::new(MemoryCache::new()), None, &RecoveryConfig::default());
        assert_eq!(
            registry.strategy_names(),
            vec!["DatabaseRecovery", "CircuitOpenRecovery", "TimeoutRecovery", "NetworkRecovery"]
        );
    }
}
