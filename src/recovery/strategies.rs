//! Built-in recovery strategies.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::BackoffRecoveryConfig;
use crate::context::RequestContext;
use crate::error::{BoxError, ErrorKind, ErrorRecord};
use crate::recovery::cache::{lookup, ResponseCache};
use crate::recovery::fallback::FallbackProvider;
use crate::recovery::{RecoveryResult, RecoveryStrategy};
use crate::resilience::backoff::calculate_backoff;

fn recommended_delay(config: &BackoffRecoveryConfig, attempt: u32) -> Duration {
    calculate_backoff(
        attempt.saturating_add(1),
        Duration::from_millis(config.base_delay_ms),
        config.backoff_multiplier,
        Duration::from_millis(config.max_delay_ms),
    )
}

/// Database and resource-exhaustion failures.
///
/// Cache first; on a miss recommend a retry while the local budget lasts,
/// then ask the fallback provider.
pub struct DatabaseRecovery {
    cache: Arc<dyn ResponseCache>,
    provider: Option<Arc<dyn FallbackProvider>>,
    config: BackoffRecoveryConfig,
}

impl DatabaseRecovery {
    pub fn new(
        cache: Arc<dyn ResponseCache>,
        provider: Option<Arc<dyn FallbackProvider>>,
        config: BackoffRecoveryConfig,
    ) -> Self {
        Self { cache, provider, config }
    }
}

#[async_trait]
impl RecoveryStrategy for DatabaseRecovery {
    fn name(&self) -> &str {
        "DatabaseRecovery"
    }

    fn can_recover(&self, error: &ErrorRecord) -> bool {
        matches!(error.kind(), ErrorKind::Database | ErrorKind::ResourceExhausted)
    }

    async fn recover(&self, error: &ErrorRecord, ctx: &RequestContext) -> Result<RecoveryResult, BoxError> {
        if let Some(value) = lookup(self.cache.as_ref(), ctx).await {
            return Ok(RecoveryResult::recovered(self.name(), value, "cache"));
        }

        if ctx.retry_attempt < self.config.max_retries {
            let delay = recommended_delay(&self.config, ctx.retry_attempt);
            return Ok(RecoveryResult::retry_after(self.name(), delay)
                .with_metadata("attempt", ctx.retry_attempt)
                .with_metadata("max_retries", self.config.max_retries));
        }

        let Some(provider) = &self.provider else {
            return Ok(RecoveryResult::failed(self.name(), "cache miss and no fallback provider"));
        };
        match provider.fallback(ctx, error).await? {
            Some(value) => Ok(RecoveryResult::recovered(self.name(), value, "fallback_provider")),
            None => Ok(RecoveryResult::failed(self.name(), "no fallback data available")),
        }
    }
}

/// Calls refused by an open circuit.
///
/// Cache, then fallback provider. Never recommends an immediate retry; the
/// breaker's remaining recovery time is surfaced as the retry delay.
pub struct CircuitOpenRecovery {
    cache: Arc<dyn ResponseCache>,
    provider: Option<Arc<dyn FallbackProvider>>,
}

impl CircuitOpenRecovery {
    pub fn new(cache: Arc<dyn ResponseCache>, provider: Option<Arc<dyn FallbackProvider>>) -> Self {
        Self { cache, provider }
    }
}

#[async_trait]
impl RecoveryStrategy for CircuitOpenRecovery {
    fn name(&self) -> &str {
        "CircuitOpenRecovery"
    }

    fn can_recover(&self, error: &ErrorRecord) -> bool {
        error.kind() == ErrorKind::CircuitOpen
    }

    async fn recover(&self, error: &ErrorRecord, ctx: &RequestContext) -> Result<RecoveryResult, BoxError> {
        if let Some(value) = lookup(self.cache.as_ref(), ctx).await {
            return Ok(RecoveryResult::recovered(self.name(), value, "cache"));
        }

        if let Some(provider) = &self.provider {
            if let Some(value) = provider.fallback(ctx, error).await? {
                return Ok(RecoveryResult::recovered(self.name(), value, "fallback_provider"));
            }
        }

        Ok(RecoveryResult::failed(self.name(), "circuit open and no substitute data").with_retry_delay(error.retry_after()))
    }
}

/// Timeout and network failures: a backoff recommendation with a local
/// retry budget, no data lookup.
pub struct TransientRecovery {
    name: &'static str,
    kind: ErrorKind,
    config: BackoffRecoveryConfig,
}

impl TransientRecovery {
    pub fn timeout(config: BackoffRecoveryConfig) -> Self {
        Self {
            name: "TimeoutRecovery",
            kind: ErrorKind::Timeout,
            config,
        }
    }

    pub fn network(config: BackoffRecoveryConfig) -> Self {
        Self {
            name: "NetworkRecovery",
            kind: ErrorKind::Network,
            config,
        }
    }
}

#[async_trait]
impl RecoveryStrategy for TransientRecovery {
    fn name(&self) -> &str {
        self.name
    }

    fn can_recover(&self, error: &ErrorRecord) -> bool {
        error.kind() == self.kind
    }

    async fn recover(&self, _error: &ErrorRecord, ctx: &RequestContext) -> Result<RecoveryResult, BoxError> {
        if ctx.retry_attempt < self.config.max_retries {
            let delay = recommended_delay(&self.config, ctx.retry_attempt);
            Ok(RecoveryResult::retry_after(self.name, delay).with_metadata("attempt", ctx.retry_attempt))
        } else {
            Ok(RecoveryResult::failed(self.name, "retry budget exhausted"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RecoveryConfig;
    use crate::recovery::cache::{cache_key, MemoryCache};
    use crate::recovery::fallback::StaticFallback;
    use serde_json::{json, Value};

    fn ctx(attempt: u32) -> RequestContext {
        RequestContext::new("/risk", "GET")
            .with_parameter("order", 7)
            .with_attempts(attempt, 5)
    }

    async fn warm(cache: &MemoryCache, ctx: &RequestContext, value: Value) {
        cache.set(&cache_key(ctx), value, Duration::from_secs(60)).await.unwrap();
    }

    struct FailingProvider;

    #[async_trait]
    impl FallbackProvider for FailingProvider {
        async fn fallback(&self, _ctx: &RequestContext, _error: &ErrorRecord) -> Result<Option<Value>, BoxError> {
            Err("replica unreachable".into())
        }
    }

    #[tokio::test]
    async fn test_database_cache_hit() {
        let cache = Arc::new(MemoryCache::new());
        warm(&cache, &ctx(0), json!({"score": 3})).await;
        let strategy = DatabaseRecovery::new(cache, None, RecoveryConfig::default().database);

        let result = strategy
            .recover(&ErrorRecord::new(ErrorKind::Database, "down"), &ctx(6))
            .await
            .unwrap();
        assert!(result.success);
        assert!(result.fallback_used);
        assert_eq!(result.value, Some(json!({"score": 3})));
        assert_eq!(result.metadata["source"], "cache");
    }

    #[tokio::test]
    async fn test_database_recommends_retry_within_budget() {
        let strategy = DatabaseRecovery::new(Arc::new(MemoryCache::new()), None, RecoveryConfig::default().database);
        let err = ErrorRecord::new(ErrorKind::ResourceExhausted, "pool exhausted");

        let result = strategy.recover(&err, &ctx(1)).await.unwrap();
        assert!(!result.success);
        assert!(result.retry_recommended);
        assert_eq!(result.retry_delay, Some(Duration::from_millis(2000)));

        let result = strategy.recover(&err, &ctx(3)).await.unwrap();
        assert!(!result.success);
        assert!(!result.retry_recommended);
    }

    #[tokio::test]
    async fn test_database_uses_provider_after_budget() {
        let provider: Arc<dyn FallbackProvider> = Arc::new(StaticFallback::new().with_default(json!({"score": 0})));
        let strategy = DatabaseRecovery::new(Arc::new(MemoryCache::new()), Some(provider), RecoveryConfig::default().database);

        let result = strategy
            .recover(&ErrorRecord::new(ErrorKind::Database, "down"), &ctx(4))
            .await
            .unwrap();
        assert!(result.success);
        assert!(result.fallback_used);
        assert_eq!(result.metadata["source"], "fallback_provider");
    }

    #[tokio::test]
    async fn test_provider_error_propagates() {
        let strategy = DatabaseRecovery::new(
            Arc::new(MemoryCache::new()),
            Some(Arc::new(FailingProvider)),
            RecoveryConfig::default().database,
        );
        let err = ErrorRecord::new(ErrorKind::Database, "down");
        assert!(strategy.recover(&err, &ctx(4)).await.is_err());
    }

    #[tokio::test]
    async fn test_circuit_open_surfaces_remaining_time() {
        let strategy = CircuitOpenRecovery::new(Arc::new(MemoryCache::new()), None);
        let err = ErrorRecord::new(ErrorKind::CircuitOpen, "open").with_retry_after(Duration::from_secs(12));

        let result = strategy.recover(&err, &ctx(0)).await.unwrap();
        assert!(!result.success);
        assert!(!result.retry_recommended);
        assert_eq!(result.retry_delay, Some(Duration::from_secs(12)));
    }

    #[tokio::test]
    async fn test_transient_budget() {
        let strategy = TransientRecovery::network(RecoveryConfig::default().network);
        let err = ErrorRecord::new(ErrorKind::Network, "reset");
        assert!(strategy.can_recover(&err));
        assert!(!strategy.can_recover(&ErrorRecord::new(ErrorKind::Timeout, "slow")));

        let result = strategy.recover(&err, &ctx(0)).await.unwrap();
        assert!(result.retry_recommended);
        assert_eq!(result.retry_delay, Some(Duration::from_millis(1000)));

        let result = strategy.recover(&err, &ctx(3)).await.unwrap();
        assert!(!result.retry_recommended);
        assert_eq!(result.strategy_name, "NetworkRecovery");
    }
}
