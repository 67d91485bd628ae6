//! Resilient call pipeline.
//!
//! # Data Flow
//! ```text
//! call(resource, op, policy, ctx)
//!     → breaker registry (breaker for the resource)
//!     → RetryExecutor (attempts, backoff, recovery)
//!     → success             → Outcome::Success
//!     → recovered           → Outcome::Recovered
//!     → still failing       → DegradationHandler → Outcome::Degraded
//!     → degradation disabled → Outcome::Failed
//! ```
//!
//! # Design Decisions
//! - One pipeline per process, shared by `Arc`; no module-level singletons
//! - The cache is shared by write-through, recovery and degradation

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tracing::Instrument;

use crate::config::ResilienceConfig;
use crate::context::RequestContext;
use crate::degradation::{DegradationHandler, FallbackResponse};
use crate::error::{BoxError, ErrorKind, ErrorRecord};
use crate::observability::request_span;
use crate::recovery::{FallbackProvider, MemoryCache, RecoveryRegistry, ResponseCache};
use crate::resilience::registry::CircuitBreakerRegistry;
use crate::resilience::retries::{RetryExecutor, RetryPolicy, RetryPolicyRegistry, RetryResult};

/// Final result of a resilient call.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    /// The operation itself succeeded.
    Success(T),
    /// Recovery produced a value.
    Recovered { value: T, fallback_used: bool },
    /// A degraded substitute is served instead.
    Degraded(FallbackResponse),
    /// Unrecovered failure with degradation disabled.
    Failed(ErrorRecord),
}

impl<T> Outcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    /// The value, if the operation or recovery produced one.
    pub fn value(self) -> Option<T> {
        match self {
            Outcome::Success(value) | Outcome::Recovered { value, .. } => Some(value),
            Outcome::Degraded(_) | Outcome::Failed(_) => None,
        }
    }
}

/// Composition of breakers, retries, recovery and degradation.
pub struct ResilientPipeline {
    breakers: Arc<CircuitBreakerRegistry>,
    policies: RetryPolicyRegistry,
    recovery: Arc<RecoveryRegistry>,
    degradation: DegradationHandler,
    cache: Arc<dyn ResponseCache>,
    config: ResilienceConfig,
}

impl ResilientPipeline {
    /// Pipeline with the built-in recovery strategies and an in-memory cache.
    pub fn new(config: ResilienceConfig, breakers: Arc<CircuitBreakerRegistry>) -> Self {
        Self::builder(config, breakers).build()
    }

    pub fn builder(config: ResilienceConfig, breakers: Arc<CircuitBreakerRegistry>) -> PipelineBuilder {
        PipelineBuilder {
            config,
            breakers,
            cache: None,
            provider: None,
            recovery: None,
        }
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    pub fn policies(&self) -> &RetryPolicyRegistry {
        &self.policies
    }

    /// Run `operation` against `resource`.
    ///
    /// Without an explicit policy, the policy registered for `expected`
    /// (the kind of failure the resource usually produces) is used.
    pub async fn call<T, F, Fut>(
        &self,
        resource: &str,
        expected: ErrorKind,
        operation: F,
        policy: Option<&RetryPolicy>,
        ctx: &RequestContext,
    ) -> Outcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BoxError>>,
        T: Serialize + DeserializeOwned,
    {
        let span = request_span(resource, ctx);
        async {
            let policy = policy.unwrap_or_else(|| self.policies.for_kind(expected));
            let result = self.executor(resource).execute_with_retry(operation, policy, ctx).await;
            self.finish(result, ctx).await
        }
        .instrument(span)
        .await
    }

    fn executor(&self, resource: &str) -> RetryExecutor {
        RetryExecutor::new(self.breakers.get_or_create(resource), Arc::clone(&self.recovery))
            .with_response_cache(Arc::clone(&self.cache), self.config.recovery.cache_ttl())
    }

    async fn finish<T>(&self, result: RetryResult<T>, ctx: &RequestContext) -> Outcome<T> {
        let recovered = result.recovery_used;
        let fallback_used = result.fallback_used;
        let error = result.error.clone();

        match result.into_result() {
            Ok(value) if recovered => Outcome::Recovered { value, fallback_used },
            Ok(value) => Outcome::Success(value),
            Err(record) => {
                let record = error.unwrap_or(record);
                if self.config.degradation.enabled {
                    Outcome::Degraded(self.degradation.handle(&record, ctx).await)
                } else {
                    tracing::warn!(request_id = %ctx.request_id, kind = %record.kind(), "Call failed, degradation disabled");
                    Outcome::Failed(record)
                }
            }
        }
    }
}

/// Builder for [`ResilientPipeline`].
pub struct PipelineBuilder {
    config: ResilienceConfig,
    breakers: Arc<CircuitBreakerRegistry>,
    cache: Option<Arc<dyn ResponseCache>>,
    provider: Option<Arc<dyn FallbackProvider>>,
    recovery: Option<RecoveryRegistry>,
}

impl PipelineBuilder {
    pub fn cache(mut self, cache: Arc<dyn ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn fallback_provider(mut self, provider: Arc<dyn FallbackProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Replace the built-in recovery strategies.
    pub fn recovery(mut self, recovery: RecoveryRegistry) -> Self {
        self.recovery = Some(recovery);
        self
    }

    pub fn build(self) -> ResilientPipeline {
        let cache: Arc<dyn ResponseCache> = self.cache.unwrap_or_else(|| Arc::new(MemoryCache::new()));
        let recovery = self.recovery.unwrap_or_else(|| {
            RecoveryRegistry::with_defaults(Arc::clone(&cache), self.provider.clone(), &self.config.recovery)
        });

        let mut degradation = DegradationHandler::new(self.config.degradation.clone()).with_cache(Arc::clone(&cache));
        if let Some(provider) = self.provider {
            degradation = degradation.with_provider(provider);
        }

        ResilientPipeline {
            breakers: self.breakers,
            policies: RetryPolicyRegistry::from_config(&self.config.retry),
            recovery: Arc::new(recovery),
            degradation,
            cache,
            config: self.config,
        }
    }
}
