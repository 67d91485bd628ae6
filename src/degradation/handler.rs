//! Degradation strategy selection and execution.

use futures_util::FutureExt;
use serde_json::json;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use crate::config::DegradationConfig;
use crate::context::RequestContext;
use crate::degradation::response::FallbackResponse;
use crate::error::{BoxError, ErrorKind, ErrorRecord};
use crate::observability::metrics;
use crate::recovery::cache::{lookup, ResponseCache};
use crate::recovery::fallback::FallbackProvider;

/// How a failure of a given kind is degraded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DegradationStrategy {
    /// Cache, then fallback provider, then a synthetic payload.
    CacheFallback,
    /// Fallback provider, then a synthetic payload; the cache is skipped.
    DataFallback,
    /// No data.
    MinimalResponse,
    /// Synthetic service-status payload.
    ServiceFallback,
}

impl DegradationStrategy {
    pub fn for_kind(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::CircuitOpen | ErrorKind::Database | ErrorKind::ResourceExhausted | ErrorKind::Network => {
                DegradationStrategy::CacheFallback
            }
            ErrorKind::Timeout => DegradationStrategy::DataFallback,
            ErrorKind::Validation => DegradationStrategy::MinimalResponse,
            _ => DegradationStrategy::ServiceFallback,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DegradationStrategy::CacheFallback => "cache_fallback",
            DegradationStrategy::DataFallback => "data_fallback",
            DegradationStrategy::MinimalResponse => "minimal_response",
            DegradationStrategy::ServiceFallback => "service_fallback",
        }
    }
}

impl fmt::Display for DegradationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last-resort layer turning an unrecovered failure into a
/// [`FallbackResponse`]. Never fails.
pub struct DegradationHandler {
    cache: Option<Arc<dyn ResponseCache>>,
    provider: Option<Arc<dyn FallbackProvider>>,
    config: DegradationConfig,
}

impl DegradationHandler {
    pub fn new(config: DegradationConfig) -> Self {
        Self {
            cache: None,
            provider: None,
            config,
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_provider(mut self, provider: Arc<dyn FallbackProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn config(&self) -> &DegradationConfig {
        &self.config
    }

    /// Degrade `error` for `ctx`.
    ///
    /// A failing provider or a panic while degrading yields the emergency
    /// response.
    pub async fn handle(&self, error: &ErrorRecord, ctx: &RequestContext) -> FallbackResponse {
        let strategy = DegradationStrategy::for_kind(error.kind());

        let response = match AssertUnwindSafe(self.degrade(strategy, error, ctx)).catch_unwind().await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                tracing::error!(
                    request_id = %ctx.request_id,
                    strategy = %strategy,
                    error = %e,
                    "Degradation failed, returning emergency response"
                );
                FallbackResponse::emergency(error, ctx)
            }
            Err(_) => {
                tracing::error!(
                    request_id = %ctx.request_id,
                    strategy = %strategy,
                    "Degradation panicked, returning emergency response"
                );
                FallbackResponse::emergency(error, ctx)
            }
        };

        tracing::info!(
            request_id = %ctx.request_id,
            kind = %error.kind(),
            strategy = %strategy,
            source = %response.source,
            confidence = response.confidence_score,
            "Serving degraded response"
        );
        metrics::record_degradation(strategy.as_str(), &response.source);
        response.with_metadata("strategy", strategy.as_str())
    }

    async fn degrade(
        &self,
        strategy: DegradationStrategy,
        error: &ErrorRecord,
        ctx: &RequestContext,
    ) -> Result<FallbackResponse, BoxError> {
        match strategy {
            DegradationStrategy::CacheFallback => {
                if let Some(cache) = &self.cache {
                    if let Some(data) = lookup(cache.as_ref(), ctx).await {
                        return Ok(FallbackResponse::new(true, data, self.config.cache_confidence, "cache").with_error(error));
                    }
                }
                self.provided_or_synthetic(error, ctx).await
            }
            DegradationStrategy::DataFallback => self.provided_or_synthetic(error, ctx).await,
            DegradationStrategy::MinimalResponse => Ok(FallbackResponse::minimal(error)),
            DegradationStrategy::ServiceFallback => Ok(self.synthetic(error, ctx)),
        }
    }

    async fn provided_or_synthetic(
        &self,
        error: &ErrorRecord,
        ctx: &RequestContext,
    ) -> Result<FallbackResponse, BoxError> {
        if let Some(provider) = &self.provider {
            if let Some(data) = provider.fallback(ctx, error).await? {
                return Ok(
                    FallbackResponse::new(true, data, self.config.provider_confidence, "fallback_provider")
                        .with_error(error),
                );
            }
        }
        Ok(self.synthetic(error, ctx))
    }

    fn synthetic(&self, error: &ErrorRecord, ctx: &RequestContext) -> FallbackResponse {
        FallbackResponse::new(
            true,
            json!({
                "status": "degraded",
                "endpoint": ctx.endpoint,
                "message": "Showing limited data while the service recovers",
            }),
            self.config.synthetic_confidence,
            "synthetic",
        )
        .with_error(error)
    }
}
