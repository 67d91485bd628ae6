//! Secondary data sources consulted when the primary operation fails.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

use crate::context::RequestContext;
use crate::error::{BoxError, ErrorRecord};

/// Provider of substitute data for a failed request.
#[async_trait]
pub trait FallbackProvider: Send + Sync {
    /// Substitute data for `ctx`. `Ok(None)` means the provider has nothing.
    async fn fallback(&self, ctx: &RequestContext, error: &ErrorRecord) -> Result<Option<Value>, BoxError>;
}

/// Fixed responses keyed by endpoint, with an optional catch-all.
#[derive(Debug, Clone, Default)]
pub struct StaticFallback {
    by_endpoint: HashMap<String, Value>,
    default: Option<Value>,
}

impl StaticFallback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>, value: Value) -> Self {
        self.by_endpoint.insert(endpoint.into(), value);
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }
}

#[async_trait]
impl FallbackProvider for StaticFallback {
    async fn fallback(&self, ctx: &RequestContext, _error: &ErrorRecord) -> Result<Option<Value>, BoxError> {
        Ok(self
            .by_endpoint
            .get(&ctx.endpoint)
            .or(self.default.as_ref())
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    #[tokio::test]
    async fn test_endpoint_then_default() {
        let provider = StaticFallback::new()
            .with_endpoint("/risk", json!({"score": 0}))
            .with_default(json!([]));
        let err = ErrorRecord::new(ErrorKind::Database, "down");

        let risk = RequestContext::new("/risk", "GET");
        assert_eq!(provider.fallback(&risk, &err).await.unwrap(), Some(json!({"score": 0})));

        let other = RequestContext::new("/tags", "GET");
        assert_eq!(provider.fallback(&other, &err).await.unwrap(), Some(json!([])));

        let empty = StaticFallback::new();
        assert_eq!(empty.fallback(&other, &err).await.unwrap(), None);
    }
}
