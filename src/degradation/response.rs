//! Degraded response payload.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::context::RequestContext;
use crate::error::ErrorRecord;

/// Source reported when degradation itself failed.
pub const EMERGENCY_SOURCE: &str = "emergency_fallback";

/// Structured substitute for a failed operation's result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackResponse {
    pub success: bool,
    pub data: Value,
    /// Always true; lets consumers tell degraded payloads from real ones.
    pub fallback: bool,
    /// Provenance-based trust in `data`, from 0.0 to 1.0.
    pub confidence_score: f64,
    pub source: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl FallbackResponse {
    pub fn new(success: bool, data: Value, confidence_score: f64, source: impl Into<String>) -> Self {
        Self {
            success,
            data,
            fallback: true,
            confidence_score: confidence_score.clamp(0.0, 1.0),
            source: source.into(),
            metadata: Map::new(),
        }
    }

    /// No data at all.
    pub fn minimal(error: &ErrorRecord) -> Self {
        Self::new(false, Value::Null, 0.0, "minimal_response").with_error(error)
    }

    /// Deterministic response used when degrading failed.
    pub fn emergency(error: &ErrorRecord, ctx: &RequestContext) -> Self {
        Self::new(
            false,
            json!({
                "status": "unavailable",
                "message": "Service temporarily unavailable",
            }),
            0.0,
            EMERGENCY_SOURCE,
        )
        .with_error(error)
        .with_metadata("request_id", ctx.request_id.clone())
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Record the kind and code of the error being masked, plus a retry hint
    /// for retryable kinds.
    pub fn with_error(self, error: &ErrorRecord) -> Self {
        let mut response = self
            .with_metadata("error_kind", error.kind().as_str())
            .with_metadata("error_code", error.code());
        if error.is_retryable() {
            if let Some(delay) = error.retry_after() {
                let ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
                response = response.with_metadata("retry_after_ms", ms);
            }
        }
        response
    }
}
