//! Classified error record.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::context::RequestContext;
use crate::error::kind::ErrorKind;
use crate::error::sanitize::sanitize_entry;

/// A failure after classification.
///
/// Built through the `with_*` methods, then only read. Context values are
/// sanitized as they are inserted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ErrorRecord {
    kind: ErrorKind,
    message: String,
    code: String,
    http_status: u16,
    retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    retry_after_ms: Option<u64>,
    #[serde(default)]
    context: BTreeMap<String, Value>,
}

impl ErrorRecord {
    /// Create a record with the kind's default status, code and retry hint.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            code: kind.code().to_string(),
            http_status: kind.http_status(),
            retryable: kind.is_retryable(),
            retry_after_ms: kind.default_retry_after().map(duration_ms),
            context: BTreeMap::new(),
        }
    }

    /// Override the suggested retry delay.
    pub fn with_retry_after(mut self, delay: Duration) -> Self {
        self.retry_after_ms = Some(duration_ms(delay));
        self
    }

    /// Override the machine-readable code.
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = code.into();
        self
    }

    /// Add one context entry; sensitive keys are redacted.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        let value = sanitize_entry(&key, value.into());
        self.context.insert(key, value);
        self
    }

    /// Attach the correlation fields of a request.
    pub fn with_request(self, ctx: &RequestContext) -> Self {
        self.with_context("request_id", ctx.request_id.clone())
            .with_context("endpoint", ctx.endpoint.clone())
            .with_context("method", ctx.method.clone())
            .with_context("retry_attempt", ctx.retry_attempt)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn http_status(&self) -> u16 {
        self.http_status
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after_ms.map(Duration::from_millis)
    }

    /// Sanitized context.
    pub fn context(&self) -> &BTreeMap<String, Value> {
        &self.context
    }

    /// User-facing JSON body: kind, message, redacted context and retry hint.
    pub fn to_response_body(&self) -> Value {
        let mut body = serde_json::json!({
            "error": {
                "kind": self.kind,
                "code": self.code,
                "message": self.message,
                "status": self.http_status,
                "context": self.context,
            }
        });
        if self.retryable {
            if let Some(ms) = self.retry_after_ms {
                body["error"]["retry_after_ms"] = Value::from(ms);
            }
        }
        body
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
