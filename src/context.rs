//! Per-request context.
//!
//! Carried through retries, recovery and degradation so that every log line,
//! error record and cache key can be correlated with the originating request.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Correlation data for one logical request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestContext {
    pub request_id: String,
    pub endpoint: String,
    pub method: String,
    /// Request parameters; also the input of the response cache key.
    #[serde(default)]
    pub parameters: BTreeMap<String, Value>,
    /// Attempts made so far.
    #[serde(default)]
    pub retry_attempt: u32,
    /// Retry budget of the policy in force.
    #[serde(default)]
    pub max_retries: u32,
}

impl RequestContext {
    /// New context with a random request id.
    pub fn new(endpoint: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            endpoint: endpoint.into(),
            method: method.into(),
            parameters: BTreeMap::new(),
            retry_attempt: 0,
            max_retries: 0,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_attempts(mut self, retry_attempt: u32, max_retries: u32) -> Self {
        self.retry_attempt = retry_attempt;
        self.max_retries = max_retries;
        self
    }

    /// Whether the retry budget is spent.
    pub fn retries_exhausted(&self) -> bool {
        self.retry_attempt >= self.max_retries
    }
}
