//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the
//! resilience core. All types derive Serde traits for deserialization from
//! config files, and every field has a default.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::resilience::retries::RetryPolicy;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Breaker settings used for any resource without an override.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Per-resource breaker settings, keyed by resource name.
    /// Fields missing from an override take the built-in defaults.
    pub resources: BTreeMap<String, CircuitBreakerConfig>,

    /// Retry policies.
    pub retry: RetryConfig,

    /// Recovery strategy settings.
    pub recovery: RecoveryConfig,

    /// Degradation handler settings.
    pub degradation: DegradationConfig,

    /// Breaker snapshot persistence.
    pub persistence: PersistenceConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl ResilienceConfig {
    /// Breaker settings for a named resource.
    pub fn breaker_for(&self, resource: &str) -> CircuitBreakerConfig {
        self.resources
            .get(resource)
            .cloned()
            .unwrap_or_else(|| self.circuit_breaker.clone())
    }
}

/// Circuit breaker settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Failures within the window that open the circuit.
    pub failure_threshold: u32,

    /// Failure ratio (0.0-1.0) within the window that opens the circuit.
    pub failure_rate_threshold: f64,

    /// Calls needed in the window before rate-based conditions apply.
    pub minimum_calls: u32,

    /// Time spent open before probing, in milliseconds.
    pub recovery_timeout_ms: u64,

    /// Probes admitted while half-open.
    pub half_open_max_calls: u32,

    /// Successful probes needed to close.
    pub success_threshold: u32,

    /// Rolling window length in milliseconds.
    pub monitoring_window_ms: u64,

    /// Per-call timeout in milliseconds.
    pub request_timeout_ms: u64,

    /// Calls at least this slow (ms) count as slow.
    pub slow_call_threshold_ms: u64,

    /// Slow-call ratio (0.0-1.0) within the window that opens the circuit.
    pub slow_call_rate_threshold: f64,

    /// How long state transitions are kept in the audit trail, in milliseconds.
    pub metrics_retention_ms: u64,

    /// Failure ratio that raises an alert.
    pub alert_failure_rate: f64,

    /// p95 response time (ms) that raises an alert.
    pub alert_response_time_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_rate_threshold: 0.5,
            minimum_calls: 10,
            recovery_timeout_ms: 60_000,
            half_open_max_calls: 3,
            success_threshold: 2,
            monitoring_window_ms: 60_000,
            request_timeout_ms: 30_000,
            slow_call_threshold_ms: 5_000,
            slow_call_rate_threshold: 0.5,
            metrics_retention_ms: 24 * 60 * 60 * 1000,
            alert_failure_rate: 0.25,
            alert_response_time_ms: 10_000,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.recovery_timeout_ms)
    }

    pub fn monitoring_window(&self) -> Duration {
        Duration::from_millis(self.monitoring_window_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn slow_call_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_call_threshold_ms)
    }

    pub fn metrics_retention(&self) -> Duration {
        Duration::from_millis(self.metrics_retention_ms)
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Policy for kinds without a specific entry.
    pub default: RetryPolicy,

    /// Per-kind policies, keyed by error kind name (e.g. "database").
    pub policies: BTreeMap<String, RetryPolicy>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            default: RetryPolicy::default(),
            policies: RetryPolicy::builtin_table()
                .into_iter()
                .map(|(kind, policy)| (kind.as_str().to_string(), policy))
                .collect(),
        }
    }
}

/// Backoff curve of a retry-recommending recovery strategy.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BackoffRecoveryConfig {
    /// Attempts after which the strategy stops recommending retries.
    pub max_retries: u32,

    /// Base delay in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay in milliseconds.
    pub max_delay_ms: u64,

    /// Growth factor per attempt.
    pub backoff_multiplier: f64,
}

impl Default for BackoffRecoveryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
        }
    }
}

/// Recovery strategy configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// TTL for values written to the response cache, in milliseconds.
    pub cache_ttl_ms: u64,

    /// Database / resource-exhaustion strategy.
    pub database: BackoffRecoveryConfig,

    /// Timeout strategy.
    pub timeout: BackoffRecoveryConfig,

    /// Network strategy.
    pub network: BackoffRecoveryConfig,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            cache_ttl_ms: 5 * 60 * 1000,
            database: BackoffRecoveryConfig::default(),
            timeout: BackoffRecoveryConfig {
                max_retries: 2,
                base_delay_ms: 2_000,
                max_delay_ms: 10_000,
                backoff_multiplier: 2.0,
            },
            network: BackoffRecoveryConfig {
                max_retries: 3,
                base_delay_ms: 1_000,
                max_delay_ms: 30_000,
                backoff_multiplier: 2.0,
            },
        }
    }
}

impl RecoveryConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }
}

/// Degradation handler configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DegradationConfig {
    /// When disabled, unrecovered failures reach the caller as errors.
    pub enabled: bool,

    /// Confidence reported for cached data.
    pub cache_confidence: f64,

    /// Confidence reported for fallback-provider data.
    pub provider_confidence: f64,

    /// Confidence reported for synthesized placeholders.
    pub synthetic_confidence: f64,
}

impl Default for DegradationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cache_confidence: 0.8,
            provider_confidence: 0.4,
            synthetic_confidence: 0.2,
        }
    }
}

/// Breaker snapshot persistence.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Enable snapshotting.
    pub enabled: bool,

    /// Directory holding one JSON snapshot per breaker.
    pub directory: String,

    /// Checkpoint interval in milliseconds.
    pub checkpoint_interval_ms: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            directory: "./data/circuit-breakers".to_string(),
            checkpoint_interval_ms: 30_000,
        }
    }
}

impl PersistenceConfig {
    pub fn checkpoint_interval(&self) -> Duration {
        Duration::from_millis(self.checkpoint_interval_ms)
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log format ("pretty" or "json").
    pub log_format: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
