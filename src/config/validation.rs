//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (ratios within 0..=1, timeouts > 0)
//! - Check cross-field constraints (success threshold vs probe budget)
//! - Check that retry policy keys name real error kinds
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ResilienceConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system, including hot reloads

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::{
    BackoffRecoveryConfig, CircuitBreakerConfig, DegradationConfig, ResilienceConfig,
};
use crate::error::ErrorKind;
use crate::resilience::retries::RetryPolicy;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a complete configuration.
pub fn validate_config(config: &ResilienceConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_breaker("circuit_breaker", &config.circuit_breaker, &mut errors);
    for (name, breaker) in &config.resources {
        if name.trim().is_empty() {
            errors.push(ValidationError::new("resources", "resource name must not be empty"));
        }
        check_breaker(&format!("resources.{name}"), breaker, &mut errors);
    }

    check_policy("retry.default", &config.retry.default, &mut errors);
    for (kind, policy) in &config.retry.policies {
        let field = format!("retry.policies.{kind}");
        if kind.parse::<ErrorKind>().is_err() {
            errors.push(ValidationError::new(&field, "unknown error kind"));
        }
        check_policy(&field, policy, &mut errors);
    }

    check_backoff("recovery.database", &config.recovery.database, &mut errors);
    check_backoff("recovery.timeout", &config.recovery.timeout, &mut errors);
    check_backoff("recovery.network", &config.recovery.network, &mut errors);
    if config.recovery.cache_ttl_ms == 0 {
        errors.push(ValidationError::new("recovery.cache_ttl_ms", "must be greater than 0"));
    }

    check_degradation(&config.degradation, &mut errors);

    if config.persistence.enabled {
        if config.persistence.directory.trim().is_empty() {
            errors.push(ValidationError::new("persistence.directory", "must not be empty"));
        }
        if config.persistence.checkpoint_interval_ms == 0 {
            errors.push(ValidationError::new(
                "persistence.checkpoint_interval_ms",
                "must be greater than 0",
            ));
        }
    }

    let observability = &config.observability;
    if !matches!(observability.log_format.as_str(), "pretty" | "json") {
        errors.push(ValidationError::new(
            "observability.log_format",
            "must be \"pretty\" or \"json\"",
        ));
    }
    if observability.metrics_enabled && observability.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            "must be a socket address",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate one breaker's settings (used for hot updates of a single breaker).
pub fn validate_breaker(config: &CircuitBreakerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    check_breaker("circuit_breaker", config, &mut errors);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_breaker(prefix: &str, config: &CircuitBreakerConfig, errors: &mut Vec<ValidationError>) {
    let field = |name: &str| format!("{prefix}.{name}");

    if config.failure_threshold == 0 {
        errors.push(ValidationError::new(field("failure_threshold"), "must be at least 1"));
    }
    check_ratio(&field("failure_rate_threshold"), config.failure_rate_threshold, false, errors);
    if config.minimum_calls == 0 {
        errors.push(ValidationError::new(field("minimum_calls"), "must be at least 1"));
    }
    if config.recovery_timeout_ms == 0 {
        errors.push(ValidationError::new(field("recovery_timeout_ms"), "must be greater than 0"));
    }
    if config.half_open_max_calls == 0 {
        errors.push(ValidationError::new(field("half_open_max_calls"), "must be at least 1"));
    }
    if config.success_threshold == 0 {
        errors.push(ValidationError::new(field("success_threshold"), "must be at least 1"));
    } else if config.success_threshold > config.half_open_max_calls {
        errors.push(ValidationError::new(
            field("success_threshold"),
            "must not exceed half_open_max_calls",
        ));
    }
    if config.monitoring_window_ms == 0 {
        errors.push(ValidationError::new(field("monitoring_window_ms"), "must be greater than 0"));
    }
    if config.request_timeout_ms == 0 {
        errors.push(ValidationError::new(field("request_timeout_ms"), "must be greater than 0"));
    }
    if config.slow_call_threshold_ms == 0 {
        errors.push(ValidationError::new(field("slow_call_threshold_ms"), "must be greater than 0"));
    }
    check_ratio(&field("slow_call_rate_threshold"), config.slow_call_rate_threshold, false, errors);
    check_ratio(&field("alert_failure_rate"), config.alert_failure_rate, true, errors);
}

fn check_policy(prefix: &str, policy: &RetryPolicy, errors: &mut Vec<ValidationError>) {
    if policy.base_delay_ms > policy.max_delay_ms {
        errors.push(ValidationError::new(
            format!("{prefix}.base_delay_ms"),
            "must not exceed max_delay_ms",
        ));
    }
    if !(policy.backoff_multiplier >= 1.0 && policy.backoff_multiplier.is_finite()) {
        errors.push(ValidationError::new(
            format!("{prefix}.backoff_multiplier"),
            "must be a finite number >= 1.0",
        ));
    }
    if policy.overall_timeout_ms == 0 {
        errors.push(ValidationError::new(
            format!("{prefix}.overall_timeout_ms"),
            "must be greater than 0",
        ));
    }
    if policy.attempt_timeout_ms == Some(0) {
        errors.push(ValidationError::new(
            format!("{prefix}.attempt_timeout_ms"),
            "must be greater than 0 when set",
        ));
    }
}

fn check_backoff(prefix: &str, config: &BackoffRecoveryConfig, errors: &mut Vec<ValidationError>) {
    if config.base_delay_ms > config.max_delay_ms {
        errors.push(ValidationError::new(
            format!("{prefix}.base_delay_ms"),
            "must not exceed max_delay_ms",
        ));
    }
    if !(config.backoff_multiplier >= 1.0 && config.backoff_multiplier.is_finite()) {
        errors.push(ValidationError::new(
            format!("{prefix}.backoff_multiplier"),
            "must be a finite number >= 1.0",
        ));
    }
}

fn check_degradation(config: &DegradationConfig, errors: &mut Vec<ValidationError>) {
    check_ratio("degradation.cache_confidence", config.cache_confidence, true, errors);
    check_ratio("degradation.provider_confidence", config.provider_confidence, true, errors);
    check_ratio("degradation.synthetic_confidence", config.synthetic_confidence, true, errors);
}

fn check_ratio(field: &str, value: f64, allow_zero: bool, errors: &mut Vec<ValidationError>) {
    let lower_ok = if allow_zero { value >= 0.0 } else { value > 0.0 };
    if !(lower_ok && value <= 1.0) {
        let range = if allow_zero { "0.0..=1.0" } else { "(0.0, 1.0]" };
        errors.push(ValidationError::new(field, format!("must be within {range}")));
    }
}
