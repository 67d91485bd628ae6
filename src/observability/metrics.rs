//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define resilience metrics (calls, circuit state, retries, recovery)
//! - Expose a Prometheus-compatible metrics endpoint
//! - Track per-breaker and per-strategy figures
//!
//! # Metrics
//! - `resilience_calls_total` (counter): calls by breaker, outcome
//! - `resilience_call_duration_seconds` (histogram): call latency by breaker
//! - `resilience_rejections_total` (counter): calls refused by breaker, state
//! - `resilience_circuit_state` (gauge): 0=closed, 1=half-open, 2=open
//! - `resilience_circuit_transitions_total` (counter): by breaker, from, to
//! - `resilience_alerts_total` (counter): by breaker, alert
//! - `resilience_retry_attempts_total` (counter): by breaker, outcome
//! - `resilience_recovery_total` (counter): by strategy, outcome
//! - `resilience_degradation_total` (counter): by strategy, source
//! - `resilience_checkpoints_total` (counter): snapshot writes by outcome
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op
//! - Labels are breaker and strategy names, never request data

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;

use crate::resilience::circuit_breaker::CircuitState;

/// Install the Prometheus recorder and its HTTP listener.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    let builder = PrometheusBuilder::new().with_http_listener(addr);
    match builder.install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint started"),
        Err(e) => tracing::error!(error = %e, "Failed to install Prometheus recorder"),
    }
}

/// Record one finished call through a breaker.
pub fn record_call(breaker: &str, success: bool, timed_out: bool, response_time_ms: u64) {
    let outcome = match (success, timed_out) {
        (true, _) => "success",
        (false, true) => "timeout",
        (false, false) => "failure",
    };
    metrics::counter!(
        "resilience_calls_total",
        "breaker" => breaker.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    metrics::histogram!(
        "resilience_call_duration_seconds",
        "breaker" => breaker.to_string()
    )
    .record(Duration::from_millis(response_time_ms).as_secs_f64());
}

/// Record a call refused at admission.
pub fn record_rejection(breaker: &str, state: CircuitState) {
    metrics::counter!(
        "resilience_rejections_total",
        "breaker" => breaker.to_string(),
        "state" => state.as_str()
    )
    .increment(1);
}

pub fn record_state(breaker: &str, state: CircuitState) {
    metrics::gauge!("resilience_circuit_state", "breaker" => breaker.to_string()).set(state.as_gauge());
}

pub fn record_transition(breaker: &str, from: CircuitState, to: CircuitState) {
    metrics::counter!(
        "resilience_circuit_transitions_total",
        "breaker" => breaker.to_string(),
        "from" => from.as_str(),
        "to" => to.as_str()
    )
    .increment(1);
}

pub fn record_alert(breaker: &str, alert: &'static str) {
    metrics::counter!(
        "resilience_alerts_total",
        "breaker" => breaker.to_string(),
        "alert" => alert
    )
    .increment(1);
}

/// Record one attempt made by the retry executor.
pub fn record_retry_attempt(breaker: &str, outcome: &'static str) {
    metrics::counter!(
        "resilience_retry_attempts_total",
        "breaker" => breaker.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_recovery(strategy: &str, success: bool) {
    metrics::counter!(
        "resilience_recovery_total",
        "strategy" => strategy.to_string(),
        "outcome" => if success { "recovered" } else { "failed" }
    )
    .increment(1);
}

pub fn record_degradation(strategy: &'static str, source: &str) {
    metrics::counter!(
        "resilience_degradation_total",
        "strategy" => strategy,
        "source" => source.to_string()
    )
    .increment(1);
}

pub fn record_checkpoint(success: bool) {
    metrics::counter!(
        "resilience_checkpoints_total",
        "outcome" => if success { "written" } else { "failed" }
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_call("database", false, true, 1200);
        record_rejection("database", CircuitState::Open);
        record_state("database", CircuitState::HalfOpen);
        record_transition("database", CircuitState::Open, CircuitState::HalfOpen);
        record_degradation("cache_fallback", "cache");
    }
}
