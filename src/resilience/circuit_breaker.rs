//! Circuit breaker for protected resources.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: resource assumed down, calls fail fast
//! - Half-Open: a limited number of probe calls test recovery
//!
//! # State Transitions
//! ```text
//! Closed → Open: failures >= threshold, failure rate >= threshold,
//!                or slow-call rate >= threshold (within window)
//! Open → Half-Open: recovery timeout elapsed (checked lazily on admission)
//! Half-Open → Closed: successful probes >= success threshold
//! Half-Open → Open: any probe fails
//! ```
//!
//! # Design Decisions
//! - One breaker per protected resource, shared by all callers
//! - Admission is check-and-reserve under a single mutex, so half-open
//!   probes can never be over-admitted
//! - Every probe belongs to a half-open episode; outcomes from an earlier
//!   episode do not move a later one
//! - Metrics are derived from the call window on read
//! - Config is swapped atomically and read once per operation

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

use crate::config::{validate_breaker, CircuitBreakerConfig, ValidationError};
use crate::error::BoxError;
use crate::observability::metrics;
use crate::resilience::persistence::{BreakerSnapshot, PersistenceError, SNAPSHOT_SCHEMA_VERSION};
use crate::resilience::window::{CallRecord, CallWindow, WindowCounts};

/// Circuit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        }
    }

    /// Numeric encoding for gauges (0 = closed, 1 = half-open, 2 = open).
    pub fn as_gauge(self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::HalfOpen => 1.0,
            CircuitState::Open => 2.0,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned by [`CircuitBreaker::execute`].
#[derive(Debug, thiserror::Error)]
pub enum BreakerError {
    /// The call was not admitted.
    #[error("circuit '{name}' is {state}; retry after {retry_after:?}")]
    Open {
        name: String,
        state: CircuitState,
        retry_after: Duration,
    },

    /// The call exceeded the breaker's request timeout.
    #[error("call through circuit '{name}' timed out after {after:?}")]
    Timeout { name: String, after: Duration },

    /// The wrapped operation failed.
    #[error("call through circuit '{name}' failed: {source}")]
    Failed {
        name: String,
        #[source]
        source: BoxError,
    },
}

/// Window figures captured at the moment of a transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionMetrics {
    pub total_calls: u64,
    pub failed_calls: u64,
    pub slow_calls: u64,
    pub failure_rate: f64,
    pub slow_call_rate: f64,
}

impl From<WindowCounts> for TransitionMetrics {
    fn from(counts: WindowCounts) -> Self {
        Self {
            total_calls: counts.total,
            failed_calls: counts.failures,
            slow_calls: counts.slow,
            failure_rate: counts.failure_rate(),
            slow_call_rate: counts.slow_call_rate(),
        }
    }
}

/// One entry of the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    pub from_state: CircuitState,
    pub to_state: CircuitState,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
    pub snapshot_metrics: TransitionMetrics,
}

/// Point-in-time view of a breaker, derived from its call window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerMetrics {
    pub state: CircuitState,
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub slow_calls: u64,
    pub timed_out_calls: u64,
    pub failure_rate: f64,
    pub slow_call_rate: f64,
    pub average_response_ms: f64,
    pub min_response_ms: u64,
    pub max_response_ms: u64,
    pub p50_response_ms: u64,
    pub p95_response_ms: u64,
    pub p99_response_ms: u64,
    pub circuit_breaker_trips: u64,
    pub half_open_call_count: u32,
    pub half_open_success_count: u32,
    pub last_state_change: DateTime<Utc>,
    pub time_in_state_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

struct Inner {
    state: CircuitState,
    /// Bumped on every transition; identifies the current half-open episode.
    episode: u64,
    last_state_change: Instant,
    last_state_change_at: DateTime<Utc>,
    calls: CallWindow,
    transitions: VecDeque<StateTransition>,
    trips: u64,
    half_open_calls: u32,
    half_open_successes: u32,
    failure_alert: bool,
    latency_alert: bool,
}

/// Per-resource circuit breaker.
pub struct CircuitBreaker {
    name: String,
    config: ArcSwap<CircuitBreakerConfig>,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Create a closed breaker.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name = name.into();
        metrics::record_state(&name, CircuitState::Closed);
        Self {
            name,
            config: ArcSwap::from_pointee(config),
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                episode: 0,
                last_state_change: Instant::now(),
                last_state_change_at: Utc::now(),
                calls: CallWindow::new(),
                transitions: VecDeque::new(),
                trips: 0,
                half_open_calls: 0,
                half_open_successes: 0,
                failure_alert: false,
                latency_alert: false,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current configuration.
    pub fn config(&self) -> Arc<CircuitBreakerConfig> {
        self.config.load_full()
    }

    /// Validate and swap in a new configuration. In-flight calls keep the
    /// configuration they started with.
    pub fn update_config(&self, config: CircuitBreakerConfig) -> Result<(), Vec<ValidationError>> {
        validate_breaker(&config)?;
        self.config.store(Arc::new(config));
        tracing::info!(breaker = %self.name, "Circuit breaker config updated");
        Ok(())
    }

    /// Current state, after applying any due Open → Half-Open transition.
    pub fn state(&self) -> CircuitState {
        let config = self.config.load();
        let mut inner = self.lock();
        self.advance(&mut inner, &config);
        inner.state
    }

    /// Whether a call would be admitted right now. Does not reserve a
    /// half-open probe slot; use [`try_acquire`](Self::try_acquire) for that.
    pub fn can_execute(&self) -> bool {
        let config = self.config.load();
        let mut inner = self.lock();
        self.advance(&mut inner, &config);
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => inner.half_open_calls < config.half_open_max_calls,
        }
    }

    /// Admit one call, reserving a probe slot when half-open.
    pub fn try_acquire(&self) -> Result<Permit<'_>, BreakerError> {
        let config = self.config.load();
        let mut inner = self.lock();
        self.advance(&mut inner, &config);

        let state = inner.state;
        match state {
            CircuitState::Closed => Ok(Permit::new(self, None)),
            CircuitState::HalfOpen if inner.half_open_calls < config.half_open_max_calls => {
                inner.half_open_calls += 1;
                tracing::debug!(
                    breaker = %self.name,
                    probe = inner.half_open_calls,
                    budget = config.half_open_max_calls,
                    "Admitting half-open probe"
                );
                Ok(Permit::new(self, Some(inner.episode)))
            }
            state => {
                let retry_after = match state {
                    CircuitState::Open => config
                        .recovery_timeout()
                        .saturating_sub(inner.last_state_change.elapsed()),
                    _ => config.request_timeout(),
                };
                metrics::record_rejection(&self.name, state);
                Err(BreakerError::Open {
                    name: self.name.clone(),
                    state,
                    retry_after,
                })
            }
        }
    }

    /// Run `operation` through the breaker with the configured request timeout.
    ///
    /// Rejected calls never start the operation. A timed-out operation is
    /// dropped and recorded as a failure.
    pub async fn execute<T, Fut>(&self, operation: Fut) -> Result<T, BreakerError>
    where
        Fut: Future<Output = Result<T, BoxError>>,
    {
        self.execute_within(Duration::MAX, operation).await
    }

    /// Like [`execute`](Self::execute), with the timeout shortened to
    /// `limit` when that is below the request timeout. Either way a fired
    /// timeout is recorded as a timed-out failure.
    pub async fn execute_within<T, Fut>(&self, limit: Duration, operation: Fut) -> Result<T, BreakerError>
    where
        Fut: Future<Output = Result<T, BoxError>>,
    {
        let permit = self.try_acquire()?;
        let timeout = self.config.load().request_timeout().min(limit);
        let started = Instant::now();

        match tokio::time::timeout(timeout, operation).await {
            Ok(Ok(value)) => {
                permit.success(started.elapsed());
                Ok(value)
            }
            Ok(Err(source)) => {
                permit.failure(started.elapsed(), source.to_string());
                Err(BreakerError::Failed {
                    name: self.name.clone(),
                    source,
                })
            }
            Err(_) => {
                permit.timeout(started.elapsed());
                Err(BreakerError::Timeout {
                    name: self.name.clone(),
                    after: timeout,
                })
            }
        }
    }

    /// Metrics derived from the current window.
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let config = self.config.load();
        let mut inner = self.lock();
        self.advance(&mut inner, &config);
        inner.calls.prune(Instant::now(), config.monitoring_window());

        let counts = inner.calls.counts();
        let latency = inner.calls.latency();

        CircuitBreakerMetrics {
            state: inner.state,
            total_calls: counts.total,
            successful_calls: counts.successes(),
            failed_calls: counts.failures,
            slow_calls: counts.slow,
            timed_out_calls: counts.timed_out,
            failure_rate: counts.failure_rate(),
            slow_call_rate: counts.slow_call_rate(),
            average_response_ms: latency.average_ms,
            min_response_ms: latency.min_ms,
            max_response_ms: latency.max_ms,
            p50_response_ms: latency.p50_ms,
            p95_response_ms: latency.p95_ms,
            p99_response_ms: latency.p99_ms,
            circuit_breaker_trips: inner.trips,
            half_open_call_count: inner.half_open_calls,
            half_open_success_count: inner.half_open_successes,
            last_state_change: inner.last_state_change_at,
            time_in_state_ms: u64::try_from(inner.last_state_change.elapsed().as_millis())
                .unwrap_or(u64::MAX),
            last_error: inner.calls.last_error().map(str::to_owned),
        }
    }

    /// Audit trail within the retention period, oldest first.
    pub fn transitions(&self) -> Vec<StateTransition> {
        let config = self.config.load();
        let mut inner = self.lock();
        prune_transitions(&mut inner.transitions, config.metrics_retention());
        inner.transitions.iter().cloned().collect()
    }

    /// Number of times the circuit has opened.
    pub fn trips(&self) -> u64 {
        self.lock().trips
    }

    /// Force the circuit closed and clear the window.
    pub fn reset(&self) {
        let config = self.config.load();
        let mut inner = self.lock();
        self.transition(&mut inner, &config, CircuitState::Closed, "manual reset".to_string());
        inner.calls.clear();
    }

    /// Force the circuit open, e.g. during planned maintenance of the resource.
    pub fn force_open(&self, reason: &str) {
        let config = self.config.load();
        let mut inner = self.lock();
        self.transition(&mut inner, &config, CircuitState::Open, format!("forced open: {reason}"));
    }

    /// Serializable snapshot for persistence.
    pub fn snapshot(&self) -> BreakerSnapshot {
        let metrics = self.metrics();
        let transitions = self.transitions();
        let config = self.config();
        let inner = self.lock();
        BreakerSnapshot {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            name: self.name.clone(),
            state: inner.state,
            last_state_change: inner.last_state_change_at,
            circuit_breaker_trips: inner.trips,
            transitions,
            metrics,
            config: (*config).clone(),
            saved_at: Utc::now(),
        }
    }

    /// Restore state, last state change and trip count from a snapshot.
    ///
    /// Snapshots with another schema version or for another breaker are
    /// rejected and leave the breaker untouched.
    pub fn restore(&self, snapshot: &BreakerSnapshot) -> Result<(), PersistenceError> {
        if snapshot.schema_version != SNAPSHOT_SCHEMA_VERSION {
            return Err(PersistenceError::SchemaMismatch {
                found: snapshot.schema_version,
                expected: SNAPSHOT_SCHEMA_VERSION,
            });
        }
        if snapshot.name != self.name {
            return Err(PersistenceError::NameMismatch {
                found: snapshot.name.clone(),
                expected: self.name.clone(),
            });
        }

        let config = self.config.load();
        let since_change = (Utc::now() - snapshot.last_state_change)
            .to_std()
            .unwrap_or(Duration::ZERO);
        let now = Instant::now();
        let last_state_change = now
            .checked_sub(since_change)
            .or_else(|| now.checked_sub(config.recovery_timeout()))
            .unwrap_or(now);

        let mut inner = self.lock();
        inner.state = snapshot.state;
        inner.episode += 1;
        inner.last_state_change = last_state_change;
        inner.last_state_change_at = snapshot.last_state_change;
        inner.trips = snapshot.circuit_breaker_trips;
        inner.transitions = snapshot.transitions.iter().cloned().collect();
        prune_transitions(&mut inner.transitions, config.metrics_retention());
        inner.half_open_calls = 0;
        inner.half_open_successes = 0;
        inner.calls.clear();

        metrics::record_state(&self.name, inner.state);
        tracing::info!(
            breaker = %self.name,
            state = %inner.state,
            trips = inner.trips,
            "Circuit breaker state restored from snapshot"
        );
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lazy Open → Half-Open transition.
    fn advance(&self, inner: &mut Inner, config: &CircuitBreakerConfig) {
        if inner.state == CircuitState::Open
            && inner.last_state_change.elapsed() >= config.recovery_timeout()
        {
            self.transition(inner, config, CircuitState::HalfOpen, "recovery timeout elapsed".to_string());
        }
    }

    fn record(&self, record: CallRecord, probe: Option<u64>) {
        let config = self.config.load();
        let success = record.success;
        metrics::record_call(&self.name, success, record.timed_out, record.response_time_ms);

        let mut inner = self.lock();
        let now = record.at;
        let error = record.error.clone();
        inner.calls.push(record);
        inner.calls.prune(now, config.monitoring_window());
        let counts = inner.calls.counts();

        let state = inner.state;
        let is_current_probe = state == CircuitState::HalfOpen && probe == Some(inner.episode);
        match state {
            CircuitState::HalfOpen if is_current_probe => {
                if success {
                    inner.half_open_successes += 1;
                    if inner.half_open_successes >= config.success_threshold {
                        let reason = format!("{} successful probes", inner.half_open_successes);
                        self.transition(&mut inner, &config, CircuitState::Closed, reason);
                    }
                } else {
                    let reason = format!("probe failed: {}", error.as_deref().unwrap_or("unknown error"));
                    self.transition(&mut inner, &config, CircuitState::Open, reason);
                }
            }
            CircuitState::Closed => {
                if let Some(reason) = trip_reason(&config, &counts) {
                    self.transition(&mut inner, &config, CircuitState::Open, reason);
                }
            }
            _ => {}
        }

        self.check_alerts(&mut inner, &config, &counts);
    }

    /// Alerts fire on the crossing edge and re-arm below the threshold.
    fn check_alerts(&self, inner: &mut Inner, config: &CircuitBreakerConfig, counts: &WindowCounts) {
        let latency_alert = inner.calls.percentile_at_least(95.0, config.alert_response_time_ms);
        if latency_alert && !inner.latency_alert {
            let p95_ms = inner.calls.latency().p95_ms;
            tracing::warn!(
                breaker = %self.name,
                p95_ms,
                threshold_ms = config.alert_response_time_ms,
                "Response time alert"
            );
            metrics::record_alert(&self.name, "response_time");
        }
        inner.latency_alert = latency_alert;

        let alert = counts.total >= u64::from(config.minimum_calls)
            && counts.failure_rate() >= config.alert_failure_rate;
        if alert && !inner.failure_alert {
            tracing::warn!(
                breaker = %self.name,
                failure_rate = counts.failure_rate(),
                threshold = config.alert_failure_rate,
                "Failure rate alert"
            );
            metrics::record_alert(&self.name, "failure_rate");
        }
        inner.failure_alert = alert;
    }

    fn release_probe(&self, episode: u64) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen && inner.episode == episode && inner.half_open_calls > 0 {
            inner.half_open_calls -= 1;
            tracing::debug!(breaker = %self.name, "Abandoned half-open probe released its slot");
        }
    }

    fn transition(&self, inner: &mut Inner, config: &CircuitBreakerConfig, to: CircuitState, reason: String) {
        let from = inner.state;
        if from == to {
            return;
        }

        let snapshot_metrics = TransitionMetrics::from(inner.calls.counts());
        inner.transitions.push_back(StateTransition {
            from_state: from,
            to_state: to,
            timestamp: Utc::now(),
            reason: reason.clone(),
            snapshot_metrics,
        });
        prune_transitions(&mut inner.transitions, config.metrics_retention());

        inner.state = to;
        inner.episode += 1;
        inner.last_state_change = Instant::now();
        inner.last_state_change_at = Utc::now();
        inner.half_open_calls = 0;
        inner.half_open_successes = 0;

        match to {
            CircuitState::Open => {
                inner.trips += 1;
                tracing::warn!(breaker = %self.name, from = %from, trips = inner.trips, reason = %reason, "Circuit opened");
            }
            CircuitState::HalfOpen => {
                tracing::info!(breaker = %self.name, reason = %reason, "Circuit half-open, probing");
            }
            CircuitState::Closed => {
                inner.calls.clear();
                tracing::info!(breaker = %self.name, from = %from, reason = %reason, "Circuit closed");
            }
        }

        metrics::record_transition(&self.name, from, to);
        metrics::record_state(&self.name, to);
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &inner.state)
            .field("trips", &inner.trips)
            .finish()
    }
}

/// Evaluate every opening condition; failure conditions win the reason.
fn trip_reason(config: &CircuitBreakerConfig, counts: &WindowCounts) -> Option<String> {
    let enough_calls = counts.total >= u64::from(config.minimum_calls);

    if counts.failures >= u64::from(config.failure_threshold) {
        return Some(format!(
            "{} failures within window (threshold {})",
            counts.failures, config.failure_threshold
        ));
    }
    if enough_calls && counts.failure_rate() >= config.failure_rate_threshold {
        return Some(format!(
            "failure rate {:.2} >= {:.2}",
            counts.failure_rate(),
            config.failure_rate_threshold
        ));
    }
    if enough_calls && counts.slow_call_rate() >= config.slow_call_rate_threshold {
        return Some(format!(
            "slow call rate {:.2} >= {:.2}",
            counts.slow_call_rate(),
            config.slow_call_rate_threshold
        ));
    }
    None
}

fn prune_transitions(transitions: &mut VecDeque<StateTransition>, retention: Duration) {
    let Ok(retention) = chrono::Duration::from_std(retention) else {
        return;
    };
    let cutoff = Utc::now() - retention;
    while transitions.front().is_some_and(|t| t.timestamp < cutoff) {
        transitions.pop_front();
    }
}

/// Admission ticket for one call.
///
/// Report the outcome with [`success`](Self::success),
/// [`failure`](Self::failure) or [`timeout`](Self::timeout). Dropping a
/// permit without an outcome returns a half-open probe slot.
#[must_use = "report the call outcome through the permit"]
pub struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    probe: Option<u64>,
    completed: bool,
}

impl<'a> Permit<'a> {
    fn new(breaker: &'a CircuitBreaker, probe: Option<u64>) -> Self {
        Self {
            breaker,
            probe,
            completed: false,
        }
    }

    /// Whether this call is a half-open probe.
    pub fn is_probe(&self) -> bool {
        self.probe.is_some()
    }

    pub fn success(mut self, elapsed: Duration) {
        self.completed = true;
        let slow = self.breaker.config.load().slow_call_threshold();
        self.breaker.record(CallRecord::success(elapsed, slow), self.probe);
    }

    pub fn failure(mut self, elapsed: Duration, error: String) {
        self.completed = true;
        let slow = self.breaker.config.load().slow_call_threshold();
        self.breaker
            .record(CallRecord::failure(elapsed, slow, false, error), self.probe);
    }

    pub fn timeout(mut self, elapsed: Duration) {
        self.completed = true;
        let slow = self.breaker.config.load().slow_call_threshold();
        self.breaker.record(
            CallRecord::failure(elapsed, slow, true, "request timed out".to_string()),
            self.probe,
        );
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.completed {
            if let Some(episode) = self.probe {
                self.breaker.release_probe(episode);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 5,
            recovery_timeout_ms: 1_000,
            half_open_max_calls: 3,
            success_threshold: 2,
            request_timeout_ms: 500,
            ..CircuitBreakerConfig::default()
        }
    }

    async fn fail(breaker: &CircuitBreaker) -> BreakerError {
        breaker
            .execute(async { Err::<(), BoxError>("boom".into()) })
            .await
            .unwrap_err()
    }

    async fn succeed(breaker: &CircuitBreaker) -> Result<u32, BreakerError> {
        breaker.execute(async { Ok::<_, BoxError>(1) }).await
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_at_failure_threshold() {
        let breaker = CircuitBreaker::new("db", config());
        for _ in 0..4 {
            fail(&breaker).await;
            assert_eq!(breaker.state(), CircuitState::Closed);
        }
        fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.trips(), 1);
        assert!(!breaker.can_execute());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_call_never_runs() {
        let breaker = CircuitBreaker::new("db", config());
        breaker.force_open("maintenance");

        let ran = std::sync::atomic::AtomicBool::new(false);
        let result = breaker
            .execute(async {
                ran.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok::<_, BoxError>(())
            })
            .await;

        assert!(matches!(result, Err(BreakerError::Open { state: CircuitState::Open, .. })));
        assert!(!ran.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_reports_remaining_recovery_time() {
        let breaker = CircuitBreaker::new("db", config());
        breaker.force_open("test");
        tokio::time::advance(Duration::from_millis(400)).await;

        match succeed(&breaker).await {
            Err(BreakerError::Open { retry_after, .. }) => {
                assert_eq!(retry_after, Duration::from_millis(600));
            }
            other => panic!("expected open rejection, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_after_recovery_timeout() {
        let breaker = CircuitBreaker::new("db", config());
        breaker.force_open("test");
        assert!(!breaker.can_execute());

        tokio::time::advance(Duration::from_millis(999)).await;
        assert!(!breaker.can_execute());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(breaker.can_execute());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_closes_after_success_threshold() {
        let breaker = CircuitBreaker::new("db", config());
        breaker.force_open("test");
        tokio::time::advance(Duration::from_secs(1)).await;

        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);

        let metrics = breaker.metrics();
        assert_eq!(metrics.half_open_call_count, 0);
        assert_eq!(metrics.half_open_success_count, 0);
        assert_eq!(metrics.total_calls, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens_and_discards_successes() {
        let breaker = CircuitBreaker::new("db", config());
        breaker.force_open("test");
        tokio::time::advance(Duration::from_secs(1)).await;

        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.metrics().half_open_success_count, 1);

        fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.metrics().half_open_success_count, 0);
        assert_eq!(breaker.trips(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_budget_is_reserved() {
        let breaker = CircuitBreaker::new("db", config());
        breaker.force_open("test");
        tokio::time::advance(Duration::from_secs(1)).await;

        let p1 = breaker.try_acquire().unwrap();
        let p2 = breaker.try_acquire().unwrap();
        let p3 = breaker.try_acquire().unwrap();
        assert!(p1.is_probe());
        assert!(!breaker.can_execute());
        assert!(matches!(
            breaker.try_acquire(),
            Err(BreakerError::Open { state: CircuitState::HalfOpen, .. })
        ));

        drop(p3);
        assert!(breaker.can_execute());
        p1.success(Duration::from_millis(5));
        p2.success(Duration::from_millis(5));
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_probe_does_not_affect_new_episode() {
        let breaker = CircuitBreaker::new("db", config());
        breaker.force_open("test");
        tokio::time::advance(Duration::from_secs(1)).await;

        let stale = breaker.try_acquire().unwrap();
        breaker.force_open("again");
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        stale.failure(Duration::from_millis(1), "late".into());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_failure() {
        let mut cfg = config();
        cfg.failure_threshold = 1;
        let breaker = CircuitBreaker::new("api", cfg);

        let result = breaker
            .execute(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, BoxError>(())
            })
            .await;

        assert!(matches!(result, Err(BreakerError::Timeout { .. })));
        assert_eq!(breaker.state(), CircuitState::Open);
        let transitions = breaker.transitions();
        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].snapshot_metrics.failed_calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shorter_limit_is_recorded_as_timeout() {
        let breaker = CircuitBreaker::new("api", config());
        let started = Instant::now();

        let result = breaker
            .execute_within(Duration::from_millis(50), async {
                tokio::time::sleep(Duration::from_secs(600)).await;
                Ok::<_, BoxError>(())
            })
            .await;

        match result {
            Err(BreakerError::Timeout { after, .. }) => assert_eq!(after, Duration::from_millis(50)),
            other => panic!("expected timeout, got {other:?}"),
        }
        assert_eq!(started.elapsed(), Duration::from_millis(50));
        let metrics = breaker.metrics();
        assert_eq!(metrics.failed_calls, 1);
        assert_eq!(metrics.timed_out_calls, 1);

        // A longer limit never extends the request timeout.
        let result = breaker
            .execute_within(Duration::from_secs(60), async {
                tokio::time::sleep(Duration::from_secs(600)).await;
                Ok::<_, BoxError>(())
            })
            .await;
        assert!(matches!(result, Err(BreakerError::Timeout { after, .. }) if after == Duration::from_millis(500)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_rate_needs_minimum_calls() {
        let mut cfg = config();
        cfg.failure_threshold = 100;
        cfg.minimum_calls = 4;
        cfg.failure_rate_threshold = 0.5;
        let breaker = CircuitBreaker::new("api", cfg);

        fail(&breaker).await;
        fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Closed);
        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);
        fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.transitions()[0].reason.starts_with("failure rate"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_calls_open_circuit() {
        let mut cfg = config();
        cfg.minimum_calls = 2;
        cfg.slow_call_threshold_ms = 100;
        cfg.slow_call_rate_threshold = 0.5;
        let breaker = CircuitBreaker::new("api", cfg);

        succeed(&breaker).await.unwrap();
        breaker
            .execute(async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok::<_, BoxError>(())
            })
            .await
            .unwrap();

        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.transitions()[0].reason.starts_with("slow call rate"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_age_out_of_window() {
        let mut cfg = config();
        cfg.monitoring_window_ms = 10_000;
        let breaker = CircuitBreaker::new("db", cfg);

        for _ in 0..4 {
            fail(&breaker).await;
        }
        tokio::time::advance(Duration::from_secs(11)).await;
        fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.metrics().failed_calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_metrics_percentiles() {
        let breaker = CircuitBreaker::new("api", config());
        for ms in [10u64, 20, 30, 40] {
            breaker
                .execute(async move {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    Ok::<_, BoxError>(())
                })
                .await
                .unwrap();
        }
        let metrics = breaker.metrics();
        assert_eq!(metrics.total_calls, 4);
        assert_eq!(metrics.min_response_ms, 10);
        assert_eq!(metrics.max_response_ms, 40);
        assert_eq!(metrics.p95_response_ms, 40);
        assert_eq!(metrics.failure_rate, 0.0);
    }

    #[test]
    fn test_update_config_rejects_invalid() {
        let breaker = CircuitBreaker::new("db", config());
        let mut bad = config();
        bad.success_threshold = 10;
        assert!(breaker.update_config(bad).is_err());
        assert_eq!(breaker.config().success_threshold, 2);

        let mut good = config();
        good.failure_threshold = 9;
        breaker.update_config(good).unwrap();
        assert_eq!(breaker.config().failure_threshold, 9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_closes_and_clears() {
        let breaker = CircuitBreaker::new("db", config());
        for _ in 0..5 {
            fail(&breaker).await;
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.metrics().total_calls, 0);
        assert_eq!(breaker.trips(), 1);
    }

    #[test]
    fn test_state_serde_names() {
        assert_eq!(serde_json::to_string(&CircuitState::HalfOpen).unwrap(), "\"HALF_OPEN\"");
        assert!(serde_json::from_str::<CircuitState>("\"AJAR\"").is_err());
    }
}
