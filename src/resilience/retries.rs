//! Retry logic.
//!
//! # Responsibilities
//! - Run an operation under a retry policy (attempts, backoff, deadline)
//! - Gate every attempt through the resource's circuit breaker
//! - Hand unrecovered failures to the recovery registry
//!
//! # Data Flow
//! ```text
//! attempt n
//!     → deadline check (synthesize timeout when spent)
//!     → breaker.execute_within(limit, op()), limit = attempt timeout
//!       capped by the remaining deadline; a fired limit is recorded by the
//!       breaker as a timed-out failure
//!     → success: record attempt, write through to cache, return
//!     → failure: classify, retry after backoff if the kind is retryable
//!                and attempts remain, otherwise leave the loop
//! after the loop
//!     → RecoveryRegistry::recover(last error, ctx), bounded by the deadline
//! ```
//!
//! # Design Decisions
//! - Jittered backoff prevents thundering herd
//! - Every wait point is bounded by the overall deadline
//! - Backoff follows the policy curve; error retry hints are only reported
//! - The executor never degrades; that is the pipeline's job

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::RetryConfig;
use crate::context::RequestContext;
use crate::error::{classify, BoxError, ErrorKind, ErrorRecord};
use crate::observability::metrics;
use crate::recovery::{cache_key, RecoveryRegistry, RecoveryResult, ResponseCache, RECOVERY_TIMED_OUT};
use crate::resilience::backoff::Backoff;
use crate::resilience::circuit_breaker::CircuitBreaker;
use crate::resilience::timeouts::Deadline;

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// How an operation is retried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,

    /// Delay before the first retry, in milliseconds.
    pub base_delay_ms: u64,

    /// Upper bound on any delay, in milliseconds.
    pub max_delay_ms: u64,

    /// Growth factor per retry.
    pub backoff_multiplier: f64,

    /// Spread delays by ±10%.
    pub jitter_enabled: bool,

    /// Error kinds worth another attempt.
    pub retryable_kinds: BTreeSet<ErrorKind>,

    /// Budget for all attempts and waits, in milliseconds.
    pub overall_timeout_ms: u64,

    /// Optional per-attempt limit, in milliseconds.
    pub attempt_timeout_ms: Option<u64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
            jitter_enabled: true,
            retryable_kinds: ErrorKind::ALL.into_iter().filter(|k| k.is_retryable()).collect(),
            overall_timeout_ms: 30_000,
            attempt_timeout_ms: None,
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            retryable_kinds: BTreeSet::new(),
            ..Self::default()
        }
    }

    pub fn overall_timeout(&self) -> Duration {
        Duration::from_millis(self.overall_timeout_ms)
    }

    pub fn attempt_timeout(&self) -> Option<Duration> {
        self.attempt_timeout_ms.map(Duration::from_millis)
    }

    pub fn backoff(&self) -> Backoff {
        Backoff {
            base: Duration::from_millis(self.base_delay_ms),
            multiplier: self.backoff_multiplier,
            max: Duration::from_millis(self.max_delay_ms),
            jitter: self.jitter_enabled,
        }
    }

    pub fn is_retryable(&self, kind: ErrorKind) -> bool {
        self.retryable_kinds.contains(&kind)
    }

    /// Policy per error kind, used when nothing is configured.
    pub fn builtin_table() -> Vec<(ErrorKind, RetryPolicy)> {
        let kinds = |ks: &[ErrorKind]| ks.iter().copied().collect::<BTreeSet<_>>();
        let storage = RetryPolicy {
            retryable_kinds: kinds(&[
                ErrorKind::Database,
                ErrorKind::ResourceExhausted,
                ErrorKind::Timeout,
                ErrorKind::Network,
            ]),
            ..Self::default()
        };

        vec![
            (ErrorKind::Database, storage.clone()),
            (ErrorKind::ResourceExhausted, storage),
            (
                ErrorKind::Network,
                RetryPolicy {
                    max_delay_ms: 30_000,
                    overall_timeout_ms: 60_000,
                    retryable_kinds: kinds(&[ErrorKind::Network, ErrorKind::Timeout]),
                    ..Self::default()
                },
            ),
            (
                ErrorKind::Timeout,
                RetryPolicy {
                    max_retries: 2,
                    base_delay_ms: 2_000,
                    retryable_kinds: kinds(&[ErrorKind::Timeout, ErrorKind::Network]),
                    ..Self::default()
                },
            ),
            (
                ErrorKind::RateLimit,
                RetryPolicy {
                    base_delay_ms: 5_000,
                    max_delay_ms: 60_000,
                    overall_timeout_ms: 120_000,
                    retryable_kinds: kinds(&[ErrorKind::RateLimit]),
                    ..Self::default()
                },
            ),
            (ErrorKind::CircuitOpen, Self::no_retry()),
            (ErrorKind::Validation, Self::no_retry()),
            (ErrorKind::Authentication, Self::no_retry()),
            (ErrorKind::Authorization, Self::no_retry()),
            (ErrorKind::NotFound, Self::no_retry()),
            (ErrorKind::Internal, Self::no_retry()),
        ]
    }
}

/// Maps error kinds to retry policies.
#[derive(Debug, Clone)]
pub struct RetryPolicyRegistry {
    default: RetryPolicy,
    policies: HashMap<ErrorKind, RetryPolicy>,
}

impl RetryPolicyRegistry {
    /// Build from configuration; keys that do not name a kind are skipped.
    pub fn from_config(config: &RetryConfig) -> Self {
        let mut policies = HashMap::new();
        for (key, policy) in &config.policies {
            match key.parse::<ErrorKind>() {
                Ok(kind) => {
                    policies.insert(kind, policy.clone());
                }
                Err(e) => tracing::warn!(error = %e, "Ignoring retry policy"),
            }
        }
        Self {
            default: config.default.clone(),
            policies,
        }
    }

    pub fn for_kind(&self, kind: ErrorKind) -> &RetryPolicy {
        self.policies.get(&kind).unwrap_or(&self.default)
    }

    pub fn default_policy(&self) -> &RetryPolicy {
        &self.default
    }
}

impl Default for RetryPolicyRegistry {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// One entry of the attempt log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetryAttempt {
    pub attempt_number: u32,
    pub timestamp: DateTime<Utc>,
    pub error: Option<ErrorRecord>,
    /// Backoff slept after this attempt, cut short at the deadline; zero
    /// when none follows.
    pub delay_ms: u64,
    pub success: bool,
}

/// Aggregate outcome of [`RetryExecutor::execute_with_retry`].
#[derive(Debug, Clone)]
pub struct RetryResult<T> {
    pub success: bool,
    pub value: Option<T>,
    /// Last classified error, also kept when recovery succeeded.
    pub error: Option<ErrorRecord>,
    pub attempts: Vec<RetryAttempt>,
    pub total_duration: Duration,
    /// Recovery was consulted.
    pub recovery_used: bool,
    /// The value came from a cache or fallback source.
    pub fallback_used: bool,
    /// When to try again: recovery's recommendation or the error's hint.
    pub retry_after: Option<Duration>,
}

impl<T> RetryResult<T> {
    pub fn into_result(self) -> Result<T, ErrorRecord> {
        match (self.success, self.value, self.error) {
            (true, Some(value), _) => Ok(value),
            (_, _, Some(error)) => Err(error),
            (_, _, None) => Err(ErrorRecord::new(ErrorKind::Internal, "operation produced no value")),
        }
    }
}

/// Runs operations under a retry policy against one circuit breaker.
pub struct RetryExecutor {
    breaker: Arc<CircuitBreaker>,
    recovery: Arc<RecoveryRegistry>,
    cache: Option<(Arc<dyn ResponseCache>, Duration)>,
}

impl RetryExecutor {
    pub fn new(breaker: Arc<CircuitBreaker>, recovery: Arc<RecoveryRegistry>) -> Self {
        Self {
            breaker,
            recovery,
            cache: None,
        }
    }

    /// Write successful values through to `cache` for `ttl`.
    pub fn with_response_cache(mut self, cache: Arc<dyn ResponseCache>, ttl: Duration) -> Self {
        self.cache = Some((cache, ttl));
        self
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Run `operation` until it succeeds, the policy gives up, or the
    /// overall deadline fires; then consult recovery.
    pub async fn execute_with_retry<T, F, Fut>(
        &self,
        mut operation: F,
        policy: &RetryPolicy,
        ctx: &RequestContext,
    ) -> RetryResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BoxError>>,
        T: Serialize + DeserializeOwned,
    {
        let started = Instant::now();
        let deadline = Deadline::start(policy.overall_timeout());
        let backoff = policy.backoff();
        let max_attempts = policy.max_retries.saturating_add(1);
        let resource = self.breaker.name();

        let mut attempts: Vec<RetryAttempt> = Vec::new();
        let mut last_error: Option<ErrorRecord> = None;

        for attempt in 1..=max_attempts {
            let attempt_ctx = ctx.clone().with_attempts(attempt, policy.max_retries);

            if deadline.is_expired() {
                let error = ErrorRecord::new(
                    ErrorKind::Timeout,
                    format!("overall timeout of {:?} exceeded", deadline.budget()),
                )
                .with_request(&attempt_ctx);
                tracing::warn!(
                    request_id = %ctx.request_id,
                    resource,
                    attempt,
                    "Overall deadline exceeded before attempt"
                );
                last_error = Some(error);
                break;
            }

            let limit = deadline.attempt_limit(policy.attempt_timeout());
            let error = match self.breaker.execute_within(limit, operation()).await {
                Ok(value) => {
                    attempts.push(RetryAttempt {
                        attempt_number: attempt,
                        timestamp: Utc::now(),
                        error: None,
                        delay_ms: 0,
                        success: true,
                    });
                    metrics::record_retry_attempt(resource, "success");
                    if attempt > 1 {
                        tracing::info!(request_id = %ctx.request_id, resource, attempt, "Operation succeeded after retry");
                    }
                    self.write_through(ctx, &value).await;
                    return RetryResult {
                        success: true,
                        value: Some(value),
                        error: None,
                        attempts,
                        total_duration: started.elapsed(),
                        recovery_used: false,
                        fallback_used: false,
                        retry_after: None,
                    };
                }
                Err(breaker_error) => classify(&breaker_error),
            }
            .with_request(&attempt_ctx);

            let will_retry = policy.is_retryable(error.kind()) && attempt < max_attempts;
            let delay = if will_retry { backoff.delay(attempt) } else { Duration::ZERO };
            metrics::record_retry_attempt(resource, "failure");

            tracing::warn!(
                request_id = %ctx.request_id,
                resource,
                attempt,
                max_attempts,
                kind = %error.kind(),
                error = %error.message(),
                delay_ms = millis(delay),
                will_retry,
                "Attempt failed"
            );

            attempts.push(RetryAttempt {
                attempt_number: attempt,
                timestamp: Utc::now(),
                error: Some(error.clone()),
                delay_ms: millis(delay),
                success: false,
            });
            last_error = Some(error);

            if !will_retry {
                break;
            }
            // A cut-short sleep is caught by the deadline check at the top.
            let slept = deadline.sleep(delay).await;
            if let Some(last) = attempts.last_mut() {
                last.delay_ms = millis(slept);
            }
        }

        let error = last_error.unwrap_or_else(|| ErrorRecord::new(ErrorKind::Internal, "no attempt was made"));
        self.recover(error, attempts, started, &deadline, policy, ctx).await
    }

    async fn recover<T>(
        &self,
        mut error: ErrorRecord,
        attempts: Vec<RetryAttempt>,
        started: Instant,
        deadline: &Deadline,
        policy: &RetryPolicy,
        ctx: &RequestContext,
    ) -> RetryResult<T>
    where
        T: DeserializeOwned,
    {
        let made = u32::try_from(attempts.len()).unwrap_or(u32::MAX);
        let recovery_ctx = ctx.clone().with_attempts(made, policy.max_retries);
        let outcome = deadline.run(None, self.recovery.recover(&error, &recovery_ctx)).await;
        let recovery = match outcome {
            Ok(recovery) => recovery,
            Err(expired) => {
                tracing::warn!(
                    request_id = %ctx.request_id,
                    resource = self.breaker.name(),
                    kind = %error.kind(),
                    "Overall deadline exceeded during recovery"
                );
                error = ErrorRecord::new(
                    ErrorKind::Timeout,
                    format!("overall timeout of {:?} exceeded during recovery", expired.budget),
                )
                .with_context("interrupted_kind", error.kind().as_str())
                .with_request(&recovery_ctx);
                RecoveryResult::failed(RECOVERY_TIMED_OUT, "overall deadline exceeded")
            }
        };

        if recovery.success {
            let value = recovery.value.clone().unwrap_or(serde_json::Value::Null);
            match serde_json::from_value::<T>(value) {
                Ok(value) => {
                    tracing::info!(
                        request_id = %ctx.request_id,
                        strategy = %recovery.strategy_name,
                        fallback_used = recovery.fallback_used,
                        "Recovered after failed attempts"
                    );
                    return RetryResult {
                        success: true,
                        value: Some(value),
                        error: Some(error),
                        attempts,
                        total_duration: started.elapsed(),
                        recovery_used: true,
                        fallback_used: recovery.fallback_used,
                        retry_after: None,
                    };
                }
                Err(e) => {
                    tracing::warn!(
                        request_id = %ctx.request_id,
                        strategy = %recovery.strategy_name,
                        error = %e,
                        "Recovered value does not match the operation's type"
                    );
                }
            }
        }

        let retry_after = recovery
            .retry_delay
            .or_else(|| error.is_retryable().then(|| error.retry_after()).flatten());
        RetryResult {
            success: false,
            value: None,
            error: Some(error),
            attempts,
            total_duration: started.elapsed(),
            recovery_used: true,
            fallback_used: false,
            retry_after,
        }
    }

    async fn write_through<T: Serialize>(&self, ctx: &RequestContext, value: &T) {
        let Some((cache, ttl)) = &self.cache else {
            return;
        };
        let value = match serde_json::to_value(value) {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!(request_id = %ctx.request_id, error = %e, "Response not cacheable");
                return;
            }
        };
        if let Err(e) = cache.set(&cache_key(ctx), value, *ttl).await {
            tracing::warn!(request_id = %ctx.request_id, error = %e, "Response cache write failed");
        }
    }
}
