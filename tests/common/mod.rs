//! Shared utilities for integration and load testing.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use resilience_core::config::{CircuitBreakerConfig, RecoveryConfig};
use resilience_core::error::{BoxError, ErrorKind, ErrorRecord};
use resilience_core::recovery::{MemoryCache, RecoveryRegistry};
use resilience_core::resilience::{CircuitBreaker, RetryExecutor, RetryPolicy};

/// Breaker settings that keep the breaker out of the way of retry tests.
#[allow(dead_code)]
pub fn tolerant_breaker() -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        failure_threshold: 50,
        minimum_calls: 50,
        ..CircuitBreakerConfig::default()
    }
}

/// Short, deterministic backoff: 100ms doubling up to 1s, no jitter.
#[allow(dead_code)]
pub fn fast_policy(max_retries: u32, retryable: &[ErrorKind]) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        base_delay_ms: 100,
        max_delay_ms: 1_000,
        backoff_multiplier: 2.0,
        jitter_enabled: false,
        retryable_kinds: retryable.iter().copied().collect::<BTreeSet<_>>(),
        ..RetryPolicy::default()
    }
}

/// Executor over a fresh breaker whose recovery strategies share `cache`.
#[allow(dead_code)]
pub fn executor_with_cache(name: &str, cache: Arc<MemoryCache>) -> RetryExecutor {
    let breaker = Arc::new(CircuitBreaker::new(name, tolerant_breaker()));
    let recovery = Arc::new(RecoveryRegistry::with_defaults(cache, None, &RecoveryConfig::default()));
    RetryExecutor::new(breaker, recovery)
}

/// Operation that fails with `kind` for the first `failures` calls, then
/// returns `value`. The counter reports how often it ran.
#[allow(dead_code)]
pub fn flaky<T>(
    failures: u32,
    kind: ErrorKind,
    value: T,
) -> (Arc<AtomicU32>, impl FnMut() -> std::pin::Pin<Box<dyn Future<Output = Result<T, BoxError>> + Send>>)
where
    T: Clone + Send + 'static,
{
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let op = move || {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        let value = value.clone();
        let fut: std::pin::Pin<Box<dyn Future<Output = Result<T, BoxError>> + Send>> = Box::pin(async move {
            if n < failures {
                Err(Box::new(ErrorRecord::new(kind, format!("injected failure {}", n + 1))) as BoxError)
            } else {
                Ok(value)
            }
        });
        fut
    };
    (calls, op)
}
