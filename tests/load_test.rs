//! Concurrency tests for breaker admission.
//!
//! Many callers hit the same breaker at once; admission must stay within
//! the configured limits and the counters must add up.

mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

use resilience_core::config::CircuitBreakerConfig;
use resilience_core::error::BoxError;
use resilience_core::resilience::{BreakerError, CircuitBreaker, CircuitState};

fn probing_breaker() -> Arc<CircuitBreaker> {
    let breaker = Arc::new(CircuitBreaker::new(
        "search_index",
        CircuitBreakerConfig {
            recovery_timeout_ms: 1_000,
            half_open_max_calls: 3,
            success_threshold: 2,
            ..CircuitBreakerConfig::default()
        },
    ));
    breaker.force_open("load test");
    breaker
}

#[tokio::test(start_paused = true)]
async fn test_fourth_concurrent_probe_is_rejected() {
    let breaker = probing_breaker();
    tokio::time::advance(Duration::from_millis(1_001)).await;
    assert_eq!(breaker.state(), CircuitState::HalfOpen);

    let gate = Arc::new(Semaphore::new(0));
    let mut probes = Vec::new();
    for _ in 0..3 {
        let breaker = Arc::clone(&breaker);
        let gate = Arc::clone(&gate);
        probes.push(tokio::spawn(async move {
            breaker
                .execute(async move {
                    let _held = gate.acquire().await.map_err(|e| Box::new(e) as BoxError)?;
                    Ok::<_, BoxError>(())
                })
                .await
        }));
    }

    while breaker.can_execute() {
        tokio::task::yield_now().await;
    }

    let fourth = breaker.execute(async { Ok::<_, BoxError>(()) }).await;
    match fourth {
        Err(BreakerError::Open { state, .. }) => assert_eq!(state, CircuitState::HalfOpen),
        other => panic!("expected rejection, got {other:?}"),
    }

    gate.add_permits(3);
    for probe in probes {
        assert!(probe.await.unwrap().is_ok());
    }
    assert_eq!(breaker.state(), CircuitState::Closed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_half_open_admission_under_contention() {
    let breaker = Arc::new(CircuitBreaker::new(
        "search_index",
        CircuitBreakerConfig {
            recovery_timeout_ms: 0,
            half_open_max_calls: 3,
            ..CircuitBreakerConfig::default()
        },
    ));
    breaker.force_open("load test");

    let gate = Arc::new(Semaphore::new(0));
    let admitted = Arc::new(AtomicU32::new(0));
    let rejected = Arc::new(AtomicU32::new(0));
    let callers = 50;

    let mut handles = Vec::new();
    for _ in 0..callers {
        let breaker = Arc::clone(&breaker);
        let gate = Arc::clone(&gate);
        let admitted = Arc::clone(&admitted);
        let rejected = Arc::clone(&rejected);
        handles.push(tokio::spawn(async move {
            let result = breaker
                .execute(async {
                    admitted.fetch_add(1, Ordering::SeqCst);
                    let _held = gate.acquire().await.map_err(|e| Box::new(e) as BoxError)?;
                    Ok::<_, BoxError>(())
                })
                .await;
            if result.is_err() {
                rejected.fetch_add(1, Ordering::SeqCst);
            }
        }));
    }

    // Wait until every caller has either been admitted or turned away.
    while admitted.load(Ordering::SeqCst) + rejected.load(Ordering::SeqCst) < callers {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    assert_eq!(admitted.load(Ordering::SeqCst), 3);
    assert_eq!(rejected.load(Ordering::SeqCst), callers - 3);

    gate.add_permits(callers as usize);
    for handle in handles {
        handle.await.unwrap();
    }
    assert_eq!(breaker.state(), CircuitState::Closed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_closed_breaker_counts_every_call() {
    let breaker = Arc::new(CircuitBreaker::new("search_index", common::tolerant_breaker()));
    let callers = 200_u64;

    let mut handles = Vec::new();
    for i in 0..callers {
        let breaker = Arc::clone(&breaker);
        handles.push(tokio::spawn(async move {
            breaker
                .execute(async move {
                    if i % 10 == 0 {
                        Err::<u64, BoxError>("index shard unavailable".into())
                    } else {
                        Ok(i)
                    }
                })
                .await
        }));
    }
    for handle in handles {
        let _ = handle.await.unwrap();
    }

    let metrics = breaker.metrics();
    assert_eq!(metrics.total_calls, callers);
    assert_eq!(metrics.failed_calls, 20);
    assert_eq!(metrics.successful_calls, 180);
    assert_eq!(breaker.state(), CircuitState::Closed);
}
