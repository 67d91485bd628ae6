//! Timeout enforcement.
//!
//! # Responsibilities
//! - Track the overall deadline of a retried operation
//! - Bound every wait point (attempt, backoff sleep, recovery) by that deadline
//! - Abandon in-flight futures when the deadline fires
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities and Tokio's clock (pausable in tests)
//! - Timeout errors are distinct from other errors
//! - A dropped future is considered abandoned; its result is never observed

use std::future::Future;
use std::time::Duration;
use tokio::time::{self, Instant};

/// Returned when the overall deadline fired while waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("deadline of {budget:?} exceeded")]
pub struct DeadlineExceeded {
    pub budget: Duration,
}

/// Overall time budget for one logical operation.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    budget: Duration,
}

impl Deadline {
    /// Start a deadline `budget` from now.
    pub fn start(budget: Duration) -> Self {
        Self {
            started: Instant::now(),
            budget,
        }
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn remaining(&self) -> Duration {
        self.budget.saturating_sub(self.elapsed())
    }

    pub fn is_expired(&self) -> bool {
        self.elapsed() >= self.budget
    }

    /// Time an attempt may take: the remaining budget, shortened by the
    /// optional per-call limit.
    pub fn attempt_limit(&self, per_call: Option<Duration>) -> Duration {
        let remaining = self.remaining();
        per_call.map_or(remaining, |limit| limit.min(remaining))
    }

    /// Run `fut` until it completes or the deadline fires.
    ///
    /// An optional per-call limit shortens the wait further; when that
    /// limit fires first the result is also `DeadlineExceeded`, carrying
    /// the per-call budget.
    pub async fn run<F: Future>(&self, per_call: Option<Duration>, fut: F) -> Result<F::Output, DeadlineExceeded> {
        let remaining = self.remaining();
        let (limit, budget) = match per_call {
            Some(limit) if limit < remaining => (limit, limit),
            _ => (remaining, self.budget),
        };
        time::timeout(limit, fut)
            .await
            .map_err(|_| DeadlineExceeded { budget })
    }

    /// Sleep for `delay`, cut short at the deadline. Returns the time
    /// actually slept.
    pub async fn sleep(&self, delay: Duration) -> Duration {
        let slept = delay.min(self.remaining());
        time::sleep(slept).await;
        slept
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_run_completes_within_budget() {
        let deadline = Deadline::start(Duration::from_secs(5));
        let out = deadline
            .run(None, async {
                time::sleep(Duration::from_secs(1)).await;
                42
            })
            .await;
        assert_eq!(out, Ok(42));
        assert_eq!(deadline.remaining(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_abandons_at_deadline() {
        let deadline = Deadline::start(Duration::from_secs(2));
        let out = deadline
            .run(None, time::sleep(Duration::from_secs(10)))
            .await;
        assert_eq!(out, Err(DeadlineExceeded { budget: Duration::from_secs(2) }));
        assert!(deadline.is_expired());
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_call_limit_wins_when_shorter() {
        let deadline = Deadline::start(Duration::from_secs(10));
        let out = deadline
            .run(Some(Duration::from_secs(1)), time::sleep(Duration::from_secs(3)))
            .await;
        assert_eq!(out, Err(DeadlineExceeded { budget: Duration::from_secs(1) }));
        assert!(!deadline.is_expired());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_is_cut_at_deadline() {
        let deadline = Deadline::start(Duration::from_secs(3));
        assert_eq!(deadline.sleep(Duration::from_secs(1)).await, Duration::from_secs(1));
        assert_eq!(deadline.sleep(Duration::from_secs(5)).await, Duration::from_secs(2));
        assert!(deadline.is_expired());
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_limit_is_bounded_by_remaining_budget() {
        let deadline = Deadline::start(Duration::from_secs(3));
        assert_eq!(deadline.attempt_limit(None), Duration::from_secs(3));
        assert_eq!(deadline.attempt_limit(Some(Duration::from_secs(1))), Duration::from_secs(1));

        time::advance(Duration::from_millis(2_500)).await;
        assert_eq!(deadline.attempt_limit(Some(Duration::from_secs(1))), Duration::from_millis(500));
    }
}
