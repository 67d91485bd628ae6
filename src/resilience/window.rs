//! Rolling call window.
//!
//! # Responsibilities
//! - Keep one record per finished call for the monitoring window
//! - Prune old records lazily when touched
//! - Derive failure rate, slow-call rate and latency percentiles on read
//!
//! # Design Decisions
//! - Nothing is aggregated incrementally; every figure comes from the records
//! - Percentiles use the nearest-rank method over sorted response times

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// One finished call.
#[derive(Debug, Clone)]
pub struct CallRecord {
    /// Monotonic time the call finished, used for pruning.
    pub at: Instant,
    /// Wall-clock time the call finished.
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub response_time_ms: u64,
    pub slow: bool,
    pub timed_out: bool,
    pub error: Option<String>,
}

impl CallRecord {
    pub fn success(elapsed: Duration, slow_threshold: Duration) -> Self {
        Self::new(true, elapsed, slow_threshold, false, None)
    }

    pub fn failure(elapsed: Duration, slow_threshold: Duration, timed_out: bool, error: String) -> Self {
        Self::new(false, elapsed, slow_threshold, timed_out, Some(error))
    }

    fn new(
        success: bool,
        elapsed: Duration,
        slow_threshold: Duration,
        timed_out: bool,
        error: Option<String>,
    ) -> Self {
        Self {
            at: Instant::now(),
            timestamp: Utc::now(),
            success,
            response_time_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            slow: elapsed >= slow_threshold,
            timed_out,
            error,
        }
    }
}

/// Outcome counts over the window.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WindowCounts {
    pub total: u64,
    pub failures: u64,
    pub slow: u64,
    pub timed_out: u64,
}

impl WindowCounts {
    pub fn successes(&self) -> u64 {
        self.total - self.failures
    }

    pub fn failure_rate(&self) -> f64 {
        ratio(self.failures, self.total)
    }

    pub fn slow_call_rate(&self) -> f64 {
        ratio(self.slow, self.total)
    }
}

/// Response-time distribution over the window, in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LatencyStats {
    pub average_ms: f64,
    pub min_ms: u64,
    pub max_ms: u64,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
}

/// Time-bounded queue of call records, oldest first.
#[derive(Debug, Default)]
pub struct CallWindow {
    records: VecDeque<CallRecord>,
}

impl CallWindow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: CallRecord) {
        self.records.push_back(record);
    }

    /// Drop every record older than `window` relative to `now`.
    pub fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(front) = self.records.front() {
            if now.saturating_duration_since(front.at) > window {
                self.records.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn counts(&self) -> WindowCounts {
        self.records.iter().fold(WindowCounts::default(), |mut acc, record| {
            acc.total += 1;
            if !record.success {
                acc.failures += 1;
            }
            if record.slow {
                acc.slow += 1;
            }
            if record.timed_out {
                acc.timed_out += 1;
            }
            acc
        })
    }

    pub fn latency(&self) -> LatencyStats {
        if self.records.is_empty() {
            return LatencyStats::default();
        }

        let mut times: Vec<u64> = self.records.iter().map(|r| r.response_time_ms).collect();
        times.sort_unstable();
        let sum: u128 = times.iter().map(|&t| u128::from(t)).sum();

        LatencyStats {
            average_ms: sum as f64 / times.len() as f64,
            min_ms: times[0],
            max_ms: times[times.len() - 1],
            p50_ms: percentile(&times, 50.0),
            p95_ms: percentile(&times, 95.0),
            p99_ms: percentile(&times, 99.0),
        }
    }

    /// Whether the nearest-rank `pct` percentile of response times is at
    /// least `threshold_ms`. One pass, no allocation.
    ///
    /// The value at rank `r` of `n` sorted times reaches the threshold
    /// exactly when more than `n - r` times do.
    pub fn percentile_at_least(&self, pct: f64, threshold_ms: u64) -> bool {
        let n = self.records.len();
        if n == 0 {
            return false;
        }
        let rank = nearest_rank(pct, n);
        let at_or_above = self
            .records
            .iter()
            .filter(|r| r.response_time_ms >= threshold_ms)
            .count();
        at_or_above > n - rank
    }

    /// Most recent error message, if any failure is in the window.
    pub fn last_error(&self) -> Option<&str> {
        self.records.iter().rev().find_map(|r| r.error.as_deref())
    }
}

/// Nearest-rank percentile of an ascending slice. Returns 0 for an empty slice.
pub fn percentile(sorted: &[u64], pct: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    sorted[nearest_rank(pct, sorted.len()) - 1]
}

/// 1-based nearest rank of `pct` among `n > 0` values.
fn nearest_rank(pct: f64, n: usize) -> usize {
    let pct = pct.clamp(0.0, 100.0);
    let rank = ((pct / 100.0) * n as f64).ceil() as usize;
    rank.clamp(1, n)
}

fn ratio(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}
