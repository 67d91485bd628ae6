//! Exponential backoff with jitter.

use rand::Rng;
use std::time::Duration;

/// Share of the delay used as the jitter band on each side.
pub const JITTER_RATIO: f64 = 0.1;

/// Exponential backoff delay for the `attempt`-th retry (1-based), no jitter.
///
/// `delay(n) = min(base * multiplier^(n-1), max)`. Attempt 0 yields zero.
pub fn calculate_backoff(attempt: u32, base: Duration, multiplier: f64, max: Duration) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
    let factor = multiplier.max(1.0).powi(exponent);
    let delay_ms = base.as_millis() as f64 * factor;
    let max_ms = max.as_millis() as f64;

    if !delay_ms.is_finite() || delay_ms >= max_ms {
        max
    } else {
        Duration::from_millis(delay_ms.round() as u64)
    }
}

/// Spread a delay uniformly over `delay ± 10%`, never below zero.
pub fn apply_jitter(delay: Duration) -> Duration {
    apply_jitter_with(delay, &mut rand::thread_rng())
}

/// [`apply_jitter`] with a caller-supplied RNG.
pub fn apply_jitter_with<R: Rng + ?Sized>(delay: Duration, rng: &mut R) -> Duration {
    let delay_ms = delay.as_millis() as f64;
    let band = delay_ms * JITTER_RATIO;
    if band <= 0.0 {
        return delay;
    }
    let jittered = delay_ms + rng.gen_range(-band..=band);
    Duration::from_millis(jittered.max(0.0).round() as u64)
}

/// Backoff curve parameters shared by the executor and recovery strategies.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub base: Duration,
    pub multiplier: f64,
    pub max: Duration,
    pub jitter: bool,
}

impl Backoff {
    /// Delay before the `attempt`-th retry.
    pub fn delay(&self, attempt: u32) -> Duration {
        let delay = calculate_backoff(attempt, self.base, self.multiplier, self.max);
        if self.jitter {
            apply_jitter(delay)
        } else {
            delay
        }
    }
}
