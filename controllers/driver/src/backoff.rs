//! # Fibonacci Backoff
//!
//! Requeue delay for NVIDIADrivers stuck on an input error (bad image,
//! missing ConfigMap, conflicting selector). Such errors need a change to the
//! cluster before a retry can succeed, so retries slow down along the
//! Fibonacci sequence: 1m, 1m, 2m, 3m, 5m, 8m, 10m (max).

use std::time::Duration;

/// Fibonacci backoff bounded by `min` and `max`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FibonacciBackoff {
    min: Duration,
    max: Duration,
}

impl Default for FibonacciBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(60), Duration::from_secs(600))
    }
}

impl FibonacciBackoff {
    #[must_use]
    pub fn new(min: Duration, max: Duration) -> Self {
        Self { min, max: max.max(min) }
    }

    /// Delay after `error_count` consecutive failures (0-indexed)
    ///
    /// The first two values are `min`, then each value is the sum of the
    /// previous two, capped at `max`.
    #[must_use]
    pub fn delay(&self, error_count: u32) -> Duration {
        let mut prev = self.min;
        let mut current = self.min;
        for _ in 1..error_count {
            let next = prev.saturating_add(current).min(self.max);
            prev = current;
            current = next;
            if current >= self.max {
                break;
            }
        }
        current
    }
}
