//! # Fibonacci Backoff
//!
//! Progressive retry delays following the Fibonacci sequence, capped at a maximum.
//!
//! The sequence for `min = 1s, max = 10s` is: 1s, 1s, 2s, 3s, 5s, 8s, 10s, 10s, ...

use std::time::Duration;

/// Fibonacci backoff state for one retried operation
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    min: Duration,
    max: Duration,
    previous: Duration,
    current: Duration,
}

impl FibonacciBackoff {
    /// A zero `min` is raised to one millisecond so the sequence can grow.
    pub fn new(min: Duration, max: Duration) -> Self {
        let min = min.max(Duration::from_millis(1));
        let max = max.max(min);
        Self {
            min,
            max,
            previous: Duration::ZERO,
            current: min,
        }
    }

    /// Next delay in the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let delay = self.current.min(self.max);
        let next = self.previous.saturating_add(self.current);
        self.previous = self.current;
        self.current = next.min(self.max);
        delay
    }

    /// Restart the sequence from `min`
    pub fn reset(&mut self) {
        self.previous = Duration::ZERO;
        self.current = self.min;
    }

    pub fn max(&self) -> Duration {
        self.max
    }
}

/// Milliseconds of `delay` for log fields, saturating at `u64::MAX`
pub fn delay_millis(delay: Duration) -> u64 {
    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}
