//! # Fibonacci Backoff
//!
//! Progressive retry delay for failed reconciliation passes. Grows more slowly
//! than exponential backoff so a virtual cluster whose components keep failing
//! is retried often enough to notice recovery without hammering the API server.
//!
//! Values are tracked in minutes and returned in seconds:
//! 1m, 1m, 2m, 3m, 5m, 8m, 10m (max).
//!
//! ```rust
//! use virtual_cluster_operator::controller::backoff::FibonacciBackoff;
//!
//! let mut backoff = FibonacciBackoff::new(1, 10);
//! assert_eq!(backoff.next_backoff_seconds(), 60);
//! assert_eq!(backoff.next_backoff_seconds(), 60);
//! assert_eq!(backoff.next_backoff_seconds(), 120);
//! ```

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    /// Restart value after `reset`
    min_minutes: u64,
    prev_minutes: u64,
    current_minutes: u64,
    max_minutes: u64,
}

impl FibonacciBackoff {
    #[must_use]
    pub fn new(min_minutes: u64, max_minutes: u64) -> Self {
        Self {
            min_minutes,
            prev_minutes: 0,
            current_minutes: min_minutes,
            max_minutes,
        }
    }

    /// Current delay in seconds; advances the sequence, capped at the maximum
    pub fn next_backoff_seconds(&mut self) -> u64 {
        let seconds = self.current_minutes * 60;
        let next = self.prev_minutes + self.current_minutes;
        self.prev_minutes = self.current_minutes;
        self.current_minutes = next.min(self.max_minutes);
        seconds
    }

    #[must_use]
    pub fn next_backoff(&mut self) -> Duration {
        Duration::from_secs(self.next_backoff_seconds())
    }

    /// Restart the sequence after a successful pass
    pub fn reset(&mut self) {
        self.prev_minutes = 0;
        self.current_minutes = self.min_minutes;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_caps_at_max() {
        let mut backoff = FibonacciBackoff::new(1, 10);
        let seconds: Vec<u64> = (0..9).map(|_| backoff.next_backoff_seconds()).collect();
        assert_eq!(seconds, vec![60, 60, 120, 180, 300, 480, 600, 600, 600]);
    }

    #[test]
    fn test_reset_restarts_from_minimum() {
        let mut backoff = FibonacciBackoff::new(2, 30);
        backoff.next_backoff_seconds();
        backoff.next_backoff_seconds();
        backoff.next_backoff_seconds();
        backoff.reset();
        assert_eq!(backoff.next_backoff(), Duration::from_secs(120));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(120));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(240));
    }

    #[test]
    fn test_independent_per_resource_state() {
        let mut first = FibonacciBackoff::new(1, 10);
        let mut second = FibonacciBackoff::new(1, 10);
        for _ in 0..4 {
            first.next_backoff_seconds();
        }
        assert_eq!(second.next_backoff_seconds(), 60);
        assert_eq!(first.next_backoff_seconds(), 300);
    }
}
