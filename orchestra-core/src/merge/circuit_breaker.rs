//! Merge coordinator circuit breaker.
//!
//! Conservative defaults: trip after 3 consecutive merge failures, cool
//! down for 30s.

use std::time::{Duration, Instant};

const DEFAULT_FAILURE_THRESHOLD: u32 = 3;
const DEFAULT_COOLDOWN: Duration = Duration::from_secs(30);

/// Tracks consecutive merge failures and trips into a cooldown window once
/// the threshold is reached, giving a struggling coordinator a pause instead
/// of hammering a broken trunk.
#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    cooldown: Duration,
    consecutive_failures: u32,
    tripped_at: Option<Instant>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_THRESHOLD, DEFAULT_COOLDOWN)
    }
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold,
            cooldown,
            consecutive_failures: 0,
            tripped_at: None,
        }
    }

    /// Whether the breaker is currently open (merges should not be attempted).
    pub fn is_tripped(&mut self) -> bool {
        if let Some(at) = self.tripped_at {
            if at.elapsed() >= self.cooldown {
                self.tripped_at = None;
                self.consecutive_failures = 0;
                return false;
            }
            return true;
        }
        false
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.tripped_at = None;
    }

    pub fn record_failure(&mut self) {
        self.consecutive_failures += 1;
        if self.consecutive_failures >= self.failure_threshold {
            self.tripped_at = Some(Instant::now());
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trips_after_threshold_consecutive_failures() {
        let mut cb = CircuitBreaker::new(3, Duration::from_millis(50));
        assert!(!cb.is_tripped());
        cb.record_failure();
        cb.record_failure();
        assert!(!cb.is_tripped());
        cb.record_failure();
        assert!(cb.is_tripped());
    }

    #[test]
    fn success_resets_counter() {
        let mut cb = CircuitBreaker::new(3, Duration::from_millis(50));
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        assert_eq!(cb.consecutive_failures(), 0);
        cb.record_failure();
        cb.record_failure();
        assert!(!cb.is_tripped());
    }

    #[test]
    fn resets_after_cooldown_elapses() {
        let mut cb = CircuitBreaker::new(1, Duration::from_millis(10));
        cb.record_failure();
        assert!(cb.is_tripped());
        std::thread::sleep(Duration::from_millis(20));
        assert!(!cb.is_tripped());
        assert_eq!(cb.consecutive_failures(), 0);
    }
}
