//! # Exponential Backoff
//!
//! Per-key exponential backoff for work queue retries.
//!
//! Each failure of a key doubles its delay: `base * 2^failures`, capped at
//! `max`. Keys back off independently, and a successful pass resets a key
//! through [`ExponentialFailureRateLimiter::forget`].
//!
//! ## Usage
//!
//! ```rust
//! use jetstream_controller::controller::backoff::ExponentialBackoff;
//! use std::time::Duration;
//!
//! let mut backoff = ExponentialBackoff::new(Duration::from_millis(5), Duration::from_secs(1000));
//! assert_eq!(backoff.next_backoff(), Duration::from_millis(5));
//! assert_eq!(backoff.next_backoff(), Duration::from_millis(10));
//! assert_eq!(backoff.next_backoff(), Duration::from_millis(20));
//! ```

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Exponential backoff calculator for a single key
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base: Duration,
    max: Duration,
    /// Failures seen since the last reset
    failures: u32,
}

impl ExponentialBackoff {
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: 0,
        }
    }

    /// Delay for the current failure count, without advancing
    #[must_use]
    pub fn current(&self) -> Duration {
        // 2^31 already exceeds any sane ceiling; clamp to avoid overflow
        let factor = 2u32.saturating_pow(self.failures.min(31));
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Get the next backoff duration and advance the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let delay = self.current();
        self.failures = self.failures.saturating_add(1);
        delay
    }

    #[must_use]
    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }
}

/// Tracks an [`ExponentialBackoff`] per work queue key
#[derive(Debug)]
pub struct ExponentialFailureRateLimiter {
    base: Duration,
    max: Duration,
    backoffs: Mutex<HashMap<String, ExponentialBackoff>>,
}

impl ExponentialFailureRateLimiter {
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            backoffs: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ExponentialBackoff>> {
        self.backoffs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a failure for `key` and return how long to wait before retrying
    pub fn when(&self, key: &str) -> Duration {
        self.lock()
            .entry(key.to_string())
            .or_insert_with(|| ExponentialBackoff::new(self.base, self.max))
            .next_backoff()
    }

    /// Number of failures recorded for `key` since it was last forgotten
    #[must_use]
    pub fn num_requeues(&self, key: &str) -> u32 {
        self.lock().get(key).map_or(0, ExponentialBackoff::failures)
    }

    /// Reset `key` after a successful pass
    pub fn forget(&self, key: &str) {
        self.lock().remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff_sequence() {
        let mut backoff = ExponentialBackoff::new(Duration::from_millis(5), Duration::from_secs(1));

        assert_eq!(backoff.next_backoff(), Duration::from_millis(5));
        assert_eq!(backoff.next_backoff(), Duration::from_millis(10));
        assert_eq!(backoff.next_backoff(), Duration::from_millis(20));
        assert_eq!(backoff.next_backoff(), Duration::from_millis(40));
        assert_eq!(backoff.failures(), 4);
    }

    #[test]
    fn test_exponential_backoff_max_cap() {
        let mut backoff =
            ExponentialBackoff::new(Duration::from_millis(100), Duration::from_millis(500));

        assert_eq!(backoff.next_backoff(), Duration::from_millis(100));
        assert_eq!(backoff.next_backoff(), Duration::from_millis(200));
        assert_eq!(backoff.next_backoff(), Duration::from_millis(400));
        // Next would be 800ms, capped at 500ms
        assert_eq!(backoff.next_backoff(), Duration::from_millis(500));
        assert_eq!(backoff.next_backoff(), Duration::from_millis(500));
    }

    #[test]
    fn test_exponential_backoff_does_not_overflow() {
        let mut backoff = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(1000));
        for _ in 0..200 {
            backoff.next_backoff();
        }
        assert_eq!(backoff.current(), Duration::from_secs(1000));
    }

    #[test]
    fn test_exponential_backoff_reset() {
        let mut backoff = ExponentialBackoff::new(Duration::from_millis(5), Duration::from_secs(1));
        backoff.next_backoff();
        backoff.next_backoff();

        backoff.reset();

        assert_eq!(backoff.failures(), 0);
        assert_eq!(backoff.next_backoff(), Duration::from_millis(5));
    }

    #[test]
    fn test_rate_limiter_per_key_state() {
        let limiter =
            ExponentialFailureRateLimiter::new(Duration::from_millis(5), Duration::from_secs(1));

        assert_eq!(limiter.when("default/a"), Duration::from_millis(5));
        assert_eq!(limiter.when("default/a"), Duration::from_millis(10));
        assert_eq!(limiter.when("default/b"), Duration::from_millis(5));
        assert_eq!(limiter.num_requeues("default/a"), 2);
        assert_eq!(limiter.num_requeues("default/b"), 1);

        limiter.forget("default/a");
        assert_eq!(limiter.num_requeues("default/a"), 0);
        assert_eq!(limiter.when("default/a"), Duration::from_millis(5));
        // Independent of the reset
        assert_eq!(limiter.num_requeues("default/b"), 1);
    }
}
