//! Retry, pacing and circuit-breaker policy for delivery.
//!
//! Kept free of I/O so the timing rules can be tested on their own.

use std::time::Duration;

use crate::config::DeliveryConfig;

/// Retry policy for a single gateway operation.
///
/// Rate-limit waits never consume an attempt; only transient failures do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts allowed on transient failures.
    pub max_attempts: u32,

    /// The backoff after attempt `n` is `base * 2^(n - 1)`.
    pub base_backoff: Duration,

    /// Caps the exponential backoff.
    pub max_backoff: Duration,

    /// Added on top of every server-requested wait.
    pub rate_limit_margin: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&DeliveryConfig::default())
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn from_config(config: &DeliveryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_backoff: config.base_backoff,
            max_backoff: config.max_backoff,
            rate_limit_margin: config.rate_limit_margin,
        }
    }

    /// Same waits, but transient failures are not retried.
    #[must_use]
    pub fn single_attempt(&self) -> Self {
        Self {
            max_attempts: 1,
            ..self.clone()
        }
    }

    /// Check if another attempt is allowed after `attempts` failed ones.
    #[must_use]
    pub const fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Backoff after the `attempt`-th failure (1-based).
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }

    /// How long to wait after the server asked for `retry_after`.
    #[must_use]
    pub fn rate_limit_wait(&self, retry_after: Duration) -> Duration {
        retry_after.saturating_add(self.rate_limit_margin)
    }
}

/// Pause between posted questions, longer for big jobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pacing {
    pub short: Duration,
    pub long: Duration,
    /// Jobs with more questions than this use `long`.
    pub threshold: usize,
}

impl Pacing {
    #[must_use]
    pub fn from_config(config: &DeliveryConfig) -> Self {
        Self {
            short: config.pacing_short,
            long: config.pacing_long,
            threshold: config.pacing_threshold,
        }
    }

    #[must_use]
    pub fn delay_for(&self, question_count: usize) -> Duration {
        if question_count <= self.threshold {
            self.short
        } else {
            self.long
        }
    }
}

/// Counts consecutive failed questions; trips at the threshold.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    threshold: u32,
    consecutive_failures: u32,
}

impl CircuitBreaker {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            consecutive_failures: 0,
        }
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    /// Record a failed question. Returns `true` once the breaker is open.
    pub fn record_failure(&mut self) -> bool {
        self.consecutive_failures += 1;
        self.is_open()
    }

    pub fn is_open(&self) -> bool {
        self.consecutive_failures >= self.threshold
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_retry_policy_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.base_backoff, secs(2));
        assert_eq!(policy.max_backoff, secs(30));
        assert_eq!(policy.rate_limit_margin, secs(1));
    }

    #[test]
    fn test_should_retry() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(3));
        assert!(!policy.should_retry(4));
        assert!(!policy.single_attempt().should_retry(1));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), secs(2));
        assert_eq!(policy.backoff(2), secs(4));
        assert_eq!(policy.backoff(3), secs(8));
        assert_eq!(policy.backoff(4), secs(16));
        assert_eq!(policy.backoff(5), secs(30));
        assert_eq!(policy.backoff(60), secs(30));
    }

    #[test]
    fn test_rate_limit_wait_adds_margin() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.rate_limit_wait(secs(7)), secs(8));
    }

    #[test]
    fn test_zero_attempts_config_still_tries_once() {
        let config = DeliveryConfig {
            max_attempts: 0,
            ..DeliveryConfig::default()
        };
        assert_eq!(RetryPolicy::from_config(&config).max_attempts, 1);
    }

    #[test]
    fn test_pacing_threshold_is_inclusive() {
        let pacing = Pacing::from_config(&DeliveryConfig::default());
        assert_eq!(pacing.delay_for(1), secs(1));
        assert_eq!(pacing.delay_for(50), secs(1));
        assert_eq!(pacing.delay_for(51), secs(2));
    }

    #[test]
    fn test_breaker_trips_on_consecutive_failures() {
        let mut breaker = CircuitBreaker::new(3);
        assert!(!breaker.record_failure());
        assert!(!breaker.record_failure());
        breaker.record_success();
        assert_eq!(breaker.consecutive_failures(), 0);
        assert!(!breaker.record_failure());
        assert!(!breaker.record_failure());
        assert!(breaker.record_failure());
        assert!(breaker.is_open());
    }
}
