//! Failure backoff for the dispatcher.

use std::time::Duration;

use rand::Rng;

use crate::error::ErrorClass;

const DEFAULT_BASE_DELAY_MS: u64 = 500;
const DEFAULT_MAX_DELAY_MS: u64 = 300_000;
const DEFAULT_JITTER_FACTOR: f64 = 0.1;

/// Per-key backoff after failed reconciles.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Delay after the first failure.
    pub base_delay: Duration,
    /// Upper bound before jitter.
    pub max_delay: Duration,
    /// Extra random delay, as a fraction of the computed delay (0.0 - 1.0).
    pub jitter_factor: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }
}

impl BackoffPolicy {
    /// Create a policy without jitter.
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            jitter_factor: 0.0,
        }
    }

    /// Set jitter factor.
    #[must_use]
    pub fn with_jitter(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = jitter_factor;
        self
    }

    /// Delay before retrying a key that has failed `failures` times in a row
    /// (`failures >= 1`). Permanent failures wait the maximum delay.
    pub fn delay_for(&self, failures: u32, class: ErrorClass) -> Duration {
        match class {
            ErrorClass::Permanent => self.with_jitter_added(self.max_delay),
            ErrorClass::Transient | ErrorClass::Conflict => {
                self.calculate_delay(failures.saturating_sub(1))
            }
        }
    }

    /// `min(base * 2^attempt, max)` plus jitter.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let factor = 1_u32.checked_shl(attempt).unwrap_or(u32::MAX);
        let exponential = self.base_delay.saturating_mul(factor);
        self.with_jitter_added(exponential.min(self.max_delay))
    }

    fn with_jitter_added(&self, delay: Duration) -> Duration {
        let range = delay.as_secs_f64() * self.jitter_factor.clamp(0.0, 1.0);
        if range <= 0.0 {
            return delay;
        }
        let jitter = rand::thread_rng().gen_range(0.0..range);
        delay.saturating_add(Duration::from_secs_f64(jitter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_exponential_growth_without_jitter() {
        let policy = BackoffPolicy::new(Duration::from_millis(100), Duration::from_secs(10));
        assert_eq!(policy.delay_for(1, ErrorClass::Transient), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2, ErrorClass::Transient), Duration::from_millis(200));
        assert_eq!(policy.delay_for(4, ErrorClass::Conflict), Duration::from_millis(800));
        assert_eq!(policy.delay_for(30, ErrorClass::Transient), Duration::from_secs(10));
    }

    #[test]
    fn test_permanent_uses_max() {
        let policy = BackoffPolicy::new(Duration::from_millis(100), Duration::from_secs(10));
        assert_eq!(policy.delay_for(1, ErrorClass::Permanent), Duration::from_secs(10));
    }

    #[test]
    fn test_huge_attempt_does_not_overflow() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.with_jitter(0.0).calculate_delay(200), Duration::from_secs(300));
    }

    proptest! {
        #[test]
        fn jitter_stays_within_bounds(attempt in 0u32..40, jitter in 0.0f64..1.0) {
            let policy = BackoffPolicy::new(Duration::from_millis(50), Duration::from_secs(60))
                .with_jitter(jitter);
            let base = BackoffPolicy::new(Duration::from_millis(50), Duration::from_secs(60))
                .calculate_delay(attempt);
            let delay = policy.calculate_delay(attempt);
            prop_assert!(delay >= base);
            prop_assert!(delay.as_secs_f64() <= base.as_secs_f64() * (1.0 + jitter) + 1e-6);
        }
    }
}
