//! Retry backoff.

use rand::Rng;
use std::time::Duration;

/// Exponential backoff with symmetric jitter:
/// `min(cap, base * 2^attempt) ± jitter`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
    /// Fraction of the delay, e.g. `0.2` for ±20%.
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(200),
            cap: Duration::from_secs(5),
            jitter: 0.2,
        }
    }
}

impl BackoffPolicy {
    /// Delay before the retry following zero-based `attempt`, without jitter.
    pub fn nominal(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(31));
        self.base.saturating_mul(factor).min(self.cap)
    }

    /// Delay before the retry following zero-based `attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let nominal = self.nominal(attempt);
        if self.jitter <= 0.0 {
            return nominal;
        }
        let spread = self.jitter.min(1.0);
        let factor = rand::thread_rng().gen_range(1.0 - spread..=1.0 + spread);
        nominal.mul_f64(factor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nominal_doubles_and_caps() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.nominal(0), Duration::from_millis(200));
        assert_eq!(policy.nominal(1), Duration::from_millis(400));
        assert_eq!(policy.nominal(3), Duration::from_millis(1600));
        assert_eq!(policy.nominal(5), Duration::from_secs(5));
        assert_eq!(policy.nominal(40), Duration::from_secs(5));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = BackoffPolicy::default();
        for _ in 0..200 {
            let delay = policy.delay(2);
            assert!(delay >= Duration::from_millis(639));
            assert!(delay <= Duration::from_millis(961));
        }
    }

    #[test]
    fn test_zero_jitter_is_exact() {
        let policy = BackoffPolicy {
            jitter: 0.0,
            ..Default::default()
        };
        assert_eq!(policy.delay(1), Duration::from_millis(400));
    }
}
