//! Retry policy: decides the pause between optimistic retries.

use std::time::Duration;

/// Backoff between attempts of one call.
///
/// The default retries immediately, re-running the unit of work against a
/// fresh snapshot right after the rollback.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,

    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::immediate()
    }
}

impl RetryPolicy {
    pub fn immediate() -> Self {
        Self {
            base_delay: Duration::ZERO,
            multiplier: 2.0,
            max_delay: Duration::from_secs(5),
        }
    }

    pub fn exponential(base_delay: Duration, multiplier: f64, max_delay: Duration) -> Self {
        Self {
            base_delay,
            multiplier,
            max_delay,
        }
    }

    /// Delay before the retry that follows failed attempt `attempts`
    /// (1-indexed): `base_delay * multiplier^(attempts - 1)`, capped at
    /// `max_delay`.
    ///
    /// Example with base_delay=10ms, multiplier=2.0:
    /// - attempt 1: 10ms
    /// - attempt 2: 20ms
    /// - attempt 3: 40ms
    pub fn next_delay(&self, attempts: u32) -> Duration {
        if self.base_delay.is_zero() {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(attempts.saturating_sub(1)).unwrap_or(i32::MAX);
        let delay_secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::try_from_secs_f64(delay_secs)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_retries_immediately() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.next_delay(1), Duration::ZERO);
        assert_eq!(policy.next_delay(5), Duration::ZERO);
    }

    #[test]
    fn exponential_backoff_increases() {
        let policy = RetryPolicy::exponential(
            Duration::from_millis(10),
            2.0,
            Duration::from_secs(1),
        );

        let d1 = policy.next_delay(1);
        let d2 = policy.next_delay(2);
        let d3 = policy.next_delay(3);

        assert!(d2 > d1);
        assert!(d3 > d2);
        assert_eq!(d1, Duration::from_millis(10));
        assert_eq!(d2, Duration::from_millis(20));
        assert_eq!(d3, Duration::from_millis(40));
    }

    #[test]
    fn delay_is_capped() {
        let policy = RetryPolicy::exponential(
            Duration::from_millis(100),
            10.0,
            Duration::from_millis(250),
        );
        assert_eq!(policy.next_delay(3), Duration::from_millis(250));
        assert_eq!(policy.next_delay(u32::MAX), Duration::from_millis(250));
    }
}
