//! Retry policy: decides backoff delays and the retry budget.

use std::time::Duration;

use crate::domain::errors::TransportError;

/// Retry policy for transient transport failures.
///
/// Exponential backoff, clamped to `max_delay`. Network errors get jitter on
/// top; a server supplied `Retry-After` acts as a floor.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,

    /// Cap for any single delay.
    pub max_delay: Duration,

    /// Fraction of the delay added at random for network errors.
    pub jitter: f64,

    /// Consecutive failed attempts of one call before the task fails.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
            jitter: 0.2,
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// Delay after the `attempts`-th consecutive failure (1-indexed).
    ///
    /// delay = base_delay * multiplier^(attempts - 1), clamped to `max_delay`.
    ///
    /// Example with base_delay=1s, multiplier=2.0:
    /// - attempt 1: 1s
    /// - attempt 2: 2s
    /// - attempt 3: 4s
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs.max(0.0))
    }

    /// Delay to wait after `error` ended the `attempts`-th attempt.
    pub fn delay_for(&self, attempts: u32, error: &TransportError) -> Duration {
        self.delay_with_sample(attempts, error, rand::random::<f64>())
    }

    /// `delay_for` with the random sample (in `[0, 1)`) supplied by the caller.
    pub fn delay_with_sample(&self, attempts: u32, error: &TransportError, sample: f64) -> Duration {
        let mut delay = self.next_delay(attempts);
        if error.is_network() {
            // bounded by multiplier - 1 so attempt N+1 never drops below attempt N
            let jitter = self.jitter.clamp(0.0, (self.multiplier - 1.0).clamp(0.0, 1.0));
            delay = delay.mul_f64(1.0 + sample.clamp(0.0, 1.0) * jitter).min(self.max_delay);
        }
        if let Some(retry_after) = error.retry_after() {
            delay = delay.max(retry_after);
        }
        delay
    }

    /// Whether the `attempts`-th failure uses up the budget.
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn default_policy_has_reasonable_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.base_delay, Duration::from_secs(1));
        assert_eq!(policy.multiplier, 2.0);
        assert_eq!(policy.max_attempts, 5);
    }

    #[test]
    fn exponential_backoff_increases_until_the_cap() {
        let policy = RetryPolicy {
            max_delay: Duration::from_secs(5),
            ..RetryPolicy::default()
        };

        assert_eq!(policy.next_delay(1), Duration::from_secs(1));
        assert_eq!(policy.next_delay(2), Duration::from_secs(2));
        assert_eq!(policy.next_delay(3), Duration::from_secs(4));
        assert_eq!(policy.next_delay(4), Duration::from_secs(5));
        assert_eq!(policy.next_delay(400), Duration::from_secs(5));
    }

    #[rstest]
    #[case(TransportError::NetworkTimeout(Duration::from_secs(30)))]
    #[case(TransportError::ConnectionReset("reset".into()))]
    #[case(TransportError::ServerError { status: 503, message: "busy".into() })]
    #[case(TransportError::RateLimited { retry_after: None })]
    fn delays_never_shrink_between_attempts(#[case] err: TransportError) {
        let policy = RetryPolicy::default();
        // worst case: max jitter on attempt N, none on attempt N+1
        for n in 1..12 {
            let high = policy.delay_with_sample(n, &err, 0.999);
            let low = policy.delay_with_sample(n + 1, &err, 0.0);
            assert!(low >= high, "attempt {n}: {high:?} then {low:?}");
            assert!(high <= policy.max_delay);
        }
    }

    #[test]
    fn jitter_only_applies_to_network_errors() {
        let policy = RetryPolicy::default();
        let server = TransportError::ServerError { status: 500, message: "x".into() };
        let timeout = TransportError::NetworkTimeout(Duration::from_secs(1));

        assert_eq!(policy.delay_with_sample(2, &server, 0.5), Duration::from_secs(2));
        let jittered = policy.delay_with_sample(2, &timeout, 0.5);
        assert!(jittered > Duration::from_millis(2199) && jittered < Duration::from_millis(2201));
    }

    #[test]
    fn retry_after_is_a_floor() {
        let policy = RetryPolicy::default();
        let err = TransportError::RateLimited {
            retry_after: Some(Duration::from_secs(7)),
        };
        assert_eq!(policy.delay_for(1, &err), Duration::from_secs(7));
        // computed delay wins once it is larger
        assert_eq!(policy.delay_for(5, &err), Duration::from_secs(16));
    }

    #[test]
    fn budget_counts_failed_attempts() {
        let policy = RetryPolicy {
            max_attempts: 3,
            ..RetryPolicy::default()
        };
        assert!(!policy.is_exhausted(2));
        assert!(policy.is_exhausted(3));
    }
}
