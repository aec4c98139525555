//! Retry policy for upstream attempts.
//!
//! Only idempotent methods are retried; mutating calls get exactly one
//! attempt. Retryable conditions are connection errors, timeouts, and
//! 5xx responses. Backoff is exponential in the attempt index with
//! bounded random jitter so racing retries spread out.

use rand::Rng;
use reqwest::Method;
use std::time::Duration;

/// Retry tunables applied to every upstream endpoint.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    base_backoff: Duration,
    max_jitter: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_retries: u32, base_backoff: Duration, max_jitter: Duration) -> Self {
        Self {
            max_retries,
            base_backoff,
            max_jitter,
        }
    }

    /// Whether a method is safe to repeat without observable side
    /// effects upstream.
    #[must_use]
    pub fn is_idempotent(method: &Method) -> bool {
        *method == Method::GET || *method == Method::HEAD || *method == Method::OPTIONS
    }

    /// Total attempts allowed for `method`, including the first.
    #[must_use]
    pub fn max_attempts_for(&self, method: &Method) -> u32 {
        if Self::is_idempotent(method) {
            self.max_retries + 1
        } else {
            1
        }
    }

    /// Delay before re-attempting, for the zero-based `attempt` that just
    /// failed: `base * 2^attempt + random(0, jitter)`.
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponential = self
            .base_backoff
            .saturating_mul(2u32.saturating_pow(attempt));
        let jitter_ms = u64::try_from(self.max_jitter.as_millis()).unwrap_or(u64::MAX);
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        };
        exponential + jitter
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_idempotency_classification() {
        assert!(RetryPolicy::is_idempotent(&Method::GET));
        assert!(RetryPolicy::is_idempotent(&Method::HEAD));
        assert!(RetryPolicy::is_idempotent(&Method::OPTIONS));

        assert!(!RetryPolicy::is_idempotent(&Method::POST));
        assert!(!RetryPolicy::is_idempotent(&Method::PUT));
        // DELETE mutates session state upstream, never repeat it.
        assert!(!RetryPolicy::is_idempotent(&Method::DELETE));
    }

    #[test]
    fn test_attempt_budget() {
        let policy = RetryPolicy::new(2, Duration::from_millis(150), Duration::from_millis(100));

        assert_eq!(policy.max_attempts_for(&Method::GET), 3);
        assert_eq!(policy.max_attempts_for(&Method::POST), 1);
        assert_eq!(policy.max_attempts_for(&Method::DELETE), 1);
    }

    #[test]
    fn test_backoff_grows_exponentially_with_bounded_jitter() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100), Duration::from_millis(50));

        for attempt in 0..3 {
            let base = Duration::from_millis(100 * 2u64.pow(attempt));
            let delay = policy.backoff_delay(attempt);
            assert!(delay >= base, "attempt {attempt}: {delay:?} < {base:?}");
            assert!(
                delay <= base + Duration::from_millis(50),
                "attempt {attempt}: {delay:?} over jitter bound"
            );
        }
    }

    #[test]
    fn test_zero_jitter_is_deterministic() {
        let policy = RetryPolicy::new(1, Duration::from_millis(100), Duration::ZERO);
        assert_eq!(policy.backoff_delay(0), Duration::from_millis(100));
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(200));
    }
}
