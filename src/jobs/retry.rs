//! Retry decision and backoff policy.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::jobs::models::JobRecord;
use crate::jobs::types::JobExecutor;

/// Default base delay for the capped exponential backoff.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default delay cap.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);

/// What to do with a failed job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Reschedule with the bumped retry count at the given time.
    Retry {
        retry_count: i32,
        scheduled_at: DateTime<Utc>,
    },
    /// Out of retries (or not retryable at all): terminal failure.
    Fail,
}

/// Decide whether a failed job is retried.
///
/// A job is retried while its executor is retryable and `retry_count` has
/// not reached `max_retries`; the delay for attempt `n` comes from the
/// executor's `retry_delay(n)`.
pub fn decide(executor: &dyn JobExecutor, job: &JobRecord, now: DateTime<Utc>) -> RetryDecision {
    if !executor.is_retryable() || job.retry_count >= job.max_retries {
        return RetryDecision::Fail;
    }

    let next_attempt = job.retry_count + 1;
    let delay = executor.retry_delay(next_attempt.max(1) as u32);
    let delay = chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::seconds(60));

    RetryDecision::Retry {
        retry_count: next_attempt,
        scheduled_at: now + delay,
    }
}

/// Capped exponential backoff: `min(base * 2^(attempt-1), cap)`.
/// Attempt numbers are 1-indexed; attempt 0 yields zero delay.
pub fn backoff(base: Duration, cap: Duration, attempt: u32) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let factor = 2u32.checked_pow(attempt - 1);
    let delay = factor
        .and_then(|f| base.checked_mul(f))
        .unwrap_or(cap);

    delay.min(cap)
}

/// Default executor backoff: 1s, 2s, 4s, ... capped at 60s.
pub fn default_backoff(attempt: u32) -> Duration {
    backoff(DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY, attempt)
}

/// Spread a period by up to `factor` (0.0-1.0) in either direction.
///
/// Used to de-synchronize periodic loops across engine instances polling
/// the same store.
pub fn jitter(period: Duration, factor: f64) -> Duration {
    if factor <= 0.0 {
        return period;
    }

    let factor = factor.min(1.0);
    let spread: f64 = rand::random_range(-factor..=factor);
    period.mul_f64((1.0 + spread).max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn default_backoff_doubles_until_cap() {
        assert_eq!(default_backoff(1), Duration::from_secs(1));
        assert_eq!(default_backoff(2), Duration::from_secs(2));
        assert_eq!(default_backoff(3), Duration::from_secs(4));
        assert_eq!(default_backoff(7), Duration::from_secs(60));
        assert_eq!(default_backoff(100), Duration::from_secs(60));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let period = Duration::from_secs(10);
        for _ in 0..100 {
            let j = jitter(period, 0.2);
            assert!(j >= Duration::from_secs(8));
            assert!(j <= Duration::from_secs(12));
        }
    }

    proptest! {
        #[test]
        fn backoff_is_monotone_and_capped(a in 1u32..64, b in 1u32..64) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            let d_lo = default_backoff(lo);
            let d_hi = default_backoff(hi);
            prop_assert!(d_lo <= d_hi);
            prop_assert!(d_hi <= DEFAULT_MAX_DELAY);
        }
    }
}
