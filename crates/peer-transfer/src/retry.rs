//! Backoff for rescheduled deliveries.
//!
//! Attempts only stretch the delay; they never stop a retry. An item keeps
//! coming back until it is delivered, terminally rejected or removed.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Longest delay any policy produces, whatever it was configured with.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Same delay after every failed attempt.
    Fixed(Duration),
    /// `base * 2^(attempts - 1)`, capped at `max`.
    Exponential { base: Duration, max: Duration },
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::Fixed(Duration::from_secs(5))
    }
}

impl RetryPolicy {
    /// Delay before the next try, given the number of attempts made so far
    /// (including the one that just failed).
    pub fn delay_for(&self, attempts: usize) -> chrono::Duration {
        let delay_ms = match *self {
            Self::Fixed(delay) => delay.min(MAX_RETRY_DELAY).as_millis() as u64,
            Self::Exponential { base, max } => {
                if attempts == 0 {
                    return chrono::Duration::zero();
                }
                let shift = u32::try_from(attempts - 1).unwrap_or(u32::MAX);
                let multiplier = 1u64.checked_shl(shift).unwrap_or(u64::MAX);
                let cap = max.min(MAX_RETRY_DELAY);
                (base.min(cap).as_millis() as u64).saturating_mul(multiplier).min(cap.as_millis() as u64)
            }
        };
        chrono::Duration::milliseconds(i64::try_from(delay_ms).unwrap_or(i64::MAX))
    }

    pub fn next_run_at(&self, now: DateTime<Utc>, attempts: usize) -> DateTime<Utc> {
        let delay = self.delay_for(attempts);
        now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_huge_delays_are_clamped() {
        let now = Utc::now();
        let max = chrono::Duration::from_std(MAX_RETRY_DELAY).unwrap();

        let fixed = RetryPolicy::Fixed(Duration::from_millis(u64::MAX));
        assert_eq!(fixed.delay_for(1), max);
        assert_eq!(fixed.next_run_at(now, 1), now + max);

        let exponential = RetryPolicy::Exponential {
            base: Duration::from_millis(u64::MAX),
            max: Duration::from_millis(u64::MAX),
        };
        assert_eq!(exponential.delay_for(usize::MAX), max);
        assert_eq!(exponential.next_run_at(now, 3), now + max);
    }

    #[test]
    fn test_next_run_at_never_overflows() {
        let policy = RetryPolicy::Fixed(MAX_RETRY_DELAY);
        assert_eq!(policy.next_run_at(DateTime::<Utc>::MAX_UTC, 1), DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn test_fixed_delay_ignores_attempts() {
        let policy = RetryPolicy::Fixed(Duration::from_millis(5000));
        assert_eq!(policy.delay_for(1), chrono::Duration::milliseconds(5000));
        assert_eq!(policy.delay_for(40), chrono::Duration::milliseconds(5000));
    }

    #[test]
    fn test_exponential_grows_and_caps() {
        let policy = RetryPolicy::Exponential {
            base: Duration::from_secs(2),
            max: Duration::from_secs(10),
        };
        assert_eq!(policy.delay_for(0), chrono::Duration::zero());
        assert_eq!(policy.delay_for(1), chrono::Duration::seconds(2));
        assert_eq!(policy.delay_for(2), chrono::Duration::seconds(4));
        assert_eq!(policy.delay_for(3), chrono::Duration::seconds(8));
        assert_eq!(policy.delay_for(4), chrono::Duration::seconds(10));
        assert_eq!(policy.delay_for(usize::MAX), chrono::Duration::seconds(10));
    }

    #[test]
    fn test_next_run_at_adds_delay() {
        let now = Utc::now();
        let policy = RetryPolicy::default();
        assert_eq!(policy.next_run_at(now, 1), now + chrono::Duration::seconds(5));
    }
}
