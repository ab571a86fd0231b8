use chrono::{DateTime, TimeDelta, Utc};
use std::time::Duration;

/// Minimum-interval gate for a single upstream source.
///
/// `is_due` is a pure function of the last successful fetch and `now`; only
/// [`RateLimiter::mark_success`] moves the window, so a failed attempt leaves
/// the source immediately due again.
///
/// # Examples
///
/// ```
/// use chrono::{Duration as ChronoDuration, Utc};
/// use pulse_collector::rate_limit::RateLimiter;
/// use std::time::Duration;
///
/// let mut limiter = RateLimiter::new(Duration::from_secs(300));
/// let t0 = Utc::now();
/// assert!(limiter.is_due(t0));
/// limiter.mark_success(t0);
/// assert!(!limiter.is_due(t0 + ChronoDuration::seconds(299)));
/// assert!(limiter.is_due(t0 + ChronoDuration::seconds(300)));
/// ```
#[derive(Debug, Clone)]
pub struct RateLimiter {
    interval: TimeDelta,
    last_success: Option<DateTime<Utc>>,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: TimeDelta::from_std(interval).unwrap_or(TimeDelta::MAX),
            last_success: None,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_success {
            None => true,
            Some(last) => now.signed_duration_since(last) >= self.interval,
        }
    }

    pub fn mark_success(&mut self, now: DateTime<Utc>) {
        self.last_success = Some(now);
    }

    pub fn last_success(&self) -> Option<DateTime<Utc>> {
        self.last_success
    }

    /// Time left until the source is due, or zero when it already is.
    pub fn remaining(&self, now: DateTime<Utc>) -> TimeDelta {
        match self.last_success {
            None => TimeDelta::zero(),
            Some(last) => last
                .checked_add_signed(self.interval)
                .map(|due| (due - now).max(TimeDelta::zero()))
                .unwrap_or(TimeDelta::MAX),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_limiter_is_due() {
        let limiter = RateLimiter::new(Duration::from_secs(3600));
        assert!(limiter.is_due(Utc::now()));
        assert_eq!(limiter.remaining(Utc::now()), TimeDelta::zero());
    }

    #[test]
    fn two_calls_within_interval_only_first_is_due() {
        let mut limiter = RateLimiter::new(Duration::from_secs(60));
        let t0 = Utc::now();

        let mut produced = 0;
        for offset in [0, 30] {
            let now = t0 + TimeDelta::seconds(offset);
            if limiter.is_due(now) {
                limiter.mark_success(now);
                produced += 1;
            }
        }
        assert_eq!(produced, 1);
        assert_eq!(limiter.remaining(t0 + TimeDelta::seconds(30)), TimeDelta::seconds(30));
        assert!(limiter.is_due(t0 + TimeDelta::seconds(61)));
    }

    #[test]
    fn not_marking_keeps_source_due() {
        let limiter = RateLimiter::new(Duration::from_secs(60));
        let t0 = Utc::now();
        // a failed attempt never calls mark_success
        assert!(limiter.is_due(t0));
        assert!(limiter.is_due(t0 + TimeDelta::seconds(1)));
        assert!(limiter.last_success().is_none());
    }

    #[test]
    fn clock_moving_backwards_is_not_due() {
        let mut limiter = RateLimiter::new(Duration::from_secs(60));
        let t0 = Utc::now();
        limiter.mark_success(t0);
        assert!(!limiter.is_due(t0 - TimeDelta::seconds(5)));
    }
}
