//! Shared retry/backoff policy (§9 Design Notes — "retry plan as a single
//! shared value" supplement): one `RetryPlan` threaded through HTTP
//! Transport, state scripts and wait states instead of each caller inventing
//! its own timing.

use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct RetryPlan {
    pub poll_interval: Duration,
    pub retry_interval: Duration,
    pub retry_timeout: Duration,
    pub max_attempts: u32,
}

impl RetryPlan {
    pub fn new(
        poll_interval: Duration,
        retry_interval: Duration,
        retry_timeout: Duration,
        max_attempts: u32,
    ) -> Self {
        RetryPlan {
            poll_interval,
            retry_interval,
            retry_timeout,
            max_attempts,
        }
    }

    /// Exponential backoff with a fixed base, capped at `retry_timeout` and
    /// `max_attempts` (§5: "transient failures back off exponentially from
    /// `retry_interval`, never exceeding `retry_timeout` between attempts").
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        let scaled = self.retry_interval.saturating_mul(factor);
        scaled.min(self.retry_timeout)
    }

    pub fn attempts_exhausted(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }
}

impl Default for RetryPlan {
    fn default() -> Self {
        RetryPlan {
            poll_interval: Duration::from_secs(1800),
            retry_interval: Duration::from_secs(60),
            retry_timeout: Duration::from_secs(3600),
            max_attempts: 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_then_caps() {
        let plan = RetryPlan::new(
            Duration::from_secs(10),
            Duration::from_secs(1),
            Duration::from_secs(5),
            10,
        );
        assert_eq!(plan.backoff_for_attempt(0), Duration::from_secs(1));
        assert_eq!(plan.backoff_for_attempt(1), Duration::from_secs(2));
        assert_eq!(plan.backoff_for_attempt(2), Duration::from_secs(4));
        assert_eq!(plan.backoff_for_attempt(3), Duration::from_secs(5));
        assert_eq!(plan.backoff_for_attempt(10), Duration::from_secs(5));
    }

    #[test]
    fn attempts_exhausted_at_max() {
        let plan = RetryPlan::new(
            Duration::from_secs(1),
            Duration::from_secs(1),
            Duration::from_secs(60),
            3,
        );
        assert!(!plan.attempts_exhausted(2));
        assert!(plan.attempts_exhausted(3));
    }
}
