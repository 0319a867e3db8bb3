//! Bounded exponential backoff for model-stage attempts.

use std::time::Duration;
use util::task_config::AgentOptions;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub factor: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_options(&AgentOptions::default())
    }
}

impl RetryPolicy {
    pub fn from_options(opts: &AgentOptions) -> Self {
        Self {
            max_attempts: opts.max_attempts.max(1),
            base_delay: Duration::from_millis(opts.base_delay_ms),
            factor: if opts.backoff_factor.is_finite() && opts.backoff_factor >= 1.0 {
                opts.backoff_factor
            } else {
                1.0
            },
            max_delay: Duration::from_millis(opts.max_delay_ms),
        }
    }

    /// No waiting between attempts; for tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::ZERO,
            factor: 1.0,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before retry `n` (1-based): `base * factor^(n-1)`, capped.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(32) as i32;
        let secs = self.base_delay.as_secs_f64() * self.factor.powi(exp);
        let capped = secs.min(self.max_delay.as_secs_f64());
        Duration::try_from_secs_f64(capped).unwrap_or(self.max_delay)
    }

    /// `Some(delay)` when another attempt is allowed after `attempts_made`,
    /// `None` once the budget is spent. A provider's `retry_after` raises the delay.
    pub fn next_delay(&self, attempts_made: u32, retry_after: Option<Duration>) -> Option<Duration> {
        if attempts_made >= self.max_attempts {
            return None;
        }
        let delay = self.delay_for(attempts_made);
        Some(retry_after.map_or(delay, |ra| ra.max(delay)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_policy_backoff_increases() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(2000));
    }

    #[test]
    fn retry_policy_caps_at_max_delay() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(10), Duration::from_secs(8));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(8));
    }

    #[test]
    fn retry_policy_gives_up_after_max_attempts() {
        let policy = RetryPolicy::default();
        assert!(policy.next_delay(1, None).is_some());
        assert!(policy.next_delay(2, None).is_some());
        assert!(policy.next_delay(3, None).is_none());
    }

    #[test]
    fn retry_after_raises_but_never_lowers_delay() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.next_delay(1, Some(Duration::from_secs(3))),
            Some(Duration::from_secs(3))
        );
        assert_eq!(
            policy.next_delay(2, Some(Duration::from_millis(10))),
            Some(Duration::from_millis(1000))
        );
    }

    #[test]
    fn nonsense_options_are_sanitised() {
        let policy = RetryPolicy::from_options(&AgentOptions {
            max_attempts: 0,
            backoff_factor: f64::NAN,
            ..AgentOptions::default()
        });
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.factor, 1.0);
        assert!(policy.next_delay(1, None).is_none());
    }
}
