//! Retry policy for snapshot fetches.
//!
//! Pure functions only: the fetch loop asks the policy whether to try again
//! and with what timeout, so the termination bound and the backoff formula
//! are testable without timers.
//!
//! ```text
//! attempt 1: base_timeout
//! timeout  → next attempt gets +timeout_increment
//! transport → same timeout, retried within the budget
//! data     → fails immediately unless retry_data_failures
//! total attempts ≤ max_retries + 1
//! ```

use std::time::Duration;

use crate::error::{ConfigError, FailureKind};

/// Largest accepted retry budget
pub const MAX_RETRY_BUDGET: u32 = 5;

/// Added to the timeout after each timed-out attempt
pub const DEFAULT_TIMEOUT_INCREMENT: Duration = Duration::from_secs(5);

/// Pause between attempts so a struggling server is not hammered
pub const DEFAULT_RETRY_PAUSE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Timeout of the first attempt
    pub base_timeout: Duration,

    /// Retries after the first attempt
    pub max_retries: u32,

    pub timeout_increment: Duration,

    pub retry_pause: Duration,

    /// Retry payloads that fail validation (off by default: the same request
    /// rarely returns a different shape a second later)
    pub retry_data_failures: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_timeout: Duration::from_secs(10),
            max_retries: 3,
            timeout_increment: DEFAULT_TIMEOUT_INCREMENT,
            retry_pause: DEFAULT_RETRY_PAUSE,
            retry_data_failures: false,
        }
    }
}

impl RetryPolicy {
    /// Create a validated policy with default increment and pause.
    pub fn new(base_timeout: Duration, max_retries: u32) -> Result<Self, ConfigError> {
        let policy = Self {
            base_timeout,
            max_retries,
            ..Default::default()
        };
        policy.validate()?;
        Ok(policy)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_retries > MAX_RETRY_BUDGET {
            return Err(ConfigError::RetryBudget {
                requested: self.max_retries,
                max: MAX_RETRY_BUDGET,
            });
        }
        if self.base_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }

    /// Builder: set the timeout escalation step
    pub fn timeout_increment(mut self, increment: Duration) -> Self {
        self.timeout_increment = increment;
        self
    }

    /// Builder: set the pause between attempts
    pub fn retry_pause(mut self, pause: Duration) -> Self {
        self.retry_pause = pause;
        self
    }

    /// Builder: retry data failures within the same budget
    pub fn retry_data_failures(mut self, enabled: bool) -> Self {
        self.retry_data_failures = enabled;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Whether another attempt follows a failure of `kind` on attempt
    /// number `attempt` (1-based).
    pub fn should_retry(&self, kind: FailureKind, attempt: u32) -> bool {
        if attempt >= self.max_attempts() {
            return false;
        }
        match kind {
            FailureKind::Timeout | FailureKind::Transport => true,
            FailureKind::Data => self.retry_data_failures,
        }
    }

    /// Timeout for the attempt after one that failed with `kind`.
    pub fn next_timeout(&self, current: Duration, kind: FailureKind) -> Duration {
        match kind {
            FailureKind::Timeout => current.saturating_add(self.timeout_increment),
            FailureKind::Data | FailureKind::Transport => current,
        }
    }

    /// Timeout after `timeouts` consecutive timed-out attempts.
    pub fn timeout_after(&self, timeouts: u32) -> Duration {
        self.base_timeout
            .saturating_add(self.timeout_increment.saturating_mul(timeouts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_large_budget() {
        let err = RetryPolicy::new(Duration::from_secs(1), 6).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::RetryBudget {
                requested: 6,
                max: 5
            }
        ));
        assert!(RetryPolicy::new(Duration::from_secs(1), 5).is_ok());
    }

    #[test]
    fn test_rejects_zero_timeout() {
        assert!(matches!(
            RetryPolicy::new(Duration::ZERO, 1),
            Err(ConfigError::ZeroTimeout)
        ));
    }

    #[test]
    fn test_attempt_bound() {
        let policy = RetryPolicy::new(Duration::from_secs(1), 2).unwrap();
        assert_eq!(policy.max_attempts(), 3);
        assert!(policy.should_retry(FailureKind::Timeout, 1));
        assert!(policy.should_retry(FailureKind::Transport, 2));
        assert!(!policy.should_retry(FailureKind::Timeout, 3));

        let none = RetryPolicy::new(Duration::from_secs(1), 0).unwrap();
        assert!(!none.should_retry(FailureKind::Timeout, 1));
    }

    #[test]
    fn test_data_failures_follow_flag() {
        let policy = RetryPolicy::new(Duration::from_secs(1), 3).unwrap();
        assert!(!policy.should_retry(FailureKind::Data, 1));
        let policy = policy.retry_data_failures(true);
        assert!(policy.should_retry(FailureKind::Data, 1));
    }

    #[test]
    fn test_timeout_escalates_only_on_timeouts() {
        let policy = RetryPolicy::new(Duration::from_secs(10), 3).unwrap();
        let t = policy.next_timeout(policy.base_timeout, FailureKind::Timeout);
        assert_eq!(t, Duration::from_secs(15));
        assert_eq!(policy.next_timeout(t, FailureKind::Transport), t);
        assert_eq!(policy.next_timeout(t, FailureKind::Data), t);
        assert_eq!(policy.timeout_after(3), Duration::from_secs(25));
    }

    #[test]
    fn test_builder_pattern() {
        let policy = RetryPolicy::default()
            .timeout_increment(Duration::from_millis(250))
            .retry_pause(Duration::ZERO);
        assert_eq!(policy.timeout_after(2), Duration::from_millis(10_500));
        assert_eq!(policy.retry_pause, Duration::ZERO);
    }
}
