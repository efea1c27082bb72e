//! Bounded retry for transient SQLite contention.

use std::thread;
use std::time::Duration;

use tracing::debug;

use crate::error::DatabaseError;

/// Exponential backoff settings for [`with_retry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (1-based), doubling each time.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Run `op`, retrying while it fails with a transient error.
///
/// Non-transient errors and the last transient error are returned as is.
pub fn with_retry<T, F>(policy: &RetryPolicy, mut op: F) -> Result<T, DatabaseError>
where
    F: FnMut() -> Result<T, DatabaseError>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < attempts => {
                let delay = policy.delay_for(attempt);
                debug!(attempt, ?delay, error = %err, "transient storage error, retrying");
                thread::sleep(delay);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_delay, Duration::from_millis(50));
        assert_eq!(policy.max_delay, Duration::from_secs(1));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_millis(50));
        assert_eq!(policy.delay_for(2), Duration::from_millis(100));
        assert_eq!(policy.delay_for(3), Duration::from_millis(200));
        assert_eq!(policy.delay_for(10), Duration::from_secs(1));
    }

    #[test]
    fn test_retries_transient_then_succeeds() {
        let calls = Cell::new(0);
        let result = with_retry(&fast_policy(3), || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(DatabaseError::Locked)
            } else {
                Ok(42)
            }
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_gives_up_after_max_attempts() {
        let calls = Cell::new(0);
        let result: Result<(), _> = with_retry(&fast_policy(3), || {
            calls.set(calls.get() + 1);
            Err(DatabaseError::Busy)
        });
        assert!(matches!(result, Err(DatabaseError::Busy)));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_non_transient_error_is_not_retried() {
        let calls = Cell::new(0);
        let result: Result<(), _> = with_retry(&fast_policy(5), || {
            calls.set(calls.get() + 1);
            Err(DatabaseError::QueryFailed("syntax error".into()))
        });
        assert!(matches!(result, Err(DatabaseError::QueryFailed(_))));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_none_policy_runs_once() {
        let calls = Cell::new(0);
        let _: Result<(), _> = with_retry(&RetryPolicy::none(), || {
            calls.set(calls.get() + 1);
            Err(DatabaseError::Locked)
        });
        assert_eq!(calls.get(), 1);
    }
}
