use std::future::Future;
use std::time::Duration;

use tracing::warn;

use super::clock::Clock;
use super::collaborators::CollaboratorError;

/// Bounded exponential backoff for collaborator calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay slept before `attempt` (1-based). The first attempt never waits; after that
    /// the delay doubles from `initial_delay`: 1s, 2s, 4s, ... capped at `max_delay`.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(attempt - 2).unwrap_or(u32::MAX);
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Runs `operation` until it succeeds, fails with a non-transient error, or the policy's
/// attempts are used up. The last error is returned on exhaustion.
pub(crate) async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    clock: &dyn Clock,
    operation_name: &str,
    mut operation: F,
) -> Result<T, CollaboratorError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CollaboratorError>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let delay = policy.delay_before(attempt);
        if !delay.is_zero() {
            clock.sleep(delay).await;
        }

        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < attempts => {
                warn!(
                    operation = operation_name,
                    attempt,
                    max_attempts = attempts,
                    error = %err,
                    "collaborator call failed, retrying"
                );
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::applications::clock::ManualClock;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn clock() -> ManualClock {
        ManualClock::new(Utc.with_ymd_and_hms(2025, 3, 3, 9, 0, 0).unwrap())
    }

    #[test]
    fn delays_double_and_cap() {
        let policy = RetryPolicy {
            max_attempts: 6,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
        };

        let delays: Vec<u64> = (1..=6)
            .map(|attempt| policy.delay_before(attempt).as_secs())
            .collect();
        assert_eq!(delays, vec![0, 1, 2, 4, 5, 5]);
    }

    #[tokio::test]
    async fn transient_errors_are_retried_until_success() {
        let clock = clock();
        let calls = AtomicU32::new(0);
        let calls = &calls;

        let result = with_retry(&RetryPolicy::default(), &clock, "discovery", move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(CollaboratorError::Transient("timeout".to_string()))
            } else {
                Ok("ok")
            }
        })
        .await;

        assert_eq!(result, Ok("ok"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_secs(1), Duration::from_secs(2)]
        );
    }

    #[tokio::test]
    async fn exhaustion_returns_last_error() {
        let clock = clock();
        let calls = AtomicU32::new(0);
        let calls = &calls;

        let policy = RetryPolicy::default();
        let result: Result<(), _> = with_retry(&policy, &clock, "submit", move || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            Err(CollaboratorError::Transient(format!("attempt {n}")))
        })
        .await;

        assert_eq!(result, Err(CollaboratorError::Transient("attempt 2".to_string())));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let clock = clock();
        let calls = AtomicU32::new(0);
        let calls = &calls;

        let policy = RetryPolicy::default();
        let result: Result<(), _> = with_retry(&policy, &clock, "materials", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CollaboratorError::Fatal("bad template".to_string()))
        })
        .await;

        assert!(matches!(result, Err(CollaboratorError::Fatal(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(clock.sleeps().is_empty());
    }
}
