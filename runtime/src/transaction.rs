//! Bounded re-execution of optimistic transactions.
//!
//! Every mutating operation runs its whole read-modify-write body through
//! [`TransactionRunner::run`]: storage races re-run the body from scratch with
//! jittered backoff, and the attempt budget plus an overall deadline turn a
//! persistent race into `TransientFailure`. A single slow store call is bounded
//! by the store's own timeouts, not here.

use crate::config::EngineConfig;
use crate::retry::{RetryError, RetryPolicy, retry_until};
use matchbook_core::{ReservationError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Retry budget and deadline shared by the engine services.
#[derive(Debug, Clone)]
pub struct TransactionRunner {
    policy: RetryPolicy,
    deadline: Duration,
}

impl TransactionRunner {
    /// Create a runner with an explicit policy and deadline.
    #[must_use]
    pub const fn new(policy: RetryPolicy, deadline: Duration) -> Self {
        Self { policy, deadline }
    }

    /// Runner configured from [`EngineConfig`].
    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.retry_policy(), config.operation_deadline())
    }

    /// The retry policy in use.
    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `body` until it succeeds, fails with a non-retryable error, runs out
    /// of attempts or overruns the deadline.
    ///
    /// The deadline is checked before each new attempt, never during one: an
    /// attempt whose commit has reached the store reports what the store did.
    ///
    /// # Errors
    ///
    /// Non-retryable errors of `body` verbatim; `TransientFailure` when the
    /// budget or the deadline is exhausted.
    pub async fn run<T, F, Fut>(&self, operation: &'static str, body: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let deadline = Instant::now() + self.deadline;
        match retry_until(
            &self.policy,
            deadline,
            operation,
            body,
            ReservationError::is_retryable,
        )
        .await
        {
            Ok(value) => Ok(value),
            Err(RetryError::Permanent(err)) => Err(err),
            Err(RetryError::Exhausted {
                attempts,
                last_error,
            }) => Err(ReservationError::TransientFailure {
                attempts,
                reason: last_error.to_string(),
            }),
            Err(RetryError::DeadlineExceeded {
                attempts,
                last_error,
            }) => {
                tracing::error!(
                    operation,
                    attempts,
                    deadline_ms = u64::try_from(self.deadline.as_millis()).unwrap_or(u64::MAX),
                    "Operation deadline exceeded"
                );
                Err(ReservationError::TransientFailure {
                    attempts,
                    reason: format!("deadline of {:?} exceeded: {last_error}", self.deadline),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner(max_attempts: u32, deadline: Duration) -> TransactionRunner {
        TransactionRunner::new(
            RetryPolicy::builder()
                .max_attempts(max_attempts)
                .initial_delay(Duration::from_millis(1))
                .jitter(false)
                .build(),
            deadline,
        )
    }

    #[tokio::test]
    async fn exhausted_races_become_transient_failure() {
        let result: Result<()> = runner(3, Duration::from_secs(5))
            .run("test", || async {
                Err(ReservationError::TransactionConflict("range changed".into()))
            })
            .await;

        let Err(ReservationError::TransientFailure { attempts, reason }) = result else {
            unreachable!("expected TransientFailure");
        };
        assert_eq!(attempts, 3);
        assert!(reason.contains("range changed"));
    }

    #[tokio::test]
    async fn business_errors_are_surfaced_verbatim() {
        let result: Result<()> = runner(5, Duration::from_secs(5))
            .run("test", || async {
                Err(ReservationError::InvalidState("cancelled".into()))
            })
            .await;

        assert_eq!(result, Err(ReservationError::InvalidState("cancelled".into())));
    }

    #[tokio::test]
    async fn deadline_stops_retrying_a_persistent_race() {
        let result: Result<()> = runner(1000, Duration::from_millis(40))
            .run("test", || async {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Err(ReservationError::VersionConflict {
                    key: matchbook_core::store::DocumentKey::new("matches", "m-1"),
                    expected: matchbook_core::store::Version::new(1),
                    actual: matchbook_core::store::Version::new(2),
                })
            })
            .await;

        let Err(ReservationError::TransientFailure { attempts, reason }) = result else {
            unreachable!("expected TransientFailure");
        };
        assert!(attempts < 1000);
        assert!(reason.contains("deadline"));
    }

    #[tokio::test]
    async fn slow_attempt_finishes_past_the_deadline() {
        let result = runner(5, Duration::from_millis(20))
            .run("test", || async {
                tokio::time::sleep(Duration::from_millis(80)).await;
                Ok(7)
            })
            .await;

        assert_eq!(result, Ok(7));
    }
}
