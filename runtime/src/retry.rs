//! Retry logic with jittered exponential backoff for storage races.
//!
//! Optimistic transactions fail when a concurrent writer touches the same data.
//! The fix is to start over from a fresh read; this module runs that loop with a
//! bounded attempt budget and, optionally, a deadline.
//!
//! The deadline is only checked between attempts. An attempt that has started
//! always runs to completion, since a commit already sent to the store may have
//! been applied.
//!
//! # Example
//!
//! ```rust
//! use matchbook_runtime::retry::{RetryPolicy, retry_with_predicate};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let policy = RetryPolicy::builder()
//!     .max_attempts(5)
//!     .initial_delay(Duration::from_millis(10))
//!     .max_delay(Duration::from_millis(500))
//!     .build();
//!
//! let value = retry_with_predicate(
//!     &policy,
//!     "example",
//!     || async { Ok::<_, String>(42) },
//!     |err: &String| err.contains("conflict"),
//! )
//! .await?;
//! assert_eq!(value, 42);
//! # Ok(())
//! # }
//! ```

use rand::Rng;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{Instant, sleep};

/// Retry policy configuration for jittered exponential backoff.
///
/// # Default Values
///
/// - `max_attempts`: 5 (including the first attempt)
/// - `initial_delay`: 10ms
/// - `max_delay`: 500ms
/// - `multiplier`: 2.0 (delay doubles each retry)
/// - `jitter`: enabled (delay scaled by a random factor in `[0.5, 1.0]`)
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries (cap for exponential backoff)
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
    /// Spread retries of racing callers apart
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(500),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Create a new policy builder.
    #[must_use]
    pub const fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            max_attempts: None,
            initial_delay: None,
            max_delay: None,
            multiplier: None,
            jitter: None,
        }
    }

    /// Un-jittered delay before retry number `attempt` (0-indexed).
    ///
    /// `initial_delay * multiplier^attempt`, capped at `max_delay`.
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        #[allow(clippy::cast_possible_wrap)] // attempt counts stay tiny
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = secs.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }

    /// Delay before retry number `attempt`, with jitter applied when enabled.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if !self.jitter {
            return base;
        }
        let factor = rand::thread_rng().gen_range(0.5..=1.0);
        base.mul_f64(factor)
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    max_attempts: Option<u32>,
    initial_delay: Option<Duration>,
    max_delay: Option<Duration>,
    multiplier: Option<f64>,
    jitter: Option<bool>,
}

impl RetryPolicyBuilder {
    /// Set maximum number of attempts (values below 1 are treated as 1).
    #[must_use]
    pub const fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Set initial delay before first retry.
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = Some(delay);
        self
    }

    /// Set maximum delay (cap for exponential backoff).
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(delay);
        self
    }

    /// Set multiplier for exponential backoff.
    #[must_use]
    pub const fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = Some(multiplier);
        self
    }

    /// Enable or disable jitter.
    #[must_use]
    pub const fn jitter(mut self, jitter: bool) -> Self {
        self.jitter = Some(jitter);
        self
    }

    /// Build the [`RetryPolicy`].
    #[must_use]
    pub fn build(self) -> RetryPolicy {
        let defaults = RetryPolicy::default();
        RetryPolicy {
            max_attempts: self.max_attempts.unwrap_or(defaults.max_attempts).max(1),
            initial_delay: self.initial_delay.unwrap_or(defaults.initial_delay),
            max_delay: self.max_delay.unwrap_or(defaults.max_delay),
            multiplier: self.multiplier.unwrap_or(defaults.multiplier),
            jitter: self.jitter.unwrap_or(defaults.jitter),
        }
    }
}

/// Why a retried operation gave up.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RetryError<E> {
    /// The operation failed with an error the predicate refused to retry.
    #[error("{0}")]
    Permanent(E),

    /// Every attempt failed with a retryable error.
    #[error("gave up after {attempts} attempt(s): {last_error}")]
    Exhausted {
        /// Attempts made
        attempts: u32,
        /// Error of the final attempt
        last_error: E,
    },

    /// The deadline passed before another attempt could start.
    #[error("deadline exceeded after {attempts} attempt(s): {last_error}")]
    DeadlineExceeded {
        /// Attempts made
        attempts: u32,
        /// Error of the final attempt
        last_error: E,
    },
}

/// Retry an async operation while `is_retryable` accepts its error.
///
/// `operation` is invoked up to `policy.max_attempts` times. Non-retryable errors
/// return immediately as [`RetryError::Permanent`]; running out of attempts
/// returns [`RetryError::Exhausted`] carrying the last error.
///
/// # Errors
///
/// See above.
pub async fn retry_with_predicate<F, Fut, T, E, P>(
    policy: &RetryPolicy,
    operation_name: &'static str,
    operation: F,
    is_retryable: P,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    retry_loop(policy, None, operation_name, operation, is_retryable).await
}

/// Like [`retry_with_predicate`], but no new attempt starts after `deadline`.
///
/// Backoff sleeps are cut short at the deadline. A running attempt is never
/// interrupted, so the call can finish after `deadline` by at most the length
/// of one attempt.
///
/// # Errors
///
/// As [`retry_with_predicate`], plus [`RetryError::DeadlineExceeded`] when a
/// retryable failure leaves no time for another attempt.
pub async fn retry_until<F, Fut, T, E, P>(
    policy: &RetryPolicy,
    deadline: Instant,
    operation_name: &'static str,
    operation: F,
    is_retryable: P,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    retry_loop(policy, Some(deadline), operation_name, operation, is_retryable).await
}

fn past_deadline<E: std::fmt::Display>(
    operation_name: &'static str,
    attempts: u32,
    last_error: E,
) -> RetryError<E> {
    tracing::error!(
        operation = operation_name,
        attempts,
        error = %last_error,
        "Deadline reached, not retrying"
    );
    RetryError::DeadlineExceeded {
        attempts,
        last_error,
    }
}

async fn retry_loop<F, Fut, T, E, P>(
    policy: &RetryPolicy,
    deadline: Option<Instant>,
    operation_name: &'static str,
    mut operation: F,
    is_retryable: P,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt: u32 = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::debug!(operation = operation_name, attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(err) => {
                if !is_retryable(&err) {
                    return Err(RetryError::Permanent(err));
                }

                attempt += 1;
                if attempt >= policy.max_attempts {
                    tracing::error!(
                        operation = operation_name,
                        attempts = attempt,
                        error = %err,
                        "Operation failed after max attempts"
                    );
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last_error: err,
                    });
                }

                let mut delay = policy.delay_for_attempt(attempt - 1);
                if let Some(deadline) = deadline {
                    let left = deadline.saturating_duration_since(Instant::now());
                    if left.is_zero() {
                        return Err(past_deadline(operation_name, attempt, err));
                    }
                    delay = delay.min(left);
                }
                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "Storage conflict, retrying"
                );
                crate::metrics::TransactionMetrics::record_retry(operation_name);
                sleep(delay).await;
                if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                    return Err(past_deadline(operation_name, attempt, err));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::builder()
            .max_attempts(max_attempts)
            .initial_delay(Duration::from_millis(1))
            .jitter(false)
            .build()
    }

    #[test]
    fn test_default_backoff_doubles_from_ten_millis() {
        let policy = RetryPolicy {
            jitter: false,
            ..RetryPolicy::default()
        };

        let delays: Vec<_> = (0..4).map(|a| policy.delay_for_attempt(a)).collect();
        assert_eq!(
            delays,
            [10, 20, 40, 80].map(Duration::from_millis).to_vec()
        );
    }

    #[test]
    fn test_backoff_is_capped_at_max_delay() {
        let policy = RetryPolicy {
            jitter: false,
            ..RetryPolicy::default()
        };

        assert_eq!(policy.delay_for_attempt(6), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(30), Duration::from_millis(500));
    }

    #[test]
    fn test_zero_attempts_is_clamped_to_one() {
        assert_eq!(RetryPolicy::builder().max_attempts(0).build().max_attempts, 1);
    }

    proptest! {
        #[test]
        fn jittered_delay_stays_within_half_and_full_base(attempt in 0u32..12) {
            let policy = RetryPolicy::default();
            let base = policy.base_delay(attempt);
            let delay = policy.delay_for_attempt(attempt);
            prop_assert!(delay <= base);
            prop_assert!(delay >= base.mul_f64(0.5).saturating_sub(Duration::from_nanos(1)));
        }
    }

    #[tokio::test]
    async fn test_retry_succeeds_on_first_try() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);

        let result = retry_with_predicate(
            &fast_policy(3),
            "test",
            || {
                let c = Arc::clone(&c);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>(42)
                }
            },
            |_| true,
        )
        .await;

        assert_eq!(result, Ok(42));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_conflicts() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);

        let result = retry_with_predicate(
            &fast_policy(5),
            "test",
            || {
                let c = Arc::clone(&c);
                async move {
                    let attempt = c.fetch_add(1, Ordering::SeqCst);
                    if attempt < 2 {
                        Err(format!("conflict on attempt {attempt}"))
                    } else {
                        Ok(7)
                    }
                }
            },
            |err: &String| err.starts_with("conflict"),
        )
        .await;

        assert_eq!(result, Ok(7));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_exhausts_attempts() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);

        let result = retry_with_predicate(
            &fast_policy(3),
            "test",
            || {
                let c = Arc::clone(&c);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err::<i32, _>("conflict".to_string())
                }
            },
            |_| true,
        )
        .await;

        assert_eq!(
            result,
            Err(RetryError::Exhausted {
                attempts: 3,
                last_error: "conflict".to_string(),
            })
        );
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_error_returns_immediately() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);

        let result = retry_with_predicate(
            &fast_policy(5),
            "test",
            || {
                let c = Arc::clone(&c);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err::<i32, _>("capacity exceeded")
                }
            },
            |err: &&str| err.contains("conflict"),
        )
        .await;

        assert_eq!(result, Err(RetryError::Permanent("capacity exceeded")));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_deadline_stops_new_attempts() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        let policy = RetryPolicy::builder()
            .max_attempts(1000)
            .initial_delay(Duration::from_millis(5))
            .max_delay(Duration::from_millis(5))
            .jitter(false)
            .build();

        let result = retry_until(
            &policy,
            Instant::now() + Duration::from_millis(30),
            "test",
            || {
                let c = Arc::clone(&c);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err::<i32, _>("conflict")
                }
            },
            |err: &&str| err.contains("conflict"),
        )
        .await;

        let Err(RetryError::DeadlineExceeded { attempts, last_error }) = result else {
            unreachable!("expected DeadlineExceeded");
        };
        assert_eq!(last_error, "conflict");
        assert!(attempts < 1000);
        assert_eq!(counter.load(Ordering::SeqCst), attempts as usize);
    }

    #[tokio::test]
    async fn test_running_attempt_outlives_deadline() {
        let result = retry_until(
            &fast_policy(5),
            Instant::now() + Duration::from_millis(10),
            "test",
            || async {
                sleep(Duration::from_millis(50)).await;
                Ok::<_, String>(7)
            },
            |_| true,
        )
        .await;

        assert_eq!(result, Ok(7));
    }
}
