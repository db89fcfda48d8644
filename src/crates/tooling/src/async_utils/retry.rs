//! Retry utilities for async operations
//!
//! Provides configurable retry policies with exponential backoff and jitter
//! for handling transient failures in async operations.

use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Configuration for retrying failed operations
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first)
    pub max_attempts: u32,

    /// Initial interval between retries in seconds
    pub initial_interval: f64,

    /// Multiplier for the interval after each retry
    pub backoff_factor: f64,

    /// Maximum interval between retries in seconds
    pub max_interval: f64,

    /// Whether to add random jitter to intervals
    pub jitter: bool,
}

impl RetryPolicy {
    /// Create a new retry policy with the given max attempts.
    ///
    /// The default backoff doubles a 1 s initial interval after each failed
    /// attempt, capped at 60 s.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_interval: 1.0,
            backoff_factor: 2.0,
            max_interval: 60.0,
            jitter: false,
        }
    }

    /// Set the initial interval between retries
    pub fn with_initial_interval(mut self, seconds: f64) -> Self {
        self.initial_interval = seconds;
        self
    }

    /// Set the backoff factor
    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    /// Set the maximum interval between retries
    pub fn with_max_interval(mut self, seconds: f64) -> Self {
        self.max_interval = seconds;
        self
    }

    /// Enable or disable jitter
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay to wait after failing attempt `attempt` (1-indexed).
    ///
    /// Uses exponential backoff: `initial_interval * backoff_factor ^ attempt`
    /// capped at `max_interval`, with up to 25% jitter when enabled.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let base = self.initial_interval * self.backoff_factor.powi(attempt as i32);
        let capped = base.min(self.max_interval);

        let final_delay = if self.jitter {
            let mut rng = rand::thread_rng();
            capped * (1.0 + rng.gen_range(0.0..0.25))
        } else {
            capped
        };

        Duration::from_secs_f64(final_delay)
    }

    /// Whether another attempt is allowed after `attempt` attempts were made
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Execute an async operation with retry logic.
///
/// The operation is attempted up to `policy.max_attempts` times; on
/// exhaustion the last error is returned.
pub async fn with_retry<F, Fut, T, E>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> std::result::Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: std::fmt::Display,
{
    let mut last_error = None;

    // A max_attempts of 0 still performs a single attempt.
    for attempt in 1..=policy.max_attempts.max(1) {
        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::info!(
                        operation = operation_name,
                        attempt = attempt,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(error) => {
                if policy.should_retry(attempt) {
                    let delay = policy.delay_after(attempt);
                    tracing::warn!(
                        operation = operation_name,
                        attempt = attempt,
                        max_attempts = policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Operation failed, retrying after delay"
                    );
                    last_error = Some(error);
                    tokio::time::sleep(delay).await;
                } else {
                    tracing::error!(
                        operation = operation_name,
                        attempts = attempt,
                        error = %error,
                        "Operation failed after all retry attempts"
                    );
                    last_error = Some(error);
                }
            }
        }
    }

    Err(last_error.expect("at least one attempt was made"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts)
            .with_initial_interval(0.001)
            .with_max_interval(0.01)
            .with_jitter(false)
    }

    #[test]
    fn test_delay_after_exponential() {
        let policy = RetryPolicy::new(4).with_jitter(false);

        assert_eq!(policy.delay_after(1).as_secs_f64(), 2.0);
        assert_eq!(policy.delay_after(2).as_secs_f64(), 4.0);
        assert_eq!(policy.delay_after(3).as_secs_f64(), 8.0);
    }

    #[test]
    fn test_delay_after_capped() {
        let policy = RetryPolicy::new(10).with_max_interval(5.0).with_jitter(false);
        assert_eq!(policy.delay_after(8).as_secs_f64(), 5.0);
    }

    #[test]
    fn test_delay_after_jitter_bounds() {
        let policy = RetryPolicy::new(3).with_jitter(true);
        let delay = policy.delay_after(1).as_secs_f64();
        assert!(delay >= 2.0);
        assert!(delay <= 2.5);
    }

    #[tokio::test]
    async fn test_succeeds_first_attempt() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result = with_retry(&fast_policy(3), "test_op", move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(7)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_succeeds_after_failures() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result = with_retry(&fast_policy(3), "test_op", move || {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(format!("failure {}", n))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausts_attempts() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result: Result<u32, String> = with_retry(&fast_policy(2), "test_op", move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err("always fails".to_string())
            }
        })
        .await;

        assert_eq!(result.unwrap_err(), "always fails");
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}
