//! Retry with exponential backoff.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{RetryReason, WeaveError};

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt. `0` disables retrying.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Multiplier applied to the delay after each retry.
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(2000),
            backoff_factor: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Execute an async operation with retry.
    ///
    /// Aborts are returned untouched and never retried. A non-retryable error on
    /// the first attempt is returned as-is; otherwise failures are wrapped in
    /// [`WeaveError::RetryExhausted`] carrying every error seen.
    pub async fn execute<F, Fut, T>(
        &self,
        abort: &CancellationToken,
        mut operation: F,
    ) -> Result<T, WeaveError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, WeaveError>>,
    {
        let mut delay = self.initial_delay;
        let mut errors: Vec<WeaveError> = Vec::new();

        loop {
            if abort.is_cancelled() {
                return Err(WeaveError::Aborted);
            }

            let error = match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if error.is_abort() || self.max_retries == 0 {
                return Err(error);
            }

            let retryable = error.is_retryable();
            if !retryable && errors.is_empty() {
                return Err(error);
            }

            let message = error.to_string();
            errors.push(error);
            let attempts = errors.len();

            if attempts > self.max_retries as usize {
                return Err(WeaveError::RetryExhausted {
                    reason: RetryReason::MaxRetriesExceeded,
                    message: format!("Failed after {attempts} attempts. Last error: {message}"),
                    errors,
                });
            }

            if !retryable {
                return Err(WeaveError::RetryExhausted {
                    reason: RetryReason::ErrorNotRetryable,
                    message: format!(
                        "Failed after {attempts} attempts with non-retryable error: '{message}'"
                    ),
                    errors,
                });
            }

            tracing::warn!(
                attempt = attempts,
                max_retries = self.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %message,
                "Retrying after error"
            );

            tokio::select! {
                biased;
                _ = abort.cancelled() => return Err(WeaveError::Aborted),
                _ = tokio::time::sleep(delay) => {}
            }

            delay = delay.mul_f64(self.backoff_factor);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn zero_retries_returns_retryable_error_unwrapped() {
        let policy = RetryPolicy::with_max_retries(0);

        let result: Result<(), _> = policy
            .execute(&CancellationToken::new(), || async {
                Err(WeaveError::api(503, "unavailable"))
            })
            .await;

        assert!(matches!(result, Err(WeaveError::Api { status: 503, .. })));
    }

    #[tokio::test]
    async fn cancelled_token_skips_operation() {
        let policy = RetryPolicy::default();
        let abort = CancellationToken::new();
        abort.cancel();

        let mut calls = 0;

        let result = policy
            .execute(&abort, || {
                calls += 1;
                async { Ok::<_, WeaveError>(()) }
            })
            .await;

        assert!(matches!(result, Err(WeaveError::Aborted)));
        assert_eq!(calls, 0);
    }
}
