//! Tests for utility modules (retry, deferred values, timeout).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use stepweave::error::{RetryReason, WeaveError};
use stepweave::util::deferred::deferred;
use stepweave::util::retry::RetryPolicy;
use stepweave::util::timeout::with_timeout;

fn policy(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        initial_delay: Duration::from_millis(100),
        backoff_factor: 2.0,
    }
}

#[tokio::test(start_paused = true)]
async fn retry_policy_retries_retryable_errors_until_success() {
    let attempts = AtomicUsize::new(0);
    let started = tokio::time::Instant::now();

    let result = policy(3)
        .execute(&CancellationToken::new(), || {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 2 {
                    Err(WeaveError::api(503, "unavailable"))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

    assert_eq!(result.unwrap(), 2);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    // 100ms then 200ms of backoff.
    assert!(started.elapsed() >= Duration::from_millis(300));
}

#[tokio::test]
async fn retry_policy_stops_immediately_for_non_retryable_errors() {
    let attempts = AtomicUsize::new(0);

    let result: Result<(), _> = policy(3)
        .execute(&CancellationToken::new(), || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(WeaveError::api(400, "bad request")) }
        })
        .await;

    assert!(matches!(result, Err(WeaveError::Api { status: 400, .. })));
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn retry_policy_reports_every_error_when_exhausted() {
    let attempts = AtomicUsize::new(0);

    let result: Result<(), _> = policy(2)
        .execute(&CancellationToken::new(), || {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            async move { Err(WeaveError::api(500, format!("boom {attempt}"))) }
        })
        .await;

    match result {
        Err(WeaveError::RetryExhausted {
            reason,
            message,
            errors,
        }) => {
            assert_eq!(reason, RetryReason::MaxRetriesExceeded);
            assert_eq!(errors.len(), 3);
            assert_eq!(
                message,
                "Failed after 3 attempts. Last error: API error (status 500): boom 2"
            );
        }
        other => panic!("expected exhausted retries, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn non_retryable_error_after_retries_is_wrapped() {
    let attempts = AtomicUsize::new(0);

    let result: Result<(), _> = policy(3)
        .execute(&CancellationToken::new(), || {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 0 {
                    Err(WeaveError::api(429, "slow down"))
                } else {
                    Err(WeaveError::api(400, "bad request"))
                }
            }
        })
        .await;

    match result {
        Err(WeaveError::RetryExhausted { reason, errors, .. }) => {
            assert_eq!(reason, RetryReason::ErrorNotRetryable);
            assert_eq!(errors.len(), 2);
        }
        other => panic!("expected wrapped error, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn abort_during_backoff_returns_aborted() {
    let abort = CancellationToken::new();
    let trigger = abort.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let result: Result<(), _> = policy(3)
        .execute(&abort, || async { Err(WeaveError::api(503, "unavailable")) })
        .await;

    assert!(matches!(result, Err(WeaveError::Aborted)));
}

#[tokio::test]
async fn deferred_first_settlement_wins() {
    let (resolver, value) = deferred::<u32>();

    assert!(resolver.resolve(1));
    assert!(!resolver.resolve(2));
    assert!(!resolver.reject(Arc::new(WeaveError::Aborted)));

    assert_eq!(value.get().await.unwrap(), 1);
    assert_eq!(value.clone().get().await.unwrap(), 1);
}

#[tokio::test]
async fn deferred_reader_sees_rejection() {
    let (resolver, value) = deferred::<String>();
    let reader = tokio::spawn({
        let value = value.clone();
        async move { value.get().await }
    });

    resolver.reject(Arc::new(WeaveError::api(500, "boom")));

    let err = reader.await.unwrap().unwrap_err();
    assert!(matches!(*err, WeaveError::Api { status: 500, .. }));
}

#[tokio::test]
async fn dropped_resolver_fails_readers() {
    let (resolver, value) = deferred::<u32>();
    assert!(value.peek().is_none());

    drop(resolver);

    let err = value.get().await.unwrap_err();
    assert!(matches!(*err, WeaveError::InvalidState(_)));
}

#[tokio::test(start_paused = true)]
async fn timeout_reports_elapsed_budget() {
    let slow = async {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok::<_, WeaveError>(())
    };

    let err = with_timeout(Duration::from_millis(1500), slow)
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "Timeout after 1500ms");
}

#[tokio::test]
async fn timeout_passes_through_results() {
    let value = with_timeout(Duration::from_secs(1), async { Ok::<_, WeaveError>(7) })
        .await
        .unwrap();

    assert_eq!(value, 7);
}
