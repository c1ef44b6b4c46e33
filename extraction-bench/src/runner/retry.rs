//! Bounded retry with exponential backoff for provider calls

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;

use crate::config::RetryConfig;
use crate::providers::{ProviderError, ProviderResult};

/// Run `op` until it succeeds, fails with a non-retryable error, or
/// `policy.max_retries` extra attempts are spent.
///
/// Returns the last outcome and the number of attempts made.
pub async fn with_retry<T, F, Fut>(policy: &RetryConfig, label: &str, mut op: F) -> (ProviderResult<T>, u32)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ProviderResult<T>>,
{
    let mut attempts = 0;

    loop {
        attempts += 1;
        let err = match op().await {
            Ok(value) => return (Ok(value), attempts),
            Err(e) => e,
        };

        if !err.is_retryable() {
            tracing::warn!("{} failed ({}), not retrying: {}", label, err.kind(), err);
            return (Err(err), attempts);
        }

        let retry = attempts;
        if retry > policy.max_retries {
            tracing::error!("{} failed after {} attempts: {}", label, attempts, err);
            return (Err(err), attempts);
        }

        let delay = backoff(policy, retry, &err);
        tracing::info!("Retry {} for {} in {:?}: {}", retry, label, delay, err);
        sleep(delay).await;
    }
}

fn backoff(policy: &RetryConfig, retry: u32, err: &ProviderError) -> Duration {
    match err {
        ProviderError::RateLimited { retry_after_ms } => {
            Duration::from_millis(*retry_after_ms).min(policy.max_delay())
        }
        _ => policy.delay_for(retry),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy() -> RetryConfig {
        RetryConfig {
            max_retries: 2,
            initial_delay_ms: 10,
            backoff_factor: 2.0,
            max_delay_ms: 100,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_errors() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let (result, attempts) = with_retry(&policy(), "cell", || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(ProviderError::Timeout { timeout_ms: 5 })
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_bound() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let (result, attempts) = with_retry(&policy(), "cell", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(ProviderError::Timeout { timeout_ms: 5 })
        })
        .await;
        assert!(matches!(result, Err(ProviderError::Timeout { .. })));
        assert_eq!(attempts, 3);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unavailable_is_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let (result, attempts) = with_retry(&policy(), "cell", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(ProviderError::Unavailable("no key".into()))
        })
        .await;
        assert!(matches!(result, Err(ProviderError::Unavailable(_))));
        assert_eq!(attempts, 1);
    }

    #[test]
    fn test_rate_limit_wait_is_capped() {
        let err = ProviderError::RateLimited { retry_after_ms: 60_000 };
        assert_eq!(backoff(&policy(), 1, &err), Duration::from_millis(100));
        let err = ProviderError::Api { status: 502, message: "bad gateway".into() };
        assert_eq!(backoff(&policy(), 2, &err), Duration::from_millis(20));
    }
}
