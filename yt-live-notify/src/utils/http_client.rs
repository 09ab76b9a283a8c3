use std::{future::Future, sync::OnceLock, time::Duration};

use tracing::{debug, warn};

use crate::domain::RetryPolicy;
use crate::{Error, Result};

/// User agent sent with every outgoing request.
pub const USER_AGENT: &str = concat!("yt-live-notify/", env!("CARGO_PKG_VERSION"));

pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            // Safe to ignore: can happen if another crate installed it first.
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Build the shared `reqwest::Client`.
///
/// Per-request timeouts are enforced by [`with_timeout`] rather than on the
/// client, so the provider and webhook sender can use different budgets.
pub fn build_client() -> reqwest::Client {
    install_rustls_provider();

    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .unwrap_or_else(|error| {
            warn!(error = %error, "Failed to build HTTP client; falling back to reqwest defaults");
            reqwest::Client::new()
        })
}

/// Run `fut` with a deadline. Dropping the future aborts the in-flight request.
pub async fn with_timeout<T, F>(timeout: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout(timeout)),
    }
}

/// Run `op` under `policy`, each attempt bounded by `timeout`.
///
/// Only errors for which [`Error::is_retryable`] holds are retried; quota and
/// rate-limit errors return after the first attempt.
pub async fn retry_with_policy<T, F, Fut>(
    policy: &RetryPolicy,
    timeout: Duration,
    operation: &'static str,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        match with_timeout(timeout, op()).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && policy.should_retry(attempt) => {
                let delay = policy.delay_after_attempt(attempt);
                warn!(
                    operation,
                    attempt,
                    max_attempts = policy.max_attempts,
                    error = %e,
                    "Request failed, retrying in {:?}",
                    delay
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::fixed(max_attempts, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_retries_transient_errors_until_budget() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<()> =
            retry_with_policy(&fast_policy(3), Duration::from_secs(1), "test", || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(Error::Network("connection reset".into()))
                }
            })
            .await;

        assert!(matches!(result, Err(Error::Network(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_quota_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<()> =
            retry_with_policy(&fast_policy(3), Duration::from_secs(1), "test", || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(Error::QuotaExceeded("quota".into()))
                }
            })
            .await;

        assert!(matches!(result, Err(Error::QuotaExceeded(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failure() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = retry_with_policy(&fast_policy(3), Duration::from_secs(1), "test", || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(Error::UnexpectedStatus {
                        status: 503,
                        message: "unavailable".into(),
                    })
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_timeout_is_classified_and_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<()> =
            retry_with_policy(&fast_policy(2), Duration::from_millis(10), "test", || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(())
                }
            })
            .await;

        assert!(matches!(result, Err(Error::Timeout(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
