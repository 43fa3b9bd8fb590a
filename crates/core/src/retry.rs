//! Retry with exponential backoff and jitter
//!
//! Backend adapters wrap individual requests (listing pages, metadata calls)
//! with this helper. Whole transfers are never retried within a run; a
//! failed unit is re-attempted on resume instead.

use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::{Error, Result};

/// Retry a fallible async request while `is_retryable` accepts its error
pub async fn retry_with_backoff<T, F, Fut, R>(
    config: &RetryConfig,
    mut operation: F,
    is_retryable: R,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
    R: Fn(&Error) -> bool,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if attempt >= config.max_attempts || !is_retryable(&e) {
                    return Err(e);
                }

                let backoff = calculate_backoff(config, attempt);
                tracing::debug!(
                    attempt = attempt,
                    backoff_ms = backoff.as_millis(),
                    error = %e,
                    "Retrying request after transient error"
                );

                tokio::time::sleep(backoff).await;
            }
        }
    }
}

/// initial * 2^(attempt-1), capped, plus up to the same amount of jitter
fn calculate_backoff(config: &RetryConfig, attempt: u32) -> Duration {
    let base_ms = config.initial_backoff_ms * (1u64 << (attempt - 1).min(10));
    let capped_ms = base_ms.min(config.max_backoff_ms);
    Duration::from_millis(capped_ms + rand_jitter(capped_ms))
}

fn rand_jitter(max: u64) -> u64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos() as u64;
    nanos % max.max(1)
}

/// Transient backend failures worth another attempt
pub fn is_retryable_error(error: &Error) -> bool {
    match error {
        Error::Network(msg) => {
            let msg = msg.to_lowercase();
            [
                "timeout",
                "connection reset",
                "connection refused",
                "503",
                "service unavailable",
                "429",
                "too many requests",
                "slow down",
            ]
            .iter()
            .any(|needle| msg.contains(needle))
        }
        Error::Io(e) => matches!(
            e.kind(),
            std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::TimedOut
                | std::io::ErrorKind::Interrupted
        ),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 10,
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = RetryConfig {
            max_attempts: 10,
            initial_backoff_ms: 100,
            max_backoff_ms: 500,
        };

        let b1 = calculate_backoff(&config, 1);
        assert!(b1.as_millis() >= 100 && b1.as_millis() < 200);

        let b2 = calculate_backoff(&config, 2);
        assert!(b2.as_millis() >= 200 && b2.as_millis() < 400);

        let b9 = calculate_backoff(&config, 9);
        assert!(b9.as_millis() >= 500 && b9.as_millis() < 1000);
    }

    #[test]
    fn test_retryable_classification() {
        assert!(is_retryable_error(&Error::Network(
            "503 Service Unavailable".to_string()
        )));
        assert!(is_retryable_error(&Error::Network("SlowDown: slow down".to_string())));
        assert!(!is_retryable_error(&Error::Network("AccessDenied".to_string())));
        assert!(!is_retryable_error(&Error::NotFound("a".to_string())));
        assert!(is_retryable_error(&Error::Io(std::io::Error::from(
            std::io::ErrorKind::TimedOut
        ))));
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = retry_with_backoff(
            &fast(),
            || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(Error::Network("timeout".to_string()))
                    } else {
                        Ok("page")
                    }
                }
            },
            is_retryable_error,
        )
        .await;

        assert_eq!(result.unwrap(), "page");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_on_permanent_error() {
        let mut calls = 0;
        let result: Result<()> = retry_with_backoff(
            &fast(),
            || {
                calls += 1;
                async { Err(Error::NotFound("bucket".to_string())) }
            },
            is_retryable_error,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn test_stops_after_max_attempts() {
        let mut calls = 0;
        let result: Result<()> = retry_with_backoff(
            &fast(),
            || {
                calls += 1;
                async { Err(Error::Network("connection reset".to_string())) }
            },
            is_retryable_error,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls, 3);
    }
}
