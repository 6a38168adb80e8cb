//! Bounded retry with a fixed backoff.
//!
//! Used where the supervisor waits for a freshly launched dependency to come
//! up: a fixed number of attempts with the same pause between each.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// How many times to try and how long to wait between tries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first one).
    pub max_attempts: u32,
    /// Pause after each failed attempt.
    pub delay: Duration,
}

impl RetryConfig {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }
}

/// Statistics about a retry operation.
#[derive(Debug, Clone, Default)]
pub struct RetryStats {
    pub attempts: u32,
    pub total_delay: Duration,
    pub success: bool,
    pub last_error: Option<String>,
}

/// Retry an async operation until it succeeds, fails with a non-retryable
/// error, or runs out of attempts.
pub async fn retry_async<F, Fut, T, E>(
    config: &RetryConfig,
    mut operation: F,
    should_retry: impl Fn(&E) -> bool,
) -> (Result<T, E>, RetryStats)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut stats = RetryStats::default();
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        stats.attempts = attempt;

        let e = match operation().await {
            Ok(value) => {
                stats.success = true;
                if attempt > 1 {
                    debug!("Operation succeeded after {} attempts", attempt);
                }
                return (Ok(value), stats);
            }
            Err(e) => e,
        };
        stats.last_error = Some(e.to_string());

        if !should_retry(&e) {
            debug!("Error is not retryable: {}", e);
            return (Err(e), stats);
        }
        if attempt >= max_attempts {
            warn!(
                "All {} retry attempts exhausted. Last error: {}",
                max_attempts, e
            );
            return (Err(e), stats);
        }

        debug!(
            "Attempt {}/{} failed: {}. Retrying in {:?}",
            attempt, max_attempts, e, config.delay
        );
        stats.total_delay += config.delay;
        tokio::time::sleep(config.delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_retry_succeeds_after_failures() {
        let config = RetryConfig::fixed(5, Duration::from_secs(2));
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let (result, stats) = retry_async(
            &config,
            || {
                let counter = counter_clone.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err("not listening".to_string())
                    } else {
                        Ok(())
                    }
                }
            },
            |_: &String| true,
        )
        .await;

        assert!(result.is_ok());
        assert_eq!(stats.attempts, 3);
        assert_eq!(stats.total_delay, Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhausted() {
        let config = RetryConfig::fixed(5, Duration::from_secs(2));

        let (result, stats) = retry_async(
            &config,
            || async { Err::<(), _>("always fails".to_string()) },
            |_: &String| true,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(stats.attempts, 5);
        assert_eq!(stats.total_delay, Duration::from_secs(8));
        assert!(!stats.success);
        assert_eq!(stats.last_error.as_deref(), Some("always fails"));
    }

    #[tokio::test]
    async fn test_retry_non_retryable_error() {
        let config = RetryConfig::fixed(3, Duration::from_millis(1));

        let (result, stats) = retry_async(
            &config,
            || async { Err::<i32, _>("permanent failure".to_string()) },
            |e: &String| !e.contains("permanent"),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(stats.attempts, 1);
    }

    #[tokio::test]
    async fn test_zero_attempts_still_tries_once() {
        let config = RetryConfig::fixed(0, Duration::from_millis(1));

        let (result, stats) = retry_async(&config, || async { Ok::<_, String>(7) }, |_| true).await;

        assert_eq!(result, Ok(7));
        assert_eq!(stats.attempts, 1);
    }
}
