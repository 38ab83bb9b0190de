// ============================================================================
// Bounded Retry
// ============================================================================
//
// Run a fallible async operation a fixed number of times with exponential
// backoff between attempts. Used for consumer connection setup and by the
// reference consumer to reach the acknowledger.
//
// ============================================================================

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

/// Execute an operation with bounded retry and exponential backoff
///
/// # Arguments
/// * `operation_name` - Name of the operation for logging
/// * `max_attempts` - Total attempts, at least one is always made
/// * `initial_backoff` - Delay after the first failure, doubled after each further one
/// * `operation` - Called with the 1-based attempt number
///
/// # Returns
/// The first success, or the error of the last attempt
pub async fn retry_with_backoff<T, E, F, Fut>(
    operation_name: &str,
    max_attempts: u32,
    initial_backoff: Duration,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation(attempt).await {
            Ok(result) => {
                if attempt > 1 {
                    info!(
                        operation = operation_name,
                        attempt = attempt,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(e) if attempt < max_attempts => {
                warn!(
                    operation = operation_name,
                    attempt = attempt,
                    max_attempts = max_attempts,
                    error = %e,
                    "Operation failed, will retry"
                );

                let backoff = initial_backoff.saturating_mul(2_u32.saturating_pow(attempt - 1));
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(e) => {
                warn!(
                    operation = operation_name,
                    attempts = attempt,
                    error = %e,
                    "Operation failed, retries exhausted"
                );
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_failures() {
        let calls = AtomicU32::new(0);
        let started = tokio::time::Instant::now();

        let result: Result<u32, String> =
            retry_with_backoff("test", 3, Duration::from_millis(100), |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        Err(format!("attempt {attempt} failed"))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;

        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 100ms + 200ms of backoff
        assert_eq!(started.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_last_error_when_exhausted() {
        let calls = AtomicU32::new(0);

        let result: Result<(), String> =
            retry_with_backoff("test", 4, Duration::from_millis(10), |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { Err(format!("attempt {attempt}")) }
            })
            .await;

        assert_eq!(result, Err("attempt 4".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_zero_attempts_still_tries_once() {
        let calls = AtomicU32::new(0);

        let result: Result<(), String> = retry_with_backoff("test", 0, Duration::ZERO, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("nope".to_string()) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
