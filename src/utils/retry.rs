// Retry logic with Retry-After hint support
// Author: kelexine (https://github.com/kelexine)

use backoff::{backoff::Backoff, ExponentialBackoff};
use std::time::Duration;
use tracing::{debug, warn};

/// Longest wait honoured from a `Retry-After` hint.
const MAX_HINT: Duration = Duration::from_secs(60);

/// A failed attempt: HTTP status, response body and the server's wait hint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptError {
    pub status: u16,
    pub body: String,
    pub retry_after: Option<Duration>,
}

impl AttemptError {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        self.retry_after = retry_after;
        self
    }
}

/// Parse a `Retry-After` header given in seconds (e.g. "3", "1.5").
/// Capped at 60 seconds.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let seconds: f64 = value.trim().parse().ok()?;
    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }
    Some(Duration::from_millis((seconds * 1000.0) as u64).min(MAX_HINT))
}

/// Create exponential backoff configuration for retries
pub fn create_backoff() -> ExponentialBackoff {
    ExponentialBackoff {
        current_interval: Duration::from_millis(500),     // Start at 500ms
        initial_interval: Duration::from_millis(500),
        randomization_factor: 0.3,                         // Add jitter
        multiplier: 2.0,                                  // Double each time
        max_interval: Duration::from_secs(30),            // Cap at 30s
        max_elapsed_time: Some(Duration::from_secs(120)), // Give up after 2 minutes
        ..Default::default()
    }
}

/// Determine if an HTTP status code is retryable
pub fn is_retryable(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

/// Execute operation with retry logic
/// - Uses the server's Retry-After hint if available
/// - Falls back to exponential backoff
/// - Gives up after `max_attempts` attempts
pub async fn with_retry<F, Fut, T>(
    operation_name: &str,
    max_attempts: u32,
    mut operation: F,
) -> Result<T, AttemptError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, AttemptError>>,
{
    let mut backoff = create_backoff();
    let max_attempts = max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!("{} succeeded on attempt {}", operation_name, attempt);
                }
                return Ok(result);
            }
            Err(err) => {
                if !is_retryable(err.status) || attempt >= max_attempts {
                    return Err(err);
                }

                let delay = match err.retry_after {
                    Some(hint) => {
                        debug!(
                            "{} failed with {} (attempt {}), server asks to wait {}ms",
                            operation_name,
                            err.status,
                            attempt,
                            hint.as_millis()
                        );
                        hint
                    }
                    None => {
                        let backoff_delay = backoff.next_backoff().unwrap_or(Duration::from_secs(30));
                        warn!(
                            "{} failed with {} (attempt {}), retrying after {}ms",
                            operation_name,
                            err.status,
                            attempt,
                            backoff_delay.as_millis()
                        );
                        backoff_delay
                    }
                };

                tokio::time::sleep(delay).await;
            }
        }
    }
}
