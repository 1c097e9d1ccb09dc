//! Retry helper for the inference adapter
//!
//! Bounded attempts with exponential backoff. Only the inference call uses
//! this; every other pipeline stage is a pure in-memory transform with
//! nothing to retry.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the first try
    pub max_retries: u32,

    /// Base delay in milliseconds for exponential backoff
    pub base_delay_ms: u64,

    /// Maximum delay in milliseconds (caps exponential growth)
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 2_000,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryConfig {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// Delay before the given attempt (attempt 0 is the first try, no delay)
    fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponential = self.base_delay_ms.saturating_mul(1 << (attempt - 1).min(16));
        Duration::from_millis(exponential.min(self.max_delay_ms))
    }
}

/// Run an async operation with bounded retries.
///
/// `should_retry` inspects the error after each failed attempt; returning
/// false stops retrying and surfaces that error immediately.
pub async fn with_retry<T, E, F, Fut, P>(
    config: &RetryConfig,
    operation: F,
    should_retry: P,
) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut last_error = None;

    for attempt in 0..=config.max_retries {
        let delay = config.delay_for(attempt);
        if !delay.is_zero() {
            debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying after backoff");
            tokio::time::sleep(delay).await;
        }

        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !should_retry(&err) {
                    return Err(err);
                }
                warn!(attempt, error = %err, "attempt failed");
                last_error = Some(err);
            }
        }
    }

    // max_retries + 1 attempts all failed; the loop recorded the last error
    Err(last_error.expect("at least one attempt was made"))
}
