//! Retry with exponential backoff for outbound calls to external providers.
//!
//! Errors decide for themselves whether another attempt can help by
//! implementing [`Retryable`]. Terminal errors are returned immediately.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// Classification of a failure as transient or terminal.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Backoff policy for one outbound client.
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Retries after the first attempt; 2 means at most 3 calls.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    /// Cap applied before jitter.
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
    pub add_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    pub fn no_retry() -> Self {
        Self::with_max_retries(0)
    }

    /// Small backoffs, for tests and latency-sensitive paths.
    pub fn quick() -> Self {
        Self {
            max_retries: 2,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            add_jitter: false,
        }
    }

    /// Delay before retry number `retry` (zero based).
    pub fn backoff_duration(&self, retry: u32) -> Duration {
        let base = self
            .initial_backoff
            .mul_f64(self.backoff_multiplier.powi(retry as i32))
            .min(self.max_backoff);
        let base = Duration::from_millis(base.as_millis() as u64);

        if !self.add_jitter {
            return base;
        }
        // up to 25%
        let factor = rand::thread_rng().gen_range(0.0..0.25);
        base + Duration::from_millis((base.as_millis() as f64 * factor) as u64)
    }
}

/// Call `f` until it succeeds, fails with a terminal error, or the retry
/// budget is spent. The last error is returned.
///
/// ```ignore
/// let sub = retry_async(&config, "retrieve_subscription", || async {
///     client.fetch(&id).await
/// })
/// .await?;
/// ```
pub async fn retry_async<F, Fut, T, E>(config: &RetryConfig, operation_name: &str, f: F) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + std::fmt::Display,
{
    let mut retry = 0;
    loop {
        let err = match f().await {
            Ok(value) => {
                if retry > 0 {
                    info!(operation = operation_name, retries = retry, "Recovered after retry");
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if !err.is_retryable() {
            warn!(operation = operation_name, error = %err, "Terminal error, not retrying");
            return Err(err);
        }
        if retry >= config.max_retries {
            warn!(
                operation = operation_name,
                attempts = retry + 1,
                error = %err,
                "Retry budget exhausted"
            );
            return Err(err);
        }

        let delay = config.backoff_duration(retry);
        warn!(
            operation = operation_name,
            attempt = retry + 1,
            error = %err,
            delay_ms = delay.as_millis() as u64,
            "Transient error, backing off"
        );
        sleep(delay).await;
        retry += 1;
    }
}
