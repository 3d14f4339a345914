use std::time::Duration;
use tokio::time::sleep;

// ============================================================================
// Exponential Backoff Retry for Transient Failures
// ============================================================================
//
// Used by the ingestion handler around persistence. With `max_attempts = 1`
// (the default) the operation runs exactly once and any failure is returned
// immediately.
//
// ============================================================================

#[derive(Clone, Debug, PartialEq)]
pub struct RetryConfig {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each failed attempt
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::disabled()
    }
}

impl RetryConfig {
    /// Run once, never retry.
    pub fn disabled() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.max_attempts > 1
    }

    fn next_delay(&self, delay: Duration) -> Duration {
        let next = Duration::from_millis(((delay.as_millis() as f64) * self.multiplier) as u64);
        next.min(self.max_delay)
    }
}

/// Outcome of a retried operation
#[derive(Debug)]
pub enum RetryResult<T, E> {
    Success(T),
    /// Still failing after `attempts` tries
    Exhausted { error: E, attempts: u32 },
    /// Failed with an error that is not worth retrying
    Permanent { error: E, attempts: u32 },
}

/// Classifies an error as transient (retry may help) or permanent
pub trait IsTransient {
    fn is_transient(&self) -> bool;
}

/// Retry `operation` while it fails with a transient error, up to
/// `config.max_attempts` attempts in total.
pub async fn retry_on_transient<F, Fut, T, E>(
    config: &RetryConfig,
    mut operation: F,
) -> RetryResult<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display + IsTransient,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;

        match operation(attempt).await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::info!(attempt = attempt, "Operation succeeded after retry");
                }
                return RetryResult::Success(result);
            }
            Err(error) => {
                if !error.is_transient() {
                    return RetryResult::Permanent { error, attempts: attempt };
                }

                if attempt >= config.max_attempts {
                    return RetryResult::Exhausted { error, attempts: attempt };
                }

                tracing::warn!(
                    attempt = attempt,
                    error = %error,
                    delay_ms = delay.as_millis() as u64,
                    "Transient failure, retrying after delay"
                );

                sleep(delay).await;
                delay = config.next_delay(delay);
            }
        }
    }
}
