use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, error, warn};

/// Classification of errors for retry strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryableError {
    /// 429 Rate Limit
    RateLimit,
    /// 5xx Server Error, or a provider run that reported failure
    ServerError,
    /// Network timeout or a poll loop that ran out of time
    Timeout,
    /// Other errors - don't retry
    Other,
}

/// Configuration for retry behavior.
///
/// Delays grow exponentially from `base_delay_ms`, doubling per attempt and
/// capped at `max_delay_ms`. Rate-limited attempts start one doubling ahead.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total number of attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the first retry (milliseconds)
    pub base_delay_ms: u64,
    /// Upper bound for any single delay (milliseconds)
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryConfig {
    /// Get the delay after a failed attempt (0-indexed) of the given error type
    pub fn delay_for(&self, attempt: u32, error_type: RetryableError) -> Option<Duration> {
        let exponent = match error_type {
            RetryableError::Other => return None,
            RetryableError::RateLimit => attempt.saturating_add(1),
            RetryableError::ServerError | RetryableError::Timeout => attempt,
        };

        let factor = 2u64.checked_pow(exponent).unwrap_or(u64::MAX);
        let delay_ms = self
            .base_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms);

        Some(Duration::from_millis(delay_ms))
    }
}

/// Retry an async operation with exponential backoff
///
/// `classify_error` decides whether a failure is worth another attempt; the
/// last error is returned once attempts run out or a failure is `Other`.
///
/// ```ignore
/// let page = retry_with_backoff(
///     || client.fetch_page(address, cursor.clone()),
///     &RetryConfig::default(),
///     ZapperError::retry_class,
/// ).await?;
/// ```
pub async fn retry_with_backoff<F, Fut, T, E>(
    mut operation: F,
    config: &RetryConfig,
    classify_error: impl Fn(&E) -> RetryableError,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    debug!("Operation succeeded after {} retry attempts", attempt);
                }
                return Ok(result);
            }
            Err(e) => {
                let error_type = classify_error(&e);

                if error_type == RetryableError::Other {
                    error!("Operation failed with non-retryable error: {}", e);
                    return Err(e);
                }

                if attempt + 1 >= max_attempts {
                    error!(
                        "Operation failed after {} attempts (retries exhausted): {}",
                        attempt + 1,
                        e
                    );
                    return Err(e);
                }

                let delay = match config.delay_for(attempt, error_type) {
                    Some(d) => d,
                    None => return Err(e),
                };

                warn!(
                    "Operation failed (attempt {}/{}): {} - retrying in {}ms (error type: {:?})",
                    attempt + 1,
                    max_attempts,
                    e,
                    delay.as_millis(),
                    error_type
                );

                tokio::time::sleep(delay).await;

                attempt += 1;
            }
        }
    }
}

/// Outcome of one check in a poll loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollState<T> {
    Ready(T),
    Pending,
}

/// Interval and ceiling for a poll loop
#[derive(Debug, Clone)]
pub struct PollConfig {
    pub interval: Duration,
    pub max_wait: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_wait: Duration::from_secs(300),
        }
    }
}

#[derive(Error, Debug)]
pub enum PollError<E> {
    #[error("gave up polling after {waited:?}")]
    TimedOut { waited: Duration },
    #[error(transparent)]
    Check(E),
}

/// Call `check` until it reports `Ready`, fails, or `max_wait` elapses.
///
/// The first check runs immediately; subsequent checks are spaced by
/// `interval`. A check is never started once the deadline has passed.
pub async fn poll_until<F, Fut, T, E>(mut check: F, config: &PollConfig) -> Result<T, PollError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<PollState<T>, E>>,
{
    let started = Instant::now();
    let deadline = started + config.max_wait;
    let mut checks = 0u32;

    loop {
        checks += 1;
        match check().await.map_err(PollError::Check)? {
            PollState::Ready(value) => {
                debug!("Poll ready after {} checks ({}ms)", checks, started.elapsed().as_millis());
                return Ok(value);
            }
            PollState::Pending => {}
        }

        let now = Instant::now();
        if now + config.interval > deadline {
            return Err(PollError::TimedOut {
                waited: now - started,
            });
        }

        tokio::time::sleep(config.interval).await;
    }
}
