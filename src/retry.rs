//! Retry logic with exponential backoff
//!
//! Every remote call in a bundling run goes through [`fetch_with_retry`]. Each
//! attempt is handed an [`Attempt`] carrying its own timeout, which starts at
//! [`RetryConfig::timeout`] and doubles on every retry, so slow servers get
//! progressively more room before the request is abandoned.
//!
//! # Example
//!
//! ```no_run
//! use wiki_bundler::retry::{IsRetryable, fetch_with_retry};
//! use wiki_bundler::config::RetryConfig;
//!
//! #[derive(Debug)]
//! enum MyError {
//!     Transient,
//!     Permanent,
//! }
//!
//! impl std::fmt::Display for MyError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{self:?}")
//!     }
//! }
//!
//! impl IsRetryable for MyError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, MyError::Transient)
//!     }
//! }
//!
//! # async fn example() -> Result<(), MyError> {
//! let config = RetryConfig::default();
//! let body = fetch_with_retry(&config, "https://example.org/", |attempt| async move {
//!     // issue the request with `attempt.timeout`
//!     Ok::<_, MyError>(format!("attempt {}", attempt.number))
//! }).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::Error;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (timeouts, refused connections, error statuses) should return `true`.
/// Permanent failures (malformed responses, missing revisions, local disk errors) should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            // Network and status failures are retried regardless of cause
            Error::Transport { .. } | Error::HttpStatus { .. } => true,
            // A short body may arrive intact on the next try
            Error::TruncatedDownload { .. } => true,
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::UnexpectedEof
            ),
            Error::Config { .. }
            | Error::InvalidResponse { .. }
            | Error::MissingRevision { .. }
            | Error::PrefixResolution(_)
            | Error::OutputExists { .. }
            | Error::Database(_)
            | Error::Serialization(_)
            | Error::Archive(_)
            | Error::Other(_) => false,
        }
    }
}

/// One try of a retried operation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Attempt {
    /// 1-based attempt number
    pub number: u32,
    /// Timeout this attempt should apply to its request
    pub timeout: Duration,
}

/// Execute an async operation with exponential backoff retry logic
///
/// The operation is called at most `config.max_retries + 1` times. Each call
/// receives an [`Attempt`] whose timeout is twice the previous one. Retries
/// are logged with the target and failure reason.
///
/// # Arguments
///
/// * `config` - Retry configuration (retry budget, timeout, delays, backoff multiplier, jitter)
/// * `target` - What is being fetched, for log output (usually a URL)
/// * `operation` - Async closure that returns `Result<T, E>` where `E` implements [`IsRetryable`]
///
/// # Returns
///
/// Returns the successful result or the last error after all retry attempts are exhausted.
pub async fn fetch_with_retry<F, Fut, T, E>(
    config: &RetryConfig,
    target: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut(Attempt) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut retries = 0;
    let mut delay = config.initial_delay;
    let mut timeout = config.timeout;

    loop {
        let attempt = Attempt {
            number: retries + 1,
            timeout,
        };
        match operation(attempt).await {
            Ok(result) => {
                if retries > 0 {
                    tracing::info!(target_url = target, attempts = retries + 1, "Request succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && retries < config.max_retries => {
                retries += 1;

                tracing::warn!(
                    target_url = target,
                    error = %e,
                    retry = retries,
                    max_retries = config.max_retries,
                    delay_ms = delay.as_millis(),
                    "Request failed, retrying"
                );

                let jittered_delay = if config.jitter {
                    add_jitter(delay)
                } else {
                    delay
                };
                tokio::time::sleep(jittered_delay).await;

                let next_delay =
                    Duration::from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier);
                delay = next_delay.min(config.max_delay);
                timeout = timeout.saturating_mul(2);
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(
                        target_url = target,
                        error = %e,
                        attempts = retries + 1,
                        "Request failed after all retry attempts exhausted"
                    );
                } else {
                    tracing::debug!(
                        target_url = target,
                        error = %e,
                        "Request failed with non-retryable error"
                    );
                }
                return Err(e);
            }
        }
    }
}

/// Add random jitter to a delay to prevent thundering herd
///
/// The actual delay will be between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}
