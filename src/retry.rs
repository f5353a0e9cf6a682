//! Retry utilities with exponential backoff
//!
//! The pipeline retries transient backend failures using these helpers, and they are
//! public so callers can wrap their own operations the same way. The delay before
//! retry number `n` (zero-based) is `initial_delay * backoff_multiplier^n`, capped at
//! `max_delay`, with optional jitter.
//!
//! # Examples
//!
//! ```rust,no_run
//! use llm_conduit::retry::{retry_with_backoff, RetryConfig};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RetryConfig::default()
//!     .with_max_attempts(3)
//!     .with_initial_delay(Duration::from_secs(1));
//!
//! let result = retry_with_backoff(config, || async {
//!     // Your async operation here
//!     Ok::<_, llm_conduit::Error>(42)
//! }).await?;
//! # Ok(())
//! # }
//! ```

use crate::{Error, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// Classifies an error as worth retrying.
pub type RetryPredicate = Arc<dyn Fn(&Error) -> bool + Send + Sync>;

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,

    /// Delay before the first retry
    pub initial_delay: Duration,

    /// Maximum delay between retries
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (e.g., 2.0 doubles the delay each time)
    pub backoff_multiplier: f64,

    /// Random jitter added around the delay (0.0 to 1.0); zero keeps delays exact
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
        }
    }
}

impl RetryConfig {
    /// Create a new retry configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// A configuration that makes exactly one attempt.
    pub fn disabled() -> Self {
        Self::default().with_max_attempts(1)
    }

    /// Set maximum number of attempts
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Set initial delay
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set maximum delay
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set backoff multiplier
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Set jitter factor (0.0 to 1.0)
    pub fn with_jitter_factor(mut self, jitter: f64) -> Self {
        self.jitter_factor = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay to wait after the failed attempt numbered `attempt` (zero-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay_ms = self.initial_delay.as_millis() as f64;
        let exponential_delay = base_delay_ms * self.backoff_multiplier.powi(attempt as i32);

        // Cap at max delay
        let capped_delay = exponential_delay.min(self.max_delay.as_millis() as f64);

        if self.jitter_factor == 0.0 {
            return Duration::from_millis(capped_delay.max(0.0) as u64);
        }

        let jitter_range = capped_delay * self.jitter_factor;
        let jitter = rand::random::<f64>() * jitter_range;
        let final_delay = capped_delay + jitter - (jitter_range / 2.0);

        Duration::from_millis(final_delay.max(0.0) as u64)
    }
}

/// Retry an async operation with exponential backoff, retrying every error
///
/// # Returns
///
/// The result of the operation if successful, or the last error if all attempts failed
pub async fn retry_with_backoff<F, Fut, T>(config: RetryConfig, operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    retry_with_backoff_if(config, |_| true, operation).await
}

/// Retry an async operation with exponential backoff while `should_retry` approves
///
/// A rejected error is returned immediately. Otherwise the operation is retried until
/// `max_attempts` is reached, sleeping between attempts but never after the last one.
pub async fn retry_with_backoff_if<F, Fut, T, P>(
    config: RetryConfig,
    should_retry: P,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    P: Fn(&Error) -> bool,
{
    let mut last_error = None;

    for attempt in 0..config.max_attempts {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(err) => {
                if !should_retry(&err) {
                    return Err(err);
                }

                // Don't sleep after the last attempt
                if attempt + 1 < config.max_attempts {
                    let delay = config.delay_for_attempt(attempt);
                    log::debug!(
                        "attempt {} failed ({}); retrying in {:?}",
                        attempt + 1,
                        err,
                        delay
                    );
                    sleep(delay).await;
                }

                last_error = Some(err);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| Error::other("Retry failed with no error")))
}

/// Determine if an error is retryable
///
/// Returns true for transient errors like network issues, timeouts, rate limiting
/// (429) and 5xx server errors. Returns false for client errors, configuration errors,
/// open circuit breakers and decoding failures.
pub fn is_retryable_error(error: &Error) -> bool {
    match error {
        Error::Http(_) => true,   // Network errors are retryable
        Error::Timeout => true,   // Timeouts are retryable
        Error::Stream(_) => true, // Stream errors might be transient
        Error::Api(msg) => {
            // 429 and 5xx are transient, 4xx otherwise are not
            ["429", "500", "502", "503", "504"]
                .iter()
                .any(|code| msg.contains(code))
        }
        Error::CircuitOpen { .. } => false, // Upstream saturation, back off instead
        Error::Config(_) => false,
        Error::InvalidInput(_) => false,
        _ => false, // Conservative default
    }
}
