//! Bounded exponential backoff for outbound calls.
//!
//! Every call made by the GitHub and Todoist clients runs through a
//! [`RetryPolicy`]. Failures are classified before anything is retried:
//!
//! - HTTP 429 (and GitHub's exhausted primary quota): retried, waiting for
//!   the server's `Retry-After` hint when present, capped at `max_delay`,
//!   plus up to 100ms of jitter.
//! - Any other 4xx, and payload validation failures: never retried.
//! - 5xx and network failures: retried with `min(base * 2^attempt, max_delay)`
//!   plus up to 10% jitter.

use std::future::Future;
use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};
use rand::Rng;

use crate::platform::{ApiError, short_error_message};

/// Default maximum retry attempts after the first call.
pub const DEFAULT_MAX_RETRIES: usize = 3;

/// Default initial backoff delay in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 1_000;

/// Default maximum backoff delay in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 10_000;

/// Upper bound on the jitter added to rate-limit waits.
const RATE_LIMIT_JITTER_MS: u64 = 100;

/// Configuration for retry operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Delay before the first retry; doubles on each subsequent one.
    pub base_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Maximum number of retry attempts.
    pub max_retries: usize,
    /// Whether to add jitter to delays.
    pub with_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
            max_retries: DEFAULT_MAX_RETRIES,
            with_jitter: true,
        }
    }
}

impl RetryConfig {
    /// Create a new retry configuration with custom values.
    #[must_use]
    pub fn new(base_delay: Duration, max_delay: Duration, max_retries: usize) -> Self {
        Self {
            base_delay,
            max_delay,
            max_retries,
            with_jitter: true,
        }
    }

    /// Set whether to use jitter.
    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.with_jitter = jitter;
        self
    }

    /// Build the un-jittered exponential schedule for this configuration.
    ///
    /// Jitter is applied per error class by [`RetryPolicy`], so the builder
    /// itself never adds any.
    #[must_use]
    pub fn into_backoff(self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.base_delay)
            .with_max_delay(self.max_delay)
            .with_factor(2.0)
            .with_max_times(self.max_retries)
    }
}

/// How a failed call should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Rate limited; always eligible for retry.
    RateLimited,
    /// Client error; propagated immediately.
    Permanent,
    /// Server or network error; retried with backoff.
    Transient,
}

/// Classify an error for retry purposes.
#[must_use]
pub fn classify(err: &ApiError) -> FailureClass {
    match err {
        ApiError::RateLimited { .. } => FailureClass::RateLimited,
        ApiError::Status { status, .. } if (400..500).contains(status) => {
            if *status == 429 {
                FailureClass::RateLimited
            } else {
                FailureClass::Permanent
            }
        }
        ApiError::Validation { .. } | ApiError::Internal { .. } => FailureClass::Permanent,
        ApiError::Status { .. } | ApiError::Network { .. } => FailureClass::Transient,
    }
}

/// Retry wrapper applied to every outbound call.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Delay before the next attempt, given the scheduled exponential delay
    /// for that attempt. `None` means the error must not be retried.
    #[must_use]
    pub fn delay_for(&self, err: &ApiError, scheduled: Duration) -> Option<Duration> {
        match classify(err) {
            FailureClass::Permanent => None,
            FailureClass::RateLimited => {
                let wait = err.retry_after().unwrap_or(scheduled).min(self.config.max_delay);
                Some(wait + self.jitter(Duration::from_millis(RATE_LIMIT_JITTER_MS)))
            }
            FailureClass::Transient => {
                let wait = scheduled.min(self.config.max_delay);
                Some(wait + self.jitter(wait / 10))
            }
        }
    }

    fn jitter(&self, upper: Duration) -> Duration {
        if !self.config.with_jitter || upper.is_zero() {
            return Duration::ZERO;
        }
        let upper_ms = upper.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(0..=upper_ms))
    }

    /// Run `operation`, retrying per this policy.
    ///
    /// Returns the first success, the first non-retryable error, or the last
    /// error once `max_retries` retries have been spent.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut f: F) -> Result<T, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let mut schedule = self.config.into_backoff().build();
        let mut attempt: u32 = 0;

        loop {
            let err = match f().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if classify(&err) == FailureClass::Permanent {
                return Err(err);
            }

            let Some(scheduled) = schedule.next() else {
                tracing::debug!(
                    operation,
                    attempts = attempt + 1,
                    error = %short_error_message(&err),
                    "Retries exhausted"
                );
                return Err(err);
            };

            let Some(delay) = self.delay_for(&err, scheduled) else {
                return Err(err);
            };

            attempt += 1;
            tracing::debug!(
                operation,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %short_error_message(&err),
                "Retrying after failure"
            );
            tokio::time::sleep(delay).await;
        }
    }
}
