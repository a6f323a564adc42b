//! Retry Policy
//!
//! Exponential backoff with jitter, honoring server wait hints.

use rand::Rng;
use std::time::Duration;
use tracing::debug;

use crate::error::ApiError;
use crate::types::{
    DEFAULT_BASE_BACKOFF_MS, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_BACKOFF_MS,
};

/// Retry configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Maximum number of attempts, counting the first.
    pub max_attempts: u32,
    /// Delay before the first retry, before jitter.
    pub base_backoff: Duration,
    /// Maximum computed delay between attempts.
    pub max_backoff: Duration,
    /// Add `U[0, base_backoff)` to every computed delay.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        DEFAULT_RETRY_CONFIG
    }
}

/// Default retry configuration.
pub const DEFAULT_RETRY_CONFIG: RetryConfig = RetryConfig {
    max_attempts: DEFAULT_MAX_ATTEMPTS,
    base_backoff: Duration::from_millis(DEFAULT_BASE_BACKOFF_MS),
    max_backoff: Duration::from_millis(DEFAULT_MAX_BACKOFF_MS),
    jitter: true,
};

/// Outcome of consulting the policy after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    /// Whether another attempt should be made.
    pub retry: bool,
    /// How long to wait before it.
    pub delay: Duration,
}

impl RetryDecision {
    /// Decision to stop.
    pub const fn stop() -> Self {
        Self {
            retry: false,
            delay: Duration::ZERO,
        }
    }

    /// Decision to retry after `delay`.
    pub const fn after(delay: Duration) -> Self {
        Self { retry: true, delay }
    }
}

/// Stateless retry policy.
///
/// Connection failures, timeouts, 5xx and 429 are retried. Authentication
/// failures are left to the token refresh path and every other 4xx is
/// terminal.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Create new retry policy.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Decide what follows failed attempt number `attempt` (1-based).
    pub fn should_retry(&self, attempt: u32, error: &ApiError) -> RetryDecision {
        if !error.is_retryable() {
            debug!(attempt, error = %error, "error is not retryable");
            return RetryDecision::stop();
        }

        if attempt >= self.config.max_attempts {
            debug!(
                attempt,
                max_attempts = self.config.max_attempts,
                "retry budget exhausted"
            );
            return RetryDecision::stop();
        }

        // A server-supplied wait hint is used as given.
        let delay = match error.retry_after() {
            Some(hint) => hint,
            None => self.backoff_delay(attempt),
        };

        debug!(attempt, delay_ms = delay.as_millis() as u64, "scheduling retry");
        RetryDecision::after(delay)
    }

    /// Backoff for the retry following attempt number `attempt`.
    ///
    /// `base * 2^(attempt - 1)`, plus jitter when enabled, capped at
    /// `max_backoff`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let mut delay = self
            .config
            .base_backoff
            .saturating_mul(2u32.saturating_pow(exponent));

        if self.config.jitter {
            let factor: f64 = rand::thread_rng().gen();
            delay = delay.saturating_add(self.config.base_backoff.mul_f64(factor));
        }

        delay.min(self.config.max_backoff)
    }
}
