//! Retry policy.
//!
//! # Design Decisions
//! - Connection errors and timeouts are always retryable
//! - 4xx never retried: the same params/auth would fail again
//! - 5xx retryable only when configured
//! - Retryability is decided on the raw failure, before classification

use std::time::Duration;

use crate::config::RetryConfig;
use crate::downstream::Failure;
use crate::resilience::backoff::calculate_backoff;

/// How many attempts to make and how long to wait between them.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
    pub retry_server_errors: bool,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
            jitter: config.jitter,
            retry_server_errors: config.retry_server_errors,
        }
    }

    /// Whether a failure may be retried.
    pub fn is_retryable(&self, failure: &Failure) -> bool {
        failure.is_transport() || (self.retry_server_errors && failure.is_server_error())
    }

    /// Delay after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        calculate_backoff(attempt, self.base_delay_ms, self.max_delay_ms, self.jitter)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}
