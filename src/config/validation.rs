//! Configuration validation.
//!
//! Serde handles syntax; this module checks value ranges and addresses. Every problem
//! is reported, not just the first.

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::{GatewayConfig, RateLimitBackend};

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }
    if config.listener.request_timeout_secs == 0 {
        errors.push(ValidationError::new("listener.request_timeout_secs", "must be > 0"));
    }

    if url::Url::parse(&config.downstream.base_url).is_err() {
        errors.push(ValidationError::new(
            "downstream.base_url",
            format!("'{}' is not a URL", config.downstream.base_url),
        ));
    }
    if config.downstream.timeout_secs == 0 {
        errors.push(ValidationError::new("downstream.timeout_secs", "must be > 0"));
    }
    for (name, path) in &config.downstream.endpoints {
        if !path.starts_with('/') {
            errors.push(ValidationError::new(
                "downstream.endpoints",
                format!("path for '{}' must start with '/'", name),
            ));
        }
    }

    if config.retries.max_attempts == 0 {
        errors.push(ValidationError::new("retries.max_attempts", "must be > 0"));
    }
    if config.retries.max_delay_ms < config.retries.base_delay_ms {
        errors.push(ValidationError::new(
            "retries.max_delay_ms",
            "must be >= retries.base_delay_ms",
        ));
    }

    if config.circuit_breaker.failure_threshold == 0 {
        errors.push(ValidationError::new("circuit_breaker.failure_threshold", "must be > 0"));
    }

    if config.cache.enabled && config.cache.max_entries == 0 {
        errors.push(ValidationError::new("cache.max_entries", "must be > 0 when cache is enabled"));
    }

    if config.rate_limit.limit == 0 {
        errors.push(ValidationError::new("rate_limit.limit", "must be > 0"));
    }
    if config.rate_limit.window_secs == 0 {
        errors.push(ValidationError::new("rate_limit.window_secs", "must be > 0"));
    }
    if config.rate_limit.backend == RateLimitBackend::Redis && !cfg!(feature = "redis") {
        errors.push(ValidationError::new(
            "rate_limit.backend",
            "redis backend requires building with the `redis` feature",
        ));
    }

    if config.tasks.workers == 0 {
        errors.push(ValidationError::new("tasks.workers", "must be > 0"));
    }
    if config.tasks.queue_capacity == 0 {
        errors.push(ValidationError::new("tasks.queue_capacity", "must be > 0"));
    }
    if config.tasks.sweep_interval_secs == 0 {
        errors.push(ValidationError::new("tasks.sweep_interval_secs", "must be > 0"));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
