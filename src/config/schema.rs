//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, request timeout).
    pub listener: ListenerConfig,

    /// Downstream device management API.
    pub downstream: DownstreamConfig,

    /// Retry configuration.
    pub retries: RetryConfig,

    /// Circuit breaker configuration.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Response cache configuration.
    pub cache: CacheConfig,

    /// Admission rate limiting configuration.
    pub rate_limit: RateLimitConfig,

    /// Background task configuration.
    pub tasks: TaskConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Default caller deadline for inbound requests, in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            request_timeout_secs: 30,
        }
    }
}

/// Downstream API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DownstreamConfig {
    /// Base URL every operation path is appended to.
    pub base_url: String,

    /// Organization key used when the caller supplies none.
    pub api_key: Option<String>,

    /// Default per-attempt timeout in seconds.
    pub timeout_secs: u64,

    /// Path template overrides keyed by operation name.
    pub endpoints: HashMap<String, String>,
}

impl Default for DownstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "https://hub.xyte.io/core/v1/organization".to_string(),
            api_key: None,
            timeout_secs: 30,
            endpoints: HashMap::new(),
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per call, first one included.
    pub max_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,

    /// Add up to 10% random jitter to each delay.
    pub jitter: bool,

    /// Treat downstream 5xx as retryable.
    pub retry_server_errors: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 2000,
            jitter: false,
            retry_server_errors: false,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive retryable failures that open the circuit.
    pub failure_threshold: u32,

    /// How long the circuit stays open, in seconds.
    pub open_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            open_secs: 30,
        }
    }
}

/// Response cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,

    /// Entry lifetime in seconds.
    pub ttl_secs: u64,

    /// Maximum number of live entries.
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 60,
            max_entries: 128,
        }
    }
}

/// Counter store backing the rate limiter.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RateLimitBackend {
    Memory,
    Redis,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable admission rate limiting.
    pub enabled: bool,

    /// Requests allowed per identity per window.
    pub limit: u64,

    /// Fixed window length in seconds.
    pub window_secs: u64,

    pub backend: RateLimitBackend,

    /// Redis URL when `backend = "redis"`.
    pub redis_url: String,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            limit: 60,
            window_secs: 60,
            backend: RateLimitBackend::Memory,
            redis_url: "redis://localhost:6379/0".to_string(),
        }
    }
}

/// Background task configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TaskConfig {
    /// Dispatch long operations to workers. When false they run inline.
    pub async_enabled: bool,

    /// Number of worker loops consuming the queue.
    pub workers: usize,

    /// Queue capacity before submissions are refused.
    pub queue_capacity: usize,

    /// JSON file persisting task records. In-memory when unset.
    pub store_path: Option<String>,

    /// Terminal tasks older than this are purged, in seconds.
    pub retention_secs: u64,

    /// Interval between retention sweeps, in seconds.
    pub sweep_interval_secs: u64,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            async_enabled: true,
            workers: 4,
            queue_capacity: 1024,
            store_path: None,
            retention_secs: 86_400,
            sweep_interval_secs: 300,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error) or a full filter directive.
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
