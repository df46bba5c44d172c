//! Resilient request executor.
//!
//! Wraps one downstream call with, in order:
//! 1. cache lookup (hit bypasses everything else)
//! 2. circuit check (open → `backend_unavailable`, no network attempt)
//! 3. deadline check (`min(deadline - now, default_timeout)` per attempt)
//! 4. attempt, with exponential backoff between retryable failures
//!
//! The circuit is consulted once, on entry. A breaker that trips part way through a call
//! does not cut that call's retries short; it only fails the calls that follow.
//!
//! One executor per downstream target, built at startup and shared behind an `Arc`, so
//! the cache and the breaker see every request rather than starting cold each time.

use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::GatewayConfig;
use crate::downstream::{DownstreamRequest, Failure, GatewayError, GatewayResult, Transport};
use crate::observability::metrics;
use crate::resilience::cache::{CacheStats, TtlCache};
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitSnapshot};
use crate::resilience::retries::RetryPolicy;
use crate::resilience::timeouts::{attempt_timeout, leaves_time_for};

/// Health figures for status endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutorStats {
    pub cache: Option<CacheStats>,
    pub circuit: CircuitSnapshot,
}

pub struct ResilientExecutor {
    transport: Arc<dyn Transport>,
    cache: Option<TtlCache<Value>>,
    breaker: CircuitBreaker,
    policy: RetryPolicy,
    default_timeout: Duration,
}

impl ResilientExecutor {
    pub fn new(
        transport: Arc<dyn Transport>,
        policy: RetryPolicy,
        breaker: CircuitBreaker,
        cache: Option<TtlCache<Value>>,
        default_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            cache,
            breaker,
            policy,
            default_timeout,
        }
    }

    pub fn from_config(transport: Arc<dyn Transport>, config: &GatewayConfig) -> Self {
        let cache = config.cache.enabled.then(|| {
            TtlCache::new(
                Duration::from_secs(config.cache.ttl_secs),
                config.cache.max_entries,
            )
        });
        Self::new(
            transport,
            RetryPolicy::from_config(&config.retries),
            CircuitBreaker::from_config(&config.circuit_breaker),
            cache,
            Duration::from_secs(config.downstream.timeout_secs),
        )
    }

    pub fn stats(&self) -> ExecutorStats {
        ExecutorStats {
            cache: self.cache.as_ref().map(TtlCache::stats),
            circuit: self.breaker.snapshot(Instant::now()),
        }
    }

    /// Execute a request, failing with a classified error on terminal failure.
    pub async fn execute(&self, request: &DownstreamRequest, deadline: Option<Instant>) -> GatewayResult<Value> {
        let start = std::time::Instant::now();
        let result = self.execute_inner(request, deadline).await;

        match &result {
            Ok(_) => metrics::record_downstream(&request.operation, "success", start),
            Err(e) => {
                metrics::record_downstream(&request.operation, "error", start);
                metrics::record_downstream_error(&request.operation, e.kind);
            }
        }
        result
    }

    async fn execute_inner(&self, request: &DownstreamRequest, deadline: Option<Instant>) -> GatewayResult<Value> {
        let cache = self.cache.as_ref().filter(|_| request.cacheable);
        let cache_key = cache.map(|_| request.cache_key());

        if let (Some(cache), Some(key)) = (cache, cache_key.as_deref()) {
            if let Some(value) = cache.get(key) {
                metrics::record_cache_hit(&request.operation);
                tracing::debug!(operation = %request.operation, "Cache hit");
                return Ok(value);
            }
            metrics::record_cache_miss(&request.operation);
        }

        if !self.breaker.allows(Instant::now()) {
            tracing::warn!(operation = %request.operation, "Circuit open, failing fast");
            return Err(GatewayError::backend_unavailable());
        }

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let timeout = attempt_timeout(deadline, self.default_timeout, Instant::now())?;

            let failure = match self.attempt(request, timeout).await {
                Ok(value) => {
                    self.breaker.record_success();
                    if let (Some(cache), Some(key)) = (cache, cache_key) {
                        cache.insert(key, value.clone());
                    }
                    return Ok(value);
                }
                Err(failure) => failure,
            };

            if !self.policy.is_retryable(&failure) {
                tracing::debug!(
                    operation = %request.operation,
                    attempt,
                    error = %failure,
                    "Non-retryable downstream failure"
                );
                return Err(GatewayError::from_failure(&failure));
            }

            let opened = self.breaker.record_failure(Instant::now());
            if opened {
                metrics::record_circuit_open();
                tracing::warn!(operation = %request.operation, attempt, "Circuit opened");
            }

            if attempt >= self.policy.max_attempts {
                tracing::error!(
                    operation = %request.operation,
                    attempt,
                    error = %failure,
                    "Downstream call failed"
                );
                return Err(GatewayError::from_failure(&failure));
            }

            let delay = self.policy.delay_after(attempt);
            if !leaves_time_for(deadline, delay, Instant::now()) {
                return Err(GatewayError::deadline_exceeded(format!(
                    "deadline reached after {} attempt(s), last failure: {}",
                    attempt, failure
                )));
            }

            tracing::info!(
                operation = %request.operation,
                attempt,
                delay = ?delay,
                error = %failure,
                "Retrying downstream call"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn attempt(&self, request: &DownstreamRequest, timeout: Duration) -> Result<Value, Failure> {
        match tokio::time::timeout(timeout, self.transport.send(request, timeout)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(Failure::Timeout(timeout.as_millis() as u64)),
        }
    }
}
