//! Fixed-window admission rate limiting.
//!
//! Each request performs one atomic increment-with-expiry on a counter keyed by
//! `(identity, window index)`; the request is admitted when the post-increment count is
//! within the limit. There is no read-then-write step, so concurrent gateways sharing a
//! store cannot both observe room for the same last slot.
//!
//! Fixed windows allow up to `limit` requests right before a boundary and `limit` more
//! right after it.

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::time::Instant;

use crate::config::RateLimitConfig;
use crate::downstream::{ErrorKind, GatewayError};
use crate::observability::metrics;
use crate::security::identity::CallerIdentity;

/// Errors from a counter store.
#[derive(Debug, Error)]
pub enum CounterStoreError {
    #[error("counter store unavailable: {0}")]
    Unavailable(String),
}

/// Shared counting store.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically increment `key` and return the new count. When the increment creates
    /// the counter, its expiry is set to `ttl`.
    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> Result<u64, CounterStoreError>;
}

#[derive(Debug, Clone, Copy)]
struct Counter {
    count: u64,
    expires_at: Instant,
}

/// Process-local counter store.
///
/// Increments run under the map's per-shard lock, which makes each one atomic.
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    counters: DashMap<String, Counter>,
}

const PURGE_THRESHOLD: usize = 10_000;

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    fn purge_expired(&self, now: Instant) {
        self.counters.retain(|_, counter| now < counter.expires_at);
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> Result<u64, CounterStoreError> {
        let now = Instant::now();
        let count = {
            let mut counter = self.counters.entry(key.to_string()).or_insert(Counter {
                count: 0,
                expires_at: now + ttl,
            });
            if now >= counter.expires_at {
                counter.count = 0;
                counter.expires_at = now + ttl;
            }
            counter.count += 1;
            counter.count
        };

        if count == 1 && self.counters.len() > PURGE_THRESHOLD {
            self.purge_expired(now);
        }
        Ok(count)
    }
}

/// Admission limiter over a shared counter store.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self { store }
    }

    /// Consume one slot for `identity` in the current wall-clock window.
    pub async fn consume(&self, identity: &str, limit: u64, window_secs: u64) -> Result<bool, CounterStoreError> {
        let window_secs = window_secs.max(1);
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        self.consume_in_window(identity, limit, window_secs, now / window_secs)
            .await
    }

    /// Consume one slot for `identity` in an explicit window.
    pub async fn consume_in_window(
        &self,
        identity: &str,
        limit: u64,
        window_secs: u64,
        window_index: u64,
    ) -> Result<bool, CounterStoreError> {
        let key = format!("rl:{}:{}", identity, window_index);
        let count = self
            .store
            .incr_with_expiry(&key, Duration::from_secs(window_secs.max(1)))
            .await?;
        Ok(count <= limit)
    }
}

/// State for the admission middleware.
#[derive(Clone)]
pub struct AdmissionState {
    pub limiter: RateLimiter,
    pub config: RateLimitConfig,
}

/// Identify the caller, then admit or reject.
///
/// Rejects with 429 when over the limit and fails closed with 503 when the counter store
/// cannot be reached.
pub async fn admission_middleware(
    State(state): State<Arc<AdmissionState>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let identity = CallerIdentity::from_headers(request.headers(), peer);

    if state.config.enabled {
        match state
            .limiter
            .consume(&identity.key_id, state.config.limit, state.config.window_secs)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(client = %identity.key_id, "Rate limit exceeded");
                metrics::record_rate_limited("window_limit");
                return GatewayError::new(ErrorKind::RateLimited, "rate limit exceeded").into_response();
            }
            Err(e) => {
                tracing::error!(client = %identity.key_id, error = %e, "Rate limiter unavailable, rejecting");
                metrics::record_rate_limited("store_unavailable");
                return GatewayError::new(ErrorKind::BackendUnavailable, "rate limiter unavailable")
                    .into_response();
            }
        }
    }

    request.extensions_mut().insert(identity);
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter() -> RateLimiter {
        RateLimiter::new(Arc::new(MemoryCounterStore::new()))
    }

    #[tokio::test]
    async fn test_allows_limit_then_rejects() {
        let limiter = limiter();
        assert!(limiter.consume_in_window("a", 2, 60, 7).await.unwrap());
        assert!(limiter.consume_in_window("a", 2, 60, 7).await.unwrap());
        assert!(!limiter.consume_in_window("a", 2, 60, 7).await.unwrap());
        assert!(limiter.consume_in_window("b", 2, 60, 7).await.unwrap());
    }

    #[tokio::test]
    async fn test_new_window_resets() {
        let limiter = limiter();
        for _ in 0..2 {
            limiter.consume_in_window("a", 2, 60, 7).await.unwrap();
        }
        assert!(!limiter.consume_in_window("a", 2, 60, 7).await.unwrap());
        // Burst at the boundary: the next window admits a full `limit` again.
        assert!(limiter.consume_in_window("a", 2, 60, 8).await.unwrap());
        assert!(limiter.consume_in_window("a", 2, 60, 8).await.unwrap());
        assert!(!limiter.consume_in_window("a", 2, 60, 8).await.unwrap());
    }

    #[tokio::test]
    async fn test_consume_wall_clock_window() {
        let limiter = limiter();
        // A year-long window keeps the test clear of boundaries.
        let window = 365 * 24 * 3600;
        assert!(limiter.consume("id", 2, window).await.unwrap());
        assert!(limiter.consume("id", 2, window).await.unwrap());
        assert!(!limiter.consume("id", 2, window).await.unwrap());
        assert!(limiter.consume("other", 2, window).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_memory_counter_expires() {
        let store = MemoryCounterStore::new();
        assert_eq!(store.incr_with_expiry("k", Duration::from_secs(60)).await.unwrap(), 1);
        assert_eq!(store.incr_with_expiry("k", Duration::from_secs(60)).await.unwrap(), 2);

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(store.incr_with_expiry("k", Duration::from_secs(60)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_atomic() {
        let store = Arc::new(MemoryCounterStore::new());
        let limiter = RateLimiter::new(store.clone());

        let mut handles = Vec::new();
        for _ in 0..50 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter.consume_in_window("hot", 10, 60, 1).await.unwrap()
            }));
        }

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 10);
        assert_eq!(store.len(), 1);
    }
}
