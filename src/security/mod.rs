//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → identity.rs (hash the caller's API key, or fall back to peer IP)
//!     → rate_limit.rs (one atomic increment per request, 429 over the limit)
//!     → Pass to handlers with `CallerIdentity` in the request extensions
//! ```
//!
//! # Design Decisions
//! - Fail closed: an unreachable counter store rejects with 503
//! - Raw API keys never appear in counter keys or logs

pub mod identity;
pub mod rate_limit;
#[cfg(feature = "redis")]
pub mod redis_store;

pub use identity::CallerIdentity;
pub use rate_limit::{admission_middleware, AdmissionState, CounterStore, CounterStoreError, MemoryCounterStore, RateLimiter};
#[cfg(feature = "redis")]
pub use redis_store::RedisCounterStore;
