//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to downstream:
//!     → executor.rs
//!         → cache.rs (idempotent reads served while fresh)
//!         → circuit_breaker.rs (fail fast while open)
//!         → timeouts.rs (per-attempt timeout from the caller deadline)
//!         → retries.rs + backoff.rs (retry transient failures with exponential delay)
//! ```
//!
//! # Design Decisions
//! - Every external call has a deadline
//! - Retries only on connection errors and timeouts unless configured otherwise
//! - Circuit breaker and cache are shared per downstream target, never per request
//! - Each attempt returns an explicit `Result`; the retry loop inspects the failure

pub mod backoff;
pub mod cache;
pub mod circuit_breaker;
pub mod executor;
pub mod retries;
pub mod timeouts;

pub use cache::TtlCache;
pub use circuit_breaker::CircuitBreaker;
pub use executor::{ExecutorStats, ResilientExecutor};
pub use retries::RetryPolicy;
