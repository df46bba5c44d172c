//! Device management gateway library.
//!
//! Fronts a device management HTTP API with a reliability core: every downstream call
//! goes through one shared [`resilience::ResilientExecutor`] (cache, circuit breaker,
//! retry with backoff, caller deadline), callers are admitted by an atomic fixed-window
//! rate limiter, and slow commands run as pollable background tasks.

pub mod config;
pub mod downstream;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod security;
pub mod tasks;

pub use config::schema::GatewayConfig;
pub use downstream::{ErrorKind, GatewayError};
pub use http::GatewayServer;
pub use lifecycle::{Gateway, Shutdown};
