//! Downstream device management API.
//!
//! # Data Flow
//! ```text
//! handler / task worker
//!     → operations.rs (name + params → DownstreamRequest)
//!     → resilience::executor (cache, circuit, retry, deadline)
//!     → client.rs (one HTTP attempt)
//!     → types.rs (non-2xx / connect / timeout → ErrorKind)
//! ```
//!
//! # Design Decisions
//! - The API is treated as "an HTTP endpoint returning JSON or a status code"
//! - Classification is a pure function shared by sync and async call paths

pub mod client;
pub mod operations;
pub mod types;

pub use client::{HttpTransport, Transport};
pub use operations::{DownstreamRequest, Operation, OperationTable};
pub use types::{classify, ErrorKind, Failure, GatewayError, GatewayResult};
