//! HTTP surface of the gateway.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum router, request ID, tracing, admission)
//!     → request.rs (request ID, caller identity, deadline)
//!     → handlers.rs (operation → executor, or → task manager)
//!     → response.rs (GatewayError → status + JSON body)
//! ```

pub mod handlers;
pub mod request;
pub mod response;
pub mod server;

pub use request::{RequestContext, X_REQUEST_ID, X_REQUEST_TIMEOUT_MS};
pub use server::{AppState, GatewayServer};
