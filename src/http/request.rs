//! Per-request context.
//!
//! Pulls the request ID, the caller identity set by admission, and the caller deadline
//! out of the request before a handler runs.

use axum::{extract::FromRequestParts, http::request::Parts};
use std::time::Duration;
use tokio::time::Instant;

use crate::downstream::GatewayError;
use crate::http::server::AppState;
use crate::security::CallerIdentity;

pub const X_REQUEST_ID: &str = "x-request-id";
pub const X_REQUEST_TIMEOUT_MS: &str = "x-request-timeout-ms";

#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub identity: Option<CallerIdentity>,
    /// Caller deadline, never later than the listener's request timeout.
    pub deadline: Instant,
}

impl RequestContext {
    pub fn credential(&self) -> Option<String> {
        self.identity.as_ref().and_then(|id| id.credential.clone())
    }
}

impl FromRequestParts<AppState> for RequestContext {
    type Rejection = GatewayError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let request_id = parts
            .headers
            .get(X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown")
            .to_string();

        let budget = match parts.headers.get(X_REQUEST_TIMEOUT_MS) {
            Some(value) => {
                let ms = value
                    .to_str()
                    .ok()
                    .and_then(|v| v.trim().parse::<u64>().ok())
                    .ok_or_else(|| {
                        GatewayError::invalid_params(format!("{} must be a whole number of milliseconds", X_REQUEST_TIMEOUT_MS))
                    })?;
                Duration::from_millis(ms).min(state.request_timeout)
            }
            None => state.request_timeout,
        };

        Ok(Self {
            request_id,
            identity: parts.extensions.get::<CallerIdentity>().cloned(),
            deadline: Instant::now() + budget,
        })
    }
}
