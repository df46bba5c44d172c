//! Error taxonomy and failure classification for downstream calls.
//!
//! Every failure that can reach a caller is reduced to one [`ErrorKind`], whether it
//! is returned from a synchronous call or recorded on a background task.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Closed set of error kinds surfaced by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Downstream 401/403.
    Unauthorized,
    /// Downstream 400/422, or a malformed identifier supplied to the gateway.
    InvalidParams,
    /// Downstream 404.
    NotFound,
    /// Downstream 429, or local admission rejection.
    RateLimited,
    /// Circuit breaker is open.
    BackendUnavailable,
    /// Caller deadline elapsed before or while attempting.
    DeadlineExceeded,
    /// Connection-level failure after exhausting retries.
    NetworkError,
    /// Downstream 5xx.
    DownstreamServerError,
    /// Anything else.
    UnknownDownstreamError,
}

impl ErrorKind {
    /// Wire name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::InvalidParams => "invalid_params",
            ErrorKind::NotFound => "not_found",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::BackendUnavailable => "backend_unavailable",
            ErrorKind::DeadlineExceeded => "deadline_exceeded",
            ErrorKind::NetworkError => "network_error",
            ErrorKind::DownstreamServerError => "downstream_server_error",
            ErrorKind::UnknownDownstreamError => "unknown_downstream_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified, caller-visible error.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct GatewayError {
    pub kind: ErrorKind,
    pub message: String,
}

impl GatewayError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidParams, message)
    }

    pub fn backend_unavailable() -> Self {
        Self::new(ErrorKind::BackendUnavailable, "circuit open, downstream considered unavailable")
    }

    pub fn deadline_exceeded(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DeadlineExceeded, message)
    }

    /// Build an error from a raw transport failure.
    pub fn from_failure(failure: &Failure) -> Self {
        Self::new(classify(failure), failure.to_string())
    }
}

/// Result type for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Outcome of a single failed attempt, before classification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Failure {
    /// The downstream answered with a non-2xx status.
    #[error("downstream returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// The connection could not be established or broke mid-request.
    #[error("connection error: {0}")]
    Connect(String),

    /// The attempt hit its timeout.
    #[error("request timed out after {0} ms")]
    Timeout(u64),

    /// Anything the transport could not place in the other variants.
    #[error("{0}")]
    Other(String),
}

impl Failure {
    /// Whether the failure is transient at the connection level.
    pub fn is_transport(&self) -> bool {
        matches!(self, Failure::Connect(_) | Failure::Timeout(_))
    }

    /// Whether the failure is a downstream 5xx.
    pub fn is_server_error(&self) -> bool {
        matches!(self, Failure::Status { status, .. } if (500..=599).contains(status))
    }
}

/// Map a raw failure onto its error kind. Total: every input has exactly one kind.
pub fn classify(failure: &Failure) -> ErrorKind {
    match failure {
        Failure::Status { status, .. } => match *status {
            401 | 403 => ErrorKind::Unauthorized,
            400 | 422 => ErrorKind::InvalidParams,
            404 => ErrorKind::NotFound,
            429 => ErrorKind::RateLimited,
            500..=599 => ErrorKind::DownstreamServerError,
            _ => ErrorKind::UnknownDownstreamError,
        },
        Failure::Connect(_) => ErrorKind::NetworkError,
        Failure::Timeout(_) => ErrorKind::DeadlineExceeded,
        Failure::Other(_) => ErrorKind::UnknownDownstreamError,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16) -> Failure {
        Failure::Status {
            status: code,
            body: String::new(),
        }
    }

    #[test]
    fn test_status_classification() {
        assert_eq!(classify(&status(401)), ErrorKind::Unauthorized);
        assert_eq!(classify(&status(403)), ErrorKind::Unauthorized);
        assert_eq!(classify(&status(400)), ErrorKind::InvalidParams);
        assert_eq!(classify(&status(422)), ErrorKind::InvalidParams);
        assert_eq!(classify(&status(404)), ErrorKind::NotFound);
        assert_eq!(classify(&status(429)), ErrorKind::RateLimited);
        assert_eq!(classify(&status(500)), ErrorKind::DownstreamServerError);
        assert_eq!(classify(&status(503)), ErrorKind::DownstreamServerError);
        assert_eq!(classify(&status(409)), ErrorKind::UnknownDownstreamError);
        assert_eq!(classify(&status(302)), ErrorKind::UnknownDownstreamError);
    }

    #[test]
    fn test_transport_classification() {
        assert_eq!(classify(&Failure::Connect("refused".into())), ErrorKind::NetworkError);
        assert_eq!(classify(&Failure::Timeout(100)), ErrorKind::DeadlineExceeded);
        assert_eq!(
            classify(&Failure::Other("bad json".into())),
            ErrorKind::UnknownDownstreamError
        );
        assert!(Failure::Timeout(5).is_transport());
        assert!(!status(500).is_transport());
        assert!(status(502).is_server_error());
    }

    #[test]
    fn test_error_wire_format() {
        let err = GatewayError::new(ErrorKind::DownstreamServerError, "boom");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "downstream_server_error");
        assert_eq!(json["message"], "boom");
        assert_eq!(err.to_string(), "downstream_server_error: boom");
    }
}
