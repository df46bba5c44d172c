//! Error → HTTP response mapping.
//!
//! Every failure leaves the gateway as `{"error": <kind>, "message": <text>}` with a status
//! derived from the kind, whether it came from the executor, a task or admission.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::downstream::{ErrorKind, GatewayError};

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorKind::InvalidParams => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::BackendUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::NetworkError | ErrorKind::DownstreamServerError | ErrorKind::UnknownDownstreamError => {
            StatusCode::BAD_GATEWAY
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.kind,
            "message": self.message,
        }));
        (status_for(self.kind), body).into_response()
    }
}
