//! HTTP server setup.
//!
//! # Responsibilities
//! - Build the Axum router with every gateway route
//! - Wire middleware: request ID, tracing, admission, backstop timeout
//! - Serve until shutdown is signalled

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::GatewayConfig;
use crate::downstream::OperationTable;
use crate::http::handlers;
use crate::resilience::ResilientExecutor;
use crate::security::{admission_middleware, AdmissionState};
use crate::tasks::TaskManager;

/// Headroom past the request timeout before the backstop layer aborts a request. The
/// executor's own deadline handling should always answer first.
const TIMEOUT_GRACE: Duration = Duration::from_secs(5);

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub executor: Arc<ResilientExecutor>,
    pub operations: Arc<OperationTable>,
    pub tasks: Arc<TaskManager>,
    pub request_timeout: Duration,
}

/// HTTP server for the gateway.
pub struct GatewayServer {
    router: Router,
}

impl GatewayServer {
    pub fn new(config: &GatewayConfig, state: AppState, admission: Arc<AdmissionState>) -> Self {
        let router = Self::build_router(config, state, admission);
        Self { router }
    }

    /// Build the Axum router with all middleware layers.
    ///
    /// `/healthz` sits outside admission so probes are never rate limited.
    #[allow(deprecated)]
    fn build_router(config: &GatewayConfig, state: AppState, admission: Arc<AdmissionState>) -> Router {
        let api = Router::new()
            .route("/v1/devices", get(handlers::list_devices))
            .route("/v1/devices/{device_id}", get(handlers::get_device))
            .route("/v1/devices/{device_id}/commands/async", post(handlers::submit_command))
            .route("/v1/tickets", get(handlers::list_tickets))
            .route("/v1/incidents", get(handlers::list_incidents))
            .route("/v1/operations/{name}", post(handlers::invoke_operation))
            .route("/v1/tasks/{task_id}", get(handlers::task_status))
            .route("/v1/admin/status", get(handlers::admin_status))
            .route_layer(middleware::from_fn_with_state(admission, admission_middleware));

        let backstop = Duration::from_secs(config.listener.request_timeout_secs) + TIMEOUT_GRACE;

        Router::new()
            .route("/healthz", get(handlers::healthz))
            .merge(api)
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                    .layer(TraceLayer::new_for_http())
                    .layer(PropagateRequestIdLayer::x_request_id())
                    .layer(TimeoutLayer::new(backstop)),
            )
    }

    /// The fully layered router, for in-process use.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve on `listener` until `shutdown` fires.
    pub async fn run(self, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::config::GatewayConfig;
    use crate::downstream::{DownstreamRequest, Failure, Transport};
    use crate::lifecycle::Gateway;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    struct EchoTransport;

    #[async_trait]
    impl Transport for EchoTransport {
        async fn send(&self, request: &DownstreamRequest, _timeout: Duration) -> Result<Value, Failure> {
            Ok(json!({ "path": request.path, "tenant": request.credential }))
        }
    }

    async fn router(config: GatewayConfig) -> axum::Router {
        Gateway::with_transport(config, Arc::new(EchoTransport))
            .await
            .unwrap()
            .router()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_device_route_forwards_tenant_key() {
        let app = router(GatewayConfig::default()).await;
        let response = app
            .oneshot(
                Request::get("/v1/devices/d-1")
                    .header("x-api-key", "tenant-key")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
        assert_eq!(body_json(response).await, json!({"path": "/devices/d-1", "tenant": "tenant-key"}));
    }

    #[tokio::test]
    async fn test_invalid_timeout_header() {
        let app = router(GatewayConfig::default()).await;
        let response = app
            .oneshot(
                Request::get("/v1/devices")
                    .header("x-request-timeout-ms", "soon")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "invalid_params");
    }

    #[tokio::test]
    async fn test_admin_status_lists_operations() {
        let app = router(GatewayConfig::default()).await;
        let response = app
            .oneshot(Request::get("/v1/admin/status").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "operational");
        assert_eq!(body["downstream"]["circuit"]["open"], false);
        assert_eq!(body["operations"].as_array().unwrap().len(), 17);
    }

    #[tokio::test]
    async fn test_malformed_operation_body() {
        let app = router(GatewayConfig::default()).await;
        let response = app
            .oneshot(
                Request::post("/v1/operations/get_device")
                    .header("content-type", "application/json")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "invalid_params");
    }
}
