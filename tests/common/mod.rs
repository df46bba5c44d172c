//! Shared utilities for integration tests.

use axum::{
    extract::Request,
    http::{Method, StatusCode},
    response::IntoResponse,
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;

use device_gateway::config::GatewayConfig;
use device_gateway::lifecycle::{Gateway, Shutdown};

/// A mock device management API.
#[allow(dead_code)]
pub struct MockDownstream {
    pub addr: SocketAddr,
    pub calls: Arc<AtomicUsize>,
}

#[allow(dead_code)]
impl MockDownstream {
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Start a programmable mock downstream. `f` receives the method and path (with any
/// query string) of each call and answers with a status and a JSON body.
#[allow(dead_code)]
pub async fn start_programmable_backend<F, Fut>(f: F) -> MockDownstream
where
    F: Fn(Method, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let f = Arc::new(f);

    let counter = calls.clone();
    let app = Router::new().fallback(move |request: Request| {
        let f = f.clone();
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            let target = request
                .uri()
                .path_and_query()
                .map(|pq| pq.as_str().to_string())
                .unwrap_or_default();
            let (status, body) = f(request.method().clone(), target).await;
            (
                StatusCode::from_u16(status).unwrap(),
                [("content-type", "application/json")],
                body,
            )
                .into_response()
        }
    });

    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    MockDownstream { addr, calls }
}

/// Config pointing at `downstream` with fast retries.
#[allow(dead_code)]
pub fn test_config(downstream: &MockDownstream) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.downstream.base_url = downstream.base_url();
    config.downstream.api_key = Some("service-key".to_string());
    config.downstream.timeout_secs = 5;
    config.retries.base_delay_ms = 10;
    config.retries.max_delay_ms = 50;
    config.rate_limit.enabled = false;
    config.tasks.workers = 2;
    config
}

/// Start a gateway on an ephemeral port. Returns its address and the shutdown handle.
#[allow(dead_code)]
pub async fn spawn_gateway(config: GatewayConfig) -> (SocketAddr, Shutdown) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();

    let gateway = Gateway::build(config).await.unwrap();
    let server_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let _ = gateway.run(listener, server_shutdown).await;
    });

    (addr, shutdown)
}

#[allow(dead_code)]
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}
