//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_downstream_requests_total` (counter): calls by operation, outcome
//! - `gateway_downstream_latency_seconds` (histogram): per-call latency, retries included
//! - `gateway_downstream_errors_total` (counter): terminal failures by operation, kind
//! - `gateway_cache_hits_total` / `gateway_cache_misses_total` (counter): by operation
//! - `gateway_circuit_open_total` (counter): times the breaker opened
//! - `gateway_rate_limited_total` (counter): admission rejections
//! - `gateway_tasks_total` (counter): task transitions by status
//!
//! Recording goes through the `metrics` facade and is a no-op until a recorder is installed.

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Instant;

use crate::downstream::ErrorKind;

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_downstream(operation: &str, outcome: &'static str, start: Instant) {
    counter!(
        "gateway_downstream_requests_total",
        "operation" => operation.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    histogram!(
        "gateway_downstream_latency_seconds",
        "operation" => operation.to_string()
    )
    .record(start.elapsed().as_secs_f64());
}

pub fn record_downstream_error(operation: &str, kind: ErrorKind) {
    counter!(
        "gateway_downstream_errors_total",
        "operation" => operation.to_string(),
        "kind" => kind.as_str()
    )
    .increment(1);
}

pub fn record_cache_hit(operation: &str) {
    counter!("gateway_cache_hits_total", "operation" => operation.to_string()).increment(1);
}

pub fn record_cache_miss(operation: &str) {
    counter!("gateway_cache_misses_total", "operation" => operation.to_string()).increment(1);
}

pub fn record_circuit_open() {
    counter!("gateway_circuit_open_total").increment(1);
}

pub fn record_rate_limited(reason: &'static str) {
    counter!("gateway_rate_limited_total", "reason" => reason).increment(1);
}

pub fn record_task(status: &'static str) {
    counter!("gateway_tasks_total", "status" => status).increment(1);
}
