//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define proxy metrics (requests, latency, tunnels, egress dials)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `aggregator_proxy_requests_total` (counter): proxied requests by API service, status
//! - `aggregator_proxy_request_duration_seconds` (histogram): time to response head
//! - `aggregator_proxy_upgrade_tunnels` (gauge): live upgrade tunnels
//! - `aggregator_proxy_egress_dials_total` (counter): egress hook dials by result
//!
//! # Design Decisions
//! - Recording is a no-op until a recorder is installed, so tests need no setup
//! - Labels are bounded: registration names and status codes only

use axum::http::StatusCode;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use std::net::SocketAddr;
use std::time::Duration;

pub const REQUESTS_TOTAL: &str = "aggregator_proxy_requests_total";
pub const REQUEST_DURATION: &str = "aggregator_proxy_request_duration_seconds";
pub const UPGRADE_TUNNELS: &str = "aggregator_proxy_upgrade_tunnels";
pub const EGRESS_DIALS_TOTAL: &str = "aggregator_proxy_egress_dials_total";

/// Install the Prometheus recorder and serve it on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_request(api_service: &str, status: StatusCode, elapsed: Duration) {
    counter!(
        REQUESTS_TOTAL,
        "api_service" => api_service.to_string(),
        "status" => status.as_u16().to_string()
    )
    .increment(1);
    histogram!(REQUEST_DURATION, "api_service" => api_service.to_string()).record(elapsed.as_secs_f64());
}

pub fn tunnel_opened() {
    gauge!(UPGRADE_TUNNELS).increment(1.0);
}

pub fn tunnel_closed() {
    gauge!(UPGRADE_TUNNELS).decrement(1.0);
}

pub fn record_egress_dial(success: bool) {
    let result = if success { "success" } else { "error" };
    counter!(EGRESS_DIALS_TOTAL, "result" => result).increment(1);
}
