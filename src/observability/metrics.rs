//! Metrics collection and exposition.
//!
//! # Metrics
//! - `dev_requests_total` (counter): requests by method, status, kind
//! - `dev_request_duration_seconds` (histogram): request latency by kind
//! - `dev_builds_total` (counter): builds by builder, outcome
//! - `dev_build_duration_seconds` (histogram): build latency by builder
//! - `dev_build_dedup_total` (counter): requests that joined a running build
//! - `dev_assets` (gauge): entries in the asset store

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

/// Record a finished request. `kind` is how it was answered (static,
/// function, proxy, redirect, error).
pub fn record_request(method: &str, status: u16, kind: &'static str, start: Instant) {
    ::metrics::counter!(
        "dev_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string(),
        "kind" => kind
    )
    .increment(1);
    ::metrics::histogram!("dev_request_duration_seconds", "kind" => kind).record(start.elapsed().as_secs_f64());
}

/// Record a finished build.
pub fn record_build(builder: &str, success: bool, start: Instant) {
    let outcome = if success { "success" } else { "failure" };
    ::metrics::counter!("dev_builds_total", "builder" => builder.to_string(), "outcome" => outcome).increment(1);
    ::metrics::histogram!("dev_build_duration_seconds", "builder" => builder.to_string())
        .record(start.elapsed().as_secs_f64());
}

/// Record a request that joined an in-flight build.
pub fn record_build_dedup(builder: &str) {
    ::metrics::counter!("dev_build_dedup_total", "builder" => builder.to_string()).increment(1);
}

/// Update the asset store size gauge.
pub fn record_asset_count(count: usize) {
    ::metrics::gauge!("dev_assets").set(count as f64);
}
