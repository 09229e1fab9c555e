//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define hosting metrics (requests, latency, cache behavior, throttling)
//! - Expose Prometheus-compatible metrics endpoint
//! - Track per-application metrics
//!
//! # Metrics
//! - `sitehost_requests_total` (counter): requests by app, status
//! - `sitehost_request_duration_seconds` (histogram): latency by app
//! - `sitehost_cache_hits_total` / `sitehost_cache_misses_total` (counters)
//! - `sitehost_regenerations_total` (counter): content generated
//! - `sitehost_rate_limited_total` (counter): requests answered with 429
//!
//! # Design Decisions
//! - Recording without an installed exporter is a no-op
//! - Labels for app and status code only (bounded cardinality)

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "metrics endpoint started"),
        Err(e) => tracing::error!(address = %addr, error = %e, "failed to start metrics endpoint"),
    }
}

pub fn record_request(app: &str, status: u16, start: Instant) {
    ::metrics::counter!(
        "sitehost_requests_total",
        "app" => app.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    ::metrics::histogram!("sitehost_request_duration_seconds", "app" => app.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_cache(app: &str, hit: bool) {
    if hit {
        ::metrics::counter!("sitehost_cache_hits_total", "app" => app.to_string()).increment(1);
    } else {
        ::metrics::counter!("sitehost_cache_misses_total", "app" => app.to_string()).increment(1);
    }
}

pub fn record_regeneration(app: &str) {
    ::metrics::counter!("sitehost_regenerations_total", "app" => app.to_string()).increment(1);
}

pub fn record_rate_limited(app: &str) {
    ::metrics::counter!("sitehost_rate_limited_total", "app" => app.to_string()).increment(1);
}
