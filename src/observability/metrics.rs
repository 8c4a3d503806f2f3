//! Metrics collection and exposition.
//!
//! # Metrics
//! - `router_requests_total` (counter): routed requests by outcome and status
//! - `router_request_duration_seconds` (histogram): end-to-end latency
//! - `router_discovery_total` (counter): resolutions by source (live, fallback_hit, fallback_miss)
//! - `router_breaker_transitions_total` (counter): breaker transitions by target state
//! - `router_instances` (gauge): known instances by probe verdict (healthy, unhealthy, unknown)
//! - `router_fallback_cache_entries` (gauge): cached services
//!
//! Recording without an installed exporter is a no-op, so unit tests need no setup.

use std::net::SocketAddr;
use std::time::Instant;
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::load_balancer::backend::HealthCounts;

/// Install the Prometheus exporter with its own HTTP listener.
/// Must be called from within the Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(outcome: &'static str, status: u16, start: Instant) {
    metrics::counter!(
        "router_requests_total",
        "outcome" => outcome,
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!("router_request_duration_seconds", "outcome" => outcome)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_discovery(source: &'static str) {
    metrics::counter!("router_discovery_total", "source" => source).increment(1);
}

pub fn record_breaker_transition(to: &'static str) {
    metrics::counter!("router_breaker_transitions_total", "to" => to).increment(1);
}

pub fn record_instance_health(counts: HealthCounts) {
    metrics::gauge!("router_instances", "health" => "healthy").set(counts.healthy as f64);
    metrics::gauge!("router_instances", "health" => "unhealthy").set(counts.unhealthy as f64);
    metrics::gauge!("router_instances", "health" => "unknown").set(counts.unknown as f64);
}

pub fn record_cache_entries(count: usize) {
    metrics::gauge!("router_fallback_cache_entries").set(count as f64);
}
