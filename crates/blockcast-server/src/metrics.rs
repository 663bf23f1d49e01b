//! Metrics collection and export for Blockcast.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use blockcast_core::HubStats;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "blockcast_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "blockcast_connections_active";
    pub const MESSAGES_TOTAL: &str = "blockcast_messages_total";
    pub const MESSAGES_BYTES: &str = "blockcast_messages_bytes";
    pub const PROJECTS_ACTIVE: &str = "blockcast_projects_active";
    pub const CLIENTS_REGISTERED: &str = "blockcast_clients_registered";
    pub const BROADCASTS_TOTAL: &str = "blockcast_broadcasts_total";
    pub const EVICTIONS_TOTAL: &str = "blockcast_evictions_total";
    pub const ENCODE_FAILURES_TOTAL: &str = "blockcast_encode_failures_total";
    pub const LATENCY_SECONDS: &str = "blockcast_latency_seconds";
    pub const ERRORS_TOTAL: &str = "blockcast_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(names::MESSAGES_TOTAL, "Total number of frames by direction");
    metrics::describe_counter!(names::MESSAGES_BYTES, "Total bytes of frames by direction");
    metrics::describe_gauge!(names::PROJECTS_ACTIVE, "Projects with at least one client");
    metrics::describe_gauge!(names::CLIENTS_REGISTERED, "Clients registered with the hub");
    metrics::describe_counter!(names::BROADCASTS_TOTAL, "Broadcasts fanned out by the hub");
    metrics::describe_counter!(
        names::EVICTIONS_TOTAL,
        "Clients evicted for falling behind"
    );
    metrics::describe_counter!(
        names::ENCODE_FAILURES_TOTAL,
        "Broadcasts dropped because they could not be encoded"
    );
    metrics::describe_histogram!(
        names::LATENCY_SECONDS,
        "Inbound frame handling latency in seconds"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the exporter cannot be installed.
pub fn start_metrics_server(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Copy hub statistics into gauges and counters.
pub fn report_hub_stats(stats: &HubStats) {
    gauge!(names::PROJECTS_ACTIVE).set(stats.project_count() as f64);
    gauge!(names::CLIENTS_REGISTERED).set(stats.total_clients() as f64);
    counter!(names::BROADCASTS_TOTAL).absolute(stats.broadcasts());
    counter!(names::EVICTIONS_TOTAL).absolute(stats.evictions());
    counter!(names::ENCODE_FAILURES_TOTAL).absolute(stats.encode_failures());
}

/// Report hub statistics every `interval` until aborted.
pub fn spawn_reporter(stats: Arc<HubStats>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            report_hub_stats(&stats);
        }
    })
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a frame.
pub fn record_message(bytes: usize, direction: &'static str) {
    counter!(names::MESSAGES_TOTAL, "direction" => direction).increment(1);
    counter!(names::MESSAGES_BYTES, "direction" => direction).increment(bytes as u64);
}

/// Record inbound handling latency.
pub fn record_latency(seconds: f64) {
    histogram!(names::LATENCY_SECONDS).record(seconds);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}
