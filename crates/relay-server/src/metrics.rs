//! Metrics collection and export for Relay.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tenvis_relay_core::outcome;
use tracing::info;

/// Metric names.
pub mod names {
    pub const PEERS_TOTAL: &str = "relay_peers_total";
    pub const PEERS_ACTIVE: &str = "relay_peers_active";
    pub const LISTENERS_ACTIVE: &str = "relay_listeners_active";
    pub const FRAMES_TOTAL: &str = "relay_frames_total";
    pub const COMMANDS_TOTAL: &str = "relay_commands_total";
    pub const COMMAND_LATENCY_SECONDS: &str = "relay_command_latency_seconds";
    pub const ERRORS_TOTAL: &str = "relay_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::PEERS_TOTAL,
        "Total number of peer connections since server start"
    );
    metrics::describe_gauge!(names::PEERS_ACTIVE, "Current number of peer connections");
    metrics::describe_gauge!(
        names::LISTENERS_ACTIVE,
        "Current number of passive listener streams"
    );
    metrics::describe_counter!(names::FRAMES_TOTAL, "Peer frames processed, by kind");
    metrics::describe_counter!(names::COMMANDS_TOTAL, "Commands submitted, by outcome");
    metrics::describe_histogram!(
        names::COMMAND_LATENCY_SECONDS,
        "Time from command submission to result in seconds"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a processed peer frame.
pub fn record_frame(kind: &'static str) {
    counter!(names::FRAMES_TOTAL, "kind" => kind).increment(1);
}

/// Label for a command result.
#[must_use]
pub fn outcome_label(result: &str) -> &'static str {
    match result {
        outcome::FAILED => "failed",
        outcome::SPECIAL => "special",
        outcome::TIMEOUT => "timeout",
        _ => "answered",
    }
}

/// Record a completed command.
pub fn record_command(result: &str, seconds: f64) {
    counter!(names::COMMANDS_TOTAL, "outcome" => outcome_label(result)).increment(1);
    histogram!(names::COMMAND_LATENCY_SECONDS).record(seconds);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Metrics guard for a peer connection.
pub struct PeerMetricsGuard;

impl PeerMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        counter!(names::PEERS_TOTAL).increment(1);
        gauge!(names::PEERS_ACTIVE).increment(1.0);
        Self
    }
}

impl Default for PeerMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PeerMetricsGuard {
    fn drop(&mut self) {
        gauge!(names::PEERS_ACTIVE).decrement(1.0);
    }
}

/// Metrics guard for a passive listener stream.
pub struct ListenerMetricsGuard;

impl ListenerMetricsGuard {
    /// Create a new metrics guard, recording a listener.
    #[must_use]
    pub fn new() -> Self {
        gauge!(names::LISTENERS_ACTIVE).increment(1.0);
        Self
    }
}

impl Default for ListenerMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ListenerMetricsGuard {
    fn drop(&mut self) {
        gauge!(names::LISTENERS_ACTIVE).decrement(1.0);
    }
}
