//! Metrics collection and export for Switchboard.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format. Hub-level counters are owned by the hub itself;
//! a sampler task mirrors them into gauges.

use anyhow::{Context, Result};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;
use switchboard_core::{Hub, HubStats};
use tokio::task::JoinHandle;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_OPENED: &str = "switchboard_connections_opened_total";
    pub const CONNECTIONS_CLOSED: &str = "switchboard_connections_closed_total";
    pub const CONNECTIONS_ACTIVE: &str = "switchboard_connections_active";
    pub const USERS_ACTIVE: &str = "switchboard_users_active";
    pub const MESSAGES_TOTAL: &str = "switchboard_messages_total";
    pub const HUB_MESSAGES_SENT: &str = "switchboard_hub_messages_sent";
    pub const HUB_MESSAGES_RECEIVED: &str = "switchboard_hub_messages_received";
    pub const HANDLER_SECONDS: &str = "switchboard_handler_seconds";
    pub const ERRORS_TOTAL: &str = "switchboard_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_OPENED,
        "Total number of connections accepted since server start"
    );
    metrics::describe_counter!(
        names::CONNECTIONS_CLOSED,
        "Total number of connections closed since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of registered connections"
    );
    metrics::describe_gauge!(
        names::USERS_ACTIVE,
        "Current number of users with at least one connection"
    );
    metrics::describe_counter!(
        names::MESSAGES_TOTAL,
        "Envelopes handled by the default handler, by type"
    );
    metrics::describe_gauge!(
        names::HUB_MESSAGES_SENT,
        "Messages delivered by the hub since start"
    );
    metrics::describe_gauge!(
        names::HUB_MESSAGES_RECEIVED,
        "Messages received by the hub since start"
    );
    metrics::describe_histogram!(
        names::HANDLER_SECONDS,
        "Message handler latency in seconds"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the exporter cannot be installed.
pub fn start_metrics_server(port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Periodically copy hub statistics into gauges.
pub fn spawn_sampler(hub: Hub, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            sample(&hub);
        }
    })
}

fn sample(hub: &Hub) {
    let stats = hub.stats();
    counter!(names::CONNECTIONS_CLOSED).absolute(closed_connections(&stats));
    gauge!(names::CONNECTIONS_ACTIVE).set(stats.active_connections as f64);
    gauge!(names::USERS_ACTIVE).set(hub.active_users() as f64);
    gauge!(names::HUB_MESSAGES_SENT).set(stats.messages_sent as f64);
    gauge!(names::HUB_MESSAGES_RECEIVED).set(stats.messages_received as f64);
}

/// Connections that were registered and have since left the hub.
fn closed_connections(stats: &HubStats) -> u64 {
    stats
        .total_connections
        .saturating_sub(stats.active_connections)
}

/// Record an accepted connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_OPENED).increment(1);
}

/// Record a handled envelope.
pub fn record_message(kind: &str) {
    counter!(names::MESSAGES_TOTAL, "type" => kind.to_string()).increment(1);
}

/// Record handler latency.
pub fn record_latency(seconds: f64) {
    histogram!(names::HANDLER_SECONDS).record(seconds);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder() {
        // No recorder installed: every call is a no-op.
        record_connection();
        record_message("ping");
        record_latency(0.001);
        record_error("handler");
        sample(&Hub::default());
    }

    #[tokio::test]
    async fn test_closed_connections_follow_hub() {
        let hub = Hub::default();
        let handler = switchboard_core::handler_fn(|_conn, env| Ok(env));

        let mut connections = Vec::new();
        let mut peers = Vec::new();
        for _ in 0..3 {
            let (transport, peer) = switchboard_transport::memory::duplex();
            connections.push(hub.add(transport, "ana", false, handler.clone()).await.unwrap());
            peers.push(peer);
        }
        assert_eq!(closed_connections(&hub.stats()), 0);

        connections[0].close();
        hub.remove(connections[1].user(), connections[1].id());
        assert_eq!(closed_connections(&hub.stats()), 2);

        hub.cleanup();
        assert_eq!(closed_connections(&hub.stats()), 3);
        sample(&hub);
    }
}
