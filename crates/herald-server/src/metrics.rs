//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render `/metrics`. Call once at startup before
/// any metric is recorded.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Connections opened (counter, labels: transport).
pub const PUSH_CONNECTIONS_TOTAL: &str = "push_connections_total";
/// Open connections (gauge, labels: transport).
pub const PUSH_CONNECTIONS_ACTIVE: &str = "push_connections_active";
/// Payloads accepted by a handle queue (counter, labels: transport).
pub const PUSH_DELIVERIES_TOTAL: &str = "push_deliveries_total";
/// Payloads a handle rejected or lost (counter, labels: reason).
pub const PUSH_DELIVERY_FAILURES_TOTAL: &str = "push_delivery_failures_total";
/// Envelopes published on the bus (counter).
pub const PUSH_BUS_PUBLISH_TOTAL: &str = "push_bus_publish_total";
/// Bus publishes that failed (counter).
pub const PUSH_BUS_PUBLISH_FAILURES_TOTAL: &str = "push_bus_publish_failures_total";
/// Envelopes received from the bus (counter, labels: kind).
pub const PUSH_BUS_MESSAGES_TOTAL: &str = "push_bus_messages_total";
/// Duplex connections closed for inactivity (counter).
pub const PUSH_HEARTBEAT_TIMEOUTS_TOTAL: &str = "push_heartbeat_timeouts_total";
/// Connection lifetime (histogram, labels: transport).
pub const PUSH_CONNECTION_DURATION_SECONDS: &str = "push_connection_duration_seconds";
