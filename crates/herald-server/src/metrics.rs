//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Call once at startup before any metrics are recorded.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants to avoid typos across modules.

/// WebSocket connections opened total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections total (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Active WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Upgrades refused because the connection limit was reached (counter).
pub const WS_CONNECTIONS_REJECTED_TOTAL: &str = "ws_connections_rejected_total";
/// WebSocket connection lifetime (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Successful registrations (counter).
pub const REGISTRATIONS_TOTAL: &str = "registrations_total";
/// Ignored inbound messages (counter, labels: reason).
pub const REGISTRATIONS_REJECTED_TOTAL: &str = "registrations_rejected_total";
/// Identities with at least one registered connection (gauge).
pub const REGISTRY_IDENTITIES: &str = "registry_identities";
/// Trigger calls that reached the dispatcher (counter).
pub const NOTIFICATIONS_DISPATCHED_TOTAL: &str = "notifications_dispatched_total";
/// Payloads queued to a connection (counter).
pub const NOTIFICATIONS_DELIVERED_TOTAL: &str = "notifications_delivered_total";
/// Payloads dropped on a full or closed channel (counter).
pub const NOTIFICATION_DROPS_TOTAL: &str = "notification_drops_total";
/// Trigger calls rejected with 400 (counter).
pub const TRIGGER_REJECTIONS_TOTAL: &str = "trigger_rejections_total";
