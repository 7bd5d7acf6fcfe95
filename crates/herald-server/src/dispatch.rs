//! Notification fan-out.
//!
//! Resolves each target identity through the [`ConnectionRegistry`] and
//! queues one serialized payload on every open connection, skipping every
//! connection registered under the sender's identity. Delivery is
//! fire-and-forget: no acknowledgment, no retry.

use std::collections::HashSet;
use std::sync::Arc;

use metrics::counter;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::metrics::{
    NOTIFICATIONS_DELIVERED_TOTAL, NOTIFICATIONS_DISPATCHED_TOTAL, NOTIFICATION_DROPS_TOTAL,
};
use crate::protocol::NotificationPayload;
use crate::registry::ConnectionRegistry;

/// A validated notification request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// Target identities, in the order the caller gave them.
    pub user_ids: Vec<String>,
    /// Notification title.
    pub title: String,
    /// Notification body.
    pub message: String,
    /// Identity whose own connections are excluded from delivery.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,
}

impl Notification {
    /// Serialize the payload pushed to clients.
    pub fn payload_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&NotificationPayload::new(
            &self.title,
            &self.message,
            self.sender_id.as_deref(),
        ))
    }
}

/// Per-dispatch counters. Diagnostic only, not a delivery receipt.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    /// Payloads queued on an open connection.
    pub delivered: usize,
    /// Connections skipped because they belong to the sender.
    pub skipped_sender: usize,
    /// Connections skipped because they were already closed.
    pub skipped_closed: usize,
    /// Pushes that failed because the connection's queue was full or gone.
    pub dropped: usize,
}

/// Result of [`NotificationDispatcher::dispatch`]: the echoed request plus stats.
#[derive(Clone, Debug)]
pub struct Dispatched {
    /// The inputs, unchanged.
    pub notification: Notification,
    /// What happened per connection.
    pub stats: DeliveryStats,
}

/// Pushes notifications to registered connections.
pub struct NotificationDispatcher {
    registry: Arc<ConnectionRegistry>,
}

impl NotificationDispatcher {
    /// Create a dispatcher over `registry`.
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Push `notification` to every open, non-sender connection of each target.
    ///
    /// A target listed more than once is resolved once, so each connection
    /// receives at most one push per call. Targets without connections are
    /// silently skipped.
    pub fn dispatch(&self, notification: Notification) -> Dispatched {
        let mut stats = DeliveryStats::default();

        let payload = match notification.payload_json() {
            Ok(json) => Arc::new(json),
            Err(e) => {
                warn!(error = %e, "failed to serialize notification payload");
                return Dispatched {
                    notification,
                    stats,
                };
            }
        };
        let sender = notification.sender_id.as_deref();

        let mut seen = HashSet::new();
        for user_id in &notification.user_ids {
            if !seen.insert(user_id.as_str()) {
                continue;
            }
            let connections = self.registry.lookup(user_id);
            if connections.is_empty() {
                debug!(user_id = %user_id, "no live connections for target");
                continue;
            }

            for conn in connections {
                let owner = conn.identity();
                if sender.is_some_and(|s| owner.as_deref().unwrap_or(user_id) == s) {
                    stats.skipped_sender += 1;
                    continue;
                }
                if !conn.is_open() {
                    debug!(conn_id = %conn.id, user_id = %user_id, "skipping closed connection");
                    stats.skipped_closed += 1;
                    continue;
                }
                if conn.send(Arc::clone(&payload)) {
                    stats.delivered += 1;
                } else {
                    warn!(conn_id = %conn.id, user_id = %user_id, "failed to enqueue notification (channel full or closed)");
                    stats.dropped += 1;
                }
            }
        }

        counter!(NOTIFICATIONS_DISPATCHED_TOTAL).increment(1);
        counter!(NOTIFICATIONS_DELIVERED_TOTAL).increment(stats.delivered as u64);
        counter!(NOTIFICATION_DROPS_TOTAL).increment(stats.dropped as u64);
        info!(
            targets = notification.user_ids.len(),
            sender_id = sender.unwrap_or(""),
            delivered = stats.delivered,
            skipped_sender = stats.skipped_sender,
            skipped_closed = stats.skipped_closed,
            dropped = stats.dropped,
            "notification dispatched"
        );

        Dispatched {
            notification,
            stats,
        }
    }
}
