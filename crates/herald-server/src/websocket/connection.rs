//! WebSocket client connection state.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

/// One connected WebSocket client (a "session").
///
/// The registry and the dispatcher only ever hold `Arc` references; the
/// socket itself is owned by the session task, which drains `tx` through its
/// writer half.
pub struct ClientConnection {
    /// Unique connection ID.
    pub id: String,
    /// Identity bound by a `register` message. Written only by the registry.
    identity: Mutex<Option<String>>,
    /// Send channel to the client's WebSocket write task.
    tx: mpsc::Sender<Arc<String>>,
    /// Cleared once the transport has observed disconnect.
    open: AtomicBool,
    /// When this connection was established.
    pub connected_at: Instant,
    /// Whether the client has shown activity since the last heartbeat tick.
    pub is_alive: AtomicBool,
    /// Count of messages dropped due to a full or closed channel.
    pub dropped_messages: AtomicU64,
}

impl ClientConnection {
    /// Create a new connection.
    pub fn new(id: String, tx: mpsc::Sender<Arc<String>>) -> Self {
        Self {
            id,
            identity: Mutex::new(None),
            tx,
            open: AtomicBool::new(true),
            connected_at: Instant::now(),
            is_alive: AtomicBool::new(true),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Generate a fresh connection ID.
    pub fn next_id() -> String {
        format!("conn_{}", Uuid::now_v7().simple())
    }

    /// Identity this connection is registered under, if any.
    pub fn identity(&self) -> Option<String> {
        self.identity.lock().clone()
    }

    pub(crate) fn set_identity(&self, identity: String) {
        *self.identity.lock() = Some(identity);
    }

    /// Whether the connection can still receive pushes.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.tx.is_closed()
    }

    /// Record that the transport has closed.
    pub fn close(&self) {
        self.open.store(false, Ordering::Release);
    }

    /// Queue a text message for the client without waiting.
    ///
    /// Returns `false` if the channel is full or closed, and increments
    /// the dropped message counter.
    pub fn send(&self, message: Arc<String>) -> bool {
        if self.tx.try_send(message).is_ok() {
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Total messages dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Mark the connection as alive (pong or inbound frame received).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
    }

    /// Check and reset the alive flag for heartbeat.
    ///
    /// Returns `true` if the connection was alive since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Time since the connection was established.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("identity", &self.identity())
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}
