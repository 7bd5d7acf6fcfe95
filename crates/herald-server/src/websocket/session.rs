//! WebSocket session lifecycle, from upgrade through disconnect.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket, close_code};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::connection::ClientConnection;
use super::handler::handle_message;
use super::heartbeat::{HeartbeatResult, run_heartbeat};
use crate::config::ServerConfig;
use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL,
};
use crate::registry::ConnectionRegistry;

/// How long the writer gets to flush a Close frame before it is aborted.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Why a session ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Client sent a Close frame or the stream ended.
    ClientClosed,
    /// Transport error while reading.
    TransportError,
    /// No activity within the heartbeat timeout.
    HeartbeatTimeout,
    /// Server is shutting down.
    Shutdown,
}

impl DisconnectReason {
    /// Label used in logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClientClosed => "client_closed",
            Self::TransportError => "transport_error",
            Self::HeartbeatTimeout => "heartbeat_timeout",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Run a WebSocket session for a connected client.
///
/// The connection is attached to the registry on entry and unregistered on
/// every exit path. Inbound text (and UTF-8 binary) frames go to
/// [`handle_message`]; outbound payloads queued through
/// [`ClientConnection::send`] are written by a separate task that also sends
/// periodic Ping frames.
#[instrument(skip_all, fields(conn_id = %connection.id))]
pub async fn run_ws_session(
    ws: WebSocket,
    connection: Arc<ClientConnection>,
    send_rx: mpsc::Receiver<Arc<String>>,
    registry: Arc<ConnectionRegistry>,
    config: Arc<ServerConfig>,
    shutdown: CancellationToken,
) -> DisconnectReason {
    let (ws_tx, mut ws_rx) = ws.split();

    registry.attach(Arc::clone(&connection));
    info!("client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    let interval = Duration::from_secs(config.heartbeat_interval_secs);
    let timeout = Duration::from_secs(config.heartbeat_timeout_secs);
    let session_cancel = shutdown.child_token();

    let writer = tokio::spawn(run_writer(ws_tx, send_rx, interval, session_cancel.clone()));
    let writer_abort = writer.abort_handle();

    let heartbeat = run_heartbeat(
        Arc::clone(&connection),
        interval,
        timeout,
        session_cancel.clone(),
    );
    tokio::pin!(heartbeat);

    let reason = loop {
        tokio::select! {
            frame = ws_rx.next() => {
                let msg = match frame {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        debug!(error = %e, "websocket read failed");
                        break DisconnectReason::TransportError;
                    }
                    None => break DisconnectReason::ClientClosed,
                };
                connection.mark_alive();
                if matches!(msg, Message::Close(_)) {
                    debug!("client sent close frame");
                    break DisconnectReason::ClientClosed;
                }
                if let Some(text) = inbound_text(msg) {
                    let _ = handle_message(&text, &connection, &registry);
                }
            }
            result = &mut heartbeat => {
                break match result {
                    HeartbeatResult::TimedOut => {
                        warn!(timeout_secs = timeout.as_secs(), "client unresponsive, disconnecting");
                        DisconnectReason::HeartbeatTimeout
                    }
                    HeartbeatResult::Cancelled => DisconnectReason::Shutdown,
                };
            }
            () = shutdown.cancelled() => break DisconnectReason::Shutdown,
        }
    };

    // Closed before unregistering, so a racing register is refused.
    connection.close();
    let identity = registry.unregister(&connection.id);

    session_cancel.cancel();
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer).await.is_err() {
        writer_abort.abort();
    }

    info!(
        reason = reason.as_str(),
        user_id = identity.as_deref().unwrap_or(""),
        dropped = connection.drop_count(),
        "client disconnected"
    );
    counter!(WS_DISCONNECTIONS_TOTAL, "reason" => reason.as_str()).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(connection.age().as_secs_f64());
    reason
}

/// Forward queued payloads to the socket and send a Ping every `interval`.
/// On cancel, a Close frame is sent before returning.
async fn run_writer(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut send_rx: mpsc::Receiver<Arc<String>>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ping = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);

    loop {
        tokio::select! {
            msg = send_rx.recv() => {
                let Some(text) = msg else { break };
                if ws_tx.send(Message::Text(text.as_str().into())).await.is_err() {
                    break;
                }
            }
            _ = ping.tick() => {
                if ws_tx.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }
            () = cancel.cancelled() => {
                let frame = CloseFrame {
                    code: close_code::AWAY,
                    reason: Utf8Bytes::from_static("going away"),
                };
                let _ = ws_tx.send(Message::Close(Some(frame))).await;
                break;
            }
        }
    }
}

/// Text carried by a data frame. Binary frames count when they are valid UTF-8.
fn inbound_text(msg: Message) -> Option<String> {
    match msg {
        Message::Text(text) => Some(text.as_str().to_owned()),
        Message::Binary(data) => match String::from_utf8(data.to_vec()) {
            Ok(text) => Some(text),
            Err(_) => {
                debug!(len = data.len(), "ignoring non-UTF-8 binary frame");
                None
            }
        },
        Message::Ping(_) | Message::Pong(_) | Message::Close(_) => None,
    }
}
