//! Server and trigger error types.

use std::net::SocketAddr;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Errors starting or running the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Could not bind the listening socket.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address we tried to bind.
        addr: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Other socket I/O failure.
    #[error("server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A trigger request rejected before dispatch. Rendered as `400` with
/// `{"error": "<message>"}`.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TriggerError {
    /// Body is not JSON.
    #[error("request body must be valid JSON")]
    InvalidBody,
    /// `userIds` missing or not an array.
    #[error("userIds[] array is required")]
    MissingUserIds,
    /// `userIds` contains something other than a string.
    #[error("userIds[] must contain only strings")]
    InvalidUserId,
    /// `title` or `message` missing, empty, or not a string.
    #[error("title and message are required")]
    MissingContent,
    /// `senderId` present but not a string.
    #[error("senderId must be a string")]
    InvalidSenderId,
}

impl TriggerError {
    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::InvalidBody => "invalid_body",
            Self::MissingUserIds => "missing_user_ids",
            Self::InvalidUserId => "invalid_user_id",
            Self::MissingContent => "missing_content",
            Self::InvalidSenderId => "invalid_sender_id",
        }
    }
}

impl IntoResponse for TriggerError {
    fn into_response(self) -> Response {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": self.to_string() })),
        )
            .into_response()
    }
}

/// Response for an upgrade refused at the connection limit.
pub(crate) fn connection_limit_response(limit: usize) -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({ "error": format!("connection limit reached ({limit})") })),
    )
        .into_response()
}

/// Response for an upgrade that arrives after shutdown began.
pub(crate) fn shutting_down_response() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({ "error": "server is shutting down" })),
    )
        .into_response()
}

/// Format a bind address for error reporting.
pub(crate) fn bind_error(host: &str, port: u16, source: std::io::Error) -> ServerError {
    let addr = host
        .parse::<std::net::IpAddr>()
        .map_or_else(|_| format!("{host}:{port}"), |ip| SocketAddr::new(ip, port).to_string());
    ServerError::Bind { addr, source }
}
