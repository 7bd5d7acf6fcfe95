//! Wire types for the WebSocket channel.
//!
//! Inbound, the only recognised message is
//! `{"type": "register", "userId": "<non-empty string>"}`. Outbound, clients
//! only ever receive notification payloads.

use serde::Serialize;
use serde_json::Value;

/// `type` of the registration message.
pub const REGISTER_TYPE: &str = "register";
/// `type` of the pushed notification payload.
pub const NOTIFICATION_TYPE: &str = "notification";

/// A recognised client → server message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientMessage {
    /// Bind the connection to an identity.
    Register {
        /// Identity to register under.
        user_id: String,
    },
}

/// Why an inbound message was ignored.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Not JSON at all.
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    /// JSON, but not an object.
    #[error("message is not a JSON object")]
    NotAnObject,
    /// No string `type` field.
    #[error("message has no type")]
    MissingType,
    /// A `type` this server does not handle.
    #[error("unsupported message type '{0}'")]
    UnsupportedType(String),
    /// `register` without a usable `userId`.
    #[error("register message requires a non-empty string userId")]
    InvalidUserId,
}

impl ProtocolError {
    /// Unsupported types are expected traffic; everything else is malformed.
    pub fn is_malformed(&self) -> bool {
        !matches!(self, Self::UnsupportedType(_))
    }
}

/// Parse an inbound text frame.
pub fn parse_client_message(text: &str) -> Result<ClientMessage, ProtocolError> {
    let value: Value = serde_json::from_str(text)?;
    let Value::Object(fields) = value else {
        return Err(ProtocolError::NotAnObject);
    };
    let kind = fields
        .get("type")
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingType)?;

    if kind != REGISTER_TYPE {
        return Err(ProtocolError::UnsupportedType(kind.to_owned()));
    }

    match fields.get("userId").and_then(Value::as_str) {
        Some(user_id) if !user_id.is_empty() => Ok(ClientMessage::Register {
            user_id: user_id.to_owned(),
        }),
        _ => Err(ProtocolError::InvalidUserId),
    }
}

/// Payload pushed to every eligible connection.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload<'a> {
    /// Always [`NOTIFICATION_TYPE`].
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// Notification title.
    pub title: &'a str,
    /// Notification body.
    pub message: &'a str,
    /// Originating identity, omitted when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<&'a str>,
}

impl<'a> NotificationPayload<'a> {
    /// Build a notification payload.
    pub fn new(title: &'a str, message: &'a str, sender_id: Option<&'a str>) -> Self {
        Self {
            kind: NOTIFICATION_TYPE,
            title,
            message,
            sender_id,
        }
    }
}
