//! `POST /send` — the HTTP trigger that fans a notification out.

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use metrics::counter;
use serde::Serialize;
use serde_json::Value;
use tracing::{instrument, warn};

use crate::dispatch::Notification;
use crate::errors::TriggerError;
use crate::metrics::TRIGGER_REJECTIONS_TOTAL;
use crate::server::AppState;

/// Success body. Confirms the dispatch ran, not that anything was delivered.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendResponse {
    /// Always `true`.
    pub success: bool,
    /// Target identities as given.
    pub sent_to: Vec<String>,
    /// Notification title.
    pub title: String,
    /// Notification body.
    pub message: String,
    /// Sender identity, omitted when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,
}

impl From<Notification> for SendResponse {
    fn from(n: Notification) -> Self {
        Self {
            success: true,
            sent_to: n.user_ids,
            title: n.title,
            message: n.message,
            sender_id: n.sender_id,
        }
    }
}

/// Validate a raw trigger body.
///
/// An empty body, or JSON that is not an object, is treated as a request
/// without `userIds`.
pub fn parse_send_request(body: &[u8]) -> Result<Notification, TriggerError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(TriggerError::MissingUserIds);
    }
    let value: Value = serde_json::from_slice(body).map_err(|_| TriggerError::InvalidBody)?;
    let Value::Object(fields) = value else {
        return Err(TriggerError::MissingUserIds);
    };

    let Some(Value::Array(raw_ids)) = fields.get("userIds") else {
        return Err(TriggerError::MissingUserIds);
    };
    let user_ids = raw_ids
        .iter()
        .map(|id| id.as_str().map(str::to_owned))
        .collect::<Option<Vec<_>>>()
        .ok_or(TriggerError::InvalidUserId)?;

    let title = non_empty_str(&fields, "title").ok_or(TriggerError::MissingContent)?;
    let message = non_empty_str(&fields, "message").ok_or(TriggerError::MissingContent)?;

    let sender_id = match fields.get("senderId") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(_) => return Err(TriggerError::InvalidSenderId),
    };

    Ok(Notification {
        user_ids,
        title,
        message,
        sender_id,
    })
}

fn non_empty_str(fields: &serde_json::Map<String, Value>, key: &str) -> Option<String> {
    fields
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

/// POST /send
#[instrument(skip_all)]
pub(crate) async fn send_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<SendResponse>, TriggerError> {
    let notification = parse_send_request(&body).inspect_err(|e| {
        warn!(reason = e.error_kind(), "rejected trigger request");
        counter!(TRIGGER_REJECTIONS_TOTAL, "reason" => e.error_kind()).increment(1);
    })?;

    let dispatched = state.dispatcher.dispatch(notification);
    Ok(Json(SendResponse::from(dispatched.notification)))
}
