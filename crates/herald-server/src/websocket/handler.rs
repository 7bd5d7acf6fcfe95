//! Inbound WebSocket message handling.
//!
//! Clients never get a reply: a recognised `register` updates the registry,
//! anything else is logged and dropped while the connection stays open.

use std::sync::Arc;

use metrics::counter;
use tracing::{debug, instrument, warn};

use super::connection::ClientConnection;
use crate::metrics::{REGISTRATIONS_REJECTED_TOTAL, REGISTRATIONS_TOTAL};
use crate::protocol::{ClientMessage, ProtocolError, parse_client_message};
use crate::registry::{ConnectionRegistry, Registration};

/// Handle one inbound text frame from `connection`.
#[instrument(skip_all, fields(conn_id = %connection.id))]
pub fn handle_message(
    text: &str,
    connection: &Arc<ClientConnection>,
    registry: &ConnectionRegistry,
) -> Result<Registration, ProtocolError> {
    let message = parse_client_message(text).inspect_err(|e| {
        if e.is_malformed() {
            warn!(error = %e, len = text.len(), "ignoring malformed message");
            counter!(REGISTRATIONS_REJECTED_TOTAL, "reason" => "malformed").increment(1);
        } else {
            debug!(error = %e, "ignoring unsupported message");
            counter!(REGISTRATIONS_REJECTED_TOTAL, "reason" => "unsupported").increment(1);
        }
    })?;

    match message {
        ClientMessage::Register { user_id } => {
            let outcome = registry.register(&user_id, connection);
            if outcome.is_registered() {
                counter!(REGISTRATIONS_TOTAL).increment(1);
            } else {
                debug!(user_id = %user_id, ?outcome, "registration not applied");
            }
            Ok(outcome)
        }
    }
}
