//! Identity → live connection registry.
//!
//! Every connected client is *attached* on upgrade. A client becomes
//! deliverable only after it *registers* an identity; it is removed from every
//! bucket when the transport disconnects. One `RwLock` guards both maps, and
//! lookups hand out owned snapshots, so a dispatch never iterates a bucket that
//! a concurrent disconnect is mutating.

use std::collections::HashMap;
use std::sync::Arc;

use metrics::gauge;
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::metrics::REGISTRY_IDENTITIES;
use crate::websocket::connection::ClientConnection;

/// Outcome of [`ConnectionRegistry::register`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Registration {
    /// Connection added to the identity's bucket.
    Registered,
    /// Connection was already registered under this identity; nothing changed.
    AlreadyRegistered,
    /// Connection moved from `previous` to the new identity.
    Moved {
        /// Identity the connection was registered under before.
        previous: String,
    },
    /// Identity was empty; nothing changed.
    EmptyIdentity,
    /// Connection has already been observed closed; nothing changed.
    Closed,
}

impl Registration {
    /// Whether the connection is now registered under the requested identity.
    pub fn is_registered(&self) -> bool {
        matches!(
            self,
            Self::Registered | Self::AlreadyRegistered | Self::Moved { .. }
        )
    }
}

type Bucket = HashMap<String, Arc<ClientConnection>>;

#[derive(Default)]
struct RegistryState {
    /// Every attached connection, registered or not, by connection ID.
    connections: HashMap<String, Arc<ClientConnection>>,
    /// Registered connections grouped by identity. Never holds an empty bucket.
    identities: HashMap<String, Bucket>,
}

/// Process-wide map from identity to the set of live connections for it.
#[derive(Default)]
pub struct ConnectionRegistry {
    state: RwLock<RegistryState>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a freshly-connected, not yet registered connection.
    pub fn attach(&self, connection: Arc<ClientConnection>) {
        let mut state = self.state.write();
        let _ = state.connections.insert(connection.id.clone(), connection);
    }

    /// Add `connection` to the bucket for `identity`.
    ///
    /// A connection already registered under another identity is moved, so a
    /// connection is never listed under two identities.
    pub fn register(&self, identity: &str, connection: &Arc<ClientConnection>) -> Registration {
        if identity.is_empty() {
            return Registration::EmptyIdentity;
        }

        let mut state = self.state.write();
        // Checked under the write lock: a close observed before this point
        // must never be followed by an insert.
        if !connection.is_open() {
            return Registration::Closed;
        }

        let previous = connection.identity();
        if previous.as_deref() == Some(identity)
            && state
                .identities
                .get(identity)
                .is_some_and(|bucket| bucket.contains_key(&connection.id))
        {
            return Registration::AlreadyRegistered;
        }

        if let Some(old) = previous.as_deref() {
            remove_from_bucket(&mut state.identities, old, &connection.id);
        }

        let _ = state
            .connections
            .entry(connection.id.clone())
            .or_insert_with(|| Arc::clone(connection));
        let _ = state
            .identities
            .entry(identity.to_owned())
            .or_default()
            .insert(connection.id.clone(), Arc::clone(connection));
        connection.set_identity(identity.to_owned());
        gauge!(REGISTRY_IDENTITIES).set(count_as_f64(state.identities.len()));

        match previous {
            Some(previous) if previous != identity => {
                info!(conn_id = %connection.id, user_id = identity, previous = %previous, "connection re-registered");
                Registration::Moved { previous }
            }
            _ => {
                info!(conn_id = %connection.id, user_id = identity, "registered user");
                Registration::Registered
            }
        }
    }

    /// Remove a connection from the registry and from every identity bucket.
    ///
    /// Returns the identity it was registered under. Unknown IDs are a no-op.
    pub fn unregister(&self, connection_id: &str) -> Option<String> {
        let mut state = self.state.write();
        let connection = state.connections.remove(connection_id)?;
        let identity = connection.identity()?;
        remove_from_bucket(&mut state.identities, &identity, connection_id);
        gauge!(REGISTRY_IDENTITIES).set(count_as_f64(state.identities.len()));
        debug!(conn_id = connection_id, user_id = %identity, "unregistered connection");
        Some(identity)
    }

    /// Snapshot of the connections currently registered under `identity`.
    pub fn lookup(&self, identity: &str) -> Vec<Arc<ClientConnection>> {
        self.state
            .read()
            .identities
            .get(identity)
            .map(|bucket| bucket.values().cloned().collect())
            .unwrap_or_default()
    }

    /// All identities with at least one registered connection, sorted.
    pub fn identities(&self) -> Vec<String> {
        let mut identities: Vec<String> = self.state.read().identities.keys().cloned().collect();
        identities.sort_unstable();
        identities
    }

    /// Number of identities with at least one registered connection.
    pub fn identity_count(&self) -> usize {
        self.state.read().identities.len()
    }

    /// Number of attached connections, registered or not.
    pub fn connection_count(&self) -> usize {
        self.state.read().connections.len()
    }
}

fn remove_from_bucket(identities: &mut HashMap<String, Bucket>, identity: &str, connection_id: &str) {
    if let Some(bucket) = identities.get_mut(identity) {
        let _ = bucket.remove(connection_id);
        if bucket.is_empty() {
            let _ = identities.remove(identity);
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn count_as_f64(count: usize) -> f64 {
    count as f64
}
