use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::connection::{ConnectionId, NodeConnection};
use crate::telemetry::REGISTERED_NODES;

/// A registered node and the connection its messages are routed to.
#[derive(Debug, Clone)]
pub struct NodeSession {
    pub id: String,
    pub connection: NodeConnection,
    pub last_seen_at: DateTime<Utc>,
}

/// In-memory mapping from node identifier to its live connection.
///
/// Shared between the connection handlers (which register and remove) and the
/// round scheduler (which only ever works on snapshots).
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, NodeSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the session for `id`. Returns `true` when a previous
    /// session was replaced; its connection is left open but no longer routed.
    pub fn register<S: Into<String>>(&self, id: S, connection: NodeConnection) -> bool {
        let id = id.into();
        let session = NodeSession {
            id: id.clone(),
            connection,
            last_seen_at: Utc::now(),
        };
        let mut sessions = self.sessions.write();
        let replaced = sessions.insert(id, session).is_some();
        metrics::gauge!(REGISTERED_NODES).set(sessions.len() as f64);
        replaced
    }

    /// Remove the session for `id`, whatever connection it holds. Idempotent.
    pub fn remove(&self, id: &str) -> Option<NodeSession> {
        let mut sessions = self.sessions.write();
        let removed = sessions.remove(id);
        metrics::gauge!(REGISTERED_NODES).set(sessions.len() as f64);
        removed
    }

    /// Remove the session for `id` only if it is still bound to `connection_id`.
    /// A connection that was superseded by a re-registration never evicts its
    /// replacement.
    pub fn remove_connection(&self, id: &str, connection_id: ConnectionId) -> bool {
        let mut sessions = self.sessions.write();
        let owned = sessions
            .get(id)
            .is_some_and(|session| session.connection.id() == connection_id);
        if owned {
            sessions.remove(id);
            metrics::gauge!(REGISTERED_NODES).set(sessions.len() as f64);
        }
        owned
    }

    /// Record inbound activity for `id` on `connection_id`.
    pub fn touch(&self, id: &str, connection_id: ConnectionId) {
        if let Some(session) = self.sessions.write().get_mut(id) {
            if session.connection.id() == connection_id {
                session.last_seen_at = Utc::now();
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<NodeSession> {
        self.sessions.read().get(id).cloned()
    }

    /// Current `(id, connection)` pairs, ordered by id. Entries may disappear
    /// from the registry right after this returns.
    pub fn snapshot(&self) -> Vec<(String, NodeConnection)> {
        let mut entries: Vec<(String, NodeConnection)> = self
            .sessions
            .read()
            .values()
            .map(|session| (session.id.clone(), session.connection.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}
