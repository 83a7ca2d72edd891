use dashmap::DashMap;
use mxr_proto::{AgentID, Message};
use std::time::Instant;
use tokio::sync::mpsc;

/// Handle held in the connection table — used to deliver frames to a
/// connection's writer.
#[derive(Clone, Debug)]
pub struct ConnHandle {
    /// Channel sender feeding this connection's forwarding loop.
    pub tx: mpsc::Sender<Message>,
    /// Agent id bound to this connection.
    pub agent_id: AgentID,
    /// Instant when this connection completed registration (used to guard
    /// removals against replacing a newer registration).
    pub registered_at: Instant,
}

/// Concurrent AgentID → connection table.
///
/// Forwarding lookups happen on every relayed frame and never block on
/// registrations or removals of unrelated agents.
#[derive(Debug, Default)]
pub struct ConnectionTable {
    entries: DashMap<AgentID, ConnHandle>,
}

impl ConnectionTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a handle only if the agent id is currently unbound.
    /// Returns `false` when a live binding already exists.
    #[must_use]
    pub fn try_insert(&self, agent_id: AgentID, handle: ConnHandle) -> bool {
        match self.entries.entry(agent_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(handle);
                true
            }
        }
    }

    /// Remove the entry only if it still refers to the connection
    /// registered at the given instant. A newer registration for the same
    /// agent id is left untouched.
    pub fn remove_if(&self, agent_id: &AgentID, registered_at: Instant) {
        self.entries
            .remove_if(agent_id, |_k, v| v.registered_at == registered_at);
    }

    /// Look up a connection handle by agent id.
    #[must_use]
    pub fn get(&self, agent_id: &AgentID) -> Option<ConnHandle> {
        self.entries.get(agent_id).map(|entry| entry.value().clone())
    }

    /// Number of live bindings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no agent is bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
