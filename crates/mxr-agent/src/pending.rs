use crate::error::AgentError;
use std::collections::HashMap;
use tokio::sync::oneshot;
use tracing::debug;

/// Outcome delivered to a waiting [`Agent::send`](crate::Agent::send) call.
pub type SendResult = Result<Option<Vec<u8>>, AgentError>;

/// In-flight requests awaiting a reply, keyed by message id.
///
/// Owned by the connection task: entries are inserted just before the
/// request frame is written, so an insert can never race a connection that
/// is already dead. Each entry resolves exactly once, either by a matching
/// reply or by [`fail_all`](Self::fail_all) when the session ends.
#[derive(Debug, Default)]
pub struct PendingTable {
    entries: HashMap<u64, oneshot::Sender<SendResult>>,
}

impl PendingTable {
    /// Empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for `msg_id`.
    pub fn insert(&mut self, msg_id: u64, reply_tx: oneshot::Sender<SendResult>) {
        if self.entries.insert(msg_id, reply_tx).is_some() {
            debug!(msg_id, "replaced pending entry with duplicate message id");
        }
    }

    /// Resolve the waiter for `msg_id`. Returns `false` when no waiter is
    /// registered, which happens for late replies whose caller already
    /// timed out.
    pub fn complete(&mut self, msg_id: u64, result: SendResult) -> bool {
        match self.entries.remove(&msg_id) {
            Some(reply_tx) => {
                if reply_tx.send(result).is_err() {
                    debug!(msg_id, "reply arrived after the caller gave up");
                }
                true
            }
            None => false,
        }
    }

    /// Fail every in-flight request with [`AgentError::ConnectionLost`].
    pub fn fail_all(&mut self) {
        for (msg_id, reply_tx) in self.entries.drain() {
            if reply_tx.send(Err(AgentError::ConnectionLost)).is_err() {
                debug!(msg_id, "caller gone before connection-lost notification");
            }
        }
    }

    /// Number of in-flight requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when nothing is in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
