use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic message id sequence, owned by one agent.
///
/// Each agent correlates replies to requests by message id, so the sequence
/// only needs to be unique within an agent, never across processes.
#[derive(Debug)]
pub struct MessageIdSequence(AtomicU64);

impl MessageIdSequence {
    /// Sequence starting at 1. Id 0 is left for handshake frames whose
    /// reply correlation is positional.
    #[must_use]
    pub const fn new() -> Self {
        Self::starting_at(1)
    }

    /// Sequence starting at an arbitrary value, for tests exercising
    /// wraparound or collisions.
    #[must_use]
    pub const fn starting_at(first: u64) -> Self {
        Self(AtomicU64::new(first))
    }

    /// Returns the next id.
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for MessageIdSequence {
    fn default() -> Self {
        Self::new()
    }
}
