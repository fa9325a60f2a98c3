use serde::{Deserialize, Serialize};

/// Per-queue snapshot from the broker.
///
/// `completed` / `archived` are cumulative totals; completed records are
/// dropped unless retention is configured, so they cannot be counted from
/// live records alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub pending: usize,
    pub scheduled: usize,
    pub active: usize,
    pub retry: usize,
    pub completed: usize,
    pub archived: usize,
}

impl QueueCounts {
    /// Tasks that still have a delivery ahead of them.
    pub fn outstanding(&self) -> usize {
        self.pending + self.scheduled + self.active + self.retry
    }
}
