//! Task state as reported by the broker.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Broker-side lifecycle of a task.
///
/// State transitions:
/// - Pending -> Active -> Completed
/// - Scheduled -> Pending (when `not_before` passes)
/// - Active -> Retry -> Pending (until `max_retry` is used up)
/// - Active -> Archived (skip-retry, or retries exhausted)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Ready to be leased.
    Pending,

    /// Waiting for its `not_before` time.
    Scheduled,

    /// Leased by a worker; a delivery attempt is in flight.
    Active,

    /// Waiting for its backoff delay after a retryable failure.
    Retry,

    /// Delivered successfully (only visible while retained).
    Completed,

    /// Given up on: permanent failure or retries exhausted.
    Archived,
}

impl TaskState {
    /// Is this a terminal state (no further delivery attempts)?
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Archived)
    }

    /// Is this task waiting on a timer?
    pub fn is_delayed(self) -> bool {
        matches!(self, TaskState::Scheduled | TaskState::Retry)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Scheduled => "scheduled",
            TaskState::Active => "active",
            TaskState::Retry => "retry",
            TaskState::Completed => "completed",
            TaskState::Archived => "archived",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_and_delayed_states() {
        assert!(TaskState::Completed.is_terminal());
        assert!(TaskState::Archived.is_terminal());
        assert!(!TaskState::Active.is_terminal());
        assert!(TaskState::Retry.is_delayed());
        assert!(TaskState::Scheduled.is_delayed());
        assert!(!TaskState::Pending.is_delayed());
    }

    #[test]
    fn serializes_as_snake_case() {
        let s = serde_json::to_string(&TaskState::Archived).unwrap();
        assert_eq!(s, "\"archived\"");
    }
}
