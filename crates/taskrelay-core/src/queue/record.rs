//! Task record: broker metadata + envelope.

use std::time::Instant;

use tokio::sync::watch;

use crate::domain::{TaskEnvelope, TaskState};

/// Lease held by the worker currently delivering the task.
#[derive(Debug)]
pub struct ActiveLease {
    pub token: u64,
    pub deadline: Instant,
    pub cancel_tx: watch::Sender<bool>,
}

/// Metadata + envelope for a task in the broker.
///
/// - This is the single source of truth for task state.
/// - Queue structures (ready/scheduled) hold TaskId only.
/// - All state transitions happen here.
#[derive(Debug)]
pub struct TaskRecord {
    pub envelope: TaskEnvelope,
    pub state: TaskState,

    /// Retries consumed so far.
    pub retried: u32,

    /// Retries allowed after the first attempt.
    pub max_retry: u32,

    pub last_error: Option<String>,

    /// When the task becomes pending again (Scheduled / Retry).
    pub next_run_at: Option<Instant>,

    pub lease: Option<ActiveLease>,

    pub completed_at: Option<Instant>,
    pub archived_at: Option<Instant>,
}

impl TaskRecord {
    pub fn pending(envelope: TaskEnvelope, max_retry: u32) -> Self {
        Self {
            envelope,
            state: TaskState::Pending,
            retried: 0,
            max_retry,
            last_error: None,
            next_run_at: None,
            lease: None,
            completed_at: None,
            archived_at: None,
        }
    }

    pub fn scheduled(envelope: TaskEnvelope, max_retry: u32, run_at: Instant) -> Self {
        let mut record = Self::pending(envelope, max_retry);
        record.state = TaskState::Scheduled;
        record.next_run_at = Some(run_at);
        record
    }

    /// Mark as active and hand out the envelope for this attempt.
    pub fn start_attempt(&mut self, token: u64, deadline: Instant) -> (TaskEnvelope, watch::Receiver<bool>) {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        self.state = TaskState::Active;
        self.lease = Some(ActiveLease {
            token,
            deadline,
            cancel_tx,
        });
        let envelope = self
            .envelope
            .clone()
            .with_retries(self.retried, self.max_retry);
        (envelope, cancel_rx)
    }

    /// Is `token` the lease currently holding this task?
    pub fn holds_lease(&self, token: u64) -> bool {
        self.state == TaskState::Active && self.lease.as_ref().is_some_and(|l| l.token == token)
    }

    /// Ask the current lease holder to stop. Returns false if nothing is active.
    pub fn signal_cancel(&self) -> bool {
        match (&self.state, &self.lease) {
            (TaskState::Active, Some(lease)) => {
                lease.cancel_tx.send_replace(true);
                true
            }
            _ => false,
        }
    }

    pub fn mark_completed(&mut self, now: Instant) {
        self.state = TaskState::Completed;
        self.lease = None;
        self.completed_at = Some(now);
    }

    pub fn mark_archived(&mut self, error: String, now: Instant) {
        self.state = TaskState::Archived;
        self.lease = None;
        self.last_error = Some(error);
        self.archived_at = Some(now);
    }

    /// Consume one retry and wait until `next_run_at`.
    pub fn schedule_retry(&mut self, next_run_at: Instant, error: String) {
        self.state = TaskState::Retry;
        self.retried += 1;
        self.lease = None;
        self.next_run_at = Some(next_run_at);
        self.last_error = Some(error);
    }

    /// Move from Scheduled / Retry back to Pending.
    pub fn requeue(&mut self) {
        self.state = TaskState::Pending;
        self.next_run_at = None;
    }
}
