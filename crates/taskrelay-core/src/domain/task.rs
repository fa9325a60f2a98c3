use serde::{Deserialize, Serialize};
use std::fmt;

use super::{QueueName, TaskId};

/// Task type tag used to route a delivery to its handler.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskType(String);

impl TaskType {
    /// The only task type this system produces.
    pub const HTTP_FORWARD: &'static str = "http:forward";

    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn http_forward() -> Self {
        Self::new(Self::HTTP_FORWARD)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// What a worker receives for one delivery attempt.
///
/// `payload` is the encoded `TaskPayload`; the broker never looks inside it.
#[derive(Debug, Clone)]
pub struct TaskEnvelope {
    task_id: TaskId,
    queue: QueueName,
    task_type: TaskType,
    payload: Vec<u8>,
    retried: u32,
    max_retry: u32,
}

impl TaskEnvelope {
    pub fn new(task_id: TaskId, queue: QueueName, task_type: TaskType, payload: Vec<u8>) -> Self {
        Self {
            task_id,
            queue,
            task_type,
            payload,
            retried: 0,
            max_retry: 0,
        }
    }

    /// Attach the retry bookkeeping the broker tracks for this task.
    pub fn with_retries(mut self, retried: u32, max_retry: u32) -> Self {
        self.retried = retried;
        self.max_retry = max_retry;
        self
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub fn queue(&self) -> &QueueName {
        &self.queue
    }

    pub fn task_type(&self) -> &TaskType {
        &self.task_type
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Retries already consumed before this attempt.
    pub fn retried(&self) -> u32 {
        self.retried
    }

    pub fn max_retry(&self) -> u32 {
        self.max_retry
    }
}
