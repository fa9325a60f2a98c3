//! Broker port - 永続キューの抽象化
//!
//! gateway 側（enqueue / cancel）と worker 側（lease / ack / fail）で
//! trait を分けています。InMemoryBroker は両方を実装します。
//!
//! # 設計原則
//! - broker が状態遷移と retry / archive の判断を持つ
//! - worker は配送を実行して結果（HandlerError の kind）を報告するだけ
//! - payload はバイト列のまま運ぶ（broker は中身を解釈しない）

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::watch;

use crate::domain::{BrokerError, HandlerError, QueueName, TaskEnvelope, TaskId, TaskState, TaskType};

/// Options for a single enqueue.
#[derive(Debug, Clone)]
pub struct EnqueueOptions {
    pub queue: QueueName,
    /// Caller-chosen id; conflicts with an existing task in the same queue.
    pub id: Option<TaskId>,
    /// Retries allowed after the first attempt.
    pub max_retry: u32,
    /// Not deliverable before this instant.
    pub not_before: Option<DateTime<Utc>>,
}

impl EnqueueOptions {
    pub fn new(queue: QueueName, max_retry: u32) -> Self {
        Self {
            queue,
            id: None,
            max_retry,
            not_before: None,
        }
    }

    pub fn with_id(mut self, id: TaskId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_not_before(mut self, at: DateTime<Utc>) -> Self {
        self.not_before = Some(at);
        self
    }
}

/// What the broker accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInfo {
    pub id: TaskId,
    pub queue: QueueName,
    pub state: TaskState,
}

/// Gateway-facing side of the broker.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn enqueue(
        &self,
        task_type: &TaskType,
        payload: Vec<u8>,
        opts: EnqueueOptions,
    ) -> Result<TaskInfo, BrokerError>;

    async fn get_state(&self, queue: &QueueName, id: &TaskId) -> Result<TaskState, BrokerError>;

    /// Signal the worker holding `id` to stop. Best effort.
    async fn cancel_active(&self, id: &TaskId) -> Result<(), BrokerError>;

    /// Remove a task that is not active.
    async fn delete(&self, queue: &QueueName, id: &TaskId) -> Result<(), BrokerError>;

    async fn ping(&self) -> Result<(), BrokerError>;
}

/// A leased task. The worker owns this lease and must either `ack` or `fail`.
#[async_trait]
pub trait TaskLease: Send {
    fn envelope(&self) -> &TaskEnvelope;

    /// Flips to `true` when the task is cancelled while active.
    fn cancel_signal(&self) -> watch::Receiver<bool>;

    /// Mark success.
    async fn ack(self: Box<Self>) -> Result<(), BrokerError>;

    /// Mark failure (broker decides retry/archive from the error kind).
    async fn fail(self: Box<Self>, error: HandlerError) -> Result<(), BrokerError>;
}

/// Worker-facing side of the broker.
#[async_trait]
pub trait DeliverySource: Send + Sync {
    /// Lease one ready task from `queues` (waits until available, or returns
    /// None once the broker is closed).
    async fn lease(&self, queues: &[QueueName]) -> Option<Box<dyn TaskLease>>;
}
