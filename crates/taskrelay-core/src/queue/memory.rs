//! In-memory broker implementation.

use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify, watch};

use super::{RetryPolicy, TaskRecord};
use crate::domain::{
    BrokerError, HandlerError, QueueName, TaskEnvelope, TaskId, TaskState, TaskType,
};
use crate::observability::QueueCounts;
use crate::ports::{
    Broker, Clock, DeliverySource, EnqueueOptions, IdGenerator, SystemClock, TaskInfo, TaskLease,
    UlidGenerator,
};

const LEASE_EXPIRED: &str = "task lease expired";

/// Upper bound for timers whose delay overflows `Instant`.
const MAX_TIMER: Duration = Duration::from_secs(86_400 * 365 * 100);

pub const DEFAULT_ARCHIVED_RETENTION: Duration = Duration::from_secs(86_400 * 90);
pub const DEFAULT_MAX_ARCHIVED: usize = 10_000;

#[derive(Debug, Clone)]
pub struct InMemoryBrokerConfig {
    pub retry_policy: RetryPolicy,

    /// An active task whose worker has not reported within this window is
    /// treated as a retryable failure and redelivered.
    pub lease_timeout: Duration,

    /// How long completed tasks stay visible. Zero drops them on ack.
    pub completed_retention: Duration,

    /// How long archived tasks stay inspectable and deletable before they
    /// are purged.
    pub archived_retention: Duration,

    /// Per-queue cap on archived tasks; the oldest are purged first.
    pub max_archived: usize,
}

impl Default for InMemoryBrokerConfig {
    fn default() -> Self {
        Self {
            retry_policy: RetryPolicy::default(),
            lease_timeout: Duration::from_secs(60),
            completed_retention: Duration::ZERO,
            archived_retention: DEFAULT_ARCHIVED_RETENTION,
            max_archived: DEFAULT_MAX_ARCHIVED,
        }
    }
}

/// Timer entry (Scheduled / Retry) for the priority queue.
///
/// We use Reverse ordering so BinaryHeap acts as a min-heap (earliest first).
#[derive(Debug, Clone, PartialEq, Eq)]
struct ScheduledTask {
    next_run_at: Instant,
    queue: QueueName,
    task_id: TaskId,
}

impl PartialOrd for ScheduledTask {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledTask {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reverse ordering: earlier times have higher priority
        other.next_run_at.cmp(&self.next_run_at)
    }
}

#[derive(Default)]
struct QueueState {
    /// All task records of this queue (single source of truth).
    records: HashMap<TaskId, TaskRecord>,

    /// Ready queue (TaskIds only). May contain stale ids; checked on pop.
    ready: VecDeque<TaskId>,

    completed_total: usize,
    archived_total: usize,
}

impl QueueState {
    /// Drop archived records past their retention.
    fn purge_expired_archived(&mut self, now: Instant, retention: Duration) {
        self.records.retain(|_, r| {
            r.archived_at
                .is_none_or(|at| at.checked_add(retention).is_none_or(|end| end > now))
        });
    }

    /// Keep at most `max` archived records, oldest purged first.
    fn enforce_archive_cap(&mut self, max: usize) {
        let mut archived: Vec<(Instant, TaskId)> = self
            .records
            .iter()
            .filter_map(|(id, r)| r.archived_at.map(|at| (at, id.clone())))
            .collect();
        if archived.len() <= max {
            return;
        }
        archived.sort_by_key(|(at, _)| *at);
        let excess = archived.len() - max;
        for (_, id) in archived.into_iter().take(excess) {
            self.records.remove(&id);
        }
    }
}

struct BrokerState {
    queues: HashMap<QueueName, QueueState>,

    scheduled: BinaryHeap<ScheduledTask>,

    /// Lease token -> task, for expiry scans.
    active: HashMap<u64, (QueueName, TaskId)>,

    next_token: u64,
    closed: bool,
}

impl BrokerState {
    fn new() -> Self {
        Self {
            queues: HashMap::new(),
            scheduled: BinaryHeap::new(),
            active: HashMap::new(),
            next_token: 1,
            closed: false,
        }
    }

    /// Move due timers to ready, expire stale leases, purge old completed and
    /// archived records.
    fn promote(&mut self, now: Instant, config: &InMemoryBrokerConfig) {
        while let Some(entry) = self.scheduled.peek() {
            if entry.next_run_at > now {
                break; // Heap is sorted, so we can stop
            }
            let Some(entry) = self.scheduled.pop() else {
                break;
            };
            let Some(queue) = self.queues.get_mut(&entry.queue) else {
                continue;
            };
            // 削除や再スケジュール済みのエントリは無視する
            if let Some(record) = queue.records.get_mut(&entry.task_id)
                && record.state.is_delayed()
                && record.next_run_at == Some(entry.next_run_at)
            {
                record.requeue();
                queue.ready.push_back(entry.task_id);
            }
        }

        let expired: Vec<u64> = self
            .active
            .iter()
            .filter(|(token, (queue, id))| {
                self.queues
                    .get(queue)
                    .and_then(|q| q.records.get(id))
                    .and_then(|r| r.lease.as_ref())
                    .is_some_and(|l| l.token == **token && l.deadline <= now)
            })
            .map(|(token, _)| *token)
            .collect();
        for token in expired {
            if let Some((queue, id)) = self.active.get(&token).cloned() {
                tracing::warn!(
                    event = "task.lease.expired",
                    queue = %queue,
                    task_id = %id,
                    "lease expired, redelivering"
                );
                if let Some(record) = self.queues.get(&queue).and_then(|q| q.records.get(&id)) {
                    record.signal_cancel();
                }
                self.apply_failure(token, &HandlerError::retry(LEASE_EXPIRED), now, config);
            }
        }

        if !config.completed_retention.is_zero() {
            for queue in self.queues.values_mut() {
                queue.records.retain(|_, r| {
                    r.completed_at
                        .is_none_or(|at| at + config.completed_retention > now)
                });
            }
        }

        for queue in self.queues.values_mut() {
            queue.purge_expired_archived(now, config.archived_retention);
        }
    }

    /// Earliest instant at which `promote` has something to do.
    fn next_wake(&self, config: &InMemoryBrokerConfig) -> Option<Instant> {
        let timer = self.scheduled.peek().map(|entry| entry.next_run_at);
        let lease = self
            .active
            .values()
            .filter_map(|(queue, id)| {
                self.queues
                    .get(queue)
                    .and_then(|q| q.records.get(id))
                    .and_then(|r| r.lease.as_ref())
                    .map(|l| l.deadline)
            })
            .min();
        let purge = if config.completed_retention.is_zero() {
            None
        } else {
            self.queues
                .values()
                .flat_map(|q| q.records.values())
                .filter_map(|r| r.completed_at)
                .min()
                .map(|at| at + config.completed_retention)
        };
        let archive_purge = self
            .queues
            .values()
            .flat_map(|q| q.records.values())
            .filter_map(|r| r.archived_at)
            .min()
            .and_then(|at| at.checked_add(config.archived_retention));
        [timer, lease, purge, archive_purge].into_iter().flatten().min()
    }

    /// Pop the first pending task among `queues` and make it active.
    fn take_ready(
        &mut self,
        queues: &[QueueName],
        now: Instant,
        lease_timeout: Duration,
    ) -> Option<(u64, TaskEnvelope, watch::Receiver<bool>)> {
        let names: Vec<QueueName> = if queues.is_empty() {
            let mut all: Vec<QueueName> = self.queues.keys().cloned().collect();
            all.sort();
            all
        } else {
            queues.to_vec()
        };

        for name in names {
            let token = self.next_token;
            let Some(queue) = self.queues.get_mut(&name) else {
                continue;
            };
            while let Some(task_id) = queue.ready.pop_front() {
                let Some(record) = queue.records.get_mut(&task_id) else {
                    continue;
                };
                if record.state != TaskState::Pending {
                    continue;
                }
                let deadline = now.checked_add(lease_timeout).unwrap_or(now + MAX_TIMER);
                let (envelope, cancel_rx) = record.start_attempt(token, deadline);
                self.next_token += 1;
                self.active.insert(token, (name, task_id));
                return Some((token, envelope, cancel_rx));
            }
        }
        None
    }

    /// Apply a failure report; returns true if a timer was scheduled.
    fn apply_failure(
        &mut self,
        token: u64,
        error: &HandlerError,
        now: Instant,
        config: &InMemoryBrokerConfig,
    ) -> bool {
        let Some((queue_name, task_id)) = self.active.remove(&token) else {
            return false;
        };
        let Some(queue) = self.queues.get_mut(&queue_name) else {
            return false;
        };
        let Some(record) = queue.records.get_mut(&task_id) else {
            return false;
        };
        if !record.holds_lease(token) {
            return false;
        }

        if error.is_skip_retry() || record.retried >= record.max_retry {
            record.mark_archived(error.message().to_string(), now);
            queue.archived_total += 1;
            queue.enforce_archive_cap(config.max_archived);
            return false;
        }

        let delay = config.retry_policy.next_delay(record.retried);
        let next_run_at = now.checked_add(delay).unwrap_or(now + MAX_TIMER);
        record.schedule_retry(next_run_at, error.message().to_string());
        self.scheduled.push(ScheduledTask {
            next_run_at,
            queue: queue_name,
            task_id,
        });
        true
    }

    fn counts(&self, queue: &QueueName) -> QueueCounts {
        let mut counts = QueueCounts::default();
        let Some(queue) = self.queues.get(queue) else {
            return counts;
        };
        for record in queue.records.values() {
            match record.state {
                TaskState::Pending => counts.pending += 1,
                TaskState::Scheduled => counts.scheduled += 1,
                TaskState::Active => counts.active += 1,
                TaskState::Retry => counts.retry += 1,
                TaskState::Completed | TaskState::Archived => {}
            }
        }
        counts.completed = queue.completed_total;
        counts.archived = queue.archived_total;
        counts
    }
}

struct Inner {
    state: Mutex<BrokerState>,
    notify: Notify,
    config: InMemoryBrokerConfig,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

/// Broker that keeps every queue in process memory.
///
/// Cloning is cheap and shares the same queues.
#[derive(Clone)]
pub struct InMemoryBroker {
    inner: Arc<Inner>,
}

impl InMemoryBroker {
    pub fn new(
        config: InMemoryBrokerConfig,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(BrokerState::new()),
                notify: Notify::new(),
                config,
                clock,
                ids,
            }),
        }
    }

    /// Wall clock + ULID ids.
    pub fn with_config(config: InMemoryBrokerConfig) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let ids = Arc::new(UlidGenerator::new(Arc::clone(&clock)));
        Self::new(config, clock, ids)
    }

    pub async fn counts(&self, queue: &QueueName) -> QueueCounts {
        let mut state = self.inner.state.lock().await;
        state.promote(Instant::now(), &self.inner.config);
        state.counts(queue)
    }

    /// Last recorded failure message, if any.
    pub async fn last_error(&self, queue: &QueueName, id: &TaskId) -> Option<String> {
        let state = self.inner.state.lock().await;
        state
            .queues
            .get(queue)
            .and_then(|q| q.records.get(id))
            .and_then(|r| r.last_error.clone())
    }

    /// Stop handing out leases and fail health checks.
    pub async fn close(&self) {
        self.inner.state.lock().await.closed = true;
        self.inner.notify.notify_waiters();
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::with_config(InMemoryBrokerConfig::default())
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn enqueue(
        &self,
        task_type: &TaskType,
        payload: Vec<u8>,
        opts: EnqueueOptions,
    ) -> Result<TaskInfo, BrokerError> {
        let wall_now = self.inner.clock.now();
        let info = {
            let mut guard = self.inner.state.lock().await;
            let state = &mut *guard;
            if state.closed {
                return Err(BrokerError::other("broker is closed"));
            }

            let queue = state.queues.entry(opts.queue.clone()).or_default();
            let task_id = match opts.id {
                Some(id) => {
                    if queue.records.contains_key(&id) {
                        return Err(BrokerError::id_conflict(format!(
                            "task {:?} already exists in queue {:?}",
                            id.as_str(),
                            opts.queue.as_str()
                        )));
                    }
                    id
                }
                None => self.inner.ids.generate_task_id(),
            };

            let envelope = TaskEnvelope::new(
                task_id.clone(),
                opts.queue.clone(),
                task_type.clone(),
                payload,
            );

            // not_before が未来のときだけ scheduled にする
            let delay = opts
                .not_before
                .filter(|at| *at > wall_now)
                .and_then(|at| (at - wall_now).to_std().ok());
            let task_state = match delay {
                Some(delay) => {
                    let now = Instant::now();
                    let run_at = now.checked_add(delay).unwrap_or(now + MAX_TIMER);
                    queue.records.insert(
                        task_id.clone(),
                        TaskRecord::scheduled(envelope, opts.max_retry, run_at),
                    );
                    state.scheduled.push(ScheduledTask {
                        next_run_at: run_at,
                        queue: opts.queue.clone(),
                        task_id: task_id.clone(),
                    });
                    TaskState::Scheduled
                }
                None => {
                    queue
                        .records
                        .insert(task_id.clone(), TaskRecord::pending(envelope, opts.max_retry));
                    queue.ready.push_back(task_id.clone());
                    TaskState::Pending
                }
            };

            TaskInfo {
                id: task_id,
                queue: opts.queue,
                state: task_state,
            }
        };

        // Notify outside the lock
        self.inner.notify.notify_one();
        Ok(info)
    }

    async fn get_state(&self, queue: &QueueName, id: &TaskId) -> Result<TaskState, BrokerError> {
        let mut state = self.inner.state.lock().await;
        state.promote(Instant::now(), &self.inner.config);
        let q = state.queues.get(queue).ok_or_else(|| {
            BrokerError::queue_not_found(format!("queue {:?} does not exist", queue.as_str()))
        })?;
        let record = q.records.get(id).ok_or_else(|| {
            BrokerError::task_not_found(format!("task {:?} does not exist", id.as_str()))
        })?;
        Ok(record.state)
    }

    async fn cancel_active(&self, id: &TaskId) -> Result<(), BrokerError> {
        let state = self.inner.state.lock().await;
        let mut signalled = false;
        for queue in state.queues.values() {
            if let Some(record) = queue.records.get(id) {
                signalled |= record.signal_cancel();
            }
        }
        if signalled {
            Ok(())
        } else {
            Err(BrokerError::other(format!(
                "task {:?} is not being processed",
                id.as_str()
            )))
        }
    }

    async fn delete(&self, queue: &QueueName, id: &TaskId) -> Result<(), BrokerError> {
        let mut state = self.inner.state.lock().await;
        let q = state.queues.get_mut(queue).ok_or_else(|| {
            BrokerError::queue_not_found(format!("queue {:?} does not exist", queue.as_str()))
        })?;
        let record = q.records.get(id).ok_or_else(|| {
            BrokerError::task_not_found(format!("task {:?} does not exist", id.as_str()))
        })?;
        if record.state == TaskState::Active {
            return Err(BrokerError::other(format!(
                "cannot delete task {:?} in active state",
                id.as_str()
            )));
        }
        // ready / scheduled に残った id は取り出し時に読み飛ばされる
        q.records.remove(id);
        Ok(())
    }

    async fn ping(&self) -> Result<(), BrokerError> {
        if self.inner.state.lock().await.closed {
            return Err(BrokerError::other("broker is closed"));
        }
        Ok(())
    }
}

#[async_trait]
impl DeliverySource for InMemoryBroker {
    async fn lease(&self, queues: &[QueueName]) -> Option<Box<dyn TaskLease>> {
        loop {
            let next_wake = {
                let mut state = self.inner.state.lock().await;
                if state.closed {
                    return None;
                }
                let now = Instant::now();
                state.promote(now, &self.inner.config);

                if let Some((token, envelope, cancel_rx)) =
                    state.take_ready(queues, now, self.inner.config.lease_timeout)
                {
                    let lease = InMemoryLease {
                        token,
                        envelope,
                        cancel_rx,
                        inner: Arc::clone(&self.inner),
                    };
                    return Some(Box::new(lease));
                }

                state.next_wake(&self.inner.config)
            };

            // Wait for notification OR next timer
            if let Some(wake_time) = next_wake {
                tokio::select! {
                    _ = self.inner.notify.notified() => {},
                    _ = tokio::time::sleep_until(wake_time.into()) => {},
                }
            } else {
                self.inner.notify.notified().await;
            }
        }
    }
}

/// Lease implementation for InMemoryBroker.
struct InMemoryLease {
    token: u64,
    envelope: TaskEnvelope,
    cancel_rx: watch::Receiver<bool>,
    inner: Arc<Inner>,
}

#[async_trait]
impl TaskLease for InMemoryLease {
    fn envelope(&self) -> &TaskEnvelope {
        &self.envelope
    }

    fn cancel_signal(&self) -> watch::Receiver<bool> {
        self.cancel_rx.clone()
    }

    async fn ack(self: Box<Self>) -> Result<(), BrokerError> {
        let mut state = self.inner.state.lock().await;
        let Some((queue_name, task_id)) = state.active.remove(&self.token) else {
            // lease expired and the task was already redelivered
            tracing::debug!(task_id = %self.envelope.task_id(), "ignoring ack from stale lease");
            return Ok(());
        };
        let Some(queue) = state.queues.get_mut(&queue_name) else {
            return Ok(());
        };
        let holds = queue
            .records
            .get(&task_id)
            .is_some_and(|r| r.holds_lease(self.token));
        if !holds {
            return Ok(());
        }
        queue.completed_total += 1;
        if self.inner.config.completed_retention.is_zero() {
            queue.records.remove(&task_id);
        } else if let Some(record) = queue.records.get_mut(&task_id) {
            record.mark_completed(Instant::now());
        }
        Ok(())
    }

    async fn fail(self: Box<Self>, error: HandlerError) -> Result<(), BrokerError> {
        let should_notify = {
            let mut state = self.inner.state.lock().await;
            state.apply_failure(self.token, &error, Instant::now(), &self.inner.config)
        }; // Lock released here

        // Notify outside the lock so a sleeping worker recomputes its timer
        if should_notify {
            self.inner.notify.notify_one();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::BrokerErrorKind;
    use chrono::{Duration as ChronoDuration, Utc};

    fn broker_with(base_delay: Duration, lease_timeout: Duration) -> InMemoryBroker {
        InMemoryBroker::with_config(InMemoryBrokerConfig {
            retry_policy: RetryPolicy::exponential(base_delay),
            lease_timeout,
            ..InMemoryBrokerConfig::default()
        })
    }

    fn default_queue() -> QueueName {
        QueueName::default()
    }

    async fn enqueue(broker: &InMemoryBroker, max_retry: u32) -> TaskInfo {
        broker
            .enqueue(
                &TaskType::http_forward(),
                b"payload".to_vec(),
                EnqueueOptions::new(default_queue(), max_retry),
            )
            .await
            .unwrap()
    }

    async fn lease_now(broker: &InMemoryBroker) -> Box<dyn TaskLease> {
        tokio::time::timeout(Duration::from_secs(2), broker.lease(&[default_queue()]))
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn enqueue_and_counts() {
        let broker = InMemoryBroker::default();
        let info = enqueue(&broker, 3).await;

        assert_eq!(info.state, TaskState::Pending);
        assert_eq!(info.id.as_str().len(), 26);
        let counts = broker.counts(&default_queue()).await;
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.active, 0);
    }

    #[tokio::test]
    async fn caller_id_conflicts_within_a_queue() {
        let broker = InMemoryBroker::default();
        let id = TaskId::parse("order-42").unwrap();
        let opts = EnqueueOptions::new(default_queue(), 0).with_id(id.clone());

        broker
            .enqueue(&TaskType::http_forward(), vec![], opts.clone())
            .await
            .unwrap();
        let err = broker
            .enqueue(&TaskType::http_forward(), vec![], opts)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), BrokerErrorKind::IdConflict);

        // same id in another queue is fine
        let other = EnqueueOptions::new(QueueName::parse("other").unwrap(), 0).with_id(id);
        broker
            .enqueue(&TaskType::http_forward(), vec![], other)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn lease_transitions_to_active() {
        let broker = InMemoryBroker::default();
        let info = enqueue(&broker, 3).await;

        let lease = lease_now(&broker).await;
        assert_eq!(lease.envelope().task_type().as_str(), "http:forward");
        assert_eq!(lease.envelope().payload(), b"payload");
        assert_eq!(lease.envelope().max_retry(), 3);

        let state = broker.get_state(&default_queue(), &info.id).await.unwrap();
        assert_eq!(state, TaskState::Active);
    }

    #[tokio::test]
    async fn ack_drops_completed_task() {
        let broker = InMemoryBroker::default();
        let info = enqueue(&broker, 3).await;

        lease_now(&broker).await.ack().await.unwrap();

        let counts = broker.counts(&default_queue()).await;
        assert_eq!(counts.completed, 1);
        assert_eq!(counts.outstanding(), 0);
        let err = broker.get_state(&default_queue(), &info.id).await.unwrap_err();
        assert_eq!(err.kind(), BrokerErrorKind::TaskNotFound);
    }

    #[tokio::test]
    async fn completed_task_is_visible_while_retained() {
        let broker = InMemoryBroker::with_config(InMemoryBrokerConfig {
            completed_retention: Duration::from_secs(60),
            ..InMemoryBrokerConfig::default()
        });
        let info = enqueue(&broker, 0).await;

        lease_now(&broker).await.ack().await.unwrap();

        let state = broker.get_state(&default_queue(), &info.id).await.unwrap();
        assert_eq!(state, TaskState::Completed);
        broker.delete(&default_queue(), &info.id).await.unwrap();
    }

    #[tokio::test]
    async fn retryable_failure_is_rescheduled_with_backoff() {
        let broker = broker_with(Duration::from_millis(50), Duration::from_secs(60));
        let info = enqueue(&broker, 2).await;

        lease_now(&broker)
            .await
            .fail(HandlerError::retry("503"))
            .await
            .unwrap();

        let state = broker.get_state(&default_queue(), &info.id).await.unwrap();
        assert_eq!(state, TaskState::Retry);

        let lease = lease_now(&broker).await;
        assert_eq!(lease.envelope().retried(), 1);
        assert_eq!(
            broker.last_error(&default_queue(), &info.id).await.as_deref(),
            Some("503")
        );
    }

    #[tokio::test]
    async fn retries_exhausted_archives() {
        let broker = broker_with(Duration::from_millis(5), Duration::from_secs(60));
        let info = enqueue(&broker, 1).await;

        lease_now(&broker)
            .await
            .fail(HandlerError::retry("first"))
            .await
            .unwrap();
        lease_now(&broker)
            .await
            .fail(HandlerError::retry("second"))
            .await
            .unwrap();

        let state = broker.get_state(&default_queue(), &info.id).await.unwrap();
        assert_eq!(state, TaskState::Archived);
        assert_eq!(broker.counts(&default_queue()).await.archived, 1);
    }

    #[tokio::test]
    async fn skip_retry_archives_without_consuming_a_retry() {
        let broker = InMemoryBroker::default();
        let info = enqueue(&broker, 5).await;

        lease_now(&broker)
            .await
            .fail(HandlerError::skip_retry("404"))
            .await
            .unwrap();

        let state = broker.get_state(&default_queue(), &info.id).await.unwrap();
        assert_eq!(state, TaskState::Archived);
        assert_eq!(
            broker.last_error(&default_queue(), &info.id).await.as_deref(),
            Some("404")
        );
    }

    async fn archive(broker: &InMemoryBroker, id: &str) -> TaskId {
        let id = TaskId::parse(id).unwrap();
        broker
            .enqueue(
                &TaskType::http_forward(),
                vec![],
                EnqueueOptions::new(default_queue(), 0).with_id(id.clone()),
            )
            .await
            .unwrap();
        lease_now(broker)
            .await
            .fail(HandlerError::skip_retry("410"))
            .await
            .unwrap();
        id
    }

    #[tokio::test]
    async fn archived_tasks_are_purged_after_retention() {
        let broker = InMemoryBroker::with_config(InMemoryBrokerConfig {
            archived_retention: Duration::from_millis(40),
            ..InMemoryBrokerConfig::default()
        });
        let id = archive(&broker, "dead").await;
        assert_eq!(
            broker.get_state(&default_queue(), &id).await.unwrap(),
            TaskState::Archived
        );

        tokio::time::sleep(Duration::from_millis(80)).await;
        let err = broker.get_state(&default_queue(), &id).await.unwrap_err();
        assert_eq!(err.kind(), BrokerErrorKind::TaskNotFound);
        // the cumulative total survives the purge
        assert_eq!(broker.counts(&default_queue()).await.archived, 1);
    }

    #[tokio::test]
    async fn next_wake_covers_archive_purge() {
        let broker = InMemoryBroker::with_config(InMemoryBrokerConfig {
            archived_retention: Duration::from_millis(30),
            ..InMemoryBrokerConfig::default()
        });
        archive(&broker, "dead").await;
        {
            let state = broker.inner.state.lock().await;
            let wake = state.next_wake(&broker.inner.config).unwrap();
            assert!(wake <= Instant::now() + Duration::from_millis(30));
        }
    }

    #[tokio::test]
    async fn archive_cap_drops_the_oldest() {
        let broker = InMemoryBroker::with_config(InMemoryBrokerConfig {
            max_archived: 2,
            ..InMemoryBrokerConfig::default()
        });
        let first = archive(&broker, "a").await;
        let second = archive(&broker, "b").await;
        let third = archive(&broker, "c").await;

        let q = default_queue();
        assert!(broker.get_state(&q, &first).await.unwrap_err().is_not_found());
        assert_eq!(broker.get_state(&q, &second).await.unwrap(), TaskState::Archived);
        assert_eq!(broker.get_state(&q, &third).await.unwrap(), TaskState::Archived);
        assert_eq!(broker.counts(&q).await.archived, 3);
    }

    #[tokio::test]
    async fn future_not_before_is_scheduled() {
        let broker = InMemoryBroker::default();
        let opts = EnqueueOptions::new(default_queue(), 0)
            .with_not_before(Utc::now() + ChronoDuration::hours(1));
        let info = broker
            .enqueue(&TaskType::http_forward(), vec![], opts)
            .await
            .unwrap();

        assert_eq!(info.state, TaskState::Scheduled);
        let leased =
            tokio::time::timeout(Duration::from_millis(50), broker.lease(&[default_queue()])).await;
        assert!(leased.is_err(), "scheduled task must not be leased early");
    }

    #[tokio::test]
    async fn past_not_before_is_pending() {
        let broker = InMemoryBroker::default();
        let opts = EnqueueOptions::new(default_queue(), 0)
            .with_not_before(Utc::now() - ChronoDuration::minutes(5));
        let info = broker
            .enqueue(&TaskType::http_forward(), vec![], opts)
            .await
            .unwrap();

        assert_eq!(info.state, TaskState::Pending);
    }

    #[tokio::test]
    async fn scheduled_task_becomes_leasable() {
        let broker = InMemoryBroker::default();
        let opts = EnqueueOptions::new(default_queue(), 0)
            .with_not_before(Utc::now() + ChronoDuration::milliseconds(50));
        broker
            .enqueue(&TaskType::http_forward(), vec![], opts)
            .await
            .unwrap();

        let lease = lease_now(&broker).await;
        assert_eq!(lease.envelope().queue(), &default_queue());
    }

    #[tokio::test]
    async fn cancel_active_signals_lease_holder() {
        let broker = InMemoryBroker::default();
        let info = enqueue(&broker, 0).await;

        let err = broker.cancel_active(&info.id).await.unwrap_err();
        assert_eq!(err.kind(), BrokerErrorKind::Other);

        let lease = lease_now(&broker).await;
        let signal = lease.cancel_signal();
        assert!(!*signal.borrow());

        broker.cancel_active(&info.id).await.unwrap();
        assert!(*signal.borrow());
    }

    #[tokio::test]
    async fn delete_rules() {
        let broker = InMemoryBroker::default();
        let info = enqueue(&broker, 0).await;
        let missing_queue = QueueName::parse("nope").unwrap();

        let err = broker.delete(&missing_queue, &info.id).await.unwrap_err();
        assert_eq!(err.kind(), BrokerErrorKind::QueueNotFound);

        let lease = lease_now(&broker).await;
        let err = broker.delete(&default_queue(), &info.id).await.unwrap_err();
        assert_eq!(err.kind(), BrokerErrorKind::Other);

        lease.fail(HandlerError::skip_retry("gone")).await.unwrap();
        broker.delete(&default_queue(), &info.id).await.unwrap();

        let err = broker.delete(&default_queue(), &info.id).await.unwrap_err();
        assert_eq!(err.kind(), BrokerErrorKind::TaskNotFound);
    }

    #[tokio::test]
    async fn deleted_pending_task_is_never_leased() {
        let broker = InMemoryBroker::default();
        let info = enqueue(&broker, 0).await;
        broker.delete(&default_queue(), &info.id).await.unwrap();

        let leased =
            tokio::time::timeout(Duration::from_millis(50), broker.lease(&[default_queue()])).await;
        assert!(leased.is_err());
    }

    #[tokio::test]
    async fn expired_lease_is_redelivered_and_stale_ack_ignored() {
        let broker = broker_with(Duration::from_millis(5), Duration::from_millis(30));
        let info = enqueue(&broker, 3).await;

        let stale = lease_now(&broker).await;
        let stale_signal = stale.cancel_signal();

        let fresh = lease_now(&broker).await;
        assert_eq!(fresh.envelope().retried(), 1);
        assert!(*stale_signal.borrow());

        stale.ack().await.unwrap();
        let state = broker.get_state(&default_queue(), &info.id).await.unwrap();
        assert_eq!(state, TaskState::Active);

        fresh.ack().await.unwrap();
        assert_eq!(broker.counts(&default_queue()).await.completed, 1);
    }

    #[tokio::test]
    async fn closed_broker_stops_leasing() {
        let broker = InMemoryBroker::default();
        broker.close().await;

        assert!(broker.ping().await.is_err());
        assert!(broker.lease(&[default_queue()]).await.is_none());
        let err = broker
            .enqueue(
                &TaskType::http_forward(),
                vec![],
                EnqueueOptions::new(default_queue(), 0),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), BrokerErrorKind::Other);
    }
}
