use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::{DeliveryContext, Runtime};
use crate::domain::QueueName;
use crate::ports::DeliverySource;

/// Worker pool handle.
/// - `request_shutdown()` で新しい lease の取得を止める
/// - `shutdown(grace)` で in-flight の配送を grace 期間だけ待ち、残りは abort する
pub struct WorkerPool {
    shutdown_tx: Arc<watch::Sender<bool>>,
    joins: Vec<JoinHandle<()>>,
}

/// Cloneable trigger that stops the pool from taking new leases, usable
/// while the pool itself is owned elsewhere.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn request(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }
}

/// What happened to the workers during shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ShutdownReport {
    pub finished: usize,
    /// Workers still delivering when the grace period ran out. Their leases
    /// expire in the broker and the tasks are redelivered.
    pub aborted: usize,
}

impl WorkerPool {
    /// Spawn `n` workers leasing from `queues` (all queues if empty).
    pub fn spawn(
        n: usize,
        source: Arc<dyn DeliverySource>,
        runtime: Arc<Runtime>,
        queues: Vec<QueueName>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let queues: Arc<[QueueName]> = queues.into();

        let mut joins = Vec::with_capacity(n);
        for worker_id in 0..n {
            let src = Arc::clone(&source);
            let rt = Arc::clone(&runtime);
            let qs = Arc::clone(&queues);
            let mut rx = shutdown_rx.clone();

            let join = tokio::spawn(async move {
                worker_loop(worker_id, src, rt, &qs, &mut rx).await;
            });
            joins.push(join);
        }

        tracing::info!(
            event = "worker.start",
            concurrency = n,
            queues = ?queues.iter().map(|q| q.as_str()).collect::<Vec<_>>(),
            "worker pool started"
        );
        Self {
            shutdown_tx: Arc::new(shutdown_tx),
            joins,
        }
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    /// Stop taking new leases. In-flight deliveries keep running.
    pub fn request_shutdown(&self) {
        self.shutdown_handle().request();
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            shutdown_tx: Arc::clone(&self.shutdown_tx),
        }
    }

    /// Stop taking leases and wait up to `grace` for in-flight deliveries.
    pub async fn shutdown(self, grace: Duration) -> ShutdownReport {
        tracing::info!(
            event = "worker.shutdown.start",
            grace_ms = grace.as_millis() as u64,
            "stopping worker pool"
        );
        self.request_shutdown();

        let deadline = tokio::time::Instant::now() + grace;
        let mut report = ShutdownReport::default();
        for mut join in self.joins {
            match tokio::time::timeout_at(deadline, &mut join).await {
                Ok(_) => report.finished += 1,
                Err(_) => {
                    join.abort();
                    report.aborted += 1;
                }
            }
        }

        if report.aborted > 0 {
            tracing::warn!(
                event = "worker.shutdown.timeout",
                aborted = report.aborted,
                "grace period elapsed with deliveries in flight"
            );
        } else {
            tracing::info!(event = "worker.shutdown.finish", "worker pool stopped");
        }
        report
    }
}

async fn worker_loop(
    worker_id: usize,
    source: Arc<dyn DeliverySource>,
    runtime: Arc<Runtime>,
    queues: &[QueueName],
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    loop {
        // shutdown が来ていたら抜ける
        if *shutdown_rx.borrow() {
            break;
        }

        // lease は「待つ」可能性があるので select で shutdown と競合させる
        let lease = tokio::select! {
            changed = shutdown_rx.changed() => {
                // sender が drop された場合も停止扱い
                if changed.is_err() {
                    break;
                }
                continue;
            }
            lease = source.lease(queues) => lease,
        };

        let Some(lease) = lease else {
            // broker が閉じられた
            tracing::debug!(worker_id, "delivery source closed");
            break;
        };

        // handler 実行に必要な分だけ owned にする
        let envelope = lease.envelope().clone();
        let ctx = DeliveryContext::new(lease.cancel_signal());

        match runtime.execute(&ctx, &envelope).await {
            Ok(()) => {
                if let Err(e) = lease.ack().await {
                    tracing::error!(worker_id, task_id = %envelope.task_id(), error = %e, "ack failed");
                }
            }
            Err(err) => {
                tracing::warn!(
                    event = "job.error",
                    worker_id,
                    task_id = %envelope.task_id(),
                    task_type = %envelope.task_type(),
                    queue = %envelope.queue(),
                    retry = %format!("{}/{}", envelope.retried(), envelope.max_retry()),
                    skip_retry = err.is_skip_retry(),
                    error = %err,
                    "task processing failed"
                );
                // broker が retry / archive を判断する
                if let Err(e) = lease.fail(err).await {
                    tracing::error!(worker_id, task_id = %envelope.task_id(), error = %e, "fail report failed");
                }
            }
        }
    }
}
