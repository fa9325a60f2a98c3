//! Delivery side: leases tasks from the broker and forwards them over HTTP.

pub mod classify;
mod handler;
mod pool;
mod runtime;

use std::sync::Arc;
use std::time::Duration;

use opentelemetry_sdk::trace::SdkTracer;
use tokio::sync::watch;

pub use classify::classify_status;
pub use handler::{HttpForwardHandler, JOB_NAME_HEADERS, MAX_CAPTURED_BODY};
pub use pool::{ShutdownHandle, ShutdownReport, WorkerPool};
pub use runtime::{HandlerRegistry, Runtime, TaskHandler};

use crate::domain::{QueueName, TaskType};
use crate::error::RelayError;
use crate::ports::DeliverySource;

/// Per-attempt context handed to handlers.
#[derive(Debug, Clone)]
pub struct DeliveryContext {
    cancel: watch::Receiver<bool>,
}

impl DeliveryContext {
    pub fn new(cancel: watch::Receiver<bool>) -> Self {
        Self { cancel }
    }

    /// A context that is never cancelled.
    pub fn detached() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self::new(rx)
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Resolves once the task is cancelled; pends forever otherwise.
    pub async fn cancelled(&self) {
        let mut rx = self.cancel.clone();
        let closed = rx.wait_for(|cancelled| *cancelled).await.is_err();
        if closed {
            std::future::pending::<()>().await;
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Every task is POSTed here.
    pub target_endpoint: String,

    pub request_timeout: Duration,

    /// Number of concurrent deliveries.
    pub concurrency: usize,

    /// Queues to lease from; empty means all queues.
    pub queues: Vec<QueueName>,

    /// How long in-flight deliveries may run after shutdown is requested.
    pub shutdown_grace: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            target_endpoint: String::new(),
            request_timeout: Duration::from_secs(30),
            concurrency: 10,
            queues: vec![QueueName::default()],
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.target_endpoint.trim().is_empty() {
            return Err(RelayError::Config("target endpoint is required".to_string()));
        }
        if self.concurrency == 0 {
            return Err(RelayError::Config("concurrency must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Runtime with the `http:forward` handler registered.
    pub fn build_runtime(&self, tracer: SdkTracer) -> Result<Runtime, RelayError> {
        let handler =
            HttpForwardHandler::new(self.target_endpoint.clone(), self.request_timeout, tracer)?;
        let mut registry = HandlerRegistry::new();
        registry.register(TaskType::http_forward(), Arc::new(handler))?;
        Ok(Runtime::new(Arc::new(registry)))
    }

    /// Validate, build the runtime and spawn the pool. `tracer` starts the
    /// span of every delivery attempt.
    pub fn start(
        &self,
        source: Arc<dyn DeliverySource>,
        tracer: SdkTracer,
    ) -> Result<WorkerPool, RelayError> {
        self.validate()?;
        let runtime = Arc::new(self.build_runtime(tracer)?);
        Ok(WorkerPool::spawn(
            self.concurrency,
            source,
            runtime,
            self.queues.clone(),
        ))
    }
}
