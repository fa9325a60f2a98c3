use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::DeliveryContext;
use crate::domain::{HandlerError, TaskEnvelope, TaskType};
use crate::error::RelayError;

/// A handler for a specific task type.
///
/// Takes the whole `TaskEnvelope` so the handler can decode the payload as
/// it likes. The returned error's kind tells the broker whether to retry.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, ctx: &DeliveryContext, envelope: &TaskEnvelope) -> Result<(), HandlerError>;
}

/// Registry of handlers (task_type -> handler).
///
/// Built during initialization (mutable), used during runtime (immutable).
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<TaskType, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for a task type.
    pub fn register(
        &mut self,
        task_type: TaskType,
        handler: Arc<dyn TaskHandler>,
    ) -> Result<(), RelayError> {
        if self.handlers.contains_key(&task_type) {
            return Err(RelayError::DuplicateHandler(task_type));
        }
        self.handlers.insert(task_type, handler);
        Ok(())
    }

    pub fn get(&self, task_type: &TaskType) -> Option<&Arc<dyn TaskHandler>> {
        self.handlers.get(task_type)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Runtime executes a `TaskEnvelope` by dispatching to a registered handler.
pub struct Runtime {
    registry: Arc<HandlerRegistry>,
}

impl Runtime {
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self { registry }
    }

    /// Execute one envelope. An unknown task type is retryable: a newer
    /// worker may know how to handle it.
    pub async fn execute(
        &self,
        ctx: &DeliveryContext,
        envelope: &TaskEnvelope,
    ) -> Result<(), HandlerError> {
        let task_type = envelope.task_type();
        let handler = self.registry.get(task_type).ok_or_else(|| {
            HandlerError::retry(format!("handler not found for task_type={task_type}"))
        })?;

        handler.handle(ctx, envelope).await
    }
}
