use super::{GatewayError, TaskGateway};
use crate::domain::{BrokerError, QueueName, TaskId, TaskState};
use crate::propagation::RequestContext;

const DELETE_FAILED: &str = "failed to delete task";

impl TaskGateway {
    /// Cancel an active task or delete an idle one.
    ///
    /// Cancelling an active task is best effort: a failed cancel signal is
    /// logged and the call still succeeds, since the delivery may already be
    /// finishing.
    pub async fn delete_task(
        &self,
        ctx: &RequestContext,
        queue: Option<QueueName>,
        task_id: TaskId,
    ) -> Result<(), GatewayError> {
        let queue = queue.unwrap_or_else(|| self.config.default_queue.clone());

        let state = match self.broker.get_state(&queue, &task_id).await {
            Ok(state) => state,
            Err(e) => return Err(self.delete_error(ctx, &queue, &task_id, e)),
        };

        if state == TaskState::Active {
            if let Err(e) = self.broker.cancel_active(&task_id).await {
                tracing::warn!(
                    event = "task.cancel.warn",
                    error = %e,
                    queue = %queue,
                    task_id = %task_id,
                    request_id = %ctx.request_id(),
                    "could not cancel active task"
                );
            }
            return Ok(());
        }

        self.broker
            .delete(&queue, &task_id)
            .await
            .map_err(|e| self.delete_error(ctx, &queue, &task_id, e))
    }

    fn delete_error(
        &self,
        ctx: &RequestContext,
        queue: &QueueName,
        task_id: &TaskId,
        error: BrokerError,
    ) -> GatewayError {
        if error.is_not_found() {
            return GatewayError::NotFound {
                task_id: task_id.to_string(),
                queue: queue.to_string(),
            };
        }
        tracing::error!(
            event = "task.delete.fail",
            error = %error,
            queue = %queue,
            task_id = %task_id,
            request_id = %ctx.request_id(),
            module = ctx.module(),
            "failed to delete task"
        );
        GatewayError::internal(DELETE_FAILED)
    }
}
