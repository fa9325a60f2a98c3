//! Task gateway: turns API calls into broker operations.
//!
//! - [`TaskGateway::create_task`]: validate, build the payload, stamp trace
//!   context and request id into it, submit to the broker.
//! - [`TaskGateway::delete_task`]: cancel an active task or delete an idle one.

mod cancel;
mod enqueue;
mod error;
pub mod request;
mod validate;

use std::sync::Arc;

pub use enqueue::CreatedTask;
pub use error::GatewayError;
pub use request::{CreateTaskRequest, CreateTaskResponse, HttpRequestSpec, TaskSpec};
pub use validate::{TaskValidator, ValidationError};

use crate::domain::QueueName;
use crate::ports::{Broker, Clock};

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Queue used when the route does not name one.
    pub default_queue: QueueName,

    /// Retries allowed after the first delivery attempt.
    pub max_retry: u32,

    /// Longest caller-supplied task name accepted.
    pub max_name_len: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            default_queue: QueueName::default(),
            max_retry: 3,
            max_name_len: TaskValidator::DEFAULT_MAX_NAME_LEN,
        }
    }
}

pub struct TaskGateway {
    broker: Arc<dyn Broker>,
    clock: Arc<dyn Clock>,
    validator: TaskValidator,
    config: GatewayConfig,
}

impl TaskGateway {
    pub fn new(broker: Arc<dyn Broker>, clock: Arc<dyn Clock>, config: GatewayConfig) -> Self {
        Self {
            broker,
            clock,
            validator: TaskValidator::new().with_max_name_len(config.max_name_len),
            config,
        }
    }
}
