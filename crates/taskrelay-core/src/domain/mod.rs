//! Domain model (ids, task envelope, states, outcomes, errors).

pub mod errors;
pub mod ids;
pub mod outcome;
pub mod state;
pub mod task;

pub use errors::{BrokerError, BrokerErrorKind, ErrorKind, HandlerError};
pub use ids::{EmptyNameError, QueueName, TaskId};
pub use outcome::{Artifact, DeliveryOutcome, OutcomeKind};
pub use state::TaskState;
pub use task::{TaskEnvelope, TaskType};
