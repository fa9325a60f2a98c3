//! Queue module: broker records, retry logic, and the in-memory broker.
//!
//! The in-memory broker implements both sides of the broker port
//! (`ports::Broker` for the gateway, `ports::DeliverySource` for workers).

mod memory;
mod record;
mod retry;

pub use memory::{DEFAULT_ARCHIVED_RETENTION, DEFAULT_MAX_ARCHIVED, InMemoryBroker, InMemoryBrokerConfig};
pub use record::{ActiveLease, TaskRecord};
pub use retry::RetryPolicy;
