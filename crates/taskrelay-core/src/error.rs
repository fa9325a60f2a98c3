use thiserror::Error;

use crate::domain::TaskType;

/// Setup-time errors: handler registry, HTTP client, metrics recorder, config.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("duplicate handler for task_type={0}")]
    DuplicateHandler(TaskType),

    #[error("failed to build http client: {0}")]
    HttpClient(#[source] reqwest::Error),

    #[error("failed to install metrics recorder: {0}")]
    Metrics(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}
