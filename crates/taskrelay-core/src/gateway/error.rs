use thiserror::Error;

/// Client-visible failure of a gateway operation.
///
/// `Internal` only ever carries an opaque message; the underlying cause is
/// logged where it happens.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("{0}")]
    InvalidArgument(String),

    #[error("task with name {task_id:?} already exists")]
    AlreadyExists { task_id: String },

    #[error("task {task_id:?} not found in queue {queue:?}")]
    NotFound { task_id: String, queue: String },

    #[error("{0}")]
    Internal(String),
}

impl GatewayError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// HTTP status code for the error envelope.
    pub fn http_code(&self) -> u16 {
        match self {
            GatewayError::InvalidArgument(_) => 400,
            GatewayError::AlreadyExists { .. } => 409,
            GatewayError::NotFound { .. } => 404,
            GatewayError::Internal(_) => 500,
        }
    }

    /// Canonical status name for the error envelope.
    pub fn status(&self) -> &'static str {
        match self {
            GatewayError::InvalidArgument(_) => "INVALID_ARGUMENT",
            GatewayError::AlreadyExists { .. } => "ALREADY_EXISTS",
            GatewayError::NotFound { .. } => "NOT_FOUND",
            GatewayError::Internal(_) => "INTERNAL",
        }
    }
}
