//! Errors - エラー型と分類
//!
//! broker ライブラリの sentinel error の代わりに、kind タグ付きの
//! 構造体で分類します。呼び出し側は `kind()` で分岐します。

use std::fmt;

use thiserror::Error;

/// How the broker should treat a failed delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Retryable: consume one retry and reschedule with backoff.
    Retry,
    /// Permanent: archive immediately without consuming a retry.
    SkipRetry,
}

/// Error a delivery handler reports back to the broker.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct HandlerError {
    kind: ErrorKind,
    message: String,
}

impl HandlerError {
    pub fn retry(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Retry,
            message: message.into(),
        }
    }

    pub fn skip_retry(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::SkipRetry,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn is_skip_retry(&self) -> bool {
        self.kind == ErrorKind::SkipRetry
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Broker error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BrokerErrorKind {
    /// A task with the requested id already exists in the queue.
    IdConflict,
    QueueNotFound,
    TaskNotFound,
    /// Anything else (connectivity, invalid state, closed broker, ...).
    Other,
}

impl fmt::Display for BrokerErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BrokerErrorKind::IdConflict => "id conflict",
            BrokerErrorKind::QueueNotFound => "queue not found",
            BrokerErrorKind::TaskNotFound => "task not found",
            BrokerErrorKind::Other => "broker error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct BrokerError {
    kind: BrokerErrorKind,
    message: String,
}

impl BrokerError {
    pub fn new(kind: BrokerErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn id_conflict(message: impl Into<String>) -> Self {
        Self::new(BrokerErrorKind::IdConflict, message)
    }

    pub fn queue_not_found(message: impl Into<String>) -> Self {
        Self::new(BrokerErrorKind::QueueNotFound, message)
    }

    pub fn task_not_found(message: impl Into<String>) -> Self {
        Self::new(BrokerErrorKind::TaskNotFound, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(BrokerErrorKind::Other, message)
    }

    pub fn kind(&self) -> BrokerErrorKind {
        self.kind
    }

    /// Queue or task missing; both surface to clients as "not found".
    pub fn is_not_found(&self) -> bool {
        matches!(
            self.kind,
            BrokerErrorKind::QueueNotFound | BrokerErrorKind::TaskNotFound
        )
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}
