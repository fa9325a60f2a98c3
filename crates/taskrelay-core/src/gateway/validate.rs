//! Structural validation of task creation requests.

use http::{HeaderName, HeaderValue};
use thiserror::Error;

use super::request::CreateTaskRequest;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {reason}")]
pub struct ValidationError {
    pub field: String,
    pub reason: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Request validator, constructed once and held by the gateway.
#[derive(Debug, Clone)]
pub struct TaskValidator {
    max_name_len: usize,
}

impl TaskValidator {
    pub const DEFAULT_MAX_NAME_LEN: usize = 500;

    pub fn new() -> Self {
        Self {
            max_name_len: Self::DEFAULT_MAX_NAME_LEN,
        }
    }

    pub fn with_max_name_len(mut self, max_name_len: usize) -> Self {
        self.max_name_len = max_name_len;
        self
    }

    pub fn validate(&self, request: &CreateTaskRequest) -> Result<(), ValidationError> {
        let task = &request.task;

        // 空の name は「未指定」扱い
        if !task.name.is_empty() {
            if task.name.len() > self.max_name_len {
                return Err(ValidationError::new(
                    "task.name",
                    format!("must be at most {} characters", self.max_name_len),
                ));
            }
            if !task
                .name
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
            {
                return Err(ValidationError::new(
                    "task.name",
                    "may only contain letters, digits, hyphens and underscores",
                ));
            }
        }

        let Some(http_request) = &task.http_request else {
            return Err(ValidationError::new("task.httpRequest", "is required"));
        };

        for (name, value) in http_request.headers.iter().flatten() {
            if HeaderName::from_bytes(name.as_bytes()).is_err() {
                return Err(ValidationError::new(
                    format!("task.httpRequest.headers[{name:?}]"),
                    "is not a valid header name",
                ));
            }
            if HeaderValue::from_str(value).is_err() {
                return Err(ValidationError::new(
                    format!("task.httpRequest.headers[{name:?}]"),
                    "is not a valid header value",
                ));
            }
        }

        Ok(())
    }
}

impl Default for TaskValidator {
    fn default() -> Self {
        Self::new()
    }
}
