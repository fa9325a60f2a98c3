//! Outcome model: the result of one delivery attempt.
//!
//! The worker turns every attempt into a `DeliveryOutcome`; only at the
//! broker boundary is it collapsed into ack / retry / skip-retry.

use super::HandlerError;

/// Classification of one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutcomeKind {
    Success,
    /// Never retried (bad payload, malformed request, 4xx).
    PermanentFailure,
    /// Retried with backoff (transport error, timeout, 5xx, other statuses).
    RetryableFailure,
}

/// Something observed during the attempt, kept for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub enum Artifact {
    /// HTTP status returned by the target.
    StatusCode(u16),

    /// Response body (possibly truncated).
    ResponseBody(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryOutcome {
    pub kind: OutcomeKind,
    pub artifacts: Vec<Artifact>,
    pub reason: Option<String>,
}

impl DeliveryOutcome {
    pub fn success() -> Self {
        Self {
            kind: OutcomeKind::Success,
            artifacts: Vec::new(),
            reason: None,
        }
    }

    pub fn permanent(reason: impl Into<String>) -> Self {
        Self {
            kind: OutcomeKind::PermanentFailure,
            artifacts: Vec::new(),
            reason: Some(reason.into()),
        }
    }

    pub fn retryable(reason: impl Into<String>) -> Self {
        Self {
            kind: OutcomeKind::RetryableFailure,
            artifacts: Vec::new(),
            reason: Some(reason.into()),
        }
    }

    pub fn with_artifact(mut self, artifact: Artifact) -> Self {
        self.artifacts.push(artifact);
        self
    }

    pub fn status_code(&self) -> Option<u16> {
        self.artifacts.iter().find_map(|a| match a {
            Artifact::StatusCode(code) => Some(*code),
            _ => None,
        })
    }

    pub fn response_body(&self) -> Option<&str> {
        self.artifacts.iter().find_map(|a| match a {
            Artifact::ResponseBody(body) => Some(body.as_str()),
            _ => None,
        })
    }

    /// Collapse into what the broker understands.
    pub fn into_result(self) -> Result<(), HandlerError> {
        let reason = self.reason.unwrap_or_default();
        match self.kind {
            OutcomeKind::Success => Ok(()),
            OutcomeKind::PermanentFailure => Err(HandlerError::skip_retry(reason)),
            OutcomeKind::RetryableFailure => Err(HandlerError::retry(reason)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ErrorKind;

    #[test]
    fn artifacts_are_queryable() {
        let o = DeliveryOutcome::permanent("target returned 404")
            .with_artifact(Artifact::StatusCode(404))
            .with_artifact(Artifact::ResponseBody("no such route".to_string()));

        assert_eq!(o.status_code(), Some(404));
        assert_eq!(o.response_body(), Some("no such route"));
    }

    #[test]
    fn into_result_maps_kinds() {
        assert!(DeliveryOutcome::success().into_result().is_ok());

        let err = DeliveryOutcome::permanent("bad").into_result().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SkipRetry);
        assert_eq!(err.message(), "bad");

        let err = DeliveryOutcome::retryable("503").into_result().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Retry);
    }
}
