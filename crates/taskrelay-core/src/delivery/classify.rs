//! Response classification.

use crate::domain::OutcomeKind;

/// Map a target's HTTP status to the attempt outcome.
///
/// - 2xx: success
/// - 4xx: permanent (the request itself is wrong; retrying will not help)
/// - anything else (1xx, 3xx, 5xx): retryable
pub fn classify_status(status: u16) -> OutcomeKind {
    match status {
        200..=299 => OutcomeKind::Success,
        400..=499 => OutcomeKind::PermanentFailure,
        _ => OutcomeKind::RetryableFailure,
    }
}
