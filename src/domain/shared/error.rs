//! Call-handling errors

use crate::domain::call::CallState;
use thiserror::Error;

/// Result type used across the call-handling core
pub type Result<T> = std::result::Result<T, CallError>;

/// Error taxonomy for the webhook and conversation path
///
/// Admission denial is deliberately absent: a denied call is a normal
/// outcome routed to the failover handler, not an error.
#[derive(Error, Debug, Clone)]
pub enum CallError {
    #[error("Webhook signature invalid: {0}")]
    SignatureInvalid(String),

    #[error("Malformed webhook payload: {0}")]
    MalformedPayload(String),

    #[error("Unknown event type: {0}")]
    UnknownEventType(String),

    #[error("Transition conflict for {call_control_id}: {from:?} -> {to:?}")]
    TransitionConflict {
        call_control_id: String,
        from: CallState,
        to: CallState,
    },

    #[error("Pipeline timeout: {0}")]
    PipelineTimeout(String),

    #[error("Pipeline error: {0}")]
    PipelineError(String),

    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),

    #[error("Call session not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CallError {
    /// Duplicate, stale or out-of-order event
    pub fn is_conflict(&self) -> bool {
        matches!(self, CallError::TransitionConflict { .. })
    }

    /// Stable label used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            CallError::SignatureInvalid(_) => "signature_invalid",
            CallError::MalformedPayload(_) => "malformed_payload",
            CallError::UnknownEventType(_) => "unknown_event_type",
            CallError::TransitionConflict { .. } => "transition_conflict",
            CallError::PipelineTimeout(_) => "pipeline_timeout",
            CallError::PipelineError(_) => "pipeline_error",
            CallError::PersistenceFailure(_) => "persistence_failure",
            CallError::NotFound(_) => "not_found",
            CallError::Internal(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_classification() {
        let err = CallError::TransitionConflict {
            call_control_id: "v3:abc".to_string(),
            from: CallState::Completed,
            to: CallState::Streaming,
        };
        assert!(err.is_conflict());
        assert_eq!(err.kind(), "transition_conflict");
        assert!(!CallError::PipelineTimeout("asr".to_string()).is_conflict());
    }
}
