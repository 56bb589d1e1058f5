//! Controller error types.

use thiserror::Error;

/// Errors that end a reconciliation pass early.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("state store error: {0}")]
    State(#[from] appgrid_state::StateError),

    #[error("reconciliation cancelled")]
    Cancelled,

    #[error("worker task failed: {0}")]
    Worker(String),
}

impl ControllerError {
    /// Whether the key should be queued again with backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            ControllerError::State(_) | ControllerError::Worker(_) => true,
            ControllerError::Cancelled => false,
        }
    }
}

pub type ControllerResult<T> = Result<T, ControllerError>;

#[cfg(test)]
mod tests {
    use super::*;
    use appgrid_state::StateError;

    #[test]
    fn store_errors_are_retryable() {
        let err = ControllerError::from(StateError::Write("disk full".into()));
        assert!(err.is_retryable());
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn cancellation_is_not() {
        assert!(!ControllerError::Cancelled.is_retryable());
        assert!(ControllerError::Worker("panicked".into()).is_retryable());
    }
}
