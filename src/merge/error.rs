// Merge engine error taxonomy

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("Timed out after {waited_secs:.1}s waiting for merge lock on '{scope}'")]
    LockTimeout { scope: String, waited_secs: f64 },

    #[error("Merge lock error: {0}")]
    Lock(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Invalid merge request: {0}")]
    InvalidRequest(String),

    #[error("AI call failed: {0}")]
    AiCall(String),
}

impl MergeError {
    /// Whether the caller may reasonably retry the same request later
    pub fn is_retryable(&self) -> bool {
        matches!(self, MergeError::LockTimeout { .. })
    }
}

pub type EngineResult<T> = Result<T, MergeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_timeout_message() {
        let err = MergeError::LockTimeout {
            scope: "prd-001".to_string(),
            waited_secs: 2.5,
        };
        assert_eq!(
            err.to_string(),
            "Timed out after 2.5s waiting for merge lock on 'prd-001'"
        );
        assert!(err.is_retryable());
        assert!(!MergeError::Storage("x".into()).is_retryable());
    }
}
