//! Error classification and the retry loop's terminal error.

use std::fmt;

/// Coarse classification of a failure raised by a provider, validator or task.
///
/// The scenario runner uses the category to decide whether a failure stops
/// the run. Argument errors never reach the runner: providers raise them from
/// their constructors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// The operation cannot be attempted at all.
    Argument,
    /// A precondition is definitively not met.
    ValidationError,
    /// A precondition is questionable, the operation may still proceed.
    ValidationWarning,
    /// An administrative operation failed.
    Task,
}

impl ErrorCategory {
    /// Whether the run may continue past this failure.
    pub fn is_warning(self) -> bool {
        matches!(self, ErrorCategory::ValidationWarning)
    }

    /// Whether the retry loop may attempt the operation again.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorCategory::Task)
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorCategory::Argument => "argument error",
            ErrorCategory::ValidationError => "validation error",
            ErrorCategory::ValidationWarning => "validation warning",
            ErrorCategory::Task => "task error",
        };
        f.write_str(label)
    }
}

/// Implemented by domain error types so the engine can classify them.
pub trait Classified {
    /// Category of this failure.
    fn category(&self) -> ErrorCategory;
}

/// Terminal result of driving a task or validator through the retry loop.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError<E> {
    /// The body failed and the policy declared the failure terminal. Carries
    /// the last body error unchanged.
    #[error(transparent)]
    Failed(E),
    /// The body returned normally but marked its outcome as failed.
    #[error("{name}: declared failure after {attempts} attempt(s)")]
    DeclaredFailed {
        /// Task or validator name.
        name: String,
        /// Attempts made, including the one that declared the failure.
        attempts: u32,
    },
    /// The policy refused every attempt before the body produced a result.
    #[error("{name}: execution budget exhausted after {attempts} attempt(s) without a result")]
    Exhausted {
        /// Task or validator name.
        name: String,
        /// Attempts the policy allowed.
        attempts: u32,
    },
    /// Rollback was requested on a task that does not carry the capability.
    #[error("{name}: rollback is not supported")]
    RollbackUnsupported {
        /// Task name.
        name: String,
    },
    /// Abort was requested on a task that cannot be interrupted.
    #[error("{name}: abort is not supported")]
    AbortUnsupported {
        /// Task name.
        name: String,
    },
}

impl<E> ExecutionError<E> {
    /// The body error, if the failure came from the body.
    pub fn body_error(&self) -> Option<&E> {
        match self {
            ExecutionError::Failed(e) => Some(e),
            _ => None,
        }
    }

    /// Consumes the error, keeping only a body failure.
    pub fn into_body_error(self) -> Option<E> {
        match self {
            ExecutionError::Failed(e) => Some(e),
            _ => None,
        }
    }

    /// True for rollback or abort requests the task cannot honor.
    pub fn is_unsupported(&self) -> bool {
        matches!(
            self,
            ExecutionError::RollbackUnsupported { .. } | ExecutionError::AbortUnsupported { .. }
        )
    }
}

impl<E: Classified> ExecutionError<E> {
    /// Category of the failure. Engine-level failures count as task errors.
    pub fn category(&self) -> ErrorCategory {
        match self {
            ExecutionError::Failed(e) => e.category(),
            _ => ErrorCategory::Task,
        }
    }
}

/// Raised by cooperative waits when the run was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("operation cancelled")]
pub struct Cancelled;

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("disk full on {0}")]
    struct DiskFull(String);

    impl Classified for DiskFull {
        fn category(&self) -> ErrorCategory {
            ErrorCategory::ValidationError
        }
    }

    #[test]
    fn failed_displays_body_error_verbatim() {
        let err = ExecutionError::Failed(DiskFull("R1".into()));
        assert_eq!(err.to_string(), "disk full on R1");
        assert_eq!(err.category(), ErrorCategory::ValidationError);
        assert_eq!(err.into_body_error().map(|e| e.0), Some("R1".to_string()));
    }

    #[test]
    fn engine_failures_are_task_category() {
        let err: ExecutionError<DiskFull> = ExecutionError::RollbackUnsupported {
            name: "Create login".into(),
        };
        assert!(err.is_unsupported());
        assert_eq!(err.category(), ErrorCategory::Task);
        assert!(err.to_string().contains("rollback is not supported"));
    }

    #[test]
    fn only_task_category_is_retryable() {
        assert!(ErrorCategory::Task.is_retryable());
        assert!(!ErrorCategory::ValidationError.is_retryable());
        assert!(ErrorCategory::ValidationWarning.is_warning());
        assert!(!ErrorCategory::Argument.is_warning());
    }
}
