// src/task/error.rs

use std::time::Duration;

use thiserror::Error;

use crate::api::ApiError;

/// Errors produced while running a task.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TaskError {
    /// The remote resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The remote API rejected an operation. Terminal for the task unless
    /// its retry policy allows another attempt.
    #[error("operation failed: {0}")]
    OperationFailed(ApiError),

    /// The resource reached a state it cannot recover from.
    #[error("resource failed: {0}")]
    ResourceFailed(String),

    /// The runner's deadline expired before the task completed.
    #[error("task '{task}' timed out after {elapsed:?}")]
    Timeout { task: String, elapsed: Duration },

    #[error("task '{0}' was cancelled")]
    Cancelled(String),

    #[error("task '{0}' has already been started")]
    AlreadyStarted(String),
}

impl TaskError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, TaskError::NotFound(_))
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, TaskError::OperationFailed(e) if e.is_retryable())
    }
}

impl From<ApiError> for TaskError {
    fn from(err: ApiError) -> Self {
        if err.is_not_found() {
            TaskError::NotFound(err.to_string())
        } else {
            TaskError::OperationFailed(err)
        }
    }
}
