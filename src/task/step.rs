// src/task/step.rs

//! The resumable computation behind a [`Task`](super::Task).

use crate::api::Properties;
use crate::task::TaskError;

/// What a task produced when it completed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskOutput {
    /// Physical id assigned by the remote API (creates).
    pub resource_id: Option<String>,
    /// Properties as applied remotely, when the step knows them.
    pub properties: Option<Properties>,
}

impl TaskOutput {
    pub fn with_resource_id(id: impl Into<String>) -> Self {
        Self {
            resource_id: Some(id.into()),
            properties: None,
        }
    }
}

/// Result of advancing a step once.
#[derive(Debug, Clone, PartialEq)]
pub enum Progress {
    /// More work remains; advance again later.
    Pending,
    Complete(TaskOutput),
}

/// An explicit state machine advanced one increment at a time.
///
/// Implementations perform at most one remote round-trip per call and keep
/// whatever they need to resume in `self`.
pub trait Step: Send {
    fn advance(&mut self) -> Result<Progress, TaskError>;

    /// Output already known before completion, such as the id of a
    /// resource whose creation was accepted but never confirmed.
    fn partial_output(&self) -> Option<TaskOutput> {
        None
    }
}

impl<F> Step for F
where
    F: FnMut() -> Result<Progress, TaskError> + Send,
{
    fn advance(&mut self) -> Result<Progress, TaskError> {
        self()
    }
}
