// src/task/lifecycle.rs

//! Task lifecycle: a named [`Step`] plus its state machine.

use std::fmt;
use std::time::Duration;

use tracing::{debug, warn};

use crate::task::{Progress, RetryPolicy, Step, TaskError, TaskOutput};

/// Lifecycle state of a [`Task`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::Failed | TaskState::Cancelled
        )
    }
}

/// A resumable unit of work.
///
/// Only the owning runner mutates a task. Step errors are captured rather
/// than propagated: the task becomes `Failed` and keeps the error so the
/// runner can hand it back once polling ends.
pub struct Task {
    name: String,
    state: TaskState,
    step: Box<dyn Step>,
    timeout: Option<Duration>,
    retry: RetryPolicy,
    retries: u32,
    not_found_is_success: bool,
    output: Option<TaskOutput>,
    failure: Option<TaskError>,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("timeout", &self.timeout)
            .field("retries", &self.retries)
            .field("failure", &self.failure)
            .finish_non_exhaustive()
    }
}

impl Task {
    pub fn new(name: impl Into<String>, step: impl Step + 'static) -> Self {
        Self::from_boxed(name, Box::new(step))
    }

    pub fn from_boxed(name: impl Into<String>, step: Box<dyn Step>) -> Self {
        Self {
            name: name.into(),
            state: TaskState::Pending,
            step,
            timeout: None,
            retry: RetryPolicy::none(),
            retries: 0,
            not_found_is_success: false,
            output: None,
            failure: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Treat a `NotFound` step error as successful completion.
    ///
    /// Used for delete tasks: a resource that is already gone is deleted.
    pub fn not_found_is_success(mut self) -> Self {
        self.not_found_is_success = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Number of retries consumed so far.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn failure(&self) -> Option<&TaskError> {
        self.failure.as_ref()
    }

    /// See [`Step::partial_output`].
    pub fn partial_output(&self) -> Option<TaskOutput> {
        self.step.partial_output()
    }

    pub fn is_complete(&self) -> bool {
        self.state.is_terminal()
    }

    /// Begin execution. Fails if the task was already started.
    pub fn start(&mut self) -> Result<(), TaskError> {
        if self.state != TaskState::Pending {
            return Err(TaskError::AlreadyStarted(self.name.clone()));
        }
        debug!(task = %self.name, "task started");
        self.state = TaskState::Running;
        Ok(())
    }

    /// Advance one increment of work. Returns `true` once the task is in a
    /// terminal state; calling it again afterwards is a no-op.
    pub fn step(&mut self) -> bool {
        match self.state {
            TaskState::Pending => {
                self.state = TaskState::Running;
                debug!(task = %self.name, "task started implicitly by first step");
            }
            TaskState::Running => {}
            _ => return true,
        }

        match self.step.advance() {
            Ok(Progress::Pending) => false,
            Ok(Progress::Complete(output)) => {
                self.succeed(output);
                true
            }
            Err(err) if err.is_not_found() && self.not_found_is_success => {
                debug!(task = %self.name, error = %err, "resource already gone; treating as success");
                self.succeed(TaskOutput::default());
                true
            }
            Err(err) if self.retry.should_retry(&err, self.retries) => {
                self.retries += 1;
                warn!(
                    task = %self.name,
                    attempt = self.retries,
                    max_retries = self.retry.max_retries,
                    error = %err,
                    "retryable step error; will retry"
                );
                false
            }
            Err(err) => {
                warn!(task = %self.name, error = %err, "task failed");
                self.state = TaskState::Failed;
                self.failure = Some(err);
                true
            }
        }
    }

    /// Stop the task. No work is rolled back; terminal tasks are unaffected.
    pub fn cancel(&mut self) {
        if !self.state.is_terminal() {
            debug!(task = %self.name, "task cancelled");
            self.state = TaskState::Cancelled;
        }
    }

    /// Outcome of a terminal task; `None` while it is still pending/running.
    pub fn result(&self) -> Option<Result<TaskOutput, TaskError>> {
        match self.state {
            TaskState::Succeeded => Some(Ok(self.output.clone().unwrap_or_default())),
            TaskState::Failed => Some(Err(self
                .failure
                .clone()
                .unwrap_or_else(|| TaskError::ResourceFailed(self.name.clone())))),
            TaskState::Cancelled => Some(Err(TaskError::Cancelled(self.name.clone()))),
            TaskState::Pending | TaskState::Running => None,
        }
    }

    fn succeed(&mut self, output: TaskOutput) {
        debug!(task = %self.name, "task succeeded");
        self.state = TaskState::Succeeded;
        self.output = Some(output);
    }
}
