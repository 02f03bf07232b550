// src/task/runner.rs

//! Cooperative polling driver for a single [`Task`].

use std::time::Duration;

use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::task::{Backoff, Task, TaskError, TaskOutput};

/// Polling parameters for a [`TaskRunner`].
#[derive(Debug, Clone, Copy)]
pub struct RunnerOptions {
    /// Delay between the first two steps.
    pub poll_interval: Duration,
    /// Upper bound for the growing delay.
    pub max_poll_interval: Duration,
    /// Multiplier applied to the delay after every wait.
    pub backoff_factor: f64,
    /// Deadline applied when the task itself has no timeout.
    pub timeout: Option<Duration>,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(200),
            max_poll_interval: Duration::from_secs(2),
            backoff_factor: 1.5,
            timeout: None,
        }
    }
}

/// Requests cancellation of a running [`TaskRunner`].
///
/// The step that is currently executing is allowed to finish; the runner
/// then stops polling and the task becomes `Cancelled`. Nothing is rolled
/// back.
#[derive(Debug)]
pub struct CancelHandle {
    tx: oneshot::Sender<()>,
}

impl CancelHandle {
    /// Returns `false` if the runner had already finished.
    pub fn cancel(self) -> bool {
        self.tx.send(()).is_ok()
    }
}

/// Drives one task to completion by repeatedly calling [`Task::step`] and
/// sleeping between calls.
#[derive(Debug)]
pub struct TaskRunner {
    task: Task,
    options: RunnerOptions,
    elapsed: Duration,
    cancel_rx: Option<oneshot::Receiver<()>>,
}

impl TaskRunner {
    pub fn new(task: Task, options: RunnerOptions) -> Self {
        Self {
            task,
            options,
            elapsed: Duration::ZERO,
            cancel_rx: None,
        }
    }

    /// Create the cancellation handle for this runner. Calling it again
    /// replaces the previous handle.
    pub fn cancel_handle(&mut self) -> CancelHandle {
        let (tx, rx) = oneshot::channel();
        self.cancel_rx = Some(rx);
        CancelHandle { tx }
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn into_task(self) -> Task {
        self.task
    }

    /// Time spent in `run` so far.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Retries consumed by the task's retry policy.
    pub fn retries(&self) -> u32 {
        self.task.retries()
    }

    /// Run until the task is terminal, honouring the task's timeout (or the
    /// runner's default timeout).
    pub async fn run(&mut self) -> Result<TaskOutput, TaskError> {
        let deadline = self
            .task
            .timeout()
            .or(self.options.timeout)
            .map(|t| Instant::now() + t);
        self.run_until(deadline).await
    }

    /// Run until the task is terminal or `deadline` passes.
    ///
    /// On expiry a [`TaskError::Timeout`] is returned and the task keeps its
    /// last state (typically `Running`) for diagnostics.
    pub async fn run_until(&mut self, deadline: Option<Instant>) -> Result<TaskOutput, TaskError> {
        let started = Instant::now();
        let mut backoff = Backoff::new(
            self.options.poll_interval,
            self.options.backoff_factor,
            self.options.max_poll_interval,
        );

        info!(task = %self.task.name(), "running task");

        loop {
            if self.cancel_requested() {
                return Err(self.cancelled());
            }

            if deadline.is_some_and(|d| Instant::now() >= d) {
                self.elapsed += started.elapsed();
                warn!(
                    task = %self.task.name(),
                    elapsed = ?self.elapsed,
                    state = ?self.task.state(),
                    "task deadline expired"
                );
                return Err(TaskError::Timeout {
                    task: self.task.name().to_string(),
                    elapsed: self.elapsed,
                });
            }

            let done = self.task.step();
            trace!(task = %self.task.name(), done, state = ?self.task.state(), "task stepped");
            if done {
                break;
            }

            let mut wait = backoff.next_delay();
            if let Some(d) = deadline {
                wait = wait.min(d.saturating_duration_since(Instant::now()));
            }

            if self.pause(wait).await {
                return Err(self.cancelled());
            }
        }

        self.elapsed += started.elapsed();
        let result = self
            .task
            .result()
            .unwrap_or_else(|| Err(TaskError::ResourceFailed(self.task.name().to_string())));

        match &result {
            Ok(_) => info!(task = %self.task.name(), elapsed = ?self.elapsed, "task completed"),
            Err(e) => warn!(task = %self.task.name(), error = %e, "task finished with error"),
        }
        result
    }

    /// Sleep for `wait`, waking early on cancellation. Returns `true` if
    /// cancellation was requested.
    async fn pause(&mut self, wait: Duration) -> bool {
        let Some(rx) = self.cancel_rx.as_mut() else {
            tokio::time::sleep(wait).await;
            return false;
        };

        let fired = tokio::select! {
            _ = tokio::time::sleep(wait) => None,
            res = rx => Some(res.is_ok()),
        };

        match fired {
            None => false,
            Some(cancelled) => {
                self.cancel_rx = None;
                cancelled
            }
        }
    }

    fn cancel_requested(&mut self) -> bool {
        let Some(rx) = self.cancel_rx.as_mut() else {
            return false;
        };
        match rx.try_recv() {
            Ok(()) => true,
            Err(TryRecvError::Empty) => false,
            Err(TryRecvError::Closed) => {
                // Handle dropped without cancelling.
                self.cancel_rx = None;
                false
            }
        }
    }

    fn cancelled(&mut self) -> TaskError {
        debug!(task = %self.task.name(), "cancellation requested; stopping polling");
        self.task.cancel();
        TaskError::Cancelled(self.task.name().to_string())
    }
}
