// src/task/mod.rs

//! Resumable tasks and the runner that drives them.
//!
//! - [`step`] defines the [`Step`] state-machine trait a task advances.
//! - [`lifecycle`] holds [`Task`], which owns a step plus its lifecycle
//!   state, failure and retry bookkeeping.
//! - [`retry`] contains the retry policy and poll-interval backoff.
//! - [`runner`] contains [`TaskRunner`], the cooperative polling loop with
//!   deadline and cancellation support.
//! - [`error`] is the task-level error taxonomy.

pub mod error;
pub mod lifecycle;
pub mod retry;
pub mod runner;
pub mod step;

pub use error::TaskError;
pub use lifecycle::{Task, TaskState};
pub use retry::{Backoff, RetryPolicy};
pub use runner::{CancelHandle, RunnerOptions, TaskRunner};
pub use step::{Progress, Step, TaskOutput};
