// src/exec/mod.rs

//! Operation execution.
//!
//! - [`operation`] turns a dispatched node operation into a [`Task`](crate::task::Task).
//! - [`backend`] defines the executor abstraction and the runner-based
//!   production executor.

pub mod backend;
pub mod operation;

pub use backend::{ExecutorBackend, TaskExecutor};
pub use operation::{Action, OperationRequest};
