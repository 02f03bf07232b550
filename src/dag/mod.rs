// src/dag/mod.rs

//! Resource graph, planning and scheduling.
//!
//! - [`graph`] holds the dependency graph between resource nodes.
//! - [`node`] and [`stack`] hold per-resource state.
//! - [`plan`] diffs recorded vs desired state into operations.
//! - [`scheduler`] contains the per-run state machine that decides which
//!   operations are ready, and what happens to waiters on failure.
//! - [`scheduler_step`] defines the result types for scheduler steps.
//! - [`report`] aggregates the outcome of a run.

pub mod graph;
pub mod node;
pub mod plan;
pub mod report;
pub mod scheduler;
pub mod scheduler_step;
pub mod stack;

pub use graph::DependencyGraph;
pub use node::{DesiredState, NodeName, ResourceNode, ResourceStatus};
pub use plan::{Operation, Plan};
pub use report::{ConvergenceFailure, ConvergenceReport, NodeFailure};
pub use scheduler::{Scheduler, SchedulerOptions};
pub use scheduler_step::{NodeRunState, ScheduledOperation, SchedulerStep};
pub use stack::{Stack, Targets};
