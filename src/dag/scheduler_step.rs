// src/dag/scheduler_step.rs

//! Step-by-step result types for the scheduler.

use crate::dag::node::NodeName;
use crate::dag::plan::Operation;

/// A node operation the scheduler decided to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledOperation {
    pub node: NodeName,
    pub operation: Operation,
    pub run_id: u64,
}

/// Per-run state of a node with work to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRunState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
    Cancelled,
}

impl NodeRunState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, NodeRunState::Pending | NodeRunState::Running)
    }
}

/// Structured result of a single scheduler step.
///
/// Useful for tests that want to step the scheduler by hand and make
/// assertions about what changed.
#[derive(Debug, Clone, Default)]
pub struct SchedulerStep {
    /// Operations that became ready to run as a result of this step.
    pub newly_scheduled: Vec<ScheduledOperation>,
    /// Nodes newly marked failed in this step.
    pub newly_failed: Vec<NodeName>,
    /// Pending nodes that will now never start.
    pub newly_skipped: Vec<NodeName>,
    /// Whether this step finished the run.
    pub run_just_finished: bool,
}
