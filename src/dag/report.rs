// src/dag/report.rs

//! Outcome of a convergence run.

use std::fmt;

use thiserror::Error;

use crate::dag::node::NodeName;
use crate::task::TaskError;

/// A node whose operation failed, with the underlying error.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeFailure {
    pub node: NodeName,
    pub error: TaskError,
}

impl fmt::Display for NodeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.node, self.error)
    }
}

/// Summary of one convergence run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConvergenceReport {
    pub run_id: u64,
    /// Nodes whose operation succeeded, in completion order.
    pub succeeded: Vec<NodeName>,
    pub failed: Vec<NodeFailure>,
    /// Nodes never started because something they wait on failed (or, with
    /// `stop_all`, because anything failed).
    pub skipped: Vec<NodeName>,
    /// Nodes whose operation was cancelled or never started due to shutdown.
    pub cancelled: Vec<NodeName>,
    /// Number of tasks dispatched in this run.
    pub tasks_created: usize,
}

impl ConvergenceReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.cancelled.is_empty()
    }

    /// Turn an unsuccessful report into the aggregated error.
    pub fn into_result(self) -> Result<ConvergenceReport, ConvergenceFailure> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(ConvergenceFailure {
                failures: self.failed,
                skipped: self.skipped,
                cancelled: self.cancelled,
            })
        }
    }
}

/// Every node failure of a run, reported together.
#[derive(Error, Debug, Clone, PartialEq)]
pub struct ConvergenceFailure {
    pub failures: Vec<NodeFailure>,
    pub skipped: Vec<NodeName>,
    pub cancelled: Vec<NodeName>,
}

impl ConvergenceFailure {
    pub fn failed_nodes(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.node.as_str()).collect()
    }
}

impl fmt::Display for ConvergenceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "convergence failed for {} resource(s)", self.failures.len())?;
        for failure in &self.failures {
            write!(f, "\n  - {failure}")?;
        }
        if !self.skipped.is_empty() {
            write!(f, "\n  skipped: {}", self.skipped.join(", "))?;
        }
        if !self.cancelled.is_empty() {
            write!(f, "\n  cancelled: {}", self.cancelled.join(", "))?;
        }
        Ok(())
    }
}
