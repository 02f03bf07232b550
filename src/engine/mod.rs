// src/engine/mod.rs

//! Convergence engine.
//!
//! This module ties together:
//! - planning (diff of recorded vs desired stack state)
//! - the per-run scheduler
//! - the event loop that reacts to operation completions and shutdown
//!
//! The pure core state machine lives in [`core`]; the async/IO shell that
//! owns the stack and the executor is implemented in [`runtime`].

use tokio::sync::mpsc;
use tracing::info;

use crate::dag::{ConvergenceReport, NodeName, Plan, Scheduler, SchedulerOptions, Stack, Targets};
use crate::errors::{Result, StackdagError};
use crate::exec::{ExecutorBackend, TaskExecutor};
use crate::task::{RetryPolicy, RunnerOptions, TaskError, TaskOutput};

pub mod core;
pub mod runtime;

pub use self::core::{CoreCommand, CoreConvergence, CoreStep};
pub use self::runtime::ConvergenceRuntime;

/// Events flowing into the convergence runtime.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A runner finished a node operation.
    OperationCompleted {
        node: NodeName,
        run_id: u64,
        result: std::result::Result<TaskOutput, TaskError>,
    },
    /// A failed or cancelled operation had already created a remote
    /// resource. Sent before the matching `OperationCompleted`.
    ResourceIdAssigned {
        node: NodeName,
        run_id: u64,
        output: TaskOutput,
    },
    /// Graceful shutdown requested (e.g. Ctrl-C).
    ShutdownRequested,
}

/// Everything that shapes a convergence run.
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineOptions {
    pub scheduler: SchedulerOptions,
    pub runner: RunnerOptions,
    pub retry: RetryPolicy,
}

/// Drive `stack` to `targets` with the production executor.
///
/// Returns the run report, or [`StackdagError::ConvergenceFailed`] listing
/// every failed node when any operation failed.
pub async fn converge(
    stack: &mut Stack,
    targets: &Targets,
    options: &EngineOptions,
) -> Result<ConvergenceReport> {
    let (tx, rx) = mpsc::channel::<EngineEvent>(64);
    let executor = TaskExecutor::new(tx, options.runner, options.retry);
    converge_with(stack, targets, options.scheduler, executor, rx).await
}

/// Like [`converge`], with a caller-supplied executor and event channel.
///
/// The caller keeps any extra sender of `event_rx` (for shutdown requests).
pub async fn converge_with<E: ExecutorBackend>(
    stack: &mut Stack,
    targets: &Targets,
    options: SchedulerOptions,
    executor: E,
    event_rx: mpsc::Receiver<EngineEvent>,
) -> Result<ConvergenceReport> {
    let plan = plan_for(stack, targets)?;
    let run_id = stack.begin_run();

    if plan.is_noop() {
        info!(stack = %stack.name(), run_id, "stack already converged; nothing to do");
        return Ok(ConvergenceReport {
            run_id,
            ..Default::default()
        });
    }

    let core = CoreConvergence::new(Scheduler::new(plan, options, run_id));
    let report = ConvergenceRuntime::new(stack, core, event_rx, executor)
        .run()
        .await?;

    report.into_result().map_err(StackdagError::from)
}

/// Record `targets` on the stack and compute the plan. If planning fails the
/// previous desired state is restored.
pub fn plan_for(stack: &mut Stack, targets: &Targets) -> Result<Plan> {
    stack.validate()?;
    let previous = stack.targets();
    stack.apply_targets(targets)?;

    match Plan::compute(stack) {
        Ok(plan) => Ok(plan),
        Err(e) => {
            stack.apply_targets(&previous)?;
            Err(e)
        }
    }
}
