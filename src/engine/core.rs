// src/engine/core.rs

//! Pure core convergence state machine.
//!
//! Consumes [`EngineEvent`]s and produces commands describing what the IO
//! shell should do next. It has no channels, no Tokio types and performs no
//! IO, so it can be unit tested by feeding events by hand.

use tracing::{debug, info};

use crate::dag::{ConvergenceReport, Operation, ScheduledOperation, Scheduler};
use crate::engine::EngineEvent;

/// Command produced by the pure core, to be executed by the IO shell.
#[derive(Debug, Clone, PartialEq)]
pub enum CoreCommand {
    /// Start these node operations.
    Dispatch(Vec<ScheduledOperation>),
    /// Ask running operations to stop polling.
    CancelRunning,
}

/// Decision returned by the core after handling a single event.
#[derive(Debug, Clone)]
pub struct CoreStep {
    pub commands: Vec<CoreCommand>,
    /// Whether the outer loop should keep waiting for events.
    pub keep_running: bool,
}

#[derive(Debug)]
pub struct CoreConvergence {
    scheduler: Scheduler,
}

impl CoreConvergence {
    pub fn new(scheduler: Scheduler) -> Self {
        Self { scheduler }
    }

    pub fn run_id(&self) -> u64 {
        self.scheduler.run_id()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn operation_of(&self, node: &str) -> Operation {
        self.scheduler.operation_of(node)
    }

    pub fn is_finished(&self) -> bool {
        self.scheduler.is_finished()
    }

    /// Seed the run with every operation that is ready up front.
    pub fn start(&mut self) -> CoreStep {
        let step = self.scheduler.start();
        self.finish_step(step.newly_scheduled, Vec::new())
    }

    /// Handle a single event.
    pub fn step(&mut self, event: EngineEvent) -> CoreStep {
        match event {
            EngineEvent::OperationCompleted {
                node,
                run_id,
                result,
            } => {
                if run_id != self.scheduler.run_id() {
                    debug!(node = %node, run_id, current = self.scheduler.run_id(), "stale completion ignored");
                    return self.finish_step(Vec::new(), Vec::new());
                }
                let step = self
                    .scheduler
                    .handle_completion(&node, result.map(|_| ()));
                self.finish_step(step.newly_scheduled, Vec::new())
            }
            // Node bookkeeping only; the runtime records the id.
            EngineEvent::ResourceIdAssigned { .. } => self.finish_step(Vec::new(), Vec::new()),
            EngineEvent::ShutdownRequested => {
                let cancelled = self.scheduler.cancel_pending();
                info!(
                    cancelled = cancelled.len(),
                    in_flight = self.scheduler.in_flight(),
                    "shutdown requested; no new operations will start"
                );
                self.finish_step(Vec::new(), vec![CoreCommand::CancelRunning])
            }
        }
    }

    pub fn report(&self) -> &ConvergenceReport {
        self.scheduler.report()
    }

    pub fn into_report(self) -> ConvergenceReport {
        self.scheduler.into_report()
    }

    fn finish_step(
        &self,
        scheduled: Vec<ScheduledOperation>,
        mut commands: Vec<CoreCommand>,
    ) -> CoreStep {
        if !scheduled.is_empty() {
            commands.insert(0, CoreCommand::Dispatch(scheduled));
        }
        CoreStep {
            commands,
            keep_running: !self.scheduler.is_finished(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use crate::dag::{Plan, SchedulerOptions};
    use crate::task::{TaskError, TaskOutput};

    fn chain() -> CoreConvergence {
        let plan = Plan::from_parts(
            BTreeMap::from([
                ("a".to_string(), Operation::Create),
                ("b".to_string(), Operation::Create),
            ]),
            BTreeMap::from([("a".to_string(), vec!["b".to_string()])]),
        );
        CoreConvergence::new(Scheduler::new(plan, SchedulerOptions::default(), 7))
    }

    fn dispatched(step: &CoreStep) -> Vec<String> {
        step.commands
            .iter()
            .filter_map(|c| match c {
                CoreCommand::Dispatch(ops) => Some(ops.iter().map(|o| o.node.clone())),
                CoreCommand::CancelRunning => None,
            })
            .flatten()
            .collect()
    }

    fn done(node: &str, run_id: u64) -> EngineEvent {
        EngineEvent::OperationCompleted {
            node: node.into(),
            run_id,
            result: Ok(TaskOutput::default()),
        }
    }

    #[test]
    fn completion_unblocks_dependents() {
        let mut core = chain();
        let first = core.start();
        assert_eq!(dispatched(&first), vec!["b"]);
        assert!(first.keep_running);

        let second = core.step(done("b", 7));
        assert_eq!(dispatched(&second), vec!["a"]);

        let last = core.step(done("a", 7));
        assert!(!last.keep_running);
        assert_eq!(core.report().succeeded, vec!["b", "a"]);
    }

    #[test]
    fn stale_completion_is_ignored() {
        let mut core = chain();
        core.start();
        let step = core.step(done("b", 6));
        assert!(step.commands.is_empty());
        assert!(step.keep_running);
    }

    #[test]
    fn failure_of_dependency_never_starts_dependent() {
        let mut core = chain();
        core.start();
        let step = core.step(EngineEvent::OperationCompleted {
            node: "b".into(),
            run_id: 7,
            result: Err(TaskError::ResourceFailed("boom".into())),
        });
        assert!(dispatched(&step).is_empty());
        assert!(!step.keep_running);

        let report = core.into_report();
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.skipped, vec!["a"]);
    }

    #[test]
    fn shutdown_cancels_running_and_waits_for_them() {
        let mut core = chain();
        core.start();
        let step = core.step(EngineEvent::ShutdownRequested);
        assert_eq!(step.commands, vec![CoreCommand::CancelRunning]);
        assert!(step.keep_running);

        let last = core.step(EngineEvent::OperationCompleted {
            node: "b".into(),
            run_id: 7,
            result: Err(TaskError::Cancelled("create b".into())),
        });
        assert!(!last.keep_running);
        assert_eq!(core.report().cancelled, vec!["a", "b"]);
    }
}
