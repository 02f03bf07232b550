// src/dag/scheduler.rs

//! Per-run scheduling state machine.
//!
//! The scheduler is pure: it never performs IO. It is seeded with a
//! [`Plan`], hands out operations whose waits are satisfied (bounded by
//! `max_in_flight`) and is told when they complete. Failures are recorded
//! per node and decide which pending nodes will never start.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::dag::node::NodeName;
use crate::dag::plan::{Operation, Plan};
use crate::dag::report::{ConvergenceReport, NodeFailure};
use crate::dag::scheduler_step::{NodeRunState, ScheduledOperation, SchedulerStep};
use crate::task::TaskError;
use crate::types::FailurePolicy;

/// Concurrency and failure behaviour of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerOptions {
    /// Upper bound on operations running at the same time.
    pub max_in_flight: usize,
    pub failure_policy: FailurePolicy,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            max_in_flight: 4,
            failure_policy: FailurePolicy::SkipDependents,
        }
    }
}

#[derive(Debug)]
pub struct Scheduler {
    plan: Plan,
    options: SchedulerOptions,
    run_id: u64,
    states: BTreeMap<NodeName, NodeRunState>,
    /// Reverse of `plan.waits_on`: who waits for a node.
    waiters: BTreeMap<NodeName, Vec<NodeName>>,
    running: usize,
    halted: bool,
    report: ConvergenceReport,
}

impl Scheduler {
    pub fn new(plan: Plan, options: SchedulerOptions, run_id: u64) -> Self {
        let mut states = BTreeMap::new();
        let mut waiters: BTreeMap<NodeName, Vec<NodeName>> = BTreeMap::new();

        for (name, _) in plan.active() {
            states.insert(name.to_string(), NodeRunState::Pending);
            for w in plan.waits_on(name) {
                waiters.entry(w.clone()).or_default().push(name.to_string());
            }
        }

        Self {
            plan,
            options,
            run_id,
            states,
            waiters,
            running: 0,
            halted: false,
            report: ConvergenceReport {
                run_id,
                ..Default::default()
            },
        }
    }

    pub fn run_id(&self) -> u64 {
        self.run_id
    }

    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    pub fn operation_of(&self, node: &str) -> Operation {
        self.plan.operation(node)
    }

    /// `None` for nodes with no work in this run.
    pub fn run_state_of(&self, node: &str) -> Option<NodeRunState> {
        self.states.get(node).copied()
    }

    pub fn in_flight(&self) -> usize {
        self.running
    }

    /// No node is pending or running any more.
    pub fn is_finished(&self) -> bool {
        self.states.values().all(|s| s.is_terminal())
    }

    /// Whether everything `node` waits on has succeeded in this run.
    pub fn deps_satisfied(&self, node: &str) -> bool {
        self.plan
            .waits_on(node)
            .iter()
            .all(|w| self.states.get(w) == Some(&NodeRunState::Succeeded))
    }

    /// Hand out the initial batch of ready operations.
    pub fn start(&mut self) -> SchedulerStep {
        info!(
            run_id = self.run_id,
            nodes = self.states.len(),
            max_in_flight = self.options.max_in_flight,
            "starting convergence run"
        );
        let newly_scheduled = self.collect_ready();
        SchedulerStep {
            run_just_finished: self.is_finished(),
            newly_scheduled,
            ..Default::default()
        }
    }

    /// Record the outcome of a running node and return what changed.
    pub fn handle_completion(
        &mut self,
        node: &str,
        result: Result<(), TaskError>,
    ) -> SchedulerStep {
        let mut step = SchedulerStep::default();

        if self.states.get(node) != Some(&NodeRunState::Running) {
            warn!(
                node,
                run_id = self.run_id,
                state = ?self.states.get(node),
                "completion for a node that is not running; ignoring"
            );
            return step;
        }
        self.running -= 1;

        match result {
            Ok(()) => {
                debug!(node, run_id = self.run_id, "node succeeded");
                self.set_state(node, NodeRunState::Succeeded);
                self.report.succeeded.push(node.to_string());
            }
            Err(TaskError::Cancelled(_)) => {
                debug!(node, run_id = self.run_id, "node cancelled");
                self.set_state(node, NodeRunState::Cancelled);
                self.report.cancelled.push(node.to_string());
                let waiting = self.mark_waiters(node, NodeRunState::Cancelled);
                self.report.cancelled.extend(waiting);
            }
            Err(error) => {
                warn!(node, run_id = self.run_id, error = %error, "node failed");
                self.set_state(node, NodeRunState::Failed);
                self.report.failed.push(NodeFailure {
                    node: node.to_string(),
                    error,
                });
                step.newly_failed.push(node.to_string());

                step.newly_skipped = self.mark_waiters(node, NodeRunState::Skipped);
                if self.options.failure_policy == FailurePolicy::StopAll {
                    self.halted = true;
                    step.newly_skipped.extend(self.mark_all_pending(NodeRunState::Skipped));
                }
                if !step.newly_skipped.is_empty() {
                    info!(node, skipped = ?step.newly_skipped, "skipping nodes that can no longer start");
                }
                self.report.skipped.extend(step.newly_skipped.iter().cloned());
            }
        }

        step.newly_scheduled = self.collect_ready();
        step.run_just_finished = self.is_finished();
        if step.run_just_finished {
            info!(
                run_id = self.run_id,
                succeeded = self.report.succeeded.len(),
                failed = self.report.failed.len(),
                skipped = self.report.skipped.len(),
                "convergence run finished"
            );
        }
        step
    }

    /// Stop handing out work: every pending node becomes cancelled. Running
    /// nodes still report their completion.
    pub fn cancel_pending(&mut self) -> Vec<NodeName> {
        self.halted = true;
        let cancelled = self.mark_all_pending(NodeRunState::Cancelled);
        self.report.cancelled.extend(cancelled.iter().cloned());
        cancelled
    }

    pub fn report(&self) -> &ConvergenceReport {
        &self.report
    }

    pub fn into_report(self) -> ConvergenceReport {
        self.report
    }

    fn set_state(&mut self, node: &str, state: NodeRunState) {
        if let Some(s) = self.states.get_mut(node) {
            *s = state;
        }
    }

    /// Mark every pending node that (transitively) waits on `root`.
    fn mark_waiters(&mut self, root: &str, state: NodeRunState) -> Vec<NodeName> {
        let mut stack: Vec<NodeName> = self.waiters.get(root).cloned().unwrap_or_default();
        let mut marked = Vec::new();

        while let Some(name) = stack.pop() {
            if self.states.get(&name) != Some(&NodeRunState::Pending) {
                continue;
            }
            self.set_state(&name, state);
            if let Some(next) = self.waiters.get(&name) {
                stack.extend(next.iter().cloned());
            }
            marked.push(name);
        }

        marked.sort();
        marked
    }

    fn mark_all_pending(&mut self, state: NodeRunState) -> Vec<NodeName> {
        let mut marked = Vec::new();
        for (name, s) in self.states.iter_mut() {
            if *s == NodeRunState::Pending {
                *s = state;
                marked.push(name.clone());
            }
        }
        marked
    }

    /// Pending nodes whose waits are satisfied, up to the in-flight limit,
    /// marked running.
    fn collect_ready(&mut self) -> Vec<ScheduledOperation> {
        if self.halted {
            return Vec::new();
        }

        let capacity = self.options.max_in_flight.max(1).saturating_sub(self.running);
        let ready: Vec<NodeName> = self
            .states
            .iter()
            .filter(|(name, s)| **s == NodeRunState::Pending && self.deps_satisfied(name))
            .map(|(name, _)| name.clone())
            .take(capacity)
            .collect();

        ready
            .into_iter()
            .map(|name| {
                let operation = self.plan.operation(&name);
                info!(node = %name, run_id = self.run_id, %operation, "scheduling node");
                self.set_state(&name, NodeRunState::Running);
                self.running += 1;
                self.report.tasks_created += 1;
                ScheduledOperation {
                    node: name,
                    operation,
                    run_id: self.run_id,
                }
            })
            .collect()
    }
}
