// src/engine/runtime.rs

use std::collections::VecDeque;
use std::fmt;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::api::Properties;
use crate::dag::plan::diff_resolved;
use crate::dag::{
    ConvergenceReport, DesiredState, Operation, ResourceStatus, ScheduledOperation, Stack,
};
use crate::errors::Result;
use crate::exec::{Action, ExecutorBackend, OperationRequest};
use crate::resource::reference;
use crate::task::{TaskError, TaskOutput};

use super::core::CoreConvergence;
use super::{CoreCommand, EngineEvent};

/// Drives one convergence run in response to [`EngineEvent`]s and delegates
/// the operations themselves to an [`ExecutorBackend`].
///
/// This is the IO shell around [`CoreConvergence`], which holds the
/// scheduling semantics. The shell owns the stack for the duration of the
/// run: it resolves references when an operation is dispatched and records
/// every outcome on the affected node.
pub struct ConvergenceRuntime<'s, E: ExecutorBackend> {
    stack: &'s mut Stack,
    core: CoreConvergence,
    event_rx: mpsc::Receiver<EngineEvent>,
    executor: E,
}

impl<E: ExecutorBackend> fmt::Debug for ConvergenceRuntime<'_, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConvergenceRuntime")
            .field("stack", &self.stack.name())
            .field("core", &self.core)
            .finish_non_exhaustive()
    }
}

impl<'s, E: ExecutorBackend> ConvergenceRuntime<'s, E> {
    pub fn new(
        stack: &'s mut Stack,
        core: CoreConvergence,
        event_rx: mpsc::Receiver<EngineEvent>,
        executor: E,
    ) -> Self {
        Self {
            stack,
            core,
            event_rx,
            executor,
        }
    }

    /// Main event loop. Returns once every node of the run is terminal.
    pub async fn run(mut self) -> Result<ConvergenceReport> {
        info!(stack = %self.stack.name(), run_id = self.core.run_id(), "convergence started");

        let step = self.core.start();
        self.execute_commands(step.commands).await?;

        while !self.core.is_finished() {
            let event = match self.event_rx.recv().await {
                Some(e) => e,
                None => {
                    warn!("engine event channel closed before the run finished");
                    break;
                }
            };

            debug!(?event, "runtime received event");
            match &event {
                EngineEvent::OperationCompleted {
                    node,
                    run_id,
                    result,
                } if *run_id == self.core.run_id() => self.record_outcome(node, result),
                EngineEvent::ResourceIdAssigned { node, run_id, output }
                    if *run_id == self.core.run_id() =>
                {
                    self.record_partial(node, output)
                }
                _ => {}
            }

            let step = self.core.step(event);
            self.execute_commands(step.commands).await?;
        }

        let report = self.core.into_report();
        info!(
            run_id = report.run_id,
            tasks = report.tasks_created,
            failed = report.failed.len(),
            "convergence finished"
        );
        Ok(report)
    }

    async fn execute_commands(&mut self, commands: Vec<CoreCommand>) -> Result<()> {
        let mut queue: VecDeque<CoreCommand> = commands.into();

        while let Some(command) = queue.pop_front() {
            match command {
                CoreCommand::Dispatch(ops) => {
                    let mut requests = Vec::with_capacity(ops.len());
                    for op in ops {
                        match self.prepare(&op) {
                            Ok(request) => requests.push(request),
                            Err(error) => {
                                // Could not even build the request; report
                                // it as a failed operation right away.
                                warn!(node = %op.node, error = %error, "operation could not be dispatched");
                                let result = Err(error);
                                self.record_outcome(&op.node, &result);
                                let step = self.core.step(EngineEvent::OperationCompleted {
                                    node: op.node,
                                    run_id: op.run_id,
                                    result,
                                });
                                queue.extend(step.commands);
                            }
                        }
                    }
                    if !requests.is_empty() {
                        self.executor.spawn_operations(requests).await?;
                    }
                }
                CoreCommand::CancelRunning => {
                    let signalled = self.executor.cancel_all();
                    info!(signalled, "cancellation sent to running operations");
                }
            }
        }
        Ok(())
    }

    /// Build the executor request for a scheduled operation and mark the
    /// node in progress.
    fn prepare(&mut self, op: &ScheduledOperation) -> std::result::Result<OperationRequest, TaskError> {
        let stack = &*self.stack;
        let node = stack
            .node(&op.node)
            .ok_or_else(|| TaskError::ResourceFailed(format!("unknown node '{}'", op.node)))?;

        let resolved = |props: &Properties| {
            reference::resolve(props, |n| stack.resource_id(n)).map_err(|missing| {
                TaskError::ResourceFailed(format!(
                    "'{}' references '{}', which has no physical id",
                    op.node, missing
                ))
            })
        };
        let missing_id = || TaskError::ResourceFailed(format!("'{}' has no physical id", op.node));

        let (action, status) = match (op.operation, &node.desired) {
            (Operation::Create, DesiredState::Present(props)) => (
                Action::Create {
                    physical_name: stack.physical_name(&op.node),
                    properties: resolved(props)?,
                },
                ResourceStatus::CreateInProgress,
            ),
            (Operation::Update, DesiredState::Present(props)) => {
                let properties = resolved(props)?;
                let diff = diff_resolved(&properties, node.applied.as_ref());
                (
                    Action::Update {
                        resource_id: node.resource_id.clone().ok_or_else(missing_id)?,
                        diff,
                        properties,
                    },
                    ResourceStatus::UpdateInProgress,
                )
            }
            (Operation::Delete, _) => (
                Action::Delete {
                    resource_id: node.resource_id.clone().ok_or_else(missing_id)?,
                },
                ResourceStatus::DeleteInProgress,
            ),
            (other, _) => {
                return Err(TaskError::ResourceFailed(format!(
                    "'{}' has no {other} to run",
                    op.node
                )));
            }
        };

        let request = OperationRequest {
            node: op.node.clone(),
            run_id: op.run_id,
            adapter: node.adapter().clone(),
            action,
        };

        if let Some(node) = self.stack.node_mut(&op.node) {
            node.status = status;
        }
        Ok(request)
    }

    /// Keep the id of a resource that exists remotely even though its
    /// operation did not succeed, so later runs update or delete it
    /// instead of creating another one.
    fn record_partial(&mut self, name: &str, output: &TaskOutput) {
        let Some(node) = self.stack.node_mut(name) else {
            warn!(node = %name, "partial outcome for a node that is not in the stack");
            return;
        };
        if output.resource_id.is_some() {
            node.resource_id = output.resource_id.clone();
        }
        if output.properties.is_some() {
            node.applied = output.properties.clone();
        }
        info!(node = %name, resource_id = ?node.resource_id, "recorded id of unconfirmed resource");
    }

    /// Apply an operation outcome to the node it belongs to.
    fn record_outcome(&mut self, name: &str, result: &std::result::Result<TaskOutput, TaskError>) {
        let operation = self.core.operation_of(name);
        let Some(node) = self.stack.node_mut(name) else {
            warn!(node = %name, "outcome for a node that is not in the stack");
            return;
        };

        match result {
            Ok(output) => {
                match operation {
                    Operation::Create => {
                        node.resource_id = output.resource_id.clone();
                        node.applied = output.properties.clone();
                        node.status = ResourceStatus::CreateComplete;
                    }
                    Operation::Update => {
                        if output.properties.is_some() {
                            node.applied = output.properties.clone();
                        }
                        node.status = ResourceStatus::UpdateComplete;
                    }
                    Operation::Delete => {
                        node.resource_id = None;
                        node.applied = None;
                        node.status = ResourceStatus::DeleteComplete;
                    }
                    Operation::NoOp => {}
                }
                node.last_error = None;
                info!(node = %name, status = %node.status, "resource converged");
            }
            Err(error) => {
                node.status = ResourceStatus::Failed;
                node.last_error = Some(error.to_string());
                warn!(node = %name, %operation, error = %error, "resource operation failed");
            }
        }
    }
}
