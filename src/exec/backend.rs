// src/exec/backend.rs

//! Pluggable executor backend abstraction.
//!
//! The convergence runtime talks to an `ExecutorBackend` instead of spawning
//! runners itself. This makes it easy to swap in a fake executor in tests
//! while keeping the production implementation in [`TaskExecutor`].
//!
//! - `TaskExecutor` runs every operation in its own [`TaskRunner`] on a
//!   Tokio task and reports the outcome as an
//!   [`EngineEvent::OperationCompleted`].
//! - Tests can provide their own `ExecutorBackend` that, for example, records
//!   which operations were dispatched and directly emits completion events.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::engine::EngineEvent;
use crate::errors::Result;
use crate::exec::operation::OperationRequest;
use crate::task::{CancelHandle, RetryPolicy, RunnerOptions, TaskRunner};

/// Trait abstracting how dispatched operations are executed.
pub trait ExecutorBackend: Send {
    /// Start the given operations.
    ///
    /// Implementations must eventually send exactly one
    /// `EngineEvent::OperationCompleted` per started operation. An operation
    /// that fails after creating something remote reports it first with
    /// `EngineEvent::ResourceIdAssigned`.
    fn spawn_operations(
        &mut self,
        operations: Vec<OperationRequest>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Ask every running operation to stop polling. Returns how many were
    /// signalled.
    fn cancel_all(&mut self) -> usize;
}

/// Internal handle for a currently-running operation.
struct ActiveRunner {
    cancel: Option<CancelHandle>,
    handle: tokio::task::JoinHandle<()>,
}

/// Production executor: one [`TaskRunner`] per operation, at most one active
/// runner per node.
pub struct TaskExecutor {
    runtime_tx: mpsc::Sender<EngineEvent>,
    options: RunnerOptions,
    retry: RetryPolicy,
    active: HashMap<String, ActiveRunner>,
}

impl TaskExecutor {
    pub fn new(runtime_tx: mpsc::Sender<EngineEvent>, options: RunnerOptions, retry: RetryPolicy) -> Self {
        Self {
            runtime_tx,
            options,
            retry,
            active: HashMap::new(),
        }
    }

    fn spawn_one(&mut self, request: OperationRequest) {
        let node = request.node.clone();
        let run_id = request.run_id;

        if let Some(existing) = self.active.get(&node) {
            if !existing.handle.is_finished() {
                // The scheduler never dispatches a node twice in one run, and
                // runs are sequential per stack.
                warn!(node = %node, run_id, "node already has an active runner; ignoring dispatch");
                return;
            }
        }

        let task = request.into_task(self.retry);
        let mut runner = TaskRunner::new(task, self.options);
        let cancel = runner.cancel_handle();
        let tx = self.runtime_tx.clone();
        let spawn_node = node.clone();

        let handle = tokio::spawn(async move {
            let result = runner.run().await;
            if result.is_err() {
                if let Some(output) = runner.task().partial_output() {
                    let event = EngineEvent::ResourceIdAssigned {
                        node: spawn_node.clone(),
                        run_id,
                        output,
                    };
                    if tx.send(event).await.is_err() {
                        debug!(node = %spawn_node, "runtime gone; dropping partial outcome");
                    }
                }
            }
            debug!(
                node = %spawn_node,
                run_id,
                retries = runner.retries(),
                elapsed = ?runner.elapsed(),
                "runner finished"
            );
            let event = EngineEvent::OperationCompleted {
                node: spawn_node.clone(),
                run_id,
                result,
            };
            if tx.send(event).await.is_err() {
                debug!(node = %spawn_node, "runtime gone; dropping completion");
            }
        });

        self.active.insert(
            node,
            ActiveRunner {
                cancel: Some(cancel),
                handle,
            },
        );
    }
}

impl ExecutorBackend for TaskExecutor {
    fn spawn_operations(
        &mut self,
        operations: Vec<OperationRequest>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            for request in operations {
                info!(node = %request.node, run_id = request.run_id, action = %request.action, "starting runner");
                self.spawn_one(request);
            }
            Ok(())
        })
    }

    fn cancel_all(&mut self) -> usize {
        let mut signalled = 0;
        for (node, runner) in self.active.iter_mut() {
            if runner.handle.is_finished() {
                continue;
            }
            if let Some(cancel) = runner.cancel.take() {
                if cancel.cancel() {
                    debug!(node = %node, "cancellation requested");
                    signalled += 1;
                }
            }
        }
        signalled
    }
}
