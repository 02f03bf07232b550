use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use stackdag::engine::EngineEvent;
use stackdag::errors::Result;
use stackdag::exec::{Action, ExecutorBackend, OperationRequest};
use stackdag::task::{TaskError, TaskOutput};

/// One operation handed to the fake executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatched {
    pub node: String,
    /// `"create"`, `"update"` or `"delete"`.
    pub action: String,
    pub run_id: u64,
}

/// A fake executor that:
/// - records which operations were dispatched, in order
/// - immediately reports success for each, except for nodes marked as
///   failing (reported as `ResourceFailed`) or held (never reported until
///   `cancel_all`, which reports them as `Cancelled`).
pub struct FakeExecutor {
    runtime_tx: mpsc::Sender<EngineEvent>,
    dispatched: Arc<Mutex<Vec<Dispatched>>>,
    failing: HashSet<String>,
    held: HashSet<String>,
    pending: Vec<(String, u64)>,
}

impl FakeExecutor {
    pub fn new(
        runtime_tx: mpsc::Sender<EngineEvent>,
        dispatched: Arc<Mutex<Vec<Dispatched>>>,
    ) -> Self {
        Self {
            runtime_tx,
            dispatched,
            failing: HashSet::new(),
            held: HashSet::new(),
            pending: Vec::new(),
        }
    }

    pub fn failing(mut self, node: &str) -> Self {
        self.failing.insert(node.to_string());
        self
    }

    pub fn holding(mut self, node: &str) -> Self {
        self.held.insert(node.to_string());
        self
    }
}

fn success_output(request: &OperationRequest) -> TaskOutput {
    match &request.action {
        Action::Create { properties, .. } => TaskOutput {
            resource_id: Some(format!("fake-{}", request.node)),
            properties: Some(properties.clone()),
        },
        Action::Update {
            resource_id,
            properties,
            ..
        } => TaskOutput {
            resource_id: Some(resource_id.clone()),
            properties: Some(properties.clone()),
        },
        Action::Delete { .. } => TaskOutput::default(),
    }
}

impl ExecutorBackend for FakeExecutor {
    fn spawn_operations(
        &mut self,
        operations: Vec<OperationRequest>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            for request in operations {
                {
                    let mut guard = self.dispatched.lock().unwrap();
                    guard.push(Dispatched {
                        node: request.node.clone(),
                        action: request.action.to_string(),
                        run_id: request.run_id,
                    });
                }

                if self.held.contains(&request.node) {
                    self.pending.push((request.node.clone(), request.run_id));
                    continue;
                }

                let result = if self.failing.contains(&request.node) {
                    Err(TaskError::ResourceFailed(format!(
                        "injected failure for {}",
                        request.node
                    )))
                } else {
                    Ok(success_output(&request))
                };

                self.runtime_tx
                    .send(EngineEvent::OperationCompleted {
                        node: request.node.clone(),
                        run_id: request.run_id,
                        result,
                    })
                    .await
                    .map_err(anyhow::Error::from)?;
            }
            Ok(())
        })
    }

    fn cancel_all(&mut self) -> usize {
        let mut signalled = 0;
        for (node, run_id) in self.pending.drain(..) {
            let event = EngineEvent::OperationCompleted {
                result: Err(TaskError::Cancelled(node.clone())),
                node,
                run_id,
            };
            if self.runtime_tx.try_send(event).is_ok() {
                signalled += 1;
            }
        }
        signalled
    }
}
