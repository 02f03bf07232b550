// src/exec/operation.rs

//! Resource operations expressed as resumable [`Step`]s.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::api::Properties;
use crate::dag::NodeName;
use crate::resource::ResourceAdapter;
use crate::task::{Progress, RetryPolicy, Step, Task, TaskError, TaskOutput};

/// Everything an executor needs to run one node operation.
#[derive(Debug, Clone)]
pub struct OperationRequest {
    pub node: NodeName,
    pub run_id: u64,
    pub adapter: Arc<dyn ResourceAdapter>,
    pub action: Action,
}

/// The concrete lifecycle call, with references already resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Create {
        physical_name: String,
        properties: Properties,
    },
    Update {
        resource_id: String,
        diff: Properties,
        /// Full property set once the update is applied.
        properties: Properties,
    },
    Delete {
        resource_id: String,
    },
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Create { .. } => f.write_str("create"),
            Action::Update { .. } => f.write_str("update"),
            Action::Delete { .. } => f.write_str("delete"),
        }
    }
}

impl OperationRequest {
    /// Wrap the action in a task. Deletes treat "not found" as success.
    pub fn into_task(self, retry: RetryPolicy) -> Task {
        let name = format!("{} {}", self.action, self.node);
        let adapter = self.adapter;

        match self.action {
            Action::Create {
                physical_name,
                properties,
            } => Task::new(name, CreateStep::new(adapter, physical_name, properties)).with_retry(retry),
            Action::Update {
                resource_id,
                diff,
                properties,
            } => Task::new(name, UpdateStep::new(adapter, resource_id, diff, properties))
                .with_retry(retry),
            Action::Delete { resource_id } => Task::new(name, DeleteStep::new(adapter, resource_id))
                .with_retry(retry)
                .not_found_is_success(),
        }
    }
}

/// Request creation, then poll until the resource is built.
pub struct CreateStep {
    adapter: Arc<dyn ResourceAdapter>,
    physical_name: String,
    properties: Properties,
    resource_id: Option<String>,
}

impl CreateStep {
    pub fn new(adapter: Arc<dyn ResourceAdapter>, physical_name: String, properties: Properties) -> Self {
        Self {
            adapter,
            physical_name,
            properties,
            resource_id: None,
        }
    }
}

impl Step for CreateStep {
    fn advance(&mut self) -> Result<Progress, TaskError> {
        let id = match &self.resource_id {
            Some(id) => id.clone(),
            None => {
                let id = self
                    .adapter
                    .handle_create(&self.physical_name, &self.properties)?;
                self.resource_id = Some(id.clone());
                id
            }
        };

        if !self.adapter.check_create_complete(&id)? {
            debug!(id = %id, "create still in progress");
            return Ok(Progress::Pending);
        }

        Ok(Progress::Complete(TaskOutput {
            resource_id: Some(id),
            properties: Some(self.properties.clone()),
        }))
    }

    fn partial_output(&self) -> Option<TaskOutput> {
        let id = self.resource_id.clone()?;
        Some(TaskOutput {
            resource_id: Some(id),
            properties: Some(self.properties.clone()),
        })
    }
}

/// Apply the diff, then advance the adapter's follow-up step if any.
pub struct UpdateStep {
    adapter: Arc<dyn ResourceAdapter>,
    resource_id: String,
    diff: Properties,
    properties: Properties,
    requested: bool,
    follow_up: Option<Box<dyn Step>>,
}

impl UpdateStep {
    pub fn new(
        adapter: Arc<dyn ResourceAdapter>,
        resource_id: String,
        diff: Properties,
        properties: Properties,
    ) -> Self {
        Self {
            adapter,
            resource_id,
            diff,
            properties,
            requested: false,
            follow_up: None,
        }
    }

    fn output(&self) -> Progress {
        Progress::Complete(TaskOutput {
            resource_id: Some(self.resource_id.clone()),
            properties: Some(self.properties.clone()),
        })
    }
}

impl Step for UpdateStep {
    fn advance(&mut self) -> Result<Progress, TaskError> {
        if !self.requested {
            self.follow_up = self.adapter.handle_update(&self.resource_id, &self.diff)?;
            self.requested = true;
        }

        match self.follow_up.as_mut() {
            None => Ok(self.output()),
            Some(step) => match step.advance()? {
                Progress::Pending => Ok(Progress::Pending),
                Progress::Complete(_) => Ok(self.output()),
            },
        }
    }
}

/// Request deletion, then confirm the resource is gone.
pub struct DeleteStep {
    adapter: Arc<dyn ResourceAdapter>,
    resource_id: String,
    requested: bool,
    confirm: Option<Box<dyn Step>>,
}

impl DeleteStep {
    pub fn new(adapter: Arc<dyn ResourceAdapter>, resource_id: String) -> Self {
        Self {
            adapter,
            resource_id,
            requested: false,
            confirm: None,
        }
    }
}

impl Step for DeleteStep {
    fn advance(&mut self) -> Result<Progress, TaskError> {
        if !self.requested {
            self.confirm = self.adapter.handle_delete(&self.resource_id)?;
            self.requested = true;
        }

        match self.confirm.as_mut() {
            None => Ok(Progress::Complete(TaskOutput::default())),
            Some(step) => step.advance(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiError, ApiOp, Fault, InMemoryNetworkApi, NetworkApi};
    use crate::resource::adapter_for;
    use crate::task::TaskState;
    use serde_json::json;

    fn rule(api: &Arc<InMemoryNetworkApi>) -> Arc<dyn ResourceAdapter> {
        let api: Arc<dyn NetworkApi> = api.clone();
        adapter_for("OS::Neutron::FirewallRule", api).unwrap()
    }

    fn drive(task: &mut Task) {
        for _ in 0..20 {
            if task.step() {
                return;
            }
        }
        panic!("task did not finish");
    }

    #[test]
    fn create_polls_until_built() {
        let api = Arc::new(InMemoryNetworkApi::new().with_settle_polls(2));
        let mut step = CreateStep::new(rule(&api), "demo-web".into(), Properties::new());

        assert_eq!(step.advance().unwrap(), Progress::Pending);
        assert_eq!(step.advance().unwrap(), Progress::Pending);
        match step.advance().unwrap() {
            Progress::Complete(out) => assert!(out.resource_id.is_some()),
            Progress::Pending => panic!("expected completion"),
        }
        assert_eq!(api.count(ApiOp::Create), 1);
    }

    #[test]
    fn failed_create_still_exposes_created_id() {
        let api = Arc::new(InMemoryNetworkApi::new());
        api.inject(Fault {
            op: ApiOp::Show,
            name: Some("demo-web".into()),
            error: ApiError::Status {
                status: 400,
                message: "broken".into(),
            },
            times: None,
        });
        let mut task = OperationRequest {
            node: "web".into(),
            run_id: 1,
            adapter: rule(&api),
            action: Action::Create {
                physical_name: "demo-web".into(),
                properties: Properties::new(),
            },
        }
        .into_task(RetryPolicy::none());
        assert!(task.partial_output().is_none());

        drive(&mut task);
        assert_eq!(task.state(), TaskState::Failed);
        let partial = task.partial_output().expect("id known after create call");
        let id = partial.resource_id.expect("resource id");
        assert!(api.peek("firewall_rule", &id).is_some());
    }

    #[test]
    fn delete_of_missing_resource_succeeds() {
        let api = Arc::new(InMemoryNetworkApi::new());
        let request = OperationRequest {
            node: "web".into(),
            run_id: 1,
            adapter: rule(&api),
            action: Action::Delete {
                resource_id: "does-not-exist".into(),
            },
        };
        let mut task = request.into_task(RetryPolicy::none());
        drive(&mut task);
        assert_eq!(task.state(), TaskState::Succeeded);
    }

    #[test]
    fn confirm_delete_not_found_is_success() {
        let api = Arc::new(InMemoryNetworkApi::new().with_settle_polls(1));
        let adapter = rule(&api);
        let id = adapter.handle_create("demo-web", &Properties::new()).unwrap();

        let mut task = OperationRequest {
            node: "web".into(),
            run_id: 1,
            adapter,
            action: Action::Delete { resource_id: id },
        }
        .into_task(RetryPolicy::none());
        drive(&mut task);
        assert_eq!(task.state(), TaskState::Succeeded);
        assert!(api.is_empty());
    }

    #[test]
    fn update_sends_only_the_diff() {
        let api = Arc::new(InMemoryNetworkApi::new());
        let adapter = rule(&api);
        let id = adapter.handle_create("demo-web", &Properties::new()).unwrap();

        let diff: Properties = serde_json::from_value(json!({"action": "allow"})).unwrap();
        let mut step = UpdateStep::new(adapter, id.clone(), diff.clone(), diff);
        match step.advance().unwrap() {
            Progress::Complete(out) => assert_eq!(out.resource_id.as_deref(), Some(id.as_str())),
            Progress::Pending => panic!("update should complete synchronously"),
        }
        assert_eq!(api.peek("firewall_rule", &id).unwrap().properties["action"], json!("allow"));
    }

    #[test]
    fn retryable_create_error_is_retried() {
        let api = Arc::new(InMemoryNetworkApi::new());
        api.inject(Fault {
            op: ApiOp::Create,
            name: None,
            error: ApiError::Status {
                status: 503,
                message: "busy".into(),
            },
            times: Some(1),
        });

        let mut task = OperationRequest {
            node: "web".into(),
            run_id: 1,
            adapter: rule(&api),
            action: Action::Create {
                physical_name: "demo-web".into(),
                properties: Properties::new(),
            },
        }
        .into_task(RetryPolicy::new(2));
        drive(&mut task);
        assert_eq!(task.state(), TaskState::Succeeded);
        assert_eq!(task.retries(), 1);
    }
}
