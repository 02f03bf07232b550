// src/dag/node.rs

//! Per-resource state tracked by a [`Stack`](super::Stack).

use std::fmt;
use std::sync::Arc;

use crate::api::Properties;
use crate::resource::ResourceAdapter;

/// Canonical logical node name type used throughout the engine.
pub type NodeName = String;

/// Lifecycle status of a resource node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResourceStatus {
    #[default]
    Init,
    CreateInProgress,
    CreateComplete,
    UpdateInProgress,
    UpdateComplete,
    DeleteInProgress,
    DeleteComplete,
    Failed,
}

impl ResourceStatus {
    pub fn is_in_progress(self) -> bool {
        matches!(
            self,
            ResourceStatus::CreateInProgress
                | ResourceStatus::UpdateInProgress
                | ResourceStatus::DeleteInProgress
        )
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceStatus::Init => "INIT",
            ResourceStatus::CreateInProgress => "CREATE_IN_PROGRESS",
            ResourceStatus::CreateComplete => "CREATE_COMPLETE",
            ResourceStatus::UpdateInProgress => "UPDATE_IN_PROGRESS",
            ResourceStatus::UpdateComplete => "UPDATE_COMPLETE",
            ResourceStatus::DeleteInProgress => "DELETE_IN_PROGRESS",
            ResourceStatus::DeleteComplete => "DELETE_COMPLETE",
            ResourceStatus::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// What a node should look like after convergence.
#[derive(Debug, Clone, PartialEq)]
pub enum DesiredState {
    /// The resource exists with these (validated) properties. Values may
    /// still contain `get_resource` references.
    Present(Properties),
    Absent,
}

impl DesiredState {
    pub fn is_present(&self) -> bool {
        matches!(self, DesiredState::Present(_))
    }
}

/// A logical resource in a stack.
#[derive(Debug, Clone)]
pub struct ResourceNode {
    pub name: NodeName,
    pub desired: DesiredState,
    /// Physical id, set once a create completed.
    pub resource_id: Option<String>,
    /// Properties as last applied remotely (references resolved).
    pub applied: Option<Properties>,
    pub status: ResourceStatus,
    /// Error message of the last failed operation.
    pub last_error: Option<String>,
    adapter: Arc<dyn ResourceAdapter>,
}

impl ResourceNode {
    pub fn new(name: &str, adapter: Arc<dyn ResourceAdapter>, desired: DesiredState) -> Self {
        Self {
            name: name.to_string(),
            desired,
            resource_id: None,
            applied: None,
            status: ResourceStatus::Init,
            last_error: None,
            adapter,
        }
    }

    pub fn adapter(&self) -> &Arc<dyn ResourceAdapter> {
        &self.adapter
    }

    pub fn type_name(&self) -> &'static str {
        self.adapter.schema().type_name
    }

    /// Whether the resource exists remotely, as far as the stack knows.
    pub fn exists(&self) -> bool {
        self.resource_id.is_some()
    }
}
