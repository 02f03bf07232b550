// src/dag/stack.rs

//! A named collection of resource nodes plus their dependency graph.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::api::NetworkApi;
use crate::config::{ConfigFile, ResourceState};
use crate::dag::graph::DependencyGraph;
use crate::dag::node::{DesiredState, NodeName, ResourceNode, ResourceStatus};
use crate::errors::{Result, StackdagError};
use crate::resource::{adapter_for, reference, ResourceAdapter};

/// Desired state per node, as passed to `converge`.
pub type Targets = BTreeMap<NodeName, DesiredState>;

#[derive(Debug)]
pub struct Stack {
    name: String,
    graph: DependencyGraph,
    nodes: BTreeMap<NodeName, ResourceNode>,
    last_run_id: u64,
}

impl Stack {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            graph: DependencyGraph::new(),
            nodes: BTreeMap::new(),
            last_run_id: 0,
        }
    }

    /// Build a stack from a validated stack file. No node has a physical
    /// resource yet; desired state comes from the file.
    pub fn from_config(cfg: &ConfigFile, api: Arc<dyn NetworkApi>) -> Result<Stack> {
        let mut stack = Stack::new(&cfg.stack.name);

        for (name, res) in &cfg.resource {
            let adapter = adapter_for(&res.type_name, Arc::clone(&api)).ok_or_else(|| {
                StackdagError::ConfigError(format!(
                    "resource '{}' has unknown type '{}'",
                    name, res.type_name
                ))
            })?;
            let desired = match res.state {
                ResourceState::Present => DesiredState::Present(res.properties.clone()),
                ResourceState::Absent => DesiredState::Absent,
            };
            stack.add_resource(name, adapter, desired)?;
        }

        for (name, res) in &cfg.resource {
            for dep in &res.depends_on {
                stack.add_dependency(name, dep)?;
            }
        }

        stack.validate()?;
        debug!(stack = %stack.name, nodes = stack.len(), "stack built from config");
        Ok(stack)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a resource node. `get_resource` references in the desired
    /// properties become dependency edges; their targets may be added later
    /// but must exist by the time the stack is validated.
    pub fn add_resource(
        &mut self,
        name: &str,
        adapter: Arc<dyn ResourceAdapter>,
        desired: DesiredState,
    ) -> Result<()> {
        if self.nodes.contains_key(name) {
            return Err(StackdagError::ConfigError(format!(
                "resource '{}' is defined twice",
                name
            )));
        }

        self.graph.add_node(name);
        if let DesiredState::Present(props) = &desired {
            for target in reference::collect(props) {
                self.graph.add_dependency(name, &target);
            }
        }

        self.nodes
            .insert(name.to_string(), ResourceNode::new(name, adapter, desired));
        Ok(())
    }

    /// Record that `a` requires `b`.
    pub fn add_dependency(&mut self, a: &str, b: &str) -> Result<()> {
        for n in [a, b] {
            if !self.nodes.contains_key(n) {
                return Err(StackdagError::NodeNotFound(n.to_string()));
            }
        }
        self.graph.add_dependency(a, b);
        Ok(())
    }

    /// Every edge must point at a known node, and the graph must be acyclic.
    pub fn validate(&self) -> Result<()> {
        for name in self.graph.nodes() {
            if !self.nodes.contains_key(name) {
                let referrer = self
                    .graph
                    .dependents_of(name)
                    .first()
                    .cloned()
                    .unwrap_or_default();
                return Err(StackdagError::NodeNotFound(format!(
                    "'{}' (required by '{}')",
                    name, referrer
                )));
            }
        }
        self.graph.validate()
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn node(&self, name: &str) -> Option<&ResourceNode> {
        self.nodes.get(name)
    }

    pub fn node_mut(&mut self, name: &str) -> Option<&mut ResourceNode> {
        self.nodes.get_mut(name)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &ResourceNode> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Name used for the remote resource, `<stack>-<node>`.
    pub fn physical_name(&self, node: &str) -> String {
        format!("{}-{}", self.name, node)
    }

    /// Physical id of a node, if it exists remotely.
    pub fn resource_id(&self, node: &str) -> Option<String> {
        self.nodes.get(node).and_then(|n| n.resource_id.clone())
    }

    /// Current value of attribute `name` of `node`, read from the remote
    /// API. `None` when the node has no physical resource.
    pub fn attribute(&self, node: &str, name: &str) -> Result<Option<serde_json::Value>> {
        let entry = self
            .nodes
            .get(node)
            .ok_or_else(|| StackdagError::NodeNotFound(node.to_string()))?;

        if !entry.adapter().schema().has_attribute(name) {
            return Err(StackdagError::UnknownAttribute {
                node: node.to_string(),
                attribute: name.to_string(),
            });
        }
        let Some(id) = entry.resource_id.as_deref() else {
            debug!(node, attribute = name, "no physical resource; attribute unset");
            return Ok(None);
        };

        let value = entry.adapter().resolve_attribute(id, name).map_err(|e| {
            StackdagError::from(
                anyhow::Error::new(e)
                    .context(format!("failed to read attribute '{name}' of '{node}'")),
            )
        })?;
        Ok(Some(value))
    }

    /// Overwrite the desired state of the named nodes; other nodes keep
    /// theirs.
    pub fn apply_targets(&mut self, targets: &Targets) -> Result<()> {
        if let Some(unknown) = targets.keys().find(|k| !self.nodes.contains_key(*k)) {
            return Err(StackdagError::NodeNotFound(unknown.clone()));
        }
        for (name, desired) in targets {
            if let Some(node) = self.nodes.get_mut(name) {
                node.desired = desired.clone();
            }
        }
        Ok(())
    }

    /// Desired state of every node, as currently recorded.
    pub fn targets(&self) -> Targets {
        self.nodes
            .iter()
            .map(|(name, node)| (name.clone(), node.desired.clone()))
            .collect()
    }

    /// Targets that tear the whole stack down.
    pub fn teardown_targets(&self) -> Targets {
        self.nodes
            .keys()
            .map(|name| (name.clone(), DesiredState::Absent))
            .collect()
    }

    /// Allocate the id for the next convergence run.
    pub fn begin_run(&mut self) -> u64 {
        self.last_run_id += 1;
        self.last_run_id
    }

    /// Reconcile recorded state with the remote API.
    ///
    /// Resources the API no longer knows lose their physical id, so the
    /// next plan re-creates them. Recorded properties that differ remotely
    /// take the remote value, so the next plan updates them. Returns the
    /// names of nodes whose recorded state changed.
    pub fn refresh(&mut self) -> Result<Vec<NodeName>> {
        let mut changed = Vec::new();

        for node in self.nodes.values_mut() {
            let Some(id) = node.resource_id.clone() else {
                continue;
            };

            let remote = match node.adapter().show_resource(&id) {
                Ok(obj) => obj,
                Err(e) if e.is_not_found() => {
                    warn!(node = %node.name, id = %id, "resource vanished remotely");
                    node.resource_id = None;
                    node.applied = None;
                    node.status = ResourceStatus::Init;
                    changed.push(node.name.clone());
                    continue;
                }
                Err(e) => {
                    let err = anyhow::Error::new(e)
                        .context(format!("failed to refresh resource '{}'", node.name));
                    return Err(StackdagError::from(err));
                }
            };

            let Some(applied) = node.applied.as_mut() else {
                continue;
            };
            let mut drifted = false;
            for (key, value) in applied.iter_mut() {
                match remote.properties.get(key) {
                    Some(remote_value) if remote_value != value => {
                        debug!(node = %node.name, key = %key, "property drifted");
                        *value = remote_value.clone();
                        drifted = true;
                    }
                    _ => {}
                }
            }
            if drifted {
                changed.push(node.name.clone());
            }
        }

        info!(stack = %self.name, changed = changed.len(), "refresh complete");
        Ok(changed)
    }
}
