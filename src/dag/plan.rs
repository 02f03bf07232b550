// src/dag/plan.rs

//! Diff of recorded vs desired state into one operation per node.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde_json::Value;
use tracing::debug;

use crate::api::Properties;
use crate::dag::node::{DesiredState, NodeName, ResourceNode};
use crate::dag::stack::Stack;
use crate::errors::{Result, StackdagError};
use crate::resource::reference;

/// What convergence has to do with a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Update,
    Delete,
    NoOp,
}

impl Operation {
    /// Create and update run in dependency order; delete runs in reverse.
    pub fn is_forward(self) -> bool {
        matches!(self, Operation::Create | Operation::Update)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::NoOp => "no-op",
        };
        f.write_str(s)
    }
}

/// Operations for every node plus, for each active node, the in-run nodes
/// it has to wait for.
#[derive(Debug, Clone, Default)]
pub struct Plan {
    operations: BTreeMap<NodeName, Operation>,
    waits_on: BTreeMap<NodeName, Vec<NodeName>>,
}

impl Plan {
    /// Compute the plan for the desired state currently recorded on `stack`.
    ///
    /// Rejected up front (nothing is started):
    /// - a present node requiring a node that is to be absent;
    /// - an absent node still required by a present node;
    /// - an update touching a property its type cannot change in place.
    pub fn compute(stack: &Stack) -> Result<Plan> {
        let graph = stack.graph();
        let mut operations = BTreeMap::new();

        for node in stack.nodes() {
            let op = match &node.desired {
                DesiredState::Present(_) => {
                    for dep in graph.dependencies_of(&node.name) {
                        if !desired_present(stack, dep) {
                            return Err(StackdagError::PlanError(format!(
                                "'{}' requires '{}', which is to be absent",
                                node.name, dep
                            )));
                        }
                    }

                    if !node.exists() {
                        Operation::Create
                    } else {
                        let diff = changed_properties(stack, node);
                        if diff.is_empty() {
                            Operation::NoOp
                        } else {
                            node.adapter()
                                .schema()
                                .check_updatable(&diff)
                                .map_err(|e| {
                                    StackdagError::PlanError(format!("'{}': {e}", node.name))
                                })?;
                            Operation::Update
                        }
                    }
                }
                DesiredState::Absent => {
                    if let Some(user) = graph
                        .dependents_of(&node.name)
                        .iter()
                        .find(|d| desired_present(stack, d))
                    {
                        return Err(StackdagError::PlanError(format!(
                            "cannot remove '{}' while '{}' requires it",
                            node.name, user
                        )));
                    }

                    if node.exists() {
                        Operation::Delete
                    } else {
                        Operation::NoOp
                    }
                }
            };

            debug!(node = %node.name, operation = %op, "planned");
            operations.insert(node.name.clone(), op);
        }

        let mut waits_on = BTreeMap::new();
        for (name, op) in &operations {
            let related: &[String] = match op {
                Operation::Create | Operation::Update => graph.dependencies_of(name),
                Operation::Delete => graph.dependents_of(name),
                Operation::NoOp => continue,
            };
            // Only nodes doing the same direction of work in this run gate
            // each other; everything else is already settled.
            let waits: Vec<NodeName> = related
                .iter()
                .filter(|r| {
                    operations
                        .get(*r)
                        .is_some_and(|o| o.is_forward() == op.is_forward() && *o != Operation::NoOp)
                })
                .cloned()
                .collect();
            waits_on.insert(name.clone(), waits);
        }

        Ok(Plan {
            operations,
            waits_on,
        })
    }

    /// Build a plan directly from operations and waits (used by tests and
    /// by callers that plan on their own).
    pub fn from_parts(
        operations: BTreeMap<NodeName, Operation>,
        waits_on: BTreeMap<NodeName, Vec<NodeName>>,
    ) -> Plan {
        Plan {
            operations,
            waits_on,
        }
    }

    pub fn operation(&self, node: &str) -> Operation {
        self.operations
            .get(node)
            .copied()
            .unwrap_or(Operation::NoOp)
    }

    /// Nodes with real work, in name order.
    pub fn active(&self) -> impl Iterator<Item = (&str, Operation)> {
        self.operations
            .iter()
            .filter(|(_, op)| **op != Operation::NoOp)
            .map(|(n, op)| (n.as_str(), *op))
    }

    pub fn operations(&self) -> impl Iterator<Item = (&str, Operation)> {
        self.operations.iter().map(|(n, op)| (n.as_str(), *op))
    }

    /// In-run nodes that must finish before `node` may start.
    pub fn waits_on(&self, node: &str) -> &[NodeName] {
        self.waits_on
            .get(node)
            .map(|w| w.as_slice())
            .unwrap_or(&[])
    }

    pub fn is_noop(&self) -> bool {
        self.active().next().is_none()
    }
}

fn desired_present(stack: &Stack, name: &str) -> bool {
    stack.node(name).is_some_and(|n| n.desired.is_present())
}

/// Properties whose desired value (references resolved against current
/// physical ids) differs from what was last applied. Keys no longer desired
/// map to `null`. A reference that cannot be resolved yet counts as changed.
pub fn changed_properties(stack: &Stack, node: &ResourceNode) -> Properties {
    let DesiredState::Present(desired) = &node.desired else {
        return Properties::new();
    };
    let empty = Properties::new();
    let applied = node.applied.as_ref().unwrap_or(&empty);

    let keys: BTreeSet<&String> = desired.keys().chain(applied.keys()).collect();
    let mut diff = Properties::new();

    for key in keys {
        let wanted = match desired.get(key) {
            Some(v) => {
                let single = Properties::from([(key.clone(), v.clone())]);
                match reference::resolve(&single, |n| stack.resource_id(n)) {
                    Ok(mut resolved) => resolved.remove(key),
                    Err(_) => {
                        diff.insert(key.clone(), v.clone());
                        continue;
                    }
                }
            }
            None => None,
        };

        if wanted.as_ref() != applied.get(key) {
            diff.insert(key.clone(), wanted.unwrap_or(Value::Null));
        }
    }

    diff
}

/// Diff of fully resolved desired properties against what was applied.
pub fn diff_resolved(desired: &Properties, applied: Option<&Properties>) -> Properties {
    let empty = Properties::new();
    let applied = applied.unwrap_or(&empty);
    let mut diff: Properties = desired
        .iter()
        .filter(|(k, v)| applied.get(*k) != Some(*v))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    for key in applied.keys() {
        if !desired.contains_key(key) {
            diff.insert(key.clone(), Value::Null);
        }
    }
    diff
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::api::{InMemoryNetworkApi, NetworkApi};
    use crate::resource::adapter_for;
    use serde_json::json;

    fn props(v: Value) -> Properties {
        serde_json::from_value(v).unwrap()
    }

    /// `policy` references `rule`.
    fn stack() -> Stack {
        let api: Arc<dyn NetworkApi> = Arc::new(InMemoryNetworkApi::new());
        let mut s = Stack::new("demo");
        s.add_resource(
            "rule",
            adapter_for("OS::Neutron::FirewallRule", api.clone()).unwrap(),
            DesiredState::Present(props(json!({"action": "allow"}))),
        )
        .unwrap();
        s.add_resource(
            "policy",
            adapter_for("OS::Neutron::FirewallPolicy", api).unwrap(),
            DesiredState::Present(props(json!({
                "firewall_rules": [{"get_resource": "rule"}]
            }))),
        )
        .unwrap();
        s
    }

    fn mark_created(s: &mut Stack, name: &str, id: &str) {
        let node = s.node_mut(name).unwrap();
        node.resource_id = Some(id.to_string());
        if let DesiredState::Present(p) = &node.desired {
            node.applied = Some(p.clone());
        }
    }

    #[test]
    fn fresh_stack_creates_in_dependency_order() {
        let s = stack();
        let plan = Plan::compute(&s).unwrap();
        assert_eq!(plan.operation("rule"), Operation::Create);
        assert_eq!(plan.operation("policy"), Operation::Create);
        assert_eq!(plan.waits_on("policy"), ["rule".to_string()]);
        assert!(plan.waits_on("rule").is_empty());
    }

    #[test]
    fn converged_stack_is_noop() {
        let mut s = stack();
        mark_created(&mut s, "rule", "r-1");
        mark_created(&mut s, "policy", "p-1");
        // Applied policy holds the resolved id.
        s.node_mut("policy").unwrap().applied =
            Some(props(json!({"firewall_rules": ["r-1"]})));

        let plan = Plan::compute(&s).unwrap();
        assert!(plan.is_noop());
    }

    #[test]
    fn changed_property_is_an_update_with_minimal_diff() {
        let mut s = stack();
        mark_created(&mut s, "rule", "r-1");
        s.node_mut("rule").unwrap().desired =
            DesiredState::Present(props(json!({"action": "deny"})));

        let node = s.node("rule").unwrap();
        assert_eq!(changed_properties(&s, node), props(json!({"action": "deny"})));

        let plan = Plan::compute(&s).unwrap();
        assert_eq!(plan.operation("rule"), Operation::Update);
        // Policy is still to be created and waits on the rule update.
        assert_eq!(plan.waits_on("policy"), ["rule".to_string()]);
    }

    #[test]
    fn removed_key_diffs_to_null() {
        let mut s = stack();
        mark_created(&mut s, "rule", "r-1");
        s.node_mut("rule").unwrap().desired = DesiredState::Present(Properties::new());
        let diff = changed_properties(&s, s.node("rule").unwrap());
        assert_eq!(diff, props(json!({"action": null})));
    }

    #[test]
    fn resolved_diff_keeps_only_changes() {
        let applied = props(json!({"action": "allow", "enabled": true, "protocol": "tcp"}));
        let desired = props(json!({"action": "deny", "enabled": true}));
        assert_eq!(
            diff_resolved(&desired, Some(&applied)),
            props(json!({"action": "deny", "protocol": null}))
        );
        assert_eq!(diff_resolved(&desired, None), desired);
    }

    #[test]
    fn teardown_reverses_order() {
        let mut s = stack();
        mark_created(&mut s, "rule", "r-1");
        mark_created(&mut s, "policy", "p-1");
        let targets = s.teardown_targets();
        s.apply_targets(&targets).unwrap();

        let plan = Plan::compute(&s).unwrap();
        assert_eq!(plan.operation("rule"), Operation::Delete);
        assert_eq!(plan.waits_on("rule"), ["policy".to_string()]);
        assert!(plan.waits_on("policy").is_empty());
    }

    #[test]
    fn removing_a_required_node_is_rejected() {
        let mut s = stack();
        s.node_mut("rule").unwrap().desired = DesiredState::Absent;
        match Plan::compute(&s) {
            Err(StackdagError::PlanError(msg)) => assert!(msg.contains("requires")),
            other => panic!("expected plan error, got {other:?}"),
        }
    }

    #[test]
    fn absent_and_missing_is_noop() {
        let mut s = stack();
        let targets = s.teardown_targets();
        s.apply_targets(&targets).unwrap();
        assert!(Plan::compute(&s).unwrap().is_noop());
    }
}
