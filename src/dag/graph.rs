// src/dag/graph.rs

use std::collections::BTreeMap;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::errors::{Result, StackdagError};

/// Internal node structure: stores immediate deps and dependents.
#[derive(Debug, Clone, Default)]
struct DagNode {
    /// Direct dependencies: nodes that must exist before this one.
    deps: Vec<String>,
    /// Direct dependents: nodes that require this one.
    dependents: Vec<String>,
}

/// In-memory dependency graph keyed by logical resource name.
///
/// Edges are only recorded here; acyclicity is checked by [`validate`]
/// (and by the stack file validation, which calls it) before the graph is
/// used for scheduling.
///
/// [`validate`]: DependencyGraph::validate
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: BTreeMap<String, DagNode>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, name: &str) {
        self.nodes.entry(name.to_string()).or_default();
    }

    /// Record that `a` requires `b`: `b` is created before `a`, and `a` is
    /// deleted before `b`. Unknown names are added as nodes; duplicate
    /// edges are ignored.
    pub fn add_dependency(&mut self, a: &str, b: &str) {
        self.add_node(b);
        let node = self.nodes.entry(a.to_string()).or_default();
        if node.deps.iter().any(|d| d == b) {
            return;
        }
        node.deps.push(b.to_string());

        if let Some(dep) = self.nodes.get_mut(b) {
            dep.dependents.push(a.to_string());
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    /// Return all node names, in name order.
    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Immediate dependencies of a node (what it requires).
    pub fn dependencies_of(&self, name: &str) -> &[String] {
        self.nodes
            .get(name)
            .map(|n| n.deps.as_slice())
            .unwrap_or(&[])
    }

    /// Immediate dependents of a node (what requires it).
    pub fn dependents_of(&self, name: &str) -> &[String] {
        self.nodes
            .get(name)
            .map(|n| n.dependents.as_slice())
            .unwrap_or(&[])
    }

    /// Reject self-dependencies and cycles.
    pub fn validate(&self) -> Result<()> {
        for (name, node) in &self.nodes {
            if node.deps.iter().any(|d| d == name) {
                return Err(StackdagError::DependencyCycle(format!(
                    "resource '{}' depends on itself",
                    name
                )));
            }
        }
        self.topological_order().map(|_| ())
    }

    /// Nodes ordered so that every node comes after all of its
    /// dependencies.
    pub fn topological_order(&self) -> Result<Vec<String>> {
        // Edge direction: dep -> node, so toposort yields dependencies first.
        let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

        for name in self.nodes.keys() {
            graph.add_node(name.as_str());
        }
        for (name, node) in &self.nodes {
            for dep in &node.deps {
                graph.add_edge(dep.as_str(), name.as_str(), ());
            }
        }

        match toposort(&graph, None) {
            Ok(order) => Ok(order.into_iter().map(str::to_string).collect()),
            Err(cycle) => Err(StackdagError::DependencyCycle(format!(
                "cycle detected in dependency graph involving resource '{}'",
                cycle.node_id()
            ))),
        }
    }
}
