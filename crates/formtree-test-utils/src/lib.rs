//! Testing utilities for the formtree workspace
//!
//! Shared node builders, tree fixtures, and a scripted fetcher for
//! exercising the reconciliation stages.

#![allow(missing_docs)]

use async_trait::async_trait;
use formtree_graph::{Node, NodeId, NodeKind};
use formtree_reconcile::{FetchError, NodeFetcher};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

pub fn tab(id: &str, label: &str, order: f64) -> Node {
    Node::new(id, NodeKind::Tab).with_label(label).with_order(order)
}

pub fn branch(id: &str, parent: &str, order: f64) -> Node {
    Node::new(id, NodeKind::Branch)
        .with_parent(parent)
        .with_label(id)
        .with_order(order)
}

pub fn section(id: &str, parent: &str, label: &str, order: f64) -> Node {
    Node::new(id, NodeKind::Section)
        .with_parent(parent)
        .with_label(label)
        .with_order(order)
}

pub fn field(id: &str, parent: &str, label: &str, order: f64) -> Node {
    Node::new(id, NodeKind::LeafField)
        .with_parent(parent)
        .with_label(label)
        .with_order(order)
}

pub fn option(id: &str, parent: &str, label: &str, order: f64) -> Node {
    Node::new(id, NodeKind::LeafOption)
        .with_parent(parent)
        .with_label(label)
        .with_order(order)
}

pub fn option_field(id: &str, parent: &str, label: &str, order: f64) -> Node {
    Node::new(id, NodeKind::LeafOptionField)
        .with_parent(parent)
        .with_label(label)
        .with_order(order)
}

pub fn repeater(id: &str, parent: &str, templates: &[&str], order: f64) -> Node {
    let mut node = Node::new(id, NodeKind::LeafRepeater)
        .with_parent(parent)
        .with_label(id)
        .with_order(order);
    node.template_node_ids = templates.iter().map(|t| NodeId::new(*t)).collect();
    node
}

/// Template field: flagged reusable, never rendered directly
pub fn template_field(id: &str, label: &str) -> Node {
    let mut node = Node::new(id, NodeKind::LeafField).with_label(label);
    node.is_shared_reference = true;
    node
}

/// Copy of `template`, provenance recorded in metadata
pub fn copy_of(template: &str, suffix: &str, parent: &str) -> Node {
    let id = format!("{template}-{suffix}");
    let mut node = Node::new(id.as_str(), NodeKind::LeafField)
        .with_parent(parent)
        .with_label(format!("copy {suffix}"));
    node.metadata.source_template_id = Some(NodeId::new(template));
    node
}

pub fn with_tree_id(mut node: Node, tree_id: &str) -> Node {
    node.tree_id = Some(tree_id.to_string());
    node
}

pub fn unique_id(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4())
}

/// The selector scenario: Tab → Branch(select) → Option → LeafField
pub fn selector_fixture(tree_id: &str) -> Vec<Node> {
    vec![
        with_tree_id(tab("t1", "Main", 0.0), tree_id),
        branch("b1", "t1", 0.0).with_label("Choice"),
        option("o1", "b1", "Yes", 0.0).with_value("yes"),
        field("f1", "o1", "Detail", 0.0),
    ]
}

/// A repeater with one template field and no realized copies
pub fn repeater_fixture(tree_id: &str) -> Vec<Node> {
    vec![
        with_tree_id(tab("t1", "Main", 0.0), tree_id),
        repeater("r1", "t1", &["p1"], 0.0),
        field("p1", "r1", "Slope", 0.0),
    ]
}

/// Scripted backend: serves a held node set, with per-id availability delays
/// to imitate eventual consistency
#[derive(Debug, Default)]
pub struct ScriptedFetcher {
    state: Mutex<ScriptedState>,
}

#[derive(Debug, Default)]
struct ScriptedState {
    nodes: Vec<Node>,
    /// `fetch_node_full` calls to absorb before a node's subtree appears
    available_after: HashMap<NodeId, usize>,
    full_calls: HashMap<NodeId, usize>,
    tree_calls: usize,
    fail_tree: bool,
}

impl ScriptedFetcher {
    #[must_use]
    pub fn new(nodes: Vec<Node>) -> Self {
        Self {
            state: Mutex::new(ScriptedState {
                nodes,
                ..ScriptedState::default()
            }),
        }
    }

    /// Backend converges: the node becomes part of the served set
    pub fn push_node(&self, node: Node) {
        let mut state = self.state.lock().unwrap();
        state.nodes.retain(|n| n.id != node.id);
        state.nodes.push(node);
    }

    /// Make `fetch_node_full(id)` come back empty for the first `calls` calls
    pub fn delay_availability(&self, id: &str, calls: usize) {
        self.state
            .lock()
            .unwrap()
            .available_after
            .insert(NodeId::new(id), calls);
    }

    /// Make `fetch_tree` fail with a transport error
    pub fn fail_tree_fetch(&self, fail: bool) {
        self.state.lock().unwrap().fail_tree = fail;
    }

    #[must_use]
    pub fn full_calls(&self, id: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .full_calls
            .get(&NodeId::new(id))
            .copied()
            .unwrap_or(0)
    }

    #[must_use]
    pub fn tree_calls(&self) -> usize {
        self.state.lock().unwrap().tree_calls
    }

    fn subtree(nodes: &[Node], root: &NodeId) -> Vec<Node> {
        let mut out: Vec<Node> = Vec::new();
        let mut stack = vec![root.clone()];
        while let Some(current) = stack.pop() {
            for node in nodes {
                if node.id == current && !out.iter().any(|n| n.id == node.id) {
                    out.push(node.clone());
                }
                if node.parent_id.as_ref() == Some(&current)
                    && !out.iter().any(|n| n.id == node.id)
                {
                    out.push(node.clone());
                    stack.push(node.id.clone());
                }
            }
        }
        out
    }
}

#[async_trait]
impl NodeFetcher for ScriptedFetcher {
    async fn fetch_tree(&self, _tree_id: &str) -> Result<Value, FetchError> {
        let mut state = self.state.lock().unwrap();
        state.tree_calls += 1;
        if state.fail_tree {
            return Err(FetchError::Transport("scripted failure".to_string()));
        }
        Ok(serde_json::to_value(&state.nodes)?)
    }

    async fn fetch_node_full(&self, id: &NodeId) -> Result<Value, FetchError> {
        let mut state = self.state.lock().unwrap();
        let calls = state.full_calls.entry(id.clone()).or_insert(0);
        *calls += 1;
        let seen = *calls;
        if let Some(required) = state.available_after.get(id) {
            if seen <= *required {
                return Ok(json!({ "nodes": [] }));
            }
        }
        let subtree = Self::subtree(&state.nodes, id);
        Ok(json!({ "nodes": subtree }))
    }
}
