//! Indexed store for one configuration tree
//!
//! Holds the raw node collection and maintains the parent→children and
//! id→node indices. Single writer: the consuming event loop mutates the
//! store, everything else reads snapshots. All merges are id-keyed upserts,
//! so overlapping mutation batches compose commutatively.

use crate::node::{Node, NodeId};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// Errors raised by store mutations
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// A partial patch arrived without an id
    #[error("patch payload has no id")]
    PatchMissingId,
    /// A patch or node payload failed to decode
    #[error("node payload decode failed: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Reference to one duplicated node inside a mutation batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicatedRef {
    /// Id of the new copy
    pub id: NodeId,
    /// Parent the backend placed the copy under, when known
    #[serde(default)]
    pub parent_id: Option<NodeId>,
    /// Template the copy was made from, when known
    #[serde(default)]
    pub source_template_id: Option<NodeId>,
}

impl DuplicatedRef {
    /// Reference by id only
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<NodeId>) -> Self {
        Self {
            id: id.into(),
            parent_id: None,
            source_template_id: None,
        }
    }

    /// With the declared parent
    #[inline]
    #[must_use]
    pub fn with_parent(mut self, parent: impl Into<NodeId>) -> Self {
        self.parent_id = Some(parent.into());
        self
    }

    /// With the source template
    #[inline]
    #[must_use]
    pub fn with_template(mut self, template: impl Into<NodeId>) -> Self {
        self.source_template_id = Some(template.into());
        self
    }
}

/// One batch of server-side mutations
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MutationBatch {
    /// Nodes duplicated by the backend
    pub duplicated: Vec<DuplicatedRef>,
    /// Roots of deleted subtrees
    pub deleted_ids: Vec<NodeId>,
    /// Full node bodies carried inline by the event
    pub inline_nodes: Vec<Node>,
}

/// Indexed node collection for a single tree
#[derive(Debug, Clone, Default)]
pub struct GraphStore {
    nodes: IndexMap<NodeId, Node>,
    children: HashMap<NodeId, Vec<NodeId>>,
    roots: Vec<NodeId>,
    resolved_parents: HashMap<NodeId, Option<NodeId>>,
}

impl GraphStore {
    /// Create an empty store
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store populated from a full snapshot
    #[inline]
    #[must_use]
    pub fn from_nodes(nodes: Vec<Node>) -> Self {
        let mut store = Self::new();
        store.load(nodes);
        store
    }

    /// Number of nodes held
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Is the store empty?
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node by id
    #[inline]
    #[must_use]
    pub fn by_id(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Does the store hold `id`?
    #[inline]
    #[must_use]
    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Children of `id`, in resolved sibling order (order key, input order on ties)
    #[inline]
    #[must_use]
    pub fn children_of(&self, id: &NodeId) -> &[NodeId] {
        self.children.get(id).map_or(&[], Vec::as_slice)
    }

    /// Root nodes, in input order
    #[inline]
    #[must_use]
    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    /// Resolved parent of `id` after the fallback chain ran
    #[inline]
    #[must_use]
    pub fn resolved_parent_of(&self, id: &NodeId) -> Option<&NodeId> {
        self.resolved_parents.get(id).and_then(Option::as_ref)
    }

    /// All nodes, in input order
    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Tree id, read off the first node that carries one
    #[must_use]
    pub fn tree_id(&self) -> Option<&str> {
        self.nodes.values().find_map(|n| n.tree_id.as_deref())
    }

    /// Replace the full node set
    pub fn load(&mut self, nodes: Vec<Node>) {
        self.nodes.clear();
        for node in nodes {
            self.nodes.insert(node.id.clone(), node);
        }
        self.rebuild_indices();
    }

    /// Insert or replace one node by id
    pub fn upsert(&mut self, node: Node) {
        self.nodes.insert(node.id.clone(), node);
        self.rebuild_indices();
    }

    /// Apply a partial patch to one node
    ///
    /// The payload is JSON-merged over the existing record; a patch for an
    /// unknown id inserts a new node from whatever shape it carries.
    pub fn patch(&mut self, partial: &Value) -> Result<NodeId, GraphError> {
        let id = partial
            .get("id")
            .and_then(Value::as_str)
            .map(NodeId::from)
            .ok_or(GraphError::PatchMissingId)?;
        let node = match self.nodes.get(&id) {
            Some(existing) => {
                let mut merged = serde_json::to_value(existing)?;
                json_merge(&mut merged, partial);
                serde_json::from_value(merged)?
            }
            None => serde_json::from_value(partial.clone())?,
        };
        self.nodes.insert(id.clone(), node);
        self.rebuild_indices();
        Ok(id)
    }

    /// Merge one mutation batch: upsert inline bodies, then cascade deletions
    ///
    /// Returns the ids actually removed, including transitive descendants.
    pub fn apply_mutation(&mut self, batch: &MutationBatch) -> Vec<NodeId> {
        for node in &batch.inline_nodes {
            self.nodes.insert(node.id.clone(), node.clone());
        }
        if !batch.inline_nodes.is_empty() {
            self.rebuild_indices();
        }
        self.remove_transitive(&batch.deleted_ids)
    }

    /// Remove `ids` and every node whose resolved parent chain passes
    /// through one of them
    ///
    /// The cascade runs against the pre-deletion parent mapping: a node whose
    /// parent is deleted must not survive by falling back to a weaker
    /// resolution rule.
    pub fn remove_transitive(&mut self, ids: &[NodeId]) -> Vec<NodeId> {
        if ids.is_empty() {
            return Vec::new();
        }
        let mut removed: HashSet<NodeId> =
            ids.iter().filter(|id| self.contains(id)).cloned().collect();
        // Fixed point: sweep until no node's resolved parent is removed.
        loop {
            let mut grew = false;
            for (id, parent) in &self.resolved_parents {
                if removed.contains(id) {
                    continue;
                }
                if let Some(parent) = parent {
                    if removed.contains(parent) {
                        removed.insert(id.clone());
                        grew = true;
                    }
                }
            }
            if !grew {
                break;
            }
        }
        let mut out: Vec<NodeId> = Vec::with_capacity(removed.len());
        self.nodes.retain(|id, _| {
            if removed.contains(id) {
                out.push(id.clone());
                false
            } else {
                true
            }
        });
        if !out.is_empty() {
            tracing::debug!(count = out.len(), "removed nodes transitively");
            self.rebuild_indices();
        }
        out
    }

    /// Recompute resolved parents, children lists and roots
    ///
    /// Parent fallback chain per node: explicit `parent_id`, then the
    /// `metadata.repeater_id` container hint, then the template's own
    /// resolved parent via provenance links (recursively). A node none of
    /// the rules place is a root-level orphan; when root tabs exist it is
    /// attached under the first one rather than dropped.
    fn rebuild_indices(&mut self) {
        let mut resolved: HashMap<NodeId, Option<NodeId>> =
            HashMap::with_capacity(self.nodes.len());
        let first_tab: Option<NodeId> = self
            .nodes
            .values()
            .find(|n| n.parent_id.is_none() && n.kind.is_container())
            .map(|n| n.id.clone());

        for node in self.nodes.values() {
            let parent = self.resolve_parent(node);
            let parent = match parent {
                ParentResolution::Root => None,
                ParentResolution::Parent(id) => Some(id),
                ParentResolution::Orphan => {
                    if let Some(tab) = first_tab.as_ref().filter(|t| **t != node.id) {
                        tracing::warn!(node = %node.id, tab = %tab, "orphan node attached under first tab");
                        Some(tab.clone())
                    } else {
                        tracing::warn!(node = %node.id, "orphan node kept at root");
                        None
                    }
                }
            };
            resolved.insert(node.id.clone(), parent);
        }

        let mut children: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        let mut roots: Vec<NodeId> = Vec::new();
        for node in self.nodes.values() {
            match resolved.get(&node.id).and_then(Clone::clone) {
                Some(parent) => children.entry(parent).or_default().push(node.id.clone()),
                None => roots.push(node.id.clone()),
            }
        }
        // Stable sort: explicit order key, input order preserved on ties.
        for siblings in children.values_mut() {
            siblings.sort_by(|a, b| {
                let oa = self.nodes.get(a).map_or(0.0, |n| n.order);
                let ob = self.nodes.get(b).map_or(0.0, |n| n.order);
                oa.total_cmp(&ob)
            });
        }
        roots.sort_by(|a, b| {
            let oa = self.nodes.get(a).map_or(0.0, |n| n.order);
            let ob = self.nodes.get(b).map_or(0.0, |n| n.order);
            oa.total_cmp(&ob)
        });

        self.resolved_parents = resolved;
        self.children = children;
        self.roots = roots;
    }

    fn resolve_parent(&self, node: &Node) -> ParentResolution {
        if node.parent_id.is_none() {
            return ParentResolution::Root;
        }
        if let Some(parent) = &node.parent_id {
            if self.nodes.contains_key(parent) {
                return ParentResolution::Parent(parent.clone());
            }
        }
        if let Some(hint) = &node.metadata.repeater_id {
            if self.nodes.contains_key(hint) {
                return ParentResolution::Parent(hint.clone());
            }
        }
        // Walk template provenance: a copy without a live parent link lands
        // under the same container as its template.
        let mut seen: HashSet<&NodeId> = HashSet::new();
        let mut current = node;
        while let Some(template_id) = current.provenance() {
            if !seen.insert(template_id) {
                break;
            }
            let Some(template) = self.nodes.get(template_id) else {
                break;
            };
            if let Some(parent) = &template.parent_id {
                if self.nodes.contains_key(parent) {
                    return ParentResolution::Parent(parent.clone());
                }
            }
            if let Some(hint) = &template.metadata.repeater_id {
                if self.nodes.contains_key(hint) {
                    return ParentResolution::Parent(hint.clone());
                }
            }
            current = template;
        }
        ParentResolution::Orphan
    }
}

enum ParentResolution {
    Root,
    Parent(NodeId),
    Orphan,
}

/// Recursive JSON merge: objects merge per key, everything else replaces
fn json_merge(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                match target.get_mut(key) {
                    Some(slot) => json_merge(slot, value),
                    None => {
                        target.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}
