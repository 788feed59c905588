//! Events the engine consumes
//!
//! Transport-agnostic: whatever publish/subscribe layer delivers these, the
//! engine only filters by tree id and reacts to the payload.

use formtree_graph::{DuplicatedRef, Node, NodeId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One server-side mutation notification
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum TreeEvent {
    /// Single-node patch
    #[serde(rename_all = "camelCase")]
    NodeUpdated {
        /// Tree the patch belongs to
        tree_id: String,
        /// Partial node body, id required
        node: Value,
    },
    /// Repeater duplication/deletion batch
    #[serde(rename_all = "camelCase")]
    RepeaterUpdated {
        /// Tree the batch belongs to
        tree_id: String,
        /// Nodes duplicated by the backend
        #[serde(default)]
        duplicated: Vec<DuplicatedRef>,
        /// Roots of deleted subtrees
        #[serde(default)]
        deleted_ids: Vec<NodeId>,
        /// Full node bodies carried inline
        #[serde(default)]
        inline_nodes: Vec<Node>,
        /// Sender already holds a consistent view; prefer incremental merges
        /// over a full reload
        #[serde(default)]
        suppress_reload: bool,
    },
    /// Capability configuration changed; triggers a debounced full reload
    #[serde(rename_all = "camelCase")]
    CapabilityUpdated {
        /// Tree the change belongs to
        tree_id: String,
        /// Node whose capability changed
        node_id: NodeId,
    },
}

impl TreeEvent {
    /// Tree this event targets
    #[must_use]
    pub fn tree_id(&self) -> &str {
        match self {
            TreeEvent::NodeUpdated { tree_id, .. }
            | TreeEvent::RepeaterUpdated { tree_id, .. }
            | TreeEvent::CapabilityUpdated { tree_id, .. } => tree_id,
        }
    }
}
