//! Fetch seam and payload normalization
//!
//! The engine calls out to two endpoints and nothing else: the full tree
//! snapshot and a single node's subtree. Implementations return raw JSON;
//! normalization of the various wrapper shapes lives here, with the caller.

use async_trait::async_trait;
use formtree_graph::{Node, NodeId};
use serde_json::Value;

/// Errors from the fetch layer
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Transport failure (connection, status, timeout)
    #[error("transport failure: {0}")]
    Transport(String),
    /// Payload was not decodable at all
    #[error("payload decode failed: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Backend access used by the reconciliation engine
///
/// `GET /trees/{tree_id}/nodes` and `GET /nodes/{id}/full`, transport left
/// to the implementation.
#[async_trait]
pub trait NodeFetcher: Send + Sync {
    /// Full node snapshot of one tree
    async fn fetch_tree(&self, tree_id: &str) -> Result<Value, FetchError>;

    /// One node's full subtree
    async fn fetch_node_full(&self, id: &NodeId) -> Result<Value, FetchError>;
}

/// Normalize a fetch payload into node records
///
/// Accepts a bare array, or any of the `{node}` / `{data}` / `{nodes}`
/// wrappers (with either a single object or an array inside). Elements that
/// fail to decode are skipped, not fatal.
#[must_use]
pub fn normalize_nodes(payload: &Value) -> Vec<Node> {
    let inner = match payload {
        Value::Array(_) => payload,
        Value::Object(map) => map
            .get("nodes")
            .or_else(|| map.get("data"))
            .or_else(|| map.get("node"))
            .unwrap_or(payload),
        _ => payload,
    };
    let elements: Vec<&Value> = match inner {
        Value::Array(items) => items.iter().collect(),
        Value::Object(_) => vec![inner],
        _ => Vec::new(),
    };
    elements
        .into_iter()
        .filter_map(|raw| match serde_json::from_value::<Node>(raw.clone()) {
            Ok(node) if !node.id.as_str().is_empty() => Some(node),
            Ok(_) => None,
            Err(error) => {
                tracing::warn!(%error, "undecodable node payload skipped");
                None
            }
        })
        .collect()
}
