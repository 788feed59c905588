//! Formtree graph layer
//!
//! The raw node collection behind the form-tree view model:
//! - Wire-compatible [`Node`] records with capability slots and lenient
//!   metadata
//! - [`GraphStore`]: id→node and parent→children indices, a parent
//!   fallback-resolution chain, and transitive deletion
//!
//! The store is a plain single-writer structure; the transformation and
//! reconciliation layers own all policy.

pub mod node;
pub mod store;

pub use node::{
    CapabilityKind, FieldConfig, Node, NodeId, NodeKind, NodeMetadata, SubTabEntry,
};
pub use store::{DuplicatedRef, GraphError, GraphStore, MutationBatch};
