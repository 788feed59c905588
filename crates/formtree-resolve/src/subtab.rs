//! Sub-tab resolution
//!
//! A sub-tab is a secondary grouping label for fields within a tab. Fields
//! reused through shared references must group by where they are *used*, and
//! fields with no declared grouping inherit whichever grouping their
//! structural context implies — hence the inheritance chain below.

use crate::reference::ReferenceResolver;
use formtree_graph::{GraphStore, Node, NodeId, SubTabEntry};
use std::collections::HashSet;

/// Key of the synthetic bucket for fields without a recognized grouping
pub const GENERAL_SUB_TAB_KEY: &str = "__default__";

/// Label of the synthetic bucket
pub const GENERAL_SUB_TAB_LABEL: &str = "General";

/// Resolves effective sub-tab assignments against one store snapshot
#[derive(Debug, Clone, Copy)]
pub struct SubTabResolver<'a> {
    store: &'a GraphStore,
}

impl<'a> SubTabResolver<'a> {
    /// Resolver over a store snapshot
    #[inline]
    #[must_use]
    pub fn new(store: &'a GraphStore) -> Self {
        Self { store }
    }

    /// Effective sub-tab keys of a node; first non-empty source wins
    ///
    /// Priority: the node's own declared value(s), the reference-resolved
    /// node's declared value, the template's declared value via provenance
    /// links, then the first ancestor's declared value walking the parent
    /// chain of the original node.
    #[must_use]
    pub fn resolve(&self, node: &Node) -> Vec<String> {
        if !node.metadata.sub_tab_keys.is_empty() {
            return node.metadata.sub_tab_keys.clone();
        }

        if node.shared_reference_id.is_some() {
            let resolved = ReferenceResolver::new(self.store).resolve(node);
            if !resolved.metadata.sub_tab_keys.is_empty() {
                return resolved.metadata.sub_tab_keys;
            }
        }

        let mut seen: HashSet<NodeId> = HashSet::new();
        let mut current = node.clone();
        while let Some(template_id) = current.provenance().cloned() {
            if !seen.insert(template_id.clone()) {
                break;
            }
            let Some(template) = self.store.by_id(&template_id) else {
                break;
            };
            if !template.metadata.sub_tab_keys.is_empty() {
                return template.metadata.sub_tab_keys.clone();
            }
            current = template.clone();
        }

        let mut seen: HashSet<NodeId> = HashSet::new();
        let mut cursor = self.store.resolved_parent_of(&node.id);
        while let Some(parent_id) = cursor {
            if !seen.insert(parent_id.clone()) {
                break;
            }
            let Some(parent) = self.store.by_id(parent_id) else {
                break;
            };
            if !parent.metadata.sub_tab_keys.is_empty() {
                return parent.metadata.sub_tab_keys.clone();
            }
            cursor = self.store.resolved_parent_of(parent_id);
        }

        Vec::new()
    }

    /// Author-declared sub-tab list of a tab node, order-preserving
    ///
    /// When non-empty this list is authoritative and exclusive: keys
    /// discovered on fields do not extend it.
    #[must_use]
    pub fn declared_list(tab: &Node) -> Vec<SubTabEntry> {
        tab.metadata.sub_tab_list.clone()
    }
}
