//! Shared-reference resolution
//!
//! A shared reference points a node at a reusable template. Resolution
//! merges the template's content under the node's local placement, and
//! remaps a template's own reference list onto sibling copies through their
//! id suffix. Unresolved references degrade to the local node; nothing here
//! fails.

use formtree_graph::{GraphStore, Node, NodeId, NodeMetadata};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

static TRAILING_COPY_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"-(\d+)$").expect("static pattern"));

/// A resolved shared reference, ready to surface as a conditional field
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedReference {
    /// Effective node (template content, local placement)
    pub node: Node,
    /// Label the renderer shows for the reference
    pub shared_reference_name: String,
}

/// Resolves shared-reference aliases against one store snapshot
#[derive(Debug, Clone, Copy)]
pub struct ReferenceResolver<'a> {
    store: &'a GraphStore,
}

impl<'a> ReferenceResolver<'a> {
    /// Resolver over a store snapshot
    #[inline]
    #[must_use]
    pub fn new(store: &'a GraphStore) -> Self {
        Self { store }
    }

    /// Effective node: template content overridden by local placement
    ///
    /// Shared content wins (kind, capabilities, metadata, configuration);
    /// local placement wins (`id`, `label`, `order`, `parent_id`). Templates
    /// themselves and nodes without a reference come back unchanged. A
    /// reference that resolves to nothing, or to a non-template node,
    /// degrades to the local node.
    #[must_use]
    pub fn resolve(&self, node: &Node) -> Node {
        let Some(reference) = node.shared_reference_id.as_ref() else {
            return node.clone();
        };
        if node.is_shared_reference {
            return node.clone();
        }
        let Some(template) = self.store.by_id(reference) else {
            tracing::warn!(node = %node.id, reference = %reference, "shared reference not found, rendering local data");
            return node.clone();
        };
        if !template.is_shared_reference {
            tracing::warn!(node = %node.id, reference = %reference, "shared reference targets a non-template node, rendering local data");
            return node.clone();
        }
        let mut merged = template.clone();
        merged.id = node.id.clone();
        merged.parent_id = node.parent_id.clone();
        merged.order = node.order;
        if !node.label.is_empty() {
            merged.label = node.label.clone();
        }
        merged.is_shared_reference = false;
        merged.shared_reference_id = node.shared_reference_id.clone();
        merged
    }

    /// Copy suffix of `copy` relative to `template`
    ///
    /// Derivation order: remainder after a `"<template>-"` prefix, then the
    /// explicit `metadata.copy_suffix`, then a trailing `-<digits>` match on
    /// the copy id.
    #[must_use]
    pub fn copy_suffix(
        copy: &NodeId,
        template: &NodeId,
        metadata: &NodeMetadata,
    ) -> Option<String> {
        if let Some(rest) = copy.suffix_after(template) {
            return Some(rest.to_string());
        }
        if let Some(explicit) = &metadata.copy_suffix {
            return Some(explicit.clone());
        }
        TRAILING_COPY_SUFFIX
            .captures(copy.as_str())
            .map(|caps| caps[1].to_string())
    }

    /// Remap a template's reference onto a copy's suffix
    ///
    /// `R` with suffix `"2"` becomes `"R-2"` when that id exists in the
    /// store; otherwise the template's own shared instance `R` is kept.
    #[must_use]
    pub fn remap_reference(&self, reference: &NodeId, suffix: Option<&str>) -> NodeId {
        if let Some(suffix) = suffix {
            let suffixed = reference.with_suffix(suffix);
            if self.store.contains(&suffixed) {
                return suffixed;
            }
        }
        reference.clone()
    }

    /// Collect every shared reference an option contributes to its
    /// conditional fields
    ///
    /// Sources, merged by id in discovery order: references attached
    /// directly to the option, references of nested sub-options, and
    /// references inherited from the option's template when the option is a
    /// copy (remapped through the copy suffix). Each resolved entry carries
    /// an explicit `shared_reference_name` for downstream labeling.
    #[must_use]
    pub fn collect_option_references(&self, option: &Node) -> Vec<ResolvedReference> {
        let mut targets: Vec<NodeId> = Vec::new();
        let mut visited: HashSet<NodeId> = HashSet::new();
        self.gather_targets(option, &mut targets, &mut visited);

        if let Some(template_id) = option.provenance() {
            if let Some(template) = self.store.by_id(template_id) {
                let suffix =
                    Self::copy_suffix(&option.id, template_id, &option.metadata);
                for reference in template.shared_reference_targets() {
                    let remapped = self.remap_reference(&reference, suffix.as_deref());
                    if !targets.contains(&remapped) {
                        targets.push(remapped);
                    }
                }
            }
        }

        targets
            .into_iter()
            .filter_map(|id| {
                let Some(target) = self.store.by_id(&id) else {
                    tracing::warn!(option = %option.id, reference = %id, "option reference not found, skipped");
                    return None;
                };
                let resolved = self.resolve(target);
                let shared_reference_name = if resolved.label.is_empty() {
                    resolved.id.to_string()
                } else {
                    resolved.label.clone()
                };
                Some(ResolvedReference {
                    node: resolved,
                    shared_reference_name,
                })
            })
            .collect()
    }

    /// Depth-first sweep over an option and its sub-options
    fn gather_targets(
        &self,
        node: &Node,
        targets: &mut Vec<NodeId>,
        visited: &mut HashSet<NodeId>,
    ) {
        if !visited.insert(node.id.clone()) {
            return;
        }
        for reference in node.shared_reference_targets() {
            if !targets.contains(&reference) {
                targets.push(reference);
            }
        }
        for child_id in self.store.children_of(&node.id) {
            if let Some(child) = self.store.by_id(child_id) {
                if child.kind.is_option() {
                    self.gather_targets(child, targets, visited);
                }
            }
        }
    }
}
