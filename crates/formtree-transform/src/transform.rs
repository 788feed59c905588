//! Flat node array → hierarchical view model
//!
//! Pure and synchronous: the same store snapshot and visibility context
//! always produce a structurally equal [`Tree`]. The traversal is
//! depth-first from the root containers, classifying every node by
//! structural shape; a traversal-scoped processed-ids set guarantees no node
//! surfaces twice even when it is reachable both as a direct child and as a
//! resolved shared-reference target (first registration wins).

use crate::view::{Field, FieldOption, Section, SectionLayout, Tab, Tree};
use formtree_graph::{GraphStore, Node, NodeId, NodeKind, SubTabEntry};
use formtree_resolve::{
    CapabilitySet, ReferenceResolver, SubTabResolver, GENERAL_SUB_TAB_KEY, GENERAL_SUB_TAB_LABEL,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

/// Sort key given to shared-reference conditional fields that declare no
/// explicit order; pushes them behind ordered siblings
const SHARED_REFERENCE_FALLBACK_ORDER: f64 = 9_999.0;

/// Display name used when no root node carries a label
const DEFAULT_TREE_NAME: &str = "Form";

static LABEL_COPY_INDEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\((?:copy|copie)\s*(\d+)\)\s*$").expect("static pattern"));

/// Current form input relevant to visibility
///
/// Maps a selector node id to its selected value. Conditional fields are
/// always emitted; this context only decides their `visible` flag, so the
/// transform stays total over its input.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VisibilityContext {
    selected: BTreeMap<NodeId, Value>,
}

impl VisibilityContext {
    /// Empty context: nothing selected
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With a selection recorded
    #[inline]
    #[must_use]
    pub fn with_selection(mut self, id: impl Into<NodeId>, value: impl Into<Value>) -> Self {
        self.selected.insert(id.into(), value.into());
        self
    }

    /// Record a selection
    #[inline]
    pub fn select(&mut self, id: impl Into<NodeId>, value: impl Into<Value>) {
        self.selected.insert(id.into(), value.into());
    }

    /// Selected value for a selector node
    #[inline]
    #[must_use]
    pub fn selected_value(&self, id: &NodeId) -> Option<&Value> {
        self.selected.get(id)
    }
}

/// Build the view model from a store snapshot
#[must_use]
pub fn transform(store: &GraphStore, visibility: &VisibilityContext) -> Tree {
    let mut cx = TransformCx {
        store,
        refs: ReferenceResolver::new(store),
        subtabs: SubTabResolver::new(store),
        visibility,
        processed: HashSet::new(),
    };

    let mut tabs: Vec<Tab> = Vec::new();
    for root_id in store.roots() {
        let Some(root) = store.by_id(root_id) else {
            continue;
        };
        if !root.kind.is_container() || root.is_shared_reference {
            continue;
        }
        tabs.push(cx.build_tab(root));
    }

    let name = store
        .roots()
        .iter()
        .filter_map(|id| store.by_id(id))
        .map(|n| n.label.as_str())
        .find(|l| !l.is_empty())
        .unwrap_or(DEFAULT_TREE_NAME)
        .to_string();

    Tree {
        id: store.tree_id().unwrap_or("unknown").to_string(),
        name,
        tabs,
    }
}

enum Shape<'a> {
    Section(&'a Node),
    Repeater(&'a Node),
    Selector(&'a Node),
    Transparent(&'a Node),
    Simple(&'a Node),
    Template,
    Option,
}

struct TransformCx<'a> {
    store: &'a GraphStore,
    refs: ReferenceResolver<'a>,
    subtabs: SubTabResolver<'a>,
    visibility: &'a VisibilityContext,
    processed: HashSet<NodeId>,
}

impl<'a> TransformCx<'a> {
    fn build_tab(&mut self, tab: &'a Node) -> Tab {
        self.processed.insert(tab.id.clone());
        let mut sections: Vec<Section> = Vec::new();
        let mut loose: Vec<Field> = Vec::new();
        self.walk(&tab.id, &mut loose, &mut sections);

        // Unclaimed fields land in an implicit section named after the tab.
        if !loose.is_empty() || sections.is_empty() {
            let order = sections.iter().map(|s| s.order).fold(0.0_f64, f64::max) + 1.0;
            sections.push(Section {
                id: format!("{}-section", tab.id),
                title: tab.label.clone(),
                description: tab.description.clone(),
                order,
                layout: SectionLayout::default(),
                display_always: false,
                is_default: true,
                fields: loose,
            });
        }

        let sub_tabs = self.tab_sub_tabs(tab, &sections);
        Tab {
            id: tab.id.clone(),
            label: tab.label.clone(),
            order: tab.order,
            sections,
            sub_tabs,
        }
    }

    /// Depth-first sweep over one container's children
    fn walk(&mut self, parent_id: &NodeId, sink: &mut Vec<Field>, sections: &mut Vec<Section>) {
        let store = self.store;
        for child_id in store.children_of(parent_id) {
            let Some(child) = store.by_id(child_id) else {
                continue;
            };
            if self.processed.contains(&child.id) {
                continue;
            }
            match self.classify(child) {
                Shape::Section(node) => {
                    self.processed.insert(node.id.clone());
                    let mut fields: Vec<Field> = Vec::new();
                    self.walk(&node.id, &mut fields, sections);
                    sections.push(Self::section_from(node, fields));
                }
                Shape::Repeater(node) => {
                    self.processed.insert(node.id.clone());
                    let emitted = self.build_repeater(node);
                    sink.extend(emitted);
                }
                Shape::Selector(node) => {
                    self.processed.insert(node.id.clone());
                    let field = self.build_select(node);
                    sink.push(field);
                }
                Shape::Transparent(node) => {
                    // Contributes no field of its own; children flatten into
                    // the parent's list.
                    self.processed.insert(node.id.clone());
                    self.walk(&node.id, sink, sections);
                }
                Shape::Simple(node) => {
                    self.processed.insert(node.id.clone());
                    let field = self.make_field(node);
                    sink.push(field);
                    // Linked nodes can hang off a plain field.
                    self.walk(&node.id, sink, sections);
                }
                Shape::Template => {
                    // Never emitted directly; surfaces only through the
                    // options that reference it, so it stays unregistered.
                    tracing::debug!(node = %child.id, "template node skipped in direct traversal");
                }
                Shape::Option => {
                    // Options surface through their selector parent.
                    self.processed.insert(child.id.clone());
                }
            }
        }
    }

    fn classify(&self, node: &'a Node) -> Shape<'a> {
        if node.is_shared_reference {
            return Shape::Template;
        }
        match node.kind {
            NodeKind::Section => Shape::Section(node),
            NodeKind::LeafRepeater => Shape::Repeater(node),
            NodeKind::LeafOption | NodeKind::LeafOptionField => Shape::Option,
            _ if self.has_option_children(&node.id) => Shape::Selector(node),
            NodeKind::Tab | NodeKind::Branch | NodeKind::Other => Shape::Transparent(node),
            NodeKind::LeafField => Shape::Simple(node),
        }
    }

    fn has_option_children(&self, id: &NodeId) -> bool {
        self.store
            .children_of(id)
            .iter()
            .filter_map(|cid| self.store.by_id(cid))
            .any(|c| c.kind.is_option())
    }

    /// Selector or plain field, decided by structural shape
    fn build_node_field(&mut self, node: &Node) -> Field {
        if self.has_option_children(&node.id) {
            self.build_select(node)
        } else {
            self.make_field(node)
        }
    }

    /// Selector pattern: the node becomes a `select` field, its option
    /// children become options with assembled conditional fields
    fn build_select(&mut self, node: &Node) -> Field {
        let store = self.store;
        let selected = self.visibility.selected_value(&node.id).cloned();
        let mut options: Vec<FieldOption> = Vec::new();
        for child_id in store.children_of(&node.id) {
            let Some(option) = store.by_id(child_id) else {
                continue;
            };
            if !option.kind.is_option() {
                continue;
            }
            if !self.processed.insert(option.id.clone()) {
                continue;
            }
            options.push(self.build_option(option, selected.as_ref()));
        }

        let mut field = self.make_field(node);
        field.field_type = "select".to_string();
        field.options = options;
        field
    }

    fn build_option(&mut self, option: &Node, selected: Option<&Value>) -> FieldOption {
        let store = self.store;
        // Downstream equality checks run against the option id when no
        // business value was authored.
        let value = option
            .value
            .clone()
            .unwrap_or_else(|| Value::String(option.id.to_string()));
        let label = option
            .option_label
            .clone()
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| option.label.clone());
        let is_selected = selected == Some(&value);

        let mut drafts: Vec<(f64, Field)> = Vec::new();

        // An option+field node carries its own inline conditional field;
        // option and field share the node id, one registration covers both.
        if option.kind == NodeKind::LeafOptionField {
            let mut inline = self.make_field(option);
            if let Some(field_label) = option.field_label.clone().filter(|l| !l.is_empty()) {
                inline.label = field_label;
            }
            drafts.push((inline.order, inline));
        }

        // Leaf children attached under the option.
        for child_id in store.children_of(&option.id) {
            let Some(child) = store.by_id(child_id) else {
                continue;
            };
            if !child.kind.is_field_leaf() {
                continue;
            }
            if !self.processed.insert(child.id.clone()) {
                continue;
            }
            let field = self.build_node_field(child);
            drafts.push((field.order, field));
        }

        // Shared references: direct, nested sub-option, and template-
        // inherited. Unordered ones sort behind everything else.
        for reference in self.refs.collect_option_references(option) {
            if !self.processed.insert(reference.node.id.clone()) {
                continue;
            }
            let sort_key = if reference.node.order == 0.0 {
                SHARED_REFERENCE_FALLBACK_ORDER
            } else {
                reference.node.order
            };
            let mut field = self.build_node_field(&reference.node);
            field.label = reference.shared_reference_name.clone();
            field.shared_reference_name = Some(reference.shared_reference_name);
            drafts.push((sort_key, field));
        }

        drafts.sort_by(|a, b| a.0.total_cmp(&b.0));
        let conditional_fields = drafts
            .into_iter()
            .map(|(_, mut field)| {
                field.visible = field.visible && is_selected;
                field
            })
            .collect();

        FieldOption {
            id: option.id.clone(),
            label,
            value,
            conditional_fields,
        }
    }

    /// Repeater: templates stay visible, realized copies follow in blocks,
    /// the add affordance rides on the last copy (or the first template when
    /// none exist yet)
    fn build_repeater(&mut self, repeater: &Node) -> Vec<Field> {
        let store = self.store;
        let template_ids = self.expand_template_ids(repeater);

        let mut copies_by_template: Vec<(NodeId, Vec<&Node>)> = template_ids
            .iter()
            .map(|id| (id.clone(), Vec::new()))
            .collect();
        let mut extras: Vec<&Node> = Vec::new();

        for child_id in store.children_of(&repeater.id) {
            let Some(child) = store.by_id(child_id) else {
                continue;
            };
            if template_ids.contains(&child.id) {
                continue;
            }
            // A container whose descendants are the declared templates is
            // the template group itself, not a realized copy.
            if child.kind.is_container() && self.subtree_contains_any(&child.id, &template_ids) {
                continue;
            }
            let template = child
                .provenance()
                .filter(|t| template_ids.contains(*t))
                .cloned()
                .or_else(|| {
                    template_ids
                        .iter()
                        .find(|t| child.id.suffix_after(t).is_some())
                        .cloned()
                });
            match template {
                Some(template) => {
                    if let Some((_, copies)) =
                        copies_by_template.iter_mut().find(|(id, _)| *id == template)
                    {
                        copies.push(child);
                    }
                }
                None => {
                    tracing::warn!(repeater = %repeater.id, node = %child.id, "repeater child matches no template, emitted as plain field");
                    extras.push(child);
                }
            }
        }

        for (_, copies) in &mut copies_by_template {
            copies.sort_by(|a, b| {
                let ta = a.metadata.duplicated_at.map_or(0, |d| d.timestamp_millis());
                let tb = b.metadata.duplicated_at.map_or(0, |d| d.timestamp_millis());
                ta.cmp(&tb)
                    .then_with(|| label_copy_index(&a.label).cmp(&label_copy_index(&b.label)))
                    .then_with(|| a.id.cmp(&b.id))
            });
        }

        let block_count = copies_by_template
            .iter()
            .map(|(_, copies)| copies.len())
            .max()
            .unwrap_or(0);
        let can_add = repeater
            .max_items
            .map_or(true, |max| (block_count as u32) < max);

        let mut out: Vec<Field> = Vec::new();

        // Templates render in declared order; they are the authored rows.
        for template_id in &template_ids {
            let Some(template) = store.by_id(template_id) else {
                continue;
            };
            if !self.processed.insert(template.id.clone()) {
                continue;
            }
            let mut field = self.build_node_field(template);
            field.parent_repeater_id = Some(repeater.id.clone());
            field.can_add_new_copy = block_count == 0 && can_add && out.is_empty();
            out.push(field);
        }

        // Copy blocks: one row per template per duplication round.
        for block in 0..block_count {
            for (template_id, copies) in &copies_by_template {
                let Some(copy) = copies.get(block) else {
                    continue;
                };
                if !self.processed.insert(copy.id.clone()) {
                    continue;
                }
                let mut field = self.build_node_field(copy);
                field.is_deletable_copy = true;
                field.parent_repeater_id = Some(repeater.id.clone());
                field.source_template_id = Some(template_id.clone());
                field.repeater_instance_index = Some(block);
                out.push(field);
            }
        }

        // Add affordance rides on the last copy once copies exist.
        if block_count > 0 {
            if let Some(last) = out.iter_mut().rev().find(|f| f.is_deletable_copy) {
                last.can_add_new_copy = can_add;
            }
        }

        for extra in extras {
            if !self.processed.insert(extra.id.clone()) {
                continue;
            }
            out.push(self.build_node_field(extra));
        }

        out
    }

    /// Does `root`'s subtree contain any of `ids`?
    fn subtree_contains_any(&self, root: &NodeId, ids: &[NodeId]) -> bool {
        let store = self.store;
        let mut stack: Vec<NodeId> = vec![root.clone()];
        let mut visited: HashSet<NodeId> = HashSet::new();
        while let Some(current) = stack.pop() {
            if !visited.insert(current.clone()) {
                continue;
            }
            for child_id in store.children_of(&current) {
                if ids.contains(child_id) {
                    return true;
                }
                stack.push(child_id.clone());
            }
        }
        false
    }

    /// Resolve a repeater's declared template ids: entries naming a
    /// container expand to that container's descendant field nodes
    fn expand_template_ids(&self, repeater: &Node) -> Vec<NodeId> {
        let store = self.store;
        let mut out: Vec<NodeId> = Vec::new();
        for id in &repeater.template_node_ids {
            match store.by_id(id) {
                Some(node) if node.kind.is_container() => {
                    let mut stack: Vec<NodeId> = vec![node.id.clone()];
                    let mut visited: HashSet<NodeId> = HashSet::new();
                    while let Some(current) = stack.pop() {
                        if !visited.insert(current.clone()) {
                            continue;
                        }
                        for child_id in store.children_of(&current) {
                            let Some(child) = store.by_id(child_id) else {
                                continue;
                            };
                            if child.kind.is_field_leaf() {
                                if !out.contains(&child.id) {
                                    out.push(child.id.clone());
                                }
                            } else {
                                stack.push(child.id.clone());
                            }
                        }
                    }
                }
                _ => {
                    if !out.contains(id) {
                        out.push(id.clone());
                    }
                }
            }
        }
        out
    }

    /// Plain field from a node, shared references resolved
    fn make_field(&mut self, node: &Node) -> Field {
        let resolved = self.refs.resolve(node);
        let capabilities = CapabilitySet::extract(&resolved);
        Field {
            id: resolved.id.clone(),
            label: resolved.label.clone(),
            field_type: resolved.effective_type().to_string(),
            required: resolved.required,
            visible: resolved.visible,
            order: resolved.order,
            description: resolved.description.clone(),
            placeholder: resolved.config.placeholder.clone(),
            value: resolved
                .config
                .default_value
                .clone()
                .or_else(|| resolved.value.clone()),
            needs_value_resolution: capabilities.data.enabled,
            capabilities,
            // Sub-tabs resolve against the node's own placement, not the
            // template's authoring context.
            sub_tab_keys: self.subtabs.resolve(node),
            display_always: node.metadata.display_always || resolved.metadata.display_always,
            shared_reference_name: None,
            config: resolved.config,
            options: Vec::new(),
            is_deletable_copy: false,
            parent_repeater_id: None,
            source_template_id: None,
            repeater_instance_index: None,
            can_add_new_copy: false,
        }
    }

    fn section_from(node: &Node, fields: Vec<Field>) -> Section {
        Section {
            id: node.id.to_string(),
            title: node.label.clone(),
            description: node.description.clone(),
            order: node.order,
            layout: SectionLayout {
                columns: node.metadata.columns,
                gutter: node.metadata.gutter,
                collapsible: node.metadata.collapsible.unwrap_or(false),
            },
            display_always: node.metadata.display_always,
            is_default: false,
            fields,
        }
    }

    /// Tab sub-tab list: declared list is authoritative and exclusive,
    /// discovered union otherwise; the synthetic general bucket appears only
    /// when a non-always-visible field resolves to zero recognized keys
    fn tab_sub_tabs(&self, tab: &Node, sections: &[Section]) -> Vec<SubTabEntry> {
        let declared = SubTabResolver::declared_list(tab);
        let has_declared = !declared.is_empty();

        let mut entries: Vec<SubTabEntry> = declared;
        if !has_declared {
            let mut seen: HashSet<String> = HashSet::new();
            for section in sections {
                for field in &section.fields {
                    for key in &field.sub_tab_keys {
                        if seen.insert(key.clone()) {
                            entries.push(SubTabEntry::new(key.clone()));
                        }
                    }
                }
            }
        }

        let recognized: HashSet<&str> = entries.iter().map(|e| e.key.as_str()).collect();
        let mut needs_general = false;
        for section in sections {
            if section.display_always {
                continue;
            }
            for field in &section.fields {
                if field.display_always {
                    continue;
                }
                let unassigned = field.sub_tab_keys.is_empty()
                    || (has_declared
                        && !field
                            .sub_tab_keys
                            .iter()
                            .any(|k| recognized.contains(k.as_str())));
                if unassigned {
                    needs_general = true;
                }
            }
        }
        if needs_general {
            entries.push(SubTabEntry {
                key: GENERAL_SUB_TAB_KEY.to_string(),
                label: GENERAL_SUB_TAB_LABEL.to_string(),
            });
        }
        entries
    }
}

/// Trailing copy index in a duplicated label, e.g. `"Roof (copy 2)"` → 2
fn label_copy_index(label: &str) -> Option<u32> {
    LABEL_COPY_INDEX
        .captures(label)
        .and_then(|caps| caps[1].parse().ok())
}
