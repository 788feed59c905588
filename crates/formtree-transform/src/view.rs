//! View model produced by the transform
//!
//! A derived, disposable artifact: it owns nothing, is recomputed on demand,
//! and compares structurally (`PartialEq`) so callers can skip re-renders
//! when nothing changed.

use formtree_graph::{FieldConfig, NodeId, SubTabEntry};
use formtree_resolve::CapabilitySet;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The whole rendered tree
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tree {
    /// Tree id
    pub id: String,
    /// Display name
    pub name: String,
    /// Top-level tabs, in order
    pub tabs: Vec<Tab>,
}

impl Tree {
    /// All fields of the tree, sections flattened, conditional fields included
    pub fn all_fields(&self) -> impl Iterator<Item = &Field> {
        self.tabs
            .iter()
            .flat_map(|tab| tab.sections.iter())
            .flat_map(|section| section.fields.iter())
            .flat_map(Field::with_conditionals)
    }

    /// Does any emitted field or option carry `id`?
    #[must_use]
    pub fn contains_node(&self, id: &NodeId) -> bool {
        self.all_fields()
            .any(|f| f.id == *id || f.options.iter().any(|o| o.id == *id))
    }

    /// First field with `id`, conditional fields included
    #[must_use]
    pub fn field(&self, id: &NodeId) -> Option<&Field> {
        self.all_fields().find(|f| f.id == *id)
    }
}

/// One top-level tab
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tab {
    /// Backing node id
    pub id: NodeId,
    /// Display label
    pub label: String,
    /// Sibling sort key
    pub order: f64,
    /// Sections, explicit ones first, implicit default last
    pub sections: Vec<Section>,
    /// Sub-tab groupings: declared list when authored, discovered union
    /// otherwise, plus the synthetic general bucket when needed
    pub sub_tabs: Vec<SubTabEntry>,
}

/// Layout configuration carried by a section node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionLayout {
    /// Column count
    pub columns: Option<u32>,
    /// Gutter in pixels
    pub gutter: Option<u32>,
    /// Collapsible flag
    pub collapsible: bool,
}

/// One UI section inside a tab
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    /// Backing node id, or the owning tab's id for the implicit section
    pub id: String,
    /// Display title
    pub title: String,
    /// Longer description
    pub description: Option<String>,
    /// Sibling sort key
    pub order: f64,
    /// Layout configuration
    pub layout: SectionLayout,
    /// Section is visible regardless of the active sub-tab
    pub display_always: bool,
    /// Implicit default section holding unclaimed fields
    pub is_default: bool,
    /// Fields, in resolved order
    pub fields: Vec<Field>,
}

/// One selectable option of a select field
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldOption {
    /// Backing node id
    pub id: NodeId,
    /// Display label
    pub label: String,
    /// Business value; falls back to the option's own id
    pub value: Value,
    /// Fields revealed when this option is selected
    pub conditional_fields: Vec<Field>,
}

/// One rendered input field
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Field {
    /// Backing node id
    pub id: NodeId,
    /// Display label
    pub label: String,
    /// Resolved display type (`"select"` for selector fields)
    #[serde(rename = "type")]
    pub field_type: String,
    /// Required input
    pub required: bool,
    /// Currently visible
    pub visible: bool,
    /// Sibling sort key
    pub order: f64,
    /// Longer description
    pub description: Option<String>,
    /// Input placeholder
    pub placeholder: Option<String>,
    /// Display configuration subset
    pub config: FieldConfig,
    /// Authored or default value
    pub value: Option<Value>,
    /// Value must be resolved through the data capability downstream
    pub needs_value_resolution: bool,
    /// Extracted capability slots
    pub capabilities: CapabilitySet,
    /// Effective sub-tab assignment
    pub sub_tab_keys: Vec<String>,
    /// Visible regardless of the active sub-tab
    pub display_always: bool,
    /// Label override carried by resolved shared references
    pub shared_reference_name: Option<String>,
    /// Options; non-empty marks a select field
    pub options: Vec<FieldOption>,
    /// Realized repeater copy, deletable by the user
    pub is_deletable_copy: bool,
    /// Owning repeater when emitted through one
    pub parent_repeater_id: Option<NodeId>,
    /// Template this copy was duplicated from
    pub source_template_id: Option<NodeId>,
    /// Position among the repeater's realized copies
    pub repeater_instance_index: Option<usize>,
    /// Carries the add-affordance for its repeater
    pub can_add_new_copy: bool,
}

impl Field {
    /// This field plus its options' conditional fields, depth-first
    pub fn with_conditionals(&self) -> Box<dyn Iterator<Item = &Field> + '_> {
        Box::new(
            std::iter::once(self).chain(
                self.options
                    .iter()
                    .flat_map(|o| o.conditional_fields.iter())
                    .flat_map(Field::with_conditionals),
            ),
        )
    }

    /// Is this a selector field?
    #[inline]
    #[must_use]
    pub fn is_select(&self) -> bool {
        !self.options.is_empty()
    }
}
