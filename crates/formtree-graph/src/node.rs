//! Node record for the authored configuration graph
//!
//! The wire model mirrors the backend's node rows: identity and placement,
//! structural kind, display configuration, shared-reference pointers,
//! repeater extras, and seven capability slots (instances + active selector).

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::de::Deserializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Unique node identifier.
///
/// Ids are server-assigned strings. Copy ids embed their template id plus a
/// numeric suffix (`"p1-2"` is the second copy of `"p1"`), so suffix
/// arithmetic is part of the id's semantics rather than an encoding detail.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Create a node id
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow as string slice
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Remainder of this id after stripping `"<template>-"`, if it is a
    /// suffixed form of `template`
    #[inline]
    #[must_use]
    pub fn suffix_after(&self, template: &NodeId) -> Option<&str> {
        self.0
            .strip_prefix(template.as_str())
            .and_then(|rest| rest.strip_prefix('-'))
            .filter(|rest| !rest.is_empty())
    }

    /// Id formed by appending `-<suffix>` to this id
    #[inline]
    #[must_use]
    pub fn with_suffix(&self, suffix: &str) -> NodeId {
        NodeId(format!("{}-{suffix}", self.0))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Structural kind of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Top-level tab
    Tab,
    /// Generic container; transparent unless it carries options
    #[default]
    Branch,
    /// Explicit UI section
    Section,
    /// Simple input field
    LeafField,
    /// Selectable option under a selector branch
    LeafOption,
    /// Option that carries its own inline field
    LeafOptionField,
    /// Repeater: template children duplicated into copies at runtime
    LeafRepeater,
    /// Unrecognized kind; treated as a transparent container
    #[serde(other)]
    Other,
}

impl NodeKind {
    /// Wire name of the kind
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Tab => "tab",
            NodeKind::Branch => "branch",
            NodeKind::Section => "section",
            NodeKind::LeafField => "leaf_field",
            NodeKind::LeafOption => "leaf_option",
            NodeKind::LeafOptionField => "leaf_option_field",
            NodeKind::LeafRepeater => "leaf_repeater",
            NodeKind::Other => "branch",
        }
    }

    /// Can this node hold structural children?
    #[inline]
    #[must_use]
    pub fn is_container(&self) -> bool {
        matches!(
            self,
            NodeKind::Tab | NodeKind::Branch | NodeKind::Section | NodeKind::Other
        )
    }

    /// Is this an option of a selector branch?
    #[inline]
    #[must_use]
    pub fn is_option(&self) -> bool {
        matches!(self, NodeKind::LeafOption | NodeKind::LeafOptionField)
    }

    /// Does this node materialize an input field of its own?
    #[inline]
    #[must_use]
    pub fn is_field_leaf(&self) -> bool {
        matches!(self, NodeKind::LeafField | NodeKind::LeafOptionField)
    }
}

/// Capability kinds carried by a node
///
/// Each kind is a revision slot: many saved configurations, one active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityKind {
    /// Data source binding
    Data,
    /// Computed formula
    Formula,
    /// Visibility/enablement condition
    Condition,
    /// Lookup table
    Table,
    /// External call
    Api,
    /// Cross-field link
    Link,
    /// Markers
    Markers,
}

impl CapabilityKind {
    /// All capability kinds, in slot order
    pub const ALL: [CapabilityKind; 7] = [
        CapabilityKind::Data,
        CapabilityKind::Formula,
        CapabilityKind::Condition,
        CapabilityKind::Table,
        CapabilityKind::Api,
        CapabilityKind::Link,
        CapabilityKind::Markers,
    ];

    /// Wire name of the kind
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            CapabilityKind::Data => "data",
            CapabilityKind::Formula => "formula",
            CapabilityKind::Condition => "condition",
            CapabilityKind::Table => "table",
            CapabilityKind::Api => "api",
            CapabilityKind::Link => "link",
            CapabilityKind::Markers => "markers",
        }
    }
}

/// One sub-tab declared at tab level
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubTabEntry {
    /// Stable grouping key
    pub key: String,
    /// Display label (defaults to the key)
    pub label: String,
}

impl SubTabEntry {
    /// Create an entry with identical key and label
    #[inline]
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            label: key.clone(),
            key,
        }
    }
}

impl<'de> Deserialize<'de> for SubTabEntry {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Plain(String),
            Keyed {
                key: String,
                #[serde(default)]
                label: Option<String>,
            },
        }
        Ok(match Raw::deserialize(deserializer)? {
            Raw::Plain(s) => SubTabEntry::new(s),
            Raw::Keyed { key, label } => SubTabEntry {
                label: label.unwrap_or_else(|| key.clone()),
                key,
            },
        })
    }
}

/// Well-known metadata fields plus an open map for everything else
///
/// Metadata is an open record; legacy rows string-encode it and newer rows
/// use a JSON object. Unknown keys are preserved in `extra`, malformed
/// payloads degrade to the empty record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NodeMetadata {
    /// Template this node was duplicated from
    pub source_template_id: Option<NodeId>,
    /// Alternate provenance link written by older duplication paths
    pub copied_from_node_id: Option<NodeId>,
    /// Explicit copy suffix, when the id does not embed it
    pub copy_suffix: Option<String>,
    /// Owning repeater/container hint for parent resolution
    pub repeater_id: Option<NodeId>,
    /// Sub-tab assignment of this node (string or array on the wire)
    #[serde(
        alias = "subTab",
        alias = "subTabKey",
        rename = "subTabKeys",
        deserialize_with = "de_string_or_seq"
    )]
    pub sub_tab_keys: Vec<String>,
    /// Tab-level declared sub-tab list; authoritative and order-preserving
    #[serde(rename = "subTabs")]
    pub sub_tab_list: Vec<SubTabEntry>,
    /// Node is visible regardless of the active sub-tab
    #[serde(deserialize_with = "de_lenient_bool")]
    pub display_always: bool,
    /// Duplication timestamp; orders repeater copies
    pub duplicated_at: Option<DateTime<Utc>>,
    /// Shared references carried in metadata by older authoring paths
    pub shared_reference_ids: Vec<NodeId>,
    /// Section layout: column count
    pub columns: Option<u32>,
    /// Section layout: gutter in pixels
    pub gutter: Option<u32>,
    /// Section layout: collapsible flag
    pub collapsible: Option<bool>,
    /// Unrecognized keys, preserved round-trip
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl NodeMetadata {
    /// Parse metadata leniently from a raw JSON value
    ///
    /// Accepts an object, a JSON-encoded object string, or anything else
    /// (degrades to the empty record). Never fails.
    #[must_use]
    pub fn from_value(raw: &Value) -> Self {
        let obj = match raw {
            Value::Object(_) => raw.clone(),
            Value::String(s) => serde_json::from_str::<Value>(s).unwrap_or(Value::Null),
            _ => Value::Null,
        };
        match obj {
            Value::Object(_) => serde_json::from_value(obj).unwrap_or_default(),
            _ => NodeMetadata::default(),
        }
    }

    /// Template provenance: `source_template_id`, else `copied_from_node_id`
    #[inline]
    #[must_use]
    pub fn provenance(&self) -> Option<&NodeId> {
        self.source_template_id
            .as_ref()
            .or(self.copied_from_node_id.as_ref())
    }
}

/// Display configuration subset carried by field nodes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FieldConfig {
    /// Control size
    pub size: Option<String>,
    /// Control width
    pub width: Option<String>,
    /// Visual variant
    pub variant: Option<String>,
    /// Input placeholder
    pub placeholder: Option<String>,
    /// Numeric minimum
    pub min: Option<f64>,
    /// Numeric maximum
    pub max: Option<f64>,
    /// Numeric step
    pub step: Option<f64>,
    /// Display unit
    pub unit: Option<String>,
    /// Text length cap
    pub max_length: Option<u32>,
    /// Textarea rows
    pub rows: Option<u32>,
    /// Multi-select
    pub multiple: Option<bool>,
    /// Searchable select
    pub searchable: Option<bool>,
    /// Clearable select
    pub allow_clear: Option<bool>,
    /// Authored default value
    pub default_value: Option<Value>,
    /// Unrecognized keys, preserved round-trip
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// One vertex of the authored configuration graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Node {
    /// Globally unique id
    pub id: NodeId,
    /// Owning tree
    pub tree_id: Option<String>,
    /// Explicit parent link; `None` marks a root
    pub parent_id: Option<NodeId>,
    /// Structural kind
    #[serde(rename = "type")]
    pub kind: NodeKind,
    /// Display type refinement, strongest
    pub sub_type: Option<String>,
    /// Display type refinement, weaker than `sub_type`
    pub field_type: Option<String>,
    /// Display label
    pub label: String,
    /// Longer description
    pub description: Option<String>,
    /// Authored value (option nodes: the business value)
    pub value: Option<Value>,
    /// Sibling sort key; ties keep input order
    pub order: f64,
    /// Required input
    #[serde(rename = "isRequired")]
    pub required: bool,
    /// Visible input
    #[serde(rename = "isVisible")]
    pub visible: bool,
    /// Active (inactive nodes render disabled)
    #[serde(rename = "isActive")]
    pub active: bool,
    /// Option display label override
    pub option_label: Option<String>,
    /// Inline-field label for `leaf_option_field` nodes
    pub field_label: Option<String>,
    /// Single shared-reference pointer
    pub shared_reference_id: Option<NodeId>,
    /// Multi shared-reference pointers
    pub shared_reference_ids: Vec<NodeId>,
    /// Marks a reusable template; never rendered directly
    #[serde(rename = "isSharedReference")]
    pub is_shared_reference: bool,
    /// Repeater: ids of the template children
    pub template_node_ids: Vec<NodeId>,
    /// Repeater: display labels of the templates
    pub template_node_labels: Vec<String>,
    /// Repeater: minimum realized copies
    pub min_items: Option<u32>,
    /// Repeater: maximum realized copies
    pub max_items: Option<u32>,
    /// Repeater: add-button label
    pub add_button_label: Option<String>,
    /// Display configuration
    #[serde(rename = "fieldConfig")]
    pub config: FieldConfig,
    /// Open metadata record (lenient)
    #[serde(deserialize_with = "de_metadata")]
    pub metadata: NodeMetadata,

    /// Data capability: saved configurations
    #[serde(rename = "data_instances", deserialize_with = "de_opt_map")]
    pub data_instances: IndexMap<String, Value>,
    /// Data capability: active selection
    #[serde(rename = "data_activeId")]
    pub data_active_id: Option<String>,
    /// Formula capability: saved configurations
    #[serde(rename = "formula_instances", deserialize_with = "de_opt_map")]
    pub formula_instances: IndexMap<String, Value>,
    /// Formula capability: active selection
    #[serde(rename = "formula_activeId")]
    pub formula_active_id: Option<String>,
    /// Condition capability: saved configurations
    #[serde(rename = "condition_instances", deserialize_with = "de_opt_map")]
    pub condition_instances: IndexMap<String, Value>,
    /// Condition capability: active selection
    #[serde(rename = "condition_activeId")]
    pub condition_active_id: Option<String>,
    /// Table capability: saved configurations
    #[serde(rename = "table_instances", deserialize_with = "de_opt_map")]
    pub table_instances: IndexMap<String, Value>,
    /// Table capability: active selection
    #[serde(rename = "table_activeId")]
    pub table_active_id: Option<String>,
    /// Api capability: saved configurations
    #[serde(rename = "api_instances", deserialize_with = "de_opt_map")]
    pub api_instances: IndexMap<String, Value>,
    /// Api capability: active selection
    #[serde(rename = "api_activeId")]
    pub api_active_id: Option<String>,
    /// Link capability: saved configurations
    #[serde(rename = "link_instances", deserialize_with = "de_opt_map")]
    pub link_instances: IndexMap<String, Value>,
    /// Link capability: active selection
    #[serde(rename = "link_activeId")]
    pub link_active_id: Option<String>,
    /// Markers capability: saved configurations
    #[serde(rename = "markers_instances", deserialize_with = "de_opt_map")]
    pub markers_instances: IndexMap<String, Value>,
    /// Markers capability: active selection
    #[serde(rename = "markers_activeId")]
    pub markers_active_id: Option<String>,
}

impl Default for Node {
    fn default() -> Self {
        Self {
            id: NodeId::new(""),
            tree_id: None,
            parent_id: None,
            kind: NodeKind::Branch,
            sub_type: None,
            field_type: None,
            label: String::new(),
            description: None,
            value: None,
            order: 0.0,
            required: false,
            visible: true,
            active: true,
            option_label: None,
            field_label: None,
            shared_reference_id: None,
            shared_reference_ids: Vec::new(),
            is_shared_reference: false,
            template_node_ids: Vec::new(),
            template_node_labels: Vec::new(),
            min_items: None,
            max_items: None,
            add_button_label: None,
            config: FieldConfig::default(),
            metadata: NodeMetadata::default(),
            data_instances: IndexMap::new(),
            data_active_id: None,
            formula_instances: IndexMap::new(),
            formula_active_id: None,
            condition_instances: IndexMap::new(),
            condition_active_id: None,
            table_instances: IndexMap::new(),
            table_active_id: None,
            api_instances: IndexMap::new(),
            api_active_id: None,
            link_instances: IndexMap::new(),
            link_active_id: None,
            markers_instances: IndexMap::new(),
            markers_active_id: None,
        }
    }
}

impl Node {
    /// Create a node of the given kind
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<NodeId>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            kind,
            ..Self::default()
        }
    }

    /// With parent
    #[inline]
    #[must_use]
    pub fn with_parent(mut self, parent: impl Into<NodeId>) -> Self {
        self.parent_id = Some(parent.into());
        self
    }

    /// With label
    #[inline]
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// With sibling order
    #[inline]
    #[must_use]
    pub fn with_order(mut self, order: f64) -> Self {
        self.order = order;
        self
    }

    /// With authored value
    #[inline]
    #[must_use]
    pub fn with_value(mut self, value: impl Into<Value>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// Effective display type: `sub_type` > `field_type` > structural kind
    #[must_use]
    pub fn effective_type(&self) -> &str {
        self.sub_type
            .as_deref()
            .or(self.field_type.as_deref())
            .unwrap_or_else(|| self.kind.as_str())
    }

    /// Template provenance (`source_template_id` else `copied_from_node_id`)
    #[inline]
    #[must_use]
    pub fn provenance(&self) -> Option<&NodeId> {
        self.metadata.provenance()
    }

    /// Shared-reference targets: the single pointer plus both list forms,
    /// de-duplicated in declaration order
    #[must_use]
    pub fn shared_reference_targets(&self) -> Vec<NodeId> {
        let mut out: Vec<NodeId> = Vec::new();
        let mut push = |id: &NodeId| {
            if !out.contains(id) {
                out.push(id.clone());
            }
        };
        if let Some(id) = &self.shared_reference_id {
            push(id);
        }
        for id in &self.shared_reference_ids {
            push(id);
        }
        for id in &self.metadata.shared_reference_ids {
            push(id);
        }
        out
    }

    /// Capability slot for `kind`: saved instances + active selector
    #[must_use]
    pub fn capability_slot(&self, kind: CapabilityKind) -> (&IndexMap<String, Value>, Option<&str>) {
        match kind {
            CapabilityKind::Data => (&self.data_instances, self.data_active_id.as_deref()),
            CapabilityKind::Formula => (&self.formula_instances, self.formula_active_id.as_deref()),
            CapabilityKind::Condition => {
                (&self.condition_instances, self.condition_active_id.as_deref())
            }
            CapabilityKind::Table => (&self.table_instances, self.table_active_id.as_deref()),
            CapabilityKind::Api => (&self.api_instances, self.api_active_id.as_deref()),
            CapabilityKind::Link => (&self.link_instances, self.link_active_id.as_deref()),
            CapabilityKind::Markers => (&self.markers_instances, self.markers_active_id.as_deref()),
        }
    }
}

fn de_metadata<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NodeMetadata, D::Error> {
    let raw = Value::deserialize(deserializer)?;
    Ok(NodeMetadata::from_value(&raw))
}

fn de_opt_map<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<IndexMap<String, Value>, D::Error> {
    let raw = Option::<IndexMap<String, Value>>::deserialize(deserializer)?;
    Ok(raw.unwrap_or_default())
}

fn de_string_or_seq<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        One(String),
        Many(Vec<String>),
    }
    let raw = Option::<Raw>::deserialize(deserializer)?;
    Ok(match raw {
        None => Vec::new(),
        Some(Raw::One(s)) if s.trim().is_empty() => Vec::new(),
        Some(Raw::One(s)) => vec![s.trim().to_string()],
        Some(Raw::Many(v)) => v
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
    })
}

fn de_lenient_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(match raw {
        Some(Value::Bool(b)) => b,
        Some(Value::String(s)) => s == "true",
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn suffix_arithmetic() {
        let copy = NodeId::new("p1-2");
        let template = NodeId::new("p1");
        assert_eq!(copy.suffix_after(&template), Some("2"));
        assert_eq!(template.with_suffix("2"), copy);
        assert_eq!(template.suffix_after(&copy), None);
    }

    #[test]
    fn unknown_kind_is_container() {
        let node: Node = serde_json::from_value(json!({"id": "x", "type": "mystery"})).unwrap();
        assert_eq!(node.kind, NodeKind::Other);
        assert!(node.kind.is_container());
    }

    #[test]
    fn metadata_accepts_encoded_string() {
        let node: Node = serde_json::from_value(json!({
            "id": "x",
            "type": "leaf_field",
            "metadata": "{\"sourceTemplateId\":\"p1\",\"subTabKeys\":\"Roof\"}"
        }))
        .unwrap();
        assert_eq!(node.metadata.source_template_id, Some(NodeId::new("p1")));
        assert_eq!(node.metadata.sub_tab_keys, vec!["Roof".to_string()]);
    }

    #[test]
    fn malformed_metadata_degrades_to_empty() {
        let node: Node = serde_json::from_value(json!({
            "id": "x",
            "type": "leaf_field",
            "metadata": "{not json"
        }))
        .unwrap();
        assert_eq!(node.metadata, NodeMetadata::default());
    }

    #[test]
    fn capability_slot_reads_wire_columns() {
        let node: Node = serde_json::from_value(json!({
            "id": "x",
            "type": "leaf_field",
            "formula_instances": {"f1": {"expression": "a + b"}},
            "formula_activeId": "f1"
        }))
        .unwrap();
        let (instances, active) = node.capability_slot(CapabilityKind::Formula);
        assert_eq!(instances.len(), 1);
        assert_eq!(active, Some("f1"));
        let (data, _) = node.capability_slot(CapabilityKind::Data);
        assert!(data.is_empty());
    }

    #[test]
    fn sub_tab_list_accepts_plain_and_keyed() {
        let meta = NodeMetadata::from_value(&json!({
            "subTabs": ["Photo", {"key": "elec", "label": "Electricity"}]
        }));
        assert_eq!(meta.sub_tab_list.len(), 2);
        assert_eq!(meta.sub_tab_list[0].key, "Photo");
        assert_eq!(meta.sub_tab_list[1].label, "Electricity");
    }

    #[test]
    fn shared_reference_targets_deduplicate() {
        let mut node = Node::new("n1", NodeKind::LeafOption);
        node.shared_reference_id = Some(NodeId::new("r1"));
        node.shared_reference_ids = vec![NodeId::new("r1"), NodeId::new("r2")];
        node.metadata.shared_reference_ids = vec![NodeId::new("r3")];
        let targets = node.shared_reference_targets();
        assert_eq!(
            targets,
            vec![NodeId::new("r1"), NodeId::new("r2"), NodeId::new("r3")]
        );
    }
}
