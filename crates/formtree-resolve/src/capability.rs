//! Capability slot extraction
//!
//! A capability is a revision slot: many saved configurations per kind, one
//! currently selected. Extraction is the only logic that lives here;
//! evaluating formulas or conditions is downstream work.

use formtree_graph::{CapabilityKind, Node};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Extracted state of one capability slot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilityState {
    /// Slot holds at least one saved configuration with a valid selection
    pub enabled: bool,
    /// Selected instance id
    pub active_id: Option<String>,
    /// Selected instance payload
    pub active: Option<Value>,
    /// All saved configurations, in authoring order
    pub instances: IndexMap<String, Value>,
}

impl CapabilityState {
    /// Extract the slot for `kind` from a node
    ///
    /// `enabled` requires a non-empty instance map; a selector that does not
    /// key into the map disables the slot.
    #[must_use]
    pub fn extract(node: &Node, kind: CapabilityKind) -> Self {
        let (instances, active_id) = node.capability_slot(kind);
        let active = active_id.and_then(|id| instances.get(id)).cloned();
        let enabled = !instances.is_empty() && (active_id.is_none() || active.is_some());
        Self {
            enabled,
            active_id: active_id.map(str::to_string),
            active,
            instances: instances.clone(),
        }
    }

    /// Normalized data-source configuration of the active instance
    ///
    /// Reads `sourceType` / `sourceRef` / `fixedValue` / `selectedNodeId`
    /// from the instance's top level, falling back into its legacy
    /// `metadata` object for rows written by older authoring paths.
    #[must_use]
    pub fn data_source(&self) -> Option<DataSourceConfig> {
        let active = self.active.as_ref()?;
        let legacy = active.get("metadata");
        let pick = |key: &str| -> Option<Value> {
            active
                .get(key)
                .filter(|v| !v.is_null())
                .or_else(|| legacy.and_then(|m| m.get(key)).filter(|v| !v.is_null()))
                .cloned()
        };
        let as_string = |v: Value| v.as_str().map(str::to_string);
        let config = DataSourceConfig {
            source_type: pick("sourceType").and_then(as_string),
            source_ref: pick("sourceRef").and_then(as_string),
            fixed_value: pick("fixedValue"),
            selected_node_id: pick("selectedNodeId").and_then(as_string),
        };
        if config.source_type.is_none()
            && config.source_ref.is_none()
            && config.fixed_value.is_none()
            && config.selected_node_id.is_none()
        {
            None
        } else {
            Some(config)
        }
    }
}

/// Where a data-bound field takes its value from
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSourceConfig {
    /// Source discriminator (`"fixed"`, `"tree"`, ...)
    pub source_type: Option<String>,
    /// Reference into the tree (`"formula:..."`, `"condition:..."`, node id)
    pub source_ref: Option<String>,
    /// Literal value for fixed sources
    pub fixed_value: Option<Value>,
    /// Legacy node selection
    pub selected_node_id: Option<String>,
}

/// All seven capability slots of a node, extracted
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilitySet {
    /// Data source binding
    pub data: CapabilityState,
    /// Computed formula
    pub formula: CapabilityState,
    /// Visibility/enablement condition
    pub condition: CapabilityState,
    /// Lookup table
    pub table: CapabilityState,
    /// External call
    pub api: CapabilityState,
    /// Cross-field link
    pub link: CapabilityState,
    /// Markers
    pub markers: CapabilityState,
}

impl CapabilitySet {
    /// Extract every slot from a node
    #[must_use]
    pub fn extract(node: &Node) -> Self {
        Self {
            data: CapabilityState::extract(node, CapabilityKind::Data),
            formula: CapabilityState::extract(node, CapabilityKind::Formula),
            condition: CapabilityState::extract(node, CapabilityKind::Condition),
            table: CapabilityState::extract(node, CapabilityKind::Table),
            api: CapabilityState::extract(node, CapabilityKind::Api),
            link: CapabilityState::extract(node, CapabilityKind::Link),
            markers: CapabilityState::extract(node, CapabilityKind::Markers),
        }
    }

    /// Slot by kind
    #[must_use]
    pub fn get(&self, kind: CapabilityKind) -> &CapabilityState {
        match kind {
            CapabilityKind::Data => &self.data,
            CapabilityKind::Formula => &self.formula,
            CapabilityKind::Condition => &self.condition,
            CapabilityKind::Table => &self.table,
            CapabilityKind::Api => &self.api,
            CapabilityKind::Link => &self.link,
            CapabilityKind::Markers => &self.markers,
        }
    }

    /// Kinds with an enabled slot
    pub fn enabled_kinds(&self) -> impl Iterator<Item = CapabilityKind> + '_ {
        CapabilityKind::ALL
            .into_iter()
            .filter(|kind| self.get(*kind).enabled)
    }
}
