//! Wire-format and merge-semantics coverage against realistic payloads

use formtree_graph::{GraphStore, Node, NodeId};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use serde_json::json;

#[test]
fn backend_row_decodes_with_capability_columns() {
    let node: Node = serde_json::from_value(json!({
        "id": "field-9",
        "treeId": "tree-1",
        "parentId": "branch-2",
        "type": "leaf_field",
        "subType": "NUMBER",
        "fieldType": "number",
        "label": "Surface",
        "order": 3,
        "isRequired": true,
        "isVisible": true,
        "isActive": true,
        "fieldConfig": {"placeholder": "m²", "min": 0, "unit": "m²"},
        "metadata": {
            "sourceTemplateId": "field-1",
            "copySuffix": "2",
            "subTabKeys": ["Roof"],
            "duplicatedAt": "2026-03-01T09:30:00Z",
            "legacyFlag": "kept"
        },
        "data_instances": {"field-9": {"sourceType": "tree", "sourceRef": "formula:f3"}},
        "data_activeId": "field-9",
        "formula_instances": null,
        "formula_activeId": null
    }))
    .expect("backend row decodes");

    assert_eq!(node.id, NodeId::new("field-9"));
    assert_eq!(node.effective_type(), "NUMBER");
    assert!(node.required);
    assert_eq!(node.config.placeholder.as_deref(), Some("m²"));
    assert_eq!(node.metadata.source_template_id, Some(NodeId::new("field-1")));
    assert_eq!(node.metadata.sub_tab_keys, vec!["Roof".to_string()]);
    assert!(node.metadata.duplicated_at.is_some());
    assert_eq!(node.metadata.extra.get("legacyFlag"), Some(&json!("kept")));
    assert_eq!(node.data_active_id.as_deref(), Some("field-9"));
    assert!(node.formula_instances.is_empty());
}

#[test]
fn node_roundtrips_through_patch_merge() {
    let original: Node = serde_json::from_value(json!({
        "id": "n1",
        "type": "leaf_field",
        "label": "Before",
        "order": 2,
        "metadata": {"subTabKeys": "Roof"}
    }))
    .unwrap();
    let mut store = GraphStore::from_nodes(vec![original]);
    store
        .patch(&json!({"id": "n1", "label": "After"}))
        .unwrap();
    let node = store.by_id(&NodeId::new("n1")).unwrap();
    assert_eq!(node.label, "After");
    assert_eq!(node.order, 2.0);
    assert_eq!(node.metadata.sub_tab_keys, vec!["Roof".to_string()]);
}

fn node_batch() -> impl Strategy<Value = Vec<Node>> {
    proptest::collection::vec((0usize..8, 0u8..4), 1..8).prop_map(|pairs| {
        pairs
            .into_iter()
            .map(|(id, order)| {
                serde_json::from_value(json!({
                    "id": format!("n{id}"),
                    "type": "leaf_field",
                    "label": format!("L{id}"),
                    "order": order
                }))
                .unwrap()
            })
            .collect()
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Id-keyed upserts: interleaved batch completions never duplicate ids,
    /// and the surviving id set is order-independent.
    #[test]
    fn prop_upsert_merge_is_commutative_on_ids(a in node_batch(), b in node_batch()) {
        let mut forward = GraphStore::new();
        for node in a.iter().chain(b.iter()) {
            forward.upsert(node.clone());
        }
        let mut backward = GraphStore::new();
        for node in b.iter().chain(a.iter()) {
            backward.upsert(node.clone());
        }

        let mut forward_ids: Vec<&str> = forward.iter().map(|n| n.id.as_str()).collect();
        let mut backward_ids: Vec<&str> = backward.iter().map(|n| n.id.as_str()).collect();
        forward_ids.sort_unstable();
        backward_ids.sort_unstable();
        prop_assert_eq!(&forward_ids, &backward_ids);
        forward_ids.dedup();
        prop_assert_eq!(forward_ids.len(), forward.len());
    }
}
