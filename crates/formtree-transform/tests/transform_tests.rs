use formtree_graph::{GraphStore, Node, NodeId};
use formtree_test_utils::{
    branch, field, option, option_field, repeater, section, tab, template_field, with_tree_id,
};
use formtree_transform::{transform, VisibilityContext};
use pretty_assertions::assert_eq;
use serde_json::json;

fn render(nodes: Vec<Node>) -> formtree_transform::Tree {
    transform(&GraphStore::from_nodes(nodes), &VisibilityContext::new())
}

#[test]
fn selector_with_conditional_field() {
    let tree = render(vec![
        with_tree_id(tab("t1", "Main", 0.0), "tree-1"),
        branch("b1", "t1", 0.0).with_label("Choice"),
        option("o1", "b1", "Yes", 0.0).with_value("yes"),
        field("f1", "o1", "Detail", 0.0),
    ]);

    assert_eq!(tree.id, "tree-1");
    assert_eq!(tree.tabs.len(), 1);
    let fields = &tree.tabs[0].sections[0].fields;
    assert_eq!(fields.len(), 1);
    let select = &fields[0];
    assert_eq!(select.id, NodeId::new("b1"));
    assert_eq!(select.field_type, "select");
    assert_eq!(select.options.len(), 1);
    let opt = &select.options[0];
    assert_eq!(opt.id, NodeId::new("o1"));
    assert_eq!(opt.value, json!("yes"));
    assert_eq!(opt.conditional_fields.len(), 1);
    assert_eq!(opt.conditional_fields[0].id, NodeId::new("f1"));
    assert_eq!(opt.conditional_fields[0].label, "Detail");
}

#[test]
fn option_value_falls_back_to_option_id() {
    let tree = render(vec![
        tab("t1", "Main", 0.0),
        branch("b1", "t1", 0.0),
        option("o1", "b1", "Unlabeled", 0.0),
    ]);
    let opt = &tree.tabs[0].sections[0].fields[0].options[0];
    assert_eq!(opt.value, json!("o1"));
}

#[test]
fn option_field_carries_inline_conditional() {
    let mut opt = option_field("of1", "b1", "Other", 0.0);
    opt.field_label = Some("Please specify".to_string());
    let tree = render(vec![tab("t1", "Main", 0.0), branch("b1", "t1", 0.0), opt]);
    let options = &tree.tabs[0].sections[0].fields[0].options;
    assert_eq!(options.len(), 1);
    let inline = &options[0].conditional_fields[0];
    assert_eq!(inline.id, NodeId::new("of1"));
    assert_eq!(inline.label, "Please specify");
}

#[test]
fn transparent_branch_flattens_into_parent() {
    let tree = render(vec![
        tab("t1", "Main", 0.0),
        branch("wrap", "t1", 0.0),
        field("f1", "wrap", "Inner", 0.0),
    ]);
    let fields = &tree.tabs[0].sections[0].fields;
    assert_eq!(fields.len(), 1);
    assert_eq!(fields[0].id, NodeId::new("f1"));
}

#[test]
fn explicit_section_claims_fields_and_default_takes_rest() {
    let mut sec = section("s1", "t1", "Address", 0.0);
    sec.metadata.columns = Some(2);
    sec.metadata.collapsible = Some(true);
    let tree = render(vec![
        tab("t1", "Main", 0.0),
        sec,
        field("f1", "s1", "Street", 0.0),
        field("f2", "t1", "Loose", 1.0),
    ]);

    let sections = &tree.tabs[0].sections;
    assert_eq!(sections.len(), 2);
    assert_eq!(sections[0].title, "Address");
    assert_eq!(sections[0].layout.columns, Some(2));
    assert!(sections[0].layout.collapsible);
    assert!(!sections[0].is_default);
    assert_eq!(sections[0].fields[0].id, NodeId::new("f1"));
    // Unclaimed fields land in the implicit section named after the tab.
    assert!(sections[1].is_default);
    assert_eq!(sections[1].title, "Main");
    assert_eq!(sections[1].fields[0].id, NodeId::new("f2"));
}

#[test]
fn sibling_order_is_respected() {
    let tree = render(vec![
        tab("t1", "Main", 0.0),
        field("late", "t1", "Late", 3.0),
        field("early", "t1", "Early", 1.0),
        field("mid", "t1", "Mid", 2.0),
    ]);
    let ids: Vec<&str> = tree.tabs[0].sections[0]
        .fields
        .iter()
        .map(|f| f.id.as_str())
        .collect();
    assert_eq!(ids, vec!["early", "mid", "late"]);
}

#[test]
fn template_surfaces_only_through_referencing_option() {
    // The template is both a direct child of the tab and the target of an
    // option reference; it must render exactly once, through the option.
    let mut opt = option("o1", "b1", "Yes", 0.0);
    opt.shared_reference_ids = vec![NodeId::new("R")];
    let tree = render(vec![
        tab("t1", "Main", 0.0),
        template_field("R", "Shared detail").with_parent("t1"),
        branch("b1", "t1", 1.0),
        opt,
    ]);

    let occurrences: usize = tree
        .all_fields()
        .filter(|f| f.id == NodeId::new("R"))
        .count();
    assert_eq!(occurrences, 1);
    let conditional = &tree.tabs[0].sections[0].fields[0].options[0].conditional_fields[0];
    assert_eq!(conditional.id, NodeId::new("R"));
    assert_eq!(conditional.shared_reference_name.as_deref(), Some("Shared detail"));
}

#[test]
fn first_referencing_option_wins() {
    let mut o1 = option("o1", "b1", "A", 0.0);
    o1.shared_reference_ids = vec![NodeId::new("R")];
    let mut o2 = option("o2", "b1", "B", 1.0);
    o2.shared_reference_ids = vec![NodeId::new("R")];
    let tree = render(vec![
        tab("t1", "Main", 0.0),
        template_field("R", "Shared"),
        branch("b1", "t1", 0.0),
        o1,
        o2,
    ]);

    let options = &tree.tabs[0].sections[0].fields[0].options;
    assert_eq!(options[0].conditional_fields.len(), 1);
    assert!(options[1].conditional_fields.is_empty());
}

#[test]
fn copy_option_remaps_template_references_through_suffix() {
    let mut template_option = option("o1", "b1", "Tmpl", 0.0);
    template_option.shared_reference_ids = vec![NodeId::new("R")];
    let mut copy_option = option("o1-2", "b1", "Copy", 1.0);
    copy_option.metadata.source_template_id = Some(NodeId::new("o1"));
    let tree = render(vec![
        tab("t1", "Main", 0.0),
        branch("b1", "t1", 0.0),
        template_option,
        copy_option,
        template_field("R", "Ref"),
        template_field("R-2", "Ref second"),
    ]);

    let options = &tree.tabs[0].sections[0].fields[0].options;
    assert_eq!(options[0].conditional_fields[0].id, NodeId::new("R"));
    assert_eq!(options[1].conditional_fields[0].id, NodeId::new("R-2"));
}

#[test]
fn unordered_shared_references_sort_last() {
    let mut opt = option("o1", "b1", "Yes", 0.0);
    opt.shared_reference_ids = vec![NodeId::new("R")];
    let tree = render(vec![
        tab("t1", "Main", 0.0),
        branch("b1", "t1", 0.0),
        opt,
        field("f1", "o1", "Direct", 5.0),
        template_field("R", "Ref"),
    ]);
    let conditionals = &tree.tabs[0].sections[0].fields[0].options[0].conditional_fields;
    let ids: Vec<&str> = conditionals.iter().map(|f| f.id.as_str()).collect();
    assert_eq!(ids, vec!["f1", "R"]);
}

#[test]
fn conditional_fields_visible_only_under_selection() {
    let nodes = vec![
        tab("t1", "Main", 0.0),
        branch("b1", "t1", 0.0),
        option("o1", "b1", "Yes", 0.0).with_value("yes"),
        field("f1", "o1", "Detail", 0.0),
    ];
    let store = GraphStore::from_nodes(nodes);

    let unselected = transform(&store, &VisibilityContext::new());
    assert!(!unselected.tabs[0].sections[0].fields[0].options[0].conditional_fields[0].visible);

    let selected = transform(&store, &VisibilityContext::new().with_selection("b1", "yes"));
    assert!(selected.tabs[0].sections[0].fields[0].options[0].conditional_fields[0].visible);
}

#[test]
fn repeater_emits_template_with_add_affordance_when_no_copies() {
    let tree = render(vec![
        tab("t1", "Main", 0.0),
        repeater("r1", "t1", &["p1"], 0.0),
        field("p1", "r1", "Slope", 0.0),
    ]);
    let fields = &tree.tabs[0].sections[0].fields;
    assert_eq!(fields.len(), 1);
    let template = &fields[0];
    assert_eq!(template.id, NodeId::new("p1"));
    assert!(template.can_add_new_copy);
    assert!(!template.is_deletable_copy);
    assert_eq!(template.parent_repeater_id, Some(NodeId::new("r1")));
}

#[test]
fn repeater_add_affordance_migrates_to_last_copy() {
    let mut copy = field("p1-2", "r1", "Slope (copy 2)", 0.0);
    copy.metadata.source_template_id = Some(NodeId::new("p1"));
    let tree = render(vec![
        tab("t1", "Main", 0.0),
        repeater("r1", "t1", &["p1"], 0.0),
        field("p1", "r1", "Slope", 0.0),
        copy,
    ]);

    let fields = &tree.tabs[0].sections[0].fields;
    assert_eq!(fields.len(), 2);
    let template = &fields[0];
    let realized = &fields[1];
    assert_eq!(template.id, NodeId::new("p1"));
    assert!(!template.can_add_new_copy);
    assert_eq!(realized.id, NodeId::new("p1-2"));
    assert!(realized.can_add_new_copy);
    assert!(realized.is_deletable_copy);
    assert_eq!(realized.source_template_id, Some(NodeId::new("p1")));
    assert_eq!(realized.repeater_instance_index, Some(0));
}

#[test]
fn repeater_copies_ordered_by_duplication_time_then_label_index() {
    let mut second = field("p1-b", "r1", "Slope (copy 2)", 0.0);
    second.metadata.source_template_id = Some(NodeId::new("p1"));
    second.metadata.duplicated_at = Some("2026-01-02T00:00:00Z".parse().unwrap());
    let mut first = field("p1-a", "r1", "Slope (copy 1)", 0.0);
    first.metadata.source_template_id = Some(NodeId::new("p1"));
    first.metadata.duplicated_at = Some("2026-01-01T00:00:00Z".parse().unwrap());
    let tree = render(vec![
        tab("t1", "Main", 0.0),
        repeater("r1", "t1", &["p1"], 0.0),
        field("p1", "r1", "Slope", 0.0),
        second,
        first,
    ]);

    let ids: Vec<&str> = tree.tabs[0].sections[0]
        .fields
        .iter()
        .map(|f| f.id.as_str())
        .collect();
    assert_eq!(ids, vec!["p1", "p1-a", "p1-b"]);
    assert_eq!(
        tree.tabs[0].sections[0].fields[1].repeater_instance_index,
        Some(0)
    );
    assert_eq!(
        tree.tabs[0].sections[0].fields[2].repeater_instance_index,
        Some(1)
    );
}

#[test]
fn repeater_respects_max_items() {
    let mut rep = repeater("r1", "t1", &["p1"], 0.0);
    rep.max_items = Some(1);
    let mut copy = field("p1-2", "r1", "Slope (copy 2)", 0.0);
    copy.metadata.source_template_id = Some(NodeId::new("p1"));
    let tree = render(vec![
        tab("t1", "Main", 0.0),
        rep,
        field("p1", "r1", "Slope", 0.0),
        copy,
    ]);
    assert!(tree.all_fields().all(|f| !f.can_add_new_copy));
}

#[test]
fn repeater_template_ids_expand_containers() {
    let tree = render(vec![
        tab("t1", "Main", 0.0),
        repeater("r1", "t1", &["grp"], 0.0),
        branch("grp", "r1", 0.0),
        field("p1", "grp", "Inner", 0.0),
    ]);
    let template = tree.field(&NodeId::new("p1")).expect("expanded template emitted");
    assert_eq!(template.parent_repeater_id, Some(NodeId::new("r1")));
    assert!(template.can_add_new_copy);
}

#[test]
fn discovered_sub_tabs_union_with_general_bucket() {
    let mut f1 = field("f1", "t1", "Assigned", 0.0);
    f1.metadata.sub_tab_keys = vec!["Photo".to_string()];
    let f2 = field("f2", "t1", "Unassigned", 1.0);
    let tree = render(vec![tab("t1", "Main", 0.0), f1, f2]);

    let keys: Vec<&str> = tree.tabs[0].sub_tabs.iter().map(|s| s.key.as_str()).collect();
    assert_eq!(keys, vec!["Photo", "__default__"]);
}

#[test]
fn declared_sub_tab_list_is_exclusive() {
    let mut t = tab("t1", "Main", 0.0);
    t.metadata.sub_tab_list = vec![
        formtree_graph::SubTabEntry::new("Photo"),
        formtree_graph::SubTabEntry::new("Roof"),
    ];
    let mut f1 = field("f1", "t1", "Assigned", 0.0);
    f1.metadata.sub_tab_keys = vec!["Photo".to_string()];
    // An unrecognized key counts as unassigned under a declared list.
    let mut f2 = field("f2", "t1", "Stray", 1.0);
    f2.metadata.sub_tab_keys = vec!["Générales".to_string()];
    let tree = render(vec![t, f1, f2]);

    let keys: Vec<&str> = tree.tabs[0].sub_tabs.iter().map(|s| s.key.as_str()).collect();
    assert_eq!(keys, vec!["Photo", "Roof", "__default__"]);
}

#[test]
fn no_general_bucket_when_everything_is_assigned() {
    let mut f1 = field("f1", "t1", "Assigned", 0.0);
    f1.metadata.sub_tab_keys = vec!["Photo".to_string()];
    let tree = render(vec![tab("t1", "Main", 0.0), f1]);
    let keys: Vec<&str> = tree.tabs[0].sub_tabs.iter().map(|s| s.key.as_str()).collect();
    assert_eq!(keys, vec!["Photo"]);
}

#[test]
fn always_visible_fields_do_not_force_general_bucket() {
    let mut f1 = field("f1", "t1", "Assigned", 0.0);
    f1.metadata.sub_tab_keys = vec!["Photo".to_string()];
    let mut f2 = field("f2", "t1", "Summary", 1.0);
    f2.metadata.display_always = true;
    let tree = render(vec![tab("t1", "Main", 0.0), f1, f2]);
    let keys: Vec<&str> = tree.tabs[0].sub_tabs.iter().map(|s| s.key.as_str()).collect();
    assert_eq!(keys, vec!["Photo"]);
}

#[test]
fn alias_field_inherits_template_content_and_placement_sub_tab() {
    let mut shared = template_field("R", "Shared");
    shared.field_type = Some("number".to_string());
    shared.required = true;
    let mut alias = field("a1", "b1", "Local name", 0.0);
    alias.shared_reference_id = Some(NodeId::new("R"));
    let mut container = branch("b1", "t1", 0.0);
    container.metadata.sub_tab_keys = vec!["Roof".to_string()];
    let tree = render(vec![tab("t1", "Main", 0.0), container, alias, shared]);

    let rendered = tree.field(&NodeId::new("a1")).expect("alias rendered");
    assert_eq!(rendered.field_type, "number");
    assert!(rendered.required);
    assert_eq!(rendered.label, "Local name");
    // Grouping follows where the alias is used, not where the template was
    // authored.
    assert_eq!(rendered.sub_tab_keys, vec!["Roof".to_string()]);
}

#[test]
fn data_capability_marks_value_resolution() {
    let mut f = field("f1", "t1", "Price", 0.0);
    f.data_instances
        .insert("v".to_string(), json!({"sourceType": "fixed", "fixedValue": 10}));
    f.data_active_id = Some("v".to_string());
    let tree = render(vec![tab("t1", "Main", 0.0), f]);
    let rendered = tree.field(&NodeId::new("f1")).unwrap();
    assert!(rendered.needs_value_resolution);
    assert!(rendered.capabilities.data.enabled);
}

#[test]
fn transform_is_deterministic_for_fixture() {
    let nodes = vec![
        tab("t1", "Main", 0.0),
        branch("b1", "t1", 0.0),
        option("o1", "b1", "Yes", 0.0).with_value("yes"),
        field("f1", "o1", "Detail", 0.0),
        repeater("r1", "t1", &["p1"], 1.0),
        field("p1", "r1", "Slope", 0.0),
    ];
    let store = GraphStore::from_nodes(nodes);
    let visibility = VisibilityContext::new();
    assert_eq!(transform(&store, &visibility), transform(&store, &visibility));
}

#[test]
fn empty_store_renders_empty_tree() {
    let tree = render(Vec::new());
    assert!(tree.tabs.is_empty());
    assert_eq!(tree.id, "unknown");
}
