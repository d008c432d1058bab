use std::rc::Rc;

use rstest::{fixture, rstest};
use treewatch::application::{ApplicationError, Document, ObserverId};
use treewatch::config::Settings;
use treewatch::domain::{ChangeKind, ChangeRecord, DomainError, NodeArena, NodeId, ObserverInit};
use treewatch::infrastructure::{
    CompositionEvent, NativeTree, PhysicalError, PhysicalTree, ShadowComposition,
};
use treewatch::util::testing;

#[fixture]
fn doc() -> Document {
    testing::init_test_setup();
    Document::default()
}

fn watch(doc: &mut Document, target: NodeId, init: ObserverInit) -> ObserverId {
    let observer = doc.create_observer(|_, _, _| Ok(()));
    doc.observe(observer, target, &init).unwrap();
    observer
}

fn records_of(doc: &mut Document, observer: ObserverId) -> Vec<Rc<ChangeRecord>> {
    doc.take_records(observer).unwrap()
}

/// root > [a, b, c]
fn three_children(doc: &mut Document) -> (NodeId, NodeId, NodeId) {
    let root = doc.root();
    let a = doc.create_element("a");
    let b = doc.create_element("b");
    let c = doc.create_element("c");
    for node in [a, b, c] {
        doc.append_child(root, node).unwrap();
    }
    (a, b, c)
}

#[rstest]
fn given_sequence_of_moves_when_applied_then_logical_tree_stays_valid(mut doc: Document) {
    let root = doc.root();
    let (a, b, c) = three_children(&mut doc);
    doc.tree().verify(root).unwrap();

    doc.insert_before(root, c, Some(a)).unwrap();
    doc.tree().verify(root).unwrap();
    assert_eq!(doc.children(root), vec![c, a, b]);

    let fragment = doc.create_fragment();
    let x = doc.create_element("x");
    let y = doc.create_element("y");
    doc.append_child(fragment, x).unwrap();
    doc.append_child(fragment, y).unwrap();
    doc.replace_child(root, fragment, a).unwrap();
    doc.tree().verify(root).unwrap();
    assert_eq!(doc.children(root), vec![c, x, y, b]);
    assert!(doc.children(fragment).is_empty());
    assert_eq!(doc.parent(a), None);

    doc.remove_child(root, c).unwrap();
    doc.tree().verify(root).unwrap();

    doc.append_child(x, b).unwrap();
    doc.tree().verify(root).unwrap();
    assert_eq!(doc.children(root), vec![x, y]);
    assert_eq!(doc.children(x), vec![b]);
    assert_eq!(doc.next_sibling(x), Some(y));
    assert_eq!(doc.previous_sibling(y), Some(x));
    assert_eq!(doc.first_child(root), Some(x));
    assert_eq!(doc.last_child(root), Some(y));
}

#[rstest]
fn given_insert_when_recorded_then_sibling_snapshot_taken_before_move(mut doc: Document) {
    let root = doc.root();
    let (a, b, c) = three_children(&mut doc);
    let o = watch(&mut doc, root, ObserverInit::new().child_list(true));
    let n = doc.create_element("n");

    doc.insert_before(root, n, Some(b)).unwrap();

    let records = records_of(&mut doc, o);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].added_nodes, vec![n]);
    assert_eq!(records[0].previous_sibling, Some(a));
    assert_eq!(records[0].next_sibling, Some(b));
    assert_eq!(doc.children(root), vec![a, n, b, c]);
}

#[rstest]
fn given_attached_node_when_moved_then_removal_recorded_against_old_parent(mut doc: Document) {
    let root = doc.root();
    let (a, b, _c) = three_children(&mut doc);
    let o = watch(
        &mut doc,
        root,
        ObserverInit::new().child_list(true).subtree(true),
    );

    doc.append_child(a, b).unwrap();

    let records = records_of(&mut doc, o);
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].target, root);
    assert_eq!(records[0].removed_nodes, vec![b]);
    assert_eq!(records[1].target, a);
    assert_eq!(records[1].added_nodes, vec![b]);
}

#[rstest]
fn given_reference_equal_to_node_when_inserting_then_node_stays_in_place(mut doc: Document) {
    let root = doc.root();
    let (a, b, c) = three_children(&mut doc);
    let o = watch(&mut doc, root, ObserverInit::new().child_list(true));

    doc.insert_before(root, b, Some(b)).unwrap();

    assert_eq!(doc.children(root), vec![a, b, c]);
    let records = records_of(&mut doc, o);
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].removed_nodes, vec![b]);
    assert_eq!(records[1].added_nodes, vec![b]);
    assert_eq!(records[1].previous_sibling, Some(a));
    assert_eq!(records[1].next_sibling, Some(c));
}

#[rstest]
fn given_sibling_moved_forward_when_recorded_then_previous_sibling_reflects_detached_list(
    mut doc: Document,
) {
    let root = doc.root();
    let (a, b, c) = three_children(&mut doc);
    let d = doc.create_element("d");
    doc.append_child(root, d).unwrap();
    let o = watch(&mut doc, root, ObserverInit::new().child_list(true));

    doc.insert_before(root, b, Some(d)).unwrap();

    assert_eq!(doc.children(root), vec![a, c, b, d]);
    let records = records_of(&mut doc, o);
    assert_eq!(records.len(), 2);
    assert_eq!(records[1].added_nodes, vec![b]);
    assert_eq!(records[1].previous_sibling, Some(c));
    assert_eq!(records[1].next_sibling, Some(d));
}

#[rstest]
fn given_fragment_when_inserted_then_children_move_with_one_record_each_side(mut doc: Document) {
    let root = doc.root();
    let fragment = doc.create_fragment();
    let x = doc.create_element("x");
    let y = doc.create_element("y");
    doc.append_child(fragment, x).unwrap();
    doc.append_child(fragment, y).unwrap();
    let on_root = watch(&mut doc, root, ObserverInit::new().child_list(true));
    let on_fragment = watch(&mut doc, fragment, ObserverInit::new().child_list(true));

    doc.append_child(root, fragment).unwrap();

    assert_eq!(doc.children(root), vec![x, y]);
    let inserted = records_of(&mut doc, on_root);
    assert_eq!(inserted.len(), 1);
    assert_eq!(inserted[0].added_nodes, vec![x, y]);
    assert_eq!(inserted[0].previous_sibling, None);
    let emptied = records_of(&mut doc, on_fragment);
    assert_eq!(emptied.len(), 1);
    assert_eq!(emptied[0].removed_nodes, vec![x, y]);
    assert_eq!(emptied[0].previous_sibling, None);
    assert_eq!(emptied[0].next_sibling, None);
}

#[rstest]
fn given_empty_fragment_when_inserted_then_nothing_recorded(mut doc: Document) {
    let root = doc.root();
    let o = watch(&mut doc, root, ObserverInit::new().child_list(true));
    let fragment = doc.create_fragment();

    doc.append_child(root, fragment).unwrap();

    assert!(records_of(&mut doc, o).is_empty());
    assert!(doc.children(root).is_empty());
}

#[rstest]
fn given_wrong_parent_when_removing_then_not_found_and_nothing_recorded(mut doc: Document) {
    let root = doc.root();
    let (a, b, _c) = three_children(&mut doc);
    let o = watch(
        &mut doc,
        root,
        ObserverInit::new().child_list(true).subtree(true),
    );

    let err = doc.remove_child(a, b).unwrap_err();

    assert!(matches!(
        err,
        ApplicationError::Domain(DomainError::NotFound { parent, child }) if parent == a && child == b
    ));
    assert_eq!(doc.parent(b), Some(root));
    assert!(records_of(&mut doc, o).is_empty());
}

#[rstest]
fn given_wrong_parent_when_replacing_then_not_found_and_nothing_recorded(mut doc: Document) {
    let root = doc.root();
    let (a, b, _c) = three_children(&mut doc);
    let o = watch(
        &mut doc,
        root,
        ObserverInit::new().child_list(true).subtree(true),
    );
    let n = doc.create_element("n");

    let err = doc.replace_child(a, n, b).unwrap_err();

    assert!(matches!(
        err,
        ApplicationError::Domain(DomainError::NotFound { .. })
    ));
    assert_eq!(doc.parent(n), None);
    assert!(records_of(&mut doc, o).is_empty());
}

#[rstest]
fn given_replace_when_recorded_then_single_record_with_both_sets(mut doc: Document) {
    let root = doc.root();
    let (a, b, c) = three_children(&mut doc);
    let o = watch(&mut doc, root, ObserverInit::new().child_list(true));
    let n = doc.create_element("n");

    let old = doc.replace_child(root, n, b).unwrap();

    assert_eq!(old, b);
    assert_eq!(doc.children(root), vec![a, n, c]);
    let records = records_of(&mut doc, o);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].added_nodes, vec![n]);
    assert_eq!(records[0].removed_nodes, vec![b]);
    assert_eq!(records[0].previous_sibling, Some(a));
    assert_eq!(records[0].next_sibling, Some(c));
}

#[rstest]
fn given_ancestor_when_inserted_below_itself_then_hierarchy_request(mut doc: Document) {
    let root = doc.root();
    let (a, _b, _c) = three_children(&mut doc);
    let inner = doc.create_element("inner");
    doc.append_child(a, inner).unwrap();

    let err = doc.append_child(inner, a).unwrap_err();

    assert!(matches!(
        err,
        ApplicationError::Domain(DomainError::HierarchyRequest { .. })
    ));
    doc.tree().verify(root).unwrap();
}

#[rstest]
fn given_text_parent_when_inserting_then_hierarchy_request(mut doc: Document) {
    let text = doc.create_text("leaf");
    let node = doc.create_element("span");

    let err = doc.append_child(text, node).unwrap_err();

    assert!(matches!(
        err,
        ApplicationError::Domain(DomainError::HierarchyRequest { .. })
    ));
}

#[rstest]
fn given_children_when_setting_text_content_then_one_child_list_record(mut doc: Document) {
    let root = doc.root();
    let p = doc.create_element("p");
    doc.append_child(root, p).unwrap();
    let t = doc.create_text("old");
    let span = doc.create_element("span");
    doc.append_child(p, t).unwrap();
    doc.append_child(p, span).unwrap();
    let o = watch(
        &mut doc,
        p,
        ObserverInit::new()
            .child_list(true)
            .character_data(true)
            .subtree(true),
    );

    doc.set_text_content(p, "hello").unwrap();

    let children = doc.children(p);
    assert_eq!(children.len(), 1);
    assert_eq!(doc.text_content(p), "hello");
    let records = records_of(&mut doc, o);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].kind, ChangeKind::ChildList);
    assert_eq!(records[0].removed_nodes, vec![t, span]);
    assert_eq!(records[0].added_nodes, children);
}

#[rstest]
fn given_empty_text_when_setting_text_content_then_children_cleared(mut doc: Document) {
    let p = doc.create_element("p");
    let t = doc.create_text("old");
    doc.append_child(p, t).unwrap();
    let o = watch(&mut doc, p, ObserverInit::new().child_list(true));

    doc.set_text_content(p, "").unwrap();

    assert!(doc.children(p).is_empty());
    let records = records_of(&mut doc, o);
    assert_eq!(records.len(), 1);
    assert!(records[0].added_nodes.is_empty());
    assert_eq!(records[0].removed_nodes, vec![t]);
}

#[rstest]
fn given_text_node_when_setting_text_content_then_character_data_record(mut doc: Document) {
    let t = doc.create_text("old");
    let o = watch(
        &mut doc,
        t,
        ObserverInit::new().character_data_old_value(true),
    );

    doc.set_text_content(t, "new").unwrap();

    assert_eq!(doc.text_content(t), "new");
    let records = records_of(&mut doc, o);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].kind, ChangeKind::CharacterData);
    assert_eq!(records[0].old_value.as_deref(), Some("old"));
}

#[rstest]
fn given_attribute_when_set_and_removed_then_old_values_returned(mut doc: Document) {
    let div = doc.create_element("div");

    assert_eq!(doc.set_attribute(div, "class", None, "a").unwrap(), None);
    assert_eq!(
        doc.set_attribute(div, "class", None, "b").unwrap(),
        Some("a".to_string())
    );
    assert_eq!(doc.get_attribute(div, "class", None), Some("b"));
    assert_eq!(
        doc.remove_attribute(div, "class", None).unwrap(),
        Some("b".to_string())
    );
    assert_eq!(doc.get_attribute(div, "class", None), None);
}

#[rstest]
fn given_missing_attribute_when_removing_then_nothing_recorded(mut doc: Document) {
    let div = doc.create_element("div");
    let o = watch(&mut doc, div, ObserverInit::new().attributes(true));

    assert_eq!(doc.remove_attribute(div, "id", None).unwrap(), None);

    assert!(records_of(&mut doc, o).is_empty());
}

#[rstest]
fn given_namespaced_attribute_when_set_then_kept_apart_from_plain_one(mut doc: Document) {
    let div = doc.create_element("div");
    doc.set_attribute(div, "href", None, "plain").unwrap();
    doc.set_attribute(div, "href", Some("xlink"), "linked")
        .unwrap();

    assert_eq!(doc.get_attribute(div, "href", None), Some("plain"));
    assert_eq!(doc.get_attribute(div, "href", Some("xlink")), Some("linked"));
}

#[rstest]
#[case::attribute_on_text(true)]
#[case::character_data_on_element(false)]
fn given_wrong_node_kind_when_mutating_then_invalid_node_kind(
    mut doc: Document,
    #[case] attribute_on_text: bool,
) {
    let text = doc.create_text("t");
    let element = doc.create_element("div");

    let err = if attribute_on_text {
        doc.set_attribute(text, "id", None, "x").unwrap_err()
    } else {
        doc.set_character_data(element, "x").unwrap_err()
    };

    assert!(matches!(
        err,
        ApplicationError::Domain(DomainError::InvalidNodeKind { .. })
    ));
}

#[rstest]
fn given_adjacent_text_when_normalizing_then_runs_merged_and_empties_dropped(mut doc: Document) {
    let root = doc.root();
    let p = doc.create_element("p");
    doc.append_child(root, p).unwrap();
    let empty = doc.create_text("");
    let a = doc.create_text("a");
    let b = doc.create_text("b");
    let span = doc.create_element("span");
    let x = doc.create_text("x");
    let y = doc.create_text("y");
    let c = doc.create_text("c");
    for node in [empty, a, b, span, c] {
        doc.append_child(p, node).unwrap();
    }
    doc.append_child(span, x).unwrap();
    doc.append_child(span, y).unwrap();
    let o = watch(
        &mut doc,
        p,
        ObserverInit::new()
            .child_list(true)
            .character_data(true)
            .subtree(true),
    );

    doc.normalize(p).unwrap();

    assert_eq!(doc.children(p), vec![a, span, c]);
    assert_eq!(doc.children(span), vec![x]);
    assert_eq!(doc.text_content(a), "ab");
    assert_eq!(doc.text_content(x), "xy");
    assert_eq!(doc.text_content(p), "abxyc");
    let kinds: Vec<ChangeKind> = records_of(&mut doc, o).iter().map(|r| r.kind).collect();
    assert_eq!(
        kinds,
        vec![
            ChangeKind::ChildList,
            ChangeKind::CharacterData,
            ChangeKind::ChildList,
            ChangeKind::CharacterData,
            ChangeKind::ChildList,
        ]
    );
    doc.tree().verify(root).unwrap();
}

#[rstest]
fn given_shadow_host_when_light_child_added_then_overlay_path_and_hook_fired() {
    testing::init_test_setup();
    let composition = ShadowComposition::new();
    let log = composition.log();
    let mut doc = Document::with_deps(
        Settings::default(),
        Box::new(NativeTree),
        Box::new(composition),
    );
    let root = doc.root();
    let host = doc.create_element("div");
    doc.append_child(root, host).unwrap();
    let first = doc.create_element("first");
    doc.append_child(host, first).unwrap();

    let shadow = doc.attach_shadow(host).unwrap();
    assert!(doc.tree().children_overlaid(host));
    assert_eq!(doc.children(host), vec![first]);

    let light = doc.create_element("light");
    doc.append_child(host, light).unwrap();
    let inner = doc.create_element("inner");
    doc.append_child(shadow, inner).unwrap();

    assert_eq!(doc.children(host), vec![first, light]);
    assert_eq!(doc.children(shadow), vec![inner]);
    assert_eq!(doc.scope_of(inner), Some(shadow));
    assert_eq!(doc.scope_of(light), None);
    assert!(!doc.contains(host, inner));
    assert_eq!(
        log.borrow().as_slice(),
        &[
            CompositionEvent::NodesAdded {
                root: shadow,
                nodes: vec![light]
            },
            CompositionEvent::NodesAdded {
                root: shadow,
                nodes: vec![inner]
            },
        ]
    );

    doc.remove_child(shadow, inner).unwrap();

    assert_eq!(doc.scope_of(inner), None);
    assert_eq!(
        log.borrow().last(),
        Some(&CompositionEvent::NodeRemoved {
            root: shadow,
            node: inner
        })
    );
    doc.tree().verify(root).unwrap();
    doc.tree().verify(shadow).unwrap();
}

#[rstest]
fn given_frozen_child_list_when_removing_then_both_trees_follow(mut doc: Document) {
    let root = doc.root();
    let host = doc.create_element("div");
    doc.append_child(root, host).unwrap();
    let a = doc.create_element("a");
    let b = doc.create_element("b");
    doc.append_child(host, a).unwrap();
    doc.append_child(host, b).unwrap();
    doc.attach_shadow(host).unwrap();

    doc.remove_child(host, a).unwrap();

    assert_eq!(doc.children(host), vec![b]);
    assert_eq!(doc.tree().physical_children(host), vec![b]);
    assert_eq!(doc.previous_sibling(b), None);
    doc.tree().verify(root).unwrap();
}

/// Physical tree that refuses every change.
struct ReadOnlyTree;

impl PhysicalTree for ReadOnlyTree {
    fn insert_before(
        &mut self,
        _tree: &mut NodeArena,
        _parent: NodeId,
        _nodes: &[NodeId],
        _before: Option<NodeId>,
    ) -> Result<(), PhysicalError> {
        Err(PhysicalError::Rejected("read-only".into()))
    }

    fn remove_child(
        &mut self,
        _tree: &mut NodeArena,
        _parent: NodeId,
        _child: NodeId,
    ) -> Result<(), PhysicalError> {
        Err(PhysicalError::Rejected("read-only".into()))
    }

    fn replace_child(
        &mut self,
        _tree: &mut NodeArena,
        _parent: NodeId,
        _nodes: &[NodeId],
        _old: NodeId,
    ) -> Result<(), PhysicalError> {
        Err(PhysicalError::Rejected("read-only".into()))
    }
}

#[rstest]
fn given_failing_physical_tree_when_inserting_then_error_propagates_unmodified() {
    testing::init_test_setup();
    let mut doc = Document::with_deps(
        Settings::default(),
        Box::new(ReadOnlyTree),
        Box::new(ShadowComposition::new()),
    );
    let root = doc.root();
    let o = watch(&mut doc, root, ObserverInit::new().child_list(true));
    let node = doc.create_element("div");

    let err = doc.append_child(root, node).unwrap_err();

    assert!(matches!(
        &err,
        ApplicationError::Physical(PhysicalError::Rejected(reason)) if reason == "read-only"
    ));
    assert!(doc.children(root).is_empty());
    assert!(records_of(&mut doc, o).is_empty());
}

#[rstest]
fn given_detached_subtree_when_discarded_then_registrations_pruned(mut doc: Document) {
    let root = doc.root();
    let (a, _b, _c) = three_children(&mut doc);
    let inner = doc.create_element("inner");
    doc.append_child(a, inner).unwrap();
    let o = watch(&mut doc, inner, ObserverInit::new().attributes(true));

    let err = doc.discard(a).unwrap_err();
    assert!(matches!(
        err,
        ApplicationError::Domain(DomainError::NodeAttached(_))
    ));

    doc.remove_child(root, a).unwrap();
    let destroyed = doc.discard(a).unwrap();

    assert_eq!(destroyed, 2);
    assert!(!doc.tree().contains(inner));
    assert!(doc.observer(o).unwrap().targets().is_empty());
    assert!(doc.registry().registrations_on(inner).is_empty());
}

#[rstest]
fn given_root_when_discarding_then_rejected(mut doc: Document) {
    let root = doc.root();
    assert!(matches!(
        doc.discard(root).unwrap_err(),
        ApplicationError::Domain(DomainError::NodeAttached(n)) if n == root
    ));
}
