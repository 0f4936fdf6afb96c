use procflow::error::EngineError;
use procflow::graph::builder::DefinitionBuilder;
use procflow::runtime::token::TokenTree;

#[test]
fn child_creation_keeps_tree_integrity() {
    let mut tree = TokenTree::new();
    let root = tree.root();
    let a = tree.create_child(root).expect("child a");
    let b = tree.create_child(root).expect("child b");
    let a1 = tree.create_child(a).expect("grandchild");

    assert_eq!(tree.children(root), &[a, b]);
    assert_eq!(tree.children(a), &[a1]);
    assert_eq!(tree.token(a1).unwrap().parent, Some(a));
    tree.check_integrity().expect("tree is consistent");
}

#[test]
fn remove_rejects_token_with_active_children() {
    let mut tree = TokenTree::new();
    let root = tree.root();
    let a = tree.create_child(root).unwrap();
    tree.create_child(a).unwrap();

    let err = tree.remove(a).unwrap_err();
    assert!(matches!(err, EngineError::InvalidState(_)));
    assert!(tree.token(a).unwrap().is_active);
}

#[test]
fn remove_detaches_leaf_and_queues_it() {
    let mut tree = TokenTree::new();
    let root = tree.root();
    let a = tree.create_child(root).unwrap();
    let b = tree.create_child(root).unwrap();

    tree.remove(a).expect("leaf removal");
    assert_eq!(tree.children(root), &[b]);
    assert!(!tree.token(a).unwrap().is_active);
    assert_eq!(tree.take_removed(), vec![a]);
    // Drained: a second call yields nothing.
    assert!(tree.take_removed().is_empty());
    tree.check_integrity().expect("tree is consistent");
}

#[test]
fn activate_reattaches_and_is_idempotent() {
    let mut tree = TokenTree::new();
    let root = tree.root();
    let a = tree.create_child(root).unwrap();
    tree.remove(a).unwrap();

    tree.activate(a).expect("reactivation");
    tree.activate(a).expect("second activation is a no-op");
    assert_eq!(tree.children(root), &[a]);
    assert!(tree.token(a).unwrap().is_active);
    assert!(tree.take_removed().is_empty());
    tree.check_integrity().expect("tree is consistent");
}

#[test]
fn tokens_at_is_sorted_and_skips_inactive() {
    let mut tree = TokenTree::new();
    let root = tree.root();
    let a = tree.create_child(root).unwrap();
    let b = tree.create_child(root).unwrap();
    let c = tree.create_child(root).unwrap();
    for id in [a, b, c] {
        tree.token_mut(id).unwrap().node = Some("gate".to_string());
    }
    tree.remove(c).unwrap();

    let mut expected = vec![a, b];
    expected.sort();
    assert_eq!(tree.tokens_at("gate"), expected);
}

#[test]
fn clear_kills_every_live_token() {
    let mut tree = TokenTree::new();
    let root = tree.root();
    let a = tree.create_child(root).unwrap();
    tree.create_child(a).unwrap();

    tree.clear();
    assert!(!tree.has_live_tokens());
}

#[test]
fn scope_resolution_stops_at_sub_process_token() {
    let definition = DefinitionBuilder::new("scoped")
        .sub_process("sub", "inner")
        .bare_node("inner")
        .bare_node("after")
        .build()
        .expect("definition");

    let mut tree = TokenTree::new();
    let root = tree.root();
    let s = tree.create_child(root).unwrap();
    let inner = tree.create_child(s).unwrap();
    tree.token_mut(s).unwrap().node = Some("sub".to_string());
    tree.token_mut(inner).unwrap().node = Some("inner".to_string());

    assert_eq!(tree.resolve_scope(&definition, inner).unwrap(), s);
    assert_eq!(tree.resolve_scope(&definition, s).unwrap(), s);
    // No scope above the root token: falls back to the root itself.
    assert_eq!(tree.resolve_scope(&definition, root).unwrap(), root);
}
