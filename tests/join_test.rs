use procflow::graph::ProcessDefinition;
use procflow::graph::builder::DefinitionBuilder;
use procflow::runtime::token::{TokenId, TokenTree};

fn flat_definition() -> ProcessDefinition {
    DefinitionBuilder::new("flat")
        .bare_node("fork")
        .bare_node("gate")
        .bare_node("task")
        .build()
        .expect("definition")
}

/// Root forked into two branches, both parked at the join gate.
fn forked_tree() -> (TokenTree, TokenId, TokenId) {
    let mut tree = TokenTree::new();
    let root = tree.root();
    let c1 = tree.create_child(root).unwrap();
    let c2 = tree.create_child(root).unwrap();
    for id in [c1, c2] {
        tree.token_mut(id).unwrap().node = Some("gate".to_string());
    }
    (tree, c1, c2)
}

#[test]
fn join_collapses_fork_back_into_root() {
    let definition = flat_definition();
    let (mut tree, c1, c2) = forked_tree();
    let root = tree.root();

    let survivor = tree
        .reconcile_join(&definition, c2, vec![c1, c2])
        .expect("join");
    assert_eq!(survivor, root);

    tree.adopt(c2, survivor).expect("adopt");
    assert_eq!(tree.token(root).unwrap().node.as_deref(), Some("gate"));
    assert!(tree.token(root).unwrap().is_active);
    assert!(tree.children(root).is_empty());
    assert_eq!(tree.live_tokens(), vec![root]);
    tree.check_integrity().expect("tree is consistent");
}

#[test]
fn join_outcome_is_order_independent() {
    let definition = flat_definition();
    let (tree, c1, c2) = forked_tree();

    let mut survivors = Vec::new();
    for joined in [vec![c1, c2], vec![c2, c1], vec![c1]] {
        let mut t = tree.clone();
        let survivor = t.reconcile_join(&definition, c2, joined).expect("join");
        t.adopt(c2, survivor).expect("adopt");
        survivors.push((survivor, t.live_tokens()));
    }
    assert!(survivors.windows(2).all(|w| w[0] == w[1]));
}

#[test]
fn join_collapses_single_child_ancestor_chain() {
    let definition = flat_definition();

    // root -> a -> b -> c is a degenerate chain left over from nested
    // forks; d is the sibling branch being joined away.
    let mut tree = TokenTree::new();
    let root = tree.root();
    let a = tree.create_child(root).unwrap();
    let b = tree.create_child(a).unwrap();
    let c = tree.create_child(b).unwrap();
    let d = tree.create_child(root).unwrap();
    for id in [c, d] {
        tree.token_mut(id).unwrap().node = Some("gate".to_string());
    }

    let survivor = tree
        .reconcile_join(&definition, c, vec![c, d])
        .expect("join");
    assert_eq!(survivor, root);

    tree.adopt(c, survivor).expect("adopt");
    assert_eq!(tree.live_tokens(), vec![root]);
    tree.check_integrity().expect("tree is consistent");
}

#[test]
fn join_never_collapses_past_the_scope_token() {
    let definition = DefinitionBuilder::new("scoped")
        .sub_process("sub", "inner")
        .bare_node("inner")
        .bare_node("gate")
        .build()
        .expect("definition");

    // Fork inside a sub-process: the surviving token must be the one
    // sitting at the sub-process node, not the instance root.
    let mut tree = TokenTree::new();
    let root = tree.root();
    let s = tree.create_child(root).unwrap();
    tree.token_mut(s).unwrap().node = Some("sub".to_string());
    let c1 = tree.create_child(s).unwrap();
    let c2 = tree.create_child(s).unwrap();
    for id in [c1, c2] {
        tree.token_mut(id).unwrap().node = Some("gate".to_string());
    }

    let survivor = tree
        .reconcile_join(&definition, c2, vec![c1, c2])
        .expect("join");
    assert_eq!(survivor, s);

    tree.adopt(c2, survivor).expect("adopt");
    assert_eq!(tree.token(s).unwrap().node.as_deref(), Some("gate"));
    assert_eq!(tree.children(root), &[s]);
    tree.check_integrity().expect("tree is consistent");
}

#[test]
fn adopt_transfers_activity_to_survivor() {
    let definition = flat_definition();
    let (mut tree, c1, c2) = forked_tree();
    let root = tree.root();

    let activity = Some(uuid::Uuid::new_v4());
    tree.token_mut(c2).unwrap().activity_instance = activity;
    let survivor = tree
        .reconcile_join(&definition, c2, vec![c1, c2])
        .expect("join");
    tree.adopt(c2, survivor).expect("adopt");

    let adopted = tree.token(root).unwrap();
    assert_eq!(adopted.node.as_deref(), Some("gate"));
    assert_eq!(adopted.activity_instance, activity);
}
