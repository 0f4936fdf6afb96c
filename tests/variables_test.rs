use std::collections::HashMap;

use serde_json::json;

use procflow::runtime::instance::ProcessInstance;

fn instance_with_base() -> ProcessInstance {
    let mut vars = HashMap::new();
    vars.insert("region".to_string(), json!("eu"));
    vars.insert("limit".to_string(), json!(100));
    ProcessInstance::new("vars", vars, None)
}

#[test]
fn token_local_variable_shadows_instance_level() {
    let mut instance = instance_with_base();
    let root = instance.root();
    let child = instance.tree_mut().create_child(root).unwrap();

    instance
        .set_variable_local(child, "limit", json!(5))
        .unwrap();

    assert_eq!(instance.resolve_variable(child, "limit"), Some(json!(5)));
    // Untouched names still fall through to the instance map.
    assert_eq!(instance.resolve_variable(child, "region"), Some(json!("eu")));
}

#[test]
fn sibling_branches_do_not_see_each_others_locals() {
    let mut instance = instance_with_base();
    let root = instance.root();
    let left = instance.tree_mut().create_child(root).unwrap();
    let right = instance.tree_mut().create_child(root).unwrap();

    instance
        .set_variable_local(left, "attempt", json!(1))
        .unwrap();

    assert_eq!(instance.resolve_variable(left, "attempt"), Some(json!(1)));
    assert_eq!(instance.resolve_variable(right, "attempt"), None);
}

#[test]
fn descendants_inherit_ancestor_locals() {
    let mut instance = instance_with_base();
    let root = instance.root();
    let branch = instance.tree_mut().create_child(root).unwrap();
    let leaf = instance.tree_mut().create_child(branch).unwrap();

    instance
        .set_variable_local(branch, "attempt", json!(2))
        .unwrap();

    assert_eq!(instance.resolve_variable(leaf, "attempt"), Some(json!(2)));
    // Nearest definition wins over an ancestor's.
    instance
        .set_variable_local(leaf, "attempt", json!(3))
        .unwrap();
    assert_eq!(instance.resolve_variable(leaf, "attempt"), Some(json!(3)));
}

#[test]
fn root_token_locals_are_not_part_of_the_chain() {
    let mut instance = instance_with_base();
    let root = instance.root();
    let child = instance.tree_mut().create_child(root).unwrap();

    // The chain walk stops before the root token, so a local written there
    // is invisible; only the instance-level map remains as fallback.
    instance
        .set_variable_local(root, "limit", json!(999))
        .unwrap();

    assert_eq!(instance.resolve_variable(child, "limit"), Some(json!(100)));
    assert_eq!(instance.resolve_variable(root, "limit"), Some(json!(100)));
    assert_eq!(instance.variable_local(root, "limit"), Some(json!(999)));
}

#[test]
fn snapshot_layers_chain_over_instance_variables() {
    let mut instance = instance_with_base();
    let root = instance.root();
    let branch = instance.tree_mut().create_child(root).unwrap();
    let leaf = instance.tree_mut().create_child(branch).unwrap();

    instance
        .set_variable_local(branch, "limit", json!(10))
        .unwrap();
    instance.set_variable_local(leaf, "limit", json!(1)).unwrap();
    instance
        .set_variable_local(branch, "owner", json!("ops"))
        .unwrap();

    let snapshot = instance.variable_snapshot(leaf);
    assert_eq!(snapshot.get("limit"), Some(&json!(1)));
    assert_eq!(snapshot.get("owner"), Some(&json!("ops")));
    assert_eq!(snapshot.get("region"), Some(&json!("eu")));
}

#[test]
fn process_level_writes_outlive_any_token() {
    let mut instance = instance_with_base();
    let root = instance.root();
    let child = instance.tree_mut().create_child(root).unwrap();

    instance.set_process_variable("result", json!("ok"));
    instance.tree_mut().remove(child).unwrap();

    assert_eq!(instance.variables().get("result"), Some(&json!("ok")));
    assert_eq!(instance.resolve_variable(root, "result"), Some(json!("ok")));
}
