use std::collections::HashMap;

use serde_json::json;

use procflow::error::EngineError;
use procflow::runtime::instance::ProcessInstance;
use procflow::runtime::redis_store::RedisRuntimeStore;
use procflow::runtime::store::RuntimeStore;

// Requires a local Redis: `docker run -p 6379:6379 redis`
// Run with: cargo test --test redis_store_test -- --ignored

fn store() -> RedisRuntimeStore {
    RedisRuntimeStore::connect("redis://127.0.0.1:6379").expect("redis client")
}

#[tokio::test]
#[ignore]
async fn save_and_load_round_trip() {
    let store = store();
    let mut vars = HashMap::new();
    vars.insert("amount".to_string(), json!(250));
    let mut instance = ProcessInstance::new("redis-demo", vars, None);

    store.save(&mut instance).await.expect("save");
    assert_eq!(instance.revision, 1);

    let loaded = store.load(instance.id()).await.expect("load");
    assert_eq!(loaded.id(), instance.id());
    assert_eq!(loaded.revision, 1);
    assert_eq!(loaded.variables().get("amount"), Some(&json!(250)));
    assert_eq!(loaded.root(), instance.root());
}

#[tokio::test]
#[ignore]
async fn stale_revision_is_rejected() {
    let store = store();
    let mut instance = ProcessInstance::new("redis-demo", HashMap::new(), None);
    store.save(&mut instance).await.expect("first save");

    let mut stale = store.load(instance.id()).await.expect("load");
    store.save(&mut instance).await.expect("second save");

    let err = store.save(&mut stale).await.unwrap_err();
    assert!(matches!(err, EngineError::ConcurrencyConflict(_)));
    // The rejected copy keeps its pre-save revision.
    assert_eq!(stale.revision, 1);
}

#[tokio::test]
#[ignore]
async fn removed_tokens_disappear_from_the_index() {
    let store = store();
    let mut instance = ProcessInstance::new("redis-demo", HashMap::new(), None);
    let root = instance.root();
    let child = instance.tree_mut().create_child(root).expect("child");
    store.save(&mut instance).await.expect("save");

    instance.tree_mut().remove(child).expect("remove");
    let removed = instance.tree_mut().take_removed();
    store.save(&mut instance).await.expect("save after removal");
    store
        .remove_tokens(instance.id(), &removed)
        .await
        .expect("index cleanup");

    let loaded = store.load(instance.id()).await.expect("load");
    assert!(loaded.tree().token(child).is_ok());
    assert!(!loaded.tree().token(child).unwrap().is_active);
    assert_eq!(loaded.tree().live_tokens(), vec![root]);
}
