//! Integration tests for snapshot, rehydration, and log replay.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use trellis_state::{address, Mutation, MutationLog};
use trellis_store::{Factories, Payload, Store, StoreError};

#[derive(Debug, Serialize, Deserialize)]
struct Todo {
    title: String,
    done: bool,
}

#[test]
fn snapshot_rehydrate_roundtrip() {
    let store = Store::builder()
        .state(json!({
            "user": {"name": "Alice", "tags": ["admin", "ops"]},
            "count": 3,
            "flag": null,
        }))
        .build();

    let snapshot = store.snapshot().unwrap();

    let restored = Store::builder().state(json!({})).build();
    restored.rehydrate(snapshot.clone()).unwrap();

    assert_eq!(restored.snapshot().unwrap(), snapshot);
    assert_eq!(
        restored.reader().get(&address!("user", "tags", 1)),
        Some(json!("ops"))
    );
}

#[tokio::test]
async fn rehydrate_notifies_like_any_mutation() {
    let store = Store::builder()
        .state(json!({"user": {"name": "Alice"}}))
        .build();

    let hits = Arc::new(AtomicUsize::new(0));
    let seen = hits.clone();
    let sub = store.subscribe(move || {
        seen.fetch_add(1, Ordering::SeqCst);
    });

    store.start_collecting(sub.id());
    let _ = store.reader().get(&address!("user", "name"));
    store.stop_collecting(sub.id()).unwrap();

    store.rehydrate(json!({"user": {"name": "Bob"}})).unwrap();

    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(
        store.reader().get(&address!("user", "name")),
        Some(json!("Bob"))
    );
}

#[tokio::test]
async fn model_tagged_container_requires_codec() {
    let untyped = Store::builder()
        .state(json!({}))
        .action("plant", |ctx, _| async move {
            ctx.state.set(
                &address!("todo"),
                Payload::model("Todo", json!({"title": "write tests", "done": false})),
            )?;
            Ok(Value::Null)
        })
        .build();

    untyped.run("plant", Value::Null).await.unwrap();
    let err = untyped.snapshot().unwrap_err();
    assert!(matches!(
        err,
        StoreError::UnregisteredModel { ref model, .. } if model == "Todo"
    ));

    let typed = Store::builder()
        .state(json!({}))
        .model_of::<Todo>("Todo")
        .action("plant", |ctx, _| async move {
            ctx.state.set(
                &address!("todo"),
                Payload::model("Todo", json!({"title": "write tests", "done": false})),
            )?;
            Ok(Value::Null)
        })
        .build();

    typed.run("plant", Value::Null).await.unwrap();
    assert_eq!(
        typed.snapshot().unwrap(),
        json!({"todo": {"title": "write tests", "done": false}})
    );
}

#[test]
fn factories_reconstruct_model_collections() {
    let store = Store::builder()
        .state(json!({}))
        .model_of::<Todo>("Todo")
        .build();

    let factories = Factories::new().list(address!("todos"), "Todo");
    store
        .rehydrate_with(
            json!({"todos": [
                {"title": "a", "done": false},
                {"title": "b", "done": true},
            ]}),
            &factories,
        )
        .unwrap();

    assert_eq!(
        store.reader().get(&address!("todos", 1, "title")),
        Some(json!("b"))
    );

    // Instances round-trip through the codec on snapshot
    assert_eq!(
        store.snapshot().unwrap(),
        json!({"todos": [
            {"title": "a", "done": false},
            {"title": "b", "done": true},
        ]})
    );
}

#[test]
fn factory_rejects_malformed_instances() {
    let store = Store::builder()
        .state(json!({}))
        .model_of::<Todo>("Todo")
        .build();

    let factories = Factories::new().instance(address!("todo"), "Todo");
    let err = store
        .rehydrate_with(json!({"todo": {"title": 42}}), &factories)
        .unwrap_err();
    assert!(matches!(err, StoreError::Value(_)));
}

#[test]
fn replay_applies_a_recorded_log() {
    let store = Store::builder().state(json!({"count": 0})).build();

    let log = MutationLog::new()
        .with(Mutation::set(address!("count"), Some(json!(0)), json!(5)))
        .with(Mutation::set(address!("user", "name"), None, json!("Alice")))
        .with(Mutation::splice(address!("items"), json!([]), json!([1, 2])))
        .with(Mutation::delete(address!("user", "name"), Some(json!("Alice"))))
        .with_source("recorded");

    store.replay(&log).unwrap();

    assert_eq!(
        store.snapshot().unwrap(),
        json!({"count": 5, "user": {}, "items": [1, 2]})
    );
}

#[tokio::test]
async fn replay_flushes_once_for_the_whole_log() {
    let inspector = Arc::new(trellis_store::RecordingInspector::new());
    let store = Store::builder()
        .state(json!({"a": 0, "b": 0}))
        .inspector(inspector.clone())
        .build();

    let log = MutationLog::new()
        .with(Mutation::set(address!("a"), Some(json!(0)), json!(1)))
        .with(Mutation::set(address!("b"), Some(json!(0)), json!(2)));

    store.replay(&log).unwrap();
    assert_eq!(inspector.flush_count(), 1);
}

#[test]
fn structural_merge_preserves_untouched_siblings() {
    let store = Store::builder()
        .state(json!({"user": {"name": "Alice", "age": 30}, "count": 1}))
        .build();

    store.rehydrate(json!({"user": {"name": "Bob"}})).unwrap();

    // Merge descends into existing objects instead of replacing them
    assert_eq!(
        store.snapshot().unwrap(),
        json!({"user": {"name": "Bob", "age": 30}, "count": 1})
    );
}
