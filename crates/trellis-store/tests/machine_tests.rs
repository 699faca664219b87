//! Integration tests for transition-guard state machines.

use serde_json::{json, Value};
use trellis_state::address;
use trellis_store::{MachineDef, StateDef, Store, StoreError, Transition};

fn auth_machine() -> MachineDef {
    MachineDef::new("UNAUTHENTICATED")
        .base_field("attempts", json!(0))
        .state(
            "UNAUTHENTICATED",
            StateDef::new()
                .field("error", json!(null))
                .on("LOGIN", |_scope, payload| {
                    Some(Transition::to("AUTHENTICATING").field("username", payload))
                }),
        )
        .state(
            "AUTHENTICATING",
            StateDef::new()
                .field("username", json!(null))
                .on("SUCCESS", |_scope, token| {
                    Some(Transition::to("AUTHENTICATED").field("token", token))
                })
                .on("FAILURE", |scope, reason| {
                    let attempts = scope
                        .get(&address!("attempts"))
                        .and_then(|v| v.as_i64())
                        .unwrap_or(0);
                    scope
                        .set(&address!("attempts"), json!(attempts + 1))
                        .expect("scope write");
                    Some(Transition::to("UNAUTHENTICATED").field("error", reason))
                }),
        )
        .state("AUTHENTICATED", StateDef::new().field("token", json!(null)))
}

fn auth_store(strict: bool) -> Store {
    Store::builder()
        .state(json!({}))
        .machine(address!("auth"), auth_machine())
        .strict(strict)
        .action("poke", |ctx, _| async move {
            ctx.state.set(&address!("auth", "token"), json!("forged"))?;
            Ok(Value::Null)
        })
        .build()
}

#[test]
fn transition_swaps_state_shape_atomically() {
    let store = auth_store(false);

    store.send(&address!("auth"), "LOGIN", json!("alice")).unwrap();

    let auth = store.reader().get(&address!("auth")).unwrap();
    assert_eq!(
        auth,
        json!({"current": "AUTHENTICATING", "attempts": 0, "username": "alice"})
    );

    store.send(&address!("auth"), "SUCCESS", json!("tok-1")).unwrap();

    // The old state's fields are gone, the new state's are present
    let auth = store.reader().get(&address!("auth")).unwrap();
    assert_eq!(
        auth,
        json!({"current": "AUTHENTICATED", "attempts": 0, "token": "tok-1"})
    );
}

#[test]
fn undeclared_event_is_silently_ignored() {
    let store = auth_store(false);

    // SUCCESS has no handler in UNAUTHENTICATED
    store.send(&address!("auth"), "SUCCESS", json!("tok")).unwrap();

    assert_eq!(
        store.reader().get(&address!("auth", "current")),
        Some(json!("UNAUTHENTICATED"))
    );
}

#[test]
fn terminal_state_ignores_everything() {
    let store = auth_store(false);
    store.send(&address!("auth"), "LOGIN", json!("alice")).unwrap();
    store.send(&address!("auth"), "SUCCESS", json!("tok")).unwrap();

    // AUTHENTICATED declares no transitions
    store.send(&address!("auth"), "LOGIN", json!("mallory")).unwrap();
    assert_eq!(
        store.reader().get(&address!("auth", "current")),
        Some(json!("AUTHENTICATED"))
    );
}

#[test]
fn handler_mutations_are_direct_and_batched() {
    let store = auth_store(false);
    store.send(&address!("auth"), "LOGIN", json!("alice")).unwrap();
    store
        .send(&address!("auth"), "FAILURE", json!("bad password"))
        .unwrap();

    let auth = store.reader().get(&address!("auth")).unwrap();
    assert_eq!(
        auth,
        json!({"current": "UNAUTHENTICATED", "attempts": 1, "error": "bad password"})
    );
}

#[test]
fn send_to_unregistered_address_fails() {
    let store = auth_store(false);
    let err = store
        .send(&address!("elsewhere"), "LOGIN", Value::Null)
        .unwrap_err();
    assert!(matches!(err, StoreError::UnknownMachine { .. }));
}

#[tokio::test]
async fn strict_mode_only_permits_transition_writes() {
    let store = auth_store(true);

    // Direct operation writes are rejected
    let err = store.run("poke", Value::Null).await.unwrap_err();
    assert!(matches!(err, StoreError::MutationOutsideAction { .. }));

    // Transitions still mutate freely
    store.send(&address!("auth"), "LOGIN", json!("alice")).unwrap();
    assert_eq!(
        store.reader().get(&address!("auth", "current")),
        Some(json!("AUTHENTICATING"))
    );
}

#[tokio::test]
async fn send_notifies_observers_like_any_mutation() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    let store = auth_store(false);
    let hits = Arc::new(AtomicUsize::new(0));
    let seen = hits.clone();
    let sub = store.subscribe(move || {
        seen.fetch_add(1, Ordering::SeqCst);
    });

    store.start_collecting(sub.id());
    let _ = store.reader().get(&address!("auth", "current"));
    store.stop_collecting(sub.id()).unwrap();

    store.send(&address!("auth"), "LOGIN", json!("alice")).unwrap();

    // One flush for the whole transition, despite several field writes
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}
