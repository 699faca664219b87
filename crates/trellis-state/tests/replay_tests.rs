//! Integration tests for mutation log recording and replay.

use serde_json::json;
use trellis_state::{
    address, apply_log, compute_touched, intersects, Address, Mutation, MutationLog,
};

#[test]
fn log_replays_onto_fresh_document() {
    let log = MutationLog::new()
        .with(Mutation::set(address!("user", "name"), None, json!("Alice")))
        .with(Mutation::set(address!("user", "age"), None, json!(30)))
        .with(Mutation::splice(address!("posts"), json!([]), json!(["hello"])))
        .with(Mutation::delete(address!("user", "age"), Some(json!(30))));

    let result = apply_log(&json!({}), &log).unwrap();

    assert_eq!(result, json!({"user": {"name": "Alice"}, "posts": ["hello"]}));
}

#[test]
fn serialized_log_replays_identically() {
    let log = MutationLog::new()
        .with(Mutation::set(address!("a", "b"), None, json!([1, 2])))
        .with(Mutation::method_call(
            address!("a", "b"),
            "reverse",
            json!([1, 2]),
            json!([2, 1]),
        ))
        .with_source("test")
        .with_sequence(1);

    let wire = serde_json::to_string(&log).unwrap();
    let decoded: MutationLog = serde_json::from_str(&wire).unwrap();

    let doc = json!({});
    assert_eq!(
        apply_log(&doc, &log).unwrap(),
        apply_log(&doc, &decoded).unwrap()
    );
}

#[test]
fn touched_paths_drive_intersection() {
    let log = MutationLog::new()
        .with(Mutation::set(address!("user", "name"), None, json!("x")))
        .with(Mutation::splice(address!("posts"), json!([]), json!([1])));

    let touched = compute_touched(&log);

    // A reader of user.name intersects; a reader of user.email does not.
    assert!(intersects(&touched, &address!("user", "name"), false));
    assert!(!intersects(&touched, &address!("user", "email"), false));

    // A nested reader of the whole tree intersects everything.
    assert!(intersects(&touched, &Address::root(), true));
}
