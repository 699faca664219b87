//! Mutation application logic.
//!
//! Pure functions that apply recorded mutations to a plain JSON value tree.
//! The originals are never modified; replaying the same log onto the same
//! document always produces the same result.

use crate::{
    error::{value_type_name, ValueError, ValueResult},
    Address, Key, Mutation, MutationKind, MutationLog,
};
use serde_json::{Map, Value};

/// Apply a single mutation to a document (pure function).
///
/// # Examples
///
/// ```
/// use trellis_state::{address, apply_mutation, Mutation};
/// use serde_json::json;
///
/// let doc = json!({"count": 0});
/// let next = apply_mutation(&doc, &Mutation::set(address!("count"), None, json!(1))).unwrap();
///
/// assert_eq!(next["count"], 1);
/// assert_eq!(doc["count"], 0); // original unchanged
/// ```
pub fn apply_mutation(doc: &Value, mutation: &Mutation) -> ValueResult<Value> {
    let mut result = doc.clone();
    apply_in_place(&mut result, mutation)?;
    Ok(result)
}

/// Apply every mutation in a log in order (pure function).
///
/// If any mutation fails, the error is returned and no document is produced.
pub fn apply_log(doc: &Value, log: &MutationLog) -> ValueResult<Value> {
    let mut result = doc.clone();
    for mutation in log.iter() {
        apply_in_place(&mut result, mutation)?;
    }
    Ok(result)
}

/// Apply a single mutation to a document in place.
pub fn apply_in_place(doc: &mut Value, mutation: &Mutation) -> ValueResult<()> {
    match &mutation.kind {
        MutationKind::Set => {
            let value = mutation.value.clone().unwrap_or(Value::Null);
            apply_set(doc, &mutation.path, value)
        }
        MutationKind::Delete => {
            apply_delete(doc, &mutation.path);
            Ok(())
        }
        // Splice and method-call events carry whole-container after-images,
        // so replay is a wholesale replacement at the container address.
        MutationKind::Splice | MutationKind::MethodCall { .. } => {
            let value = mutation.value.clone().unwrap_or(Value::Null);
            apply_set(doc, &mutation.path, value)
        }
    }
}

/// Set a value at an address, creating intermediate objects as needed.
fn apply_set(doc: &mut Value, address: &Address, value: Value) -> ValueResult<()> {
    if address.is_root() {
        *doc = value;
        return Ok(());
    }

    set_at(doc, address.keys(), value, address)
}

fn set_at(current: &mut Value, keys: &[Key], value: Value, full: &Address) -> ValueResult<()> {
    match keys {
        [] => {
            *current = value;
            Ok(())
        }
        [Key::Field(name), rest @ ..] => {
            // Create intermediate objects on the way down
            if !current.is_object() {
                *current = Value::Object(Map::new());
            }

            let obj = current.as_object_mut().expect("checked object");

            if rest.is_empty() {
                obj.insert(name.clone(), value);
            } else {
                let entry = obj.entry(name.clone()).or_insert(Value::Null);
                set_at(entry, rest, value, full)?;
            }
            Ok(())
        }
        [Key::Index(idx), rest @ ..] => {
            if !current.is_array() {
                return Err(ValueError::type_mismatch(
                    full.clone(),
                    "array",
                    value_type_name(current),
                ));
            }

            let arr = current.as_array_mut().expect("checked array");

            if *idx >= arr.len() {
                return Err(ValueError::index_out_of_bounds(
                    full.clone(),
                    *idx,
                    arr.len(),
                ));
            }

            if rest.is_empty() {
                arr[*idx] = value;
            } else {
                set_at(&mut arr[*idx], rest, value, full)?;
            }
            Ok(())
        }
    }
}

/// Delete the value at an address. No-op if the address does not exist.
fn apply_delete(doc: &mut Value, address: &Address) {
    if address.is_root() {
        *doc = Value::Null;
        return;
    }

    delete_at(doc, address.keys());
}

fn delete_at(current: &mut Value, keys: &[Key]) -> bool {
    match keys {
        [] => false,
        [Key::Field(name)] => current
            .as_object_mut()
            .map(|obj| obj.remove(name).is_some())
            .unwrap_or(false),
        [Key::Index(idx)] => match current.as_array_mut() {
            Some(arr) if *idx < arr.len() => {
                arr.remove(*idx);
                true
            }
            _ => false,
        },
        [Key::Field(name), rest @ ..] => current
            .as_object_mut()
            .and_then(|obj| obj.get_mut(name))
            .map(|child| delete_at(child, rest))
            .unwrap_or(false),
        [Key::Index(idx), rest @ ..] => current
            .as_array_mut()
            .and_then(|arr| arr.get_mut(*idx))
            .map(|child| delete_at(child, rest))
            .unwrap_or(false),
    }
}

/// Get a reference to the value at an address, if it exists.
pub fn get_at<'a>(doc: &'a Value, address: &Address) -> Option<&'a Value> {
    let mut current = doc;
    for key in address {
        match key {
            Key::Field(name) => current = current.get(name)?,
            Key::Index(idx) => current = current.get(idx)?,
        }
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address;
    use serde_json::json;

    #[test]
    fn test_apply_set() {
        let doc = json!({});
        let next = apply_mutation(&doc, &Mutation::set(address!("name"), None, json!("Alice")))
            .unwrap();
        assert_eq!(next["name"], "Alice");
    }

    #[test]
    fn test_apply_set_creates_intermediates() {
        let doc = json!({});
        let next =
            apply_mutation(&doc, &Mutation::set(address!("a", "b", "c"), None, json!(42))).unwrap();
        assert_eq!(next["a"]["b"]["c"], 42);
    }

    #[test]
    fn test_apply_set_array_oob() {
        let doc = json!({"arr": [1, 2, 3]});
        let result = apply_mutation(&doc, &Mutation::set(address!("arr", 10), None, json!(0)));
        assert!(matches!(result, Err(ValueError::IndexOutOfBounds { .. })));
    }

    #[test]
    fn test_apply_delete_noop() {
        let doc = json!({"x": 1});
        let next = apply_mutation(&doc, &Mutation::delete(address!("missing"), None)).unwrap();
        assert_eq!(next, json!({"x": 1}));
    }

    #[test]
    fn test_apply_delete_existing() {
        let doc = json!({"x": 1, "y": 2});
        let next = apply_mutation(&doc, &Mutation::delete(address!("x"), Some(json!(1)))).unwrap();
        assert_eq!(next, json!({"y": 2}));
    }

    #[test]
    fn test_apply_delete_array_index_shifts() {
        let doc = json!({"arr": [1, 2, 3]});
        let next =
            apply_mutation(&doc, &Mutation::delete(address!("arr", 0), Some(json!(1)))).unwrap();
        assert_eq!(next["arr"], json!([2, 3]));
    }

    #[test]
    fn test_apply_splice_replaces_whole_array() {
        let doc = json!({"items": [1, 2]});
        let next = apply_mutation(
            &doc,
            &Mutation::splice(address!("items"), json!([1, 2]), json!([1, 2, 3])),
        )
        .unwrap();
        assert_eq!(next["items"], json!([1, 2, 3]));
    }

    #[test]
    fn test_apply_log_in_order() {
        let doc = json!({"count": 0});
        let log = MutationLog::new()
            .with(Mutation::set(address!("count"), Some(json!(0)), json!(1)))
            .with(Mutation::set(address!("count"), Some(json!(1)), json!(2)));
        let next = apply_log(&doc, &log).unwrap();
        assert_eq!(next["count"], 2);
    }

    #[test]
    fn test_apply_is_pure() {
        let doc = json!({"x": 1});
        let _ = apply_mutation(&doc, &Mutation::set(address!("x"), Some(json!(1)), json!(2)))
            .unwrap();
        assert_eq!(doc["x"], 1);
    }

    #[test]
    fn test_get_at() {
        let doc = json!({"a": {"b": [10, 20]}});
        assert_eq!(get_at(&doc, &address!("a", "b", 1)), Some(&json!(20)));
        assert_eq!(get_at(&doc, &address!("a", "x")), None);
        assert_eq!(get_at(&doc, &Address::root()), Some(&doc));
    }
}
