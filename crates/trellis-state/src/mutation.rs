//! Mutation events and mutation logs.
//!
//! A `Mutation` is the record of a single write intercepted at a tracked
//! container: what happened (`kind`), where (`path`), and the before/after
//! values. A `MutationLog` is an ordered list of mutations with optional
//! tracking metadata, suitable for serialization and later replay.

use crate::Address;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The kind of change a mutation describes.
///
/// Serialized under the `"type"` tag next to the path and values, so a
/// mutation on the wire reads as
/// `{"path": ["user","name"], "type": "set", "value": "Alice"}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum MutationKind {
    /// A key or index was assigned a value.
    Set,
    /// A key was removed.
    Delete,
    /// An array was restructured in place (push, insert, remove, splice).
    ///
    /// Covers the whole array address with before/after images rather than
    /// per-index events, so a recorded log replays standalone.
    Splice,
    /// A container was mutated through a named model method.
    MethodCall {
        /// The invoked method name.
        method: String,
    },
}

/// A single recorded mutation.
///
/// Produced synchronously at the point of interception. `previous` is the
/// value at `path` before the write (`None` when the key did not exist);
/// `value` is the value after (`None` for deletions).
///
/// # Examples
///
/// ```
/// use trellis_state::{address, Mutation};
/// use serde_json::json;
///
/// let m = Mutation::set(address!("count"), Some(json!(0)), json!(1));
/// assert_eq!(m.path.to_string(), "$.count");
/// assert_eq!(m.value, Some(json!(1)));
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Mutation {
    /// The address of the mutated key.
    pub path: Address,

    /// What happened at the address.
    #[serde(flatten)]
    pub kind: MutationKind,

    /// The value before the mutation, if the key existed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous: Option<Value>,

    /// The value after the mutation, absent for deletions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl Mutation {
    /// Create a set mutation.
    #[inline]
    pub fn set(path: Address, previous: Option<Value>, value: Value) -> Self {
        Self {
            path,
            kind: MutationKind::Set,
            previous,
            value: Some(value),
        }
    }

    /// Create a delete mutation.
    #[inline]
    pub fn delete(path: Address, previous: Option<Value>) -> Self {
        Self {
            path,
            kind: MutationKind::Delete,
            previous,
            value: None,
        }
    }

    /// Create a splice mutation with whole-array before/after images.
    #[inline]
    pub fn splice(path: Address, previous: Value, value: Value) -> Self {
        Self {
            path,
            kind: MutationKind::Splice,
            previous: Some(previous),
            value: Some(value),
        }
    }

    /// Create a method-call mutation with whole-container before/after images.
    #[inline]
    pub fn method_call(
        path: Address,
        method: impl Into<String>,
        previous: Value,
        value: Value,
    ) -> Self {
        Self {
            path,
            kind: MutationKind::MethodCall {
                method: method.into(),
            },
            previous: Some(previous),
            value: Some(value),
        }
    }

    /// Whether this mutation removes the value at its path.
    #[inline]
    pub fn is_delete(&self) -> bool {
        matches!(self.kind, MutationKind::Delete)
    }
}

/// An ordered list of mutations with optional tracking metadata.
///
/// # Examples
///
/// ```
/// use trellis_state::{address, Mutation, MutationLog};
/// use serde_json::json;
///
/// let log = MutationLog::new()
///     .with(Mutation::set(address!("a"), None, json!(1)))
///     .with(Mutation::set(address!("b"), None, json!(2)))
///     .with_source("rehydrate");
///
/// assert_eq!(log.len(), 2);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MutationLog {
    mutations: Vec<Mutation>,

    /// Source/origin of this log (e.g., operation name, service).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    /// Monotonic sequence number assigned by the producer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
}

impl MutationLog {
    /// Create an empty log.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a log from a vector of mutations.
    #[inline]
    pub fn with_mutations(mutations: Vec<Mutation>) -> Self {
        Self {
            mutations,
            source: None,
            sequence: None,
        }
    }

    /// Add a mutation (builder pattern).
    #[inline]
    pub fn with(mut self, mutation: Mutation) -> Self {
        self.mutations.push(mutation);
        self
    }

    /// Set the source (builder pattern).
    #[inline]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Set the sequence number (builder pattern).
    #[inline]
    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = Some(sequence);
        self
    }

    /// Push a mutation onto the log.
    #[inline]
    pub fn push(&mut self, mutation: Mutation) {
        self.mutations.push(mutation);
    }

    /// Get the recorded mutations.
    #[inline]
    pub fn mutations(&self) -> &[Mutation] {
        &self.mutations
    }

    /// Consume the log and return the mutations.
    #[inline]
    pub fn into_mutations(self) -> Vec<Mutation> {
        self.mutations
    }

    /// Number of mutations in the log.
    #[inline]
    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    /// Check if the log is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    /// Clear all mutations.
    #[inline]
    pub fn clear(&mut self) {
        self.mutations.clear();
    }

    /// Iterate over the mutations.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &Mutation> {
        self.mutations.iter()
    }
}

impl FromIterator<Mutation> for MutationLog {
    fn from_iter<I: IntoIterator<Item = Mutation>>(iter: I) -> Self {
        Self::with_mutations(iter.into_iter().collect())
    }
}

impl IntoIterator for MutationLog {
    type Item = Mutation;
    type IntoIter = std::vec::IntoIter<Mutation>;

    fn into_iter(self) -> Self::IntoIter {
        self.mutations.into_iter()
    }
}

impl<'a> IntoIterator for &'a MutationLog {
    type Item = &'a Mutation;
    type IntoIter = std::slice::Iter<'a, Mutation>;

    fn into_iter(self) -> Self::IntoIter {
        self.mutations.iter()
    }
}

impl Extend<Mutation> for MutationLog {
    fn extend<I: IntoIterator<Item = Mutation>>(&mut self, iter: I) {
        self.mutations.extend(iter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address;
    use serde_json::json;

    #[test]
    fn test_set_serde_shape() {
        let m = Mutation::set(address!("user", "name"), None, json!("Alice"));
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["path"], json!(["user", "name"]));
        assert_eq!(json["type"], "set");
        assert_eq!(json["value"], "Alice");
        assert!(json.get("previous").is_none());
    }

    #[test]
    fn test_method_call_serde_shape() {
        let m = Mutation::method_call(
            address!("todos", 0),
            "complete",
            json!({"done": false}),
            json!({"done": true}),
        );
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["type"], "method-call");
        assert_eq!(json["method"], "complete");
    }

    #[test]
    fn test_mutation_roundtrip() {
        let m = Mutation::splice(address!("items"), json!([1]), json!([1, 2]));
        let text = serde_json::to_string(&m).unwrap();
        let parsed: Mutation = serde_json::from_str(&text).unwrap();
        assert_eq!(m, parsed);
    }

    #[test]
    fn test_log_builder() {
        let log = MutationLog::new()
            .with(Mutation::set(address!("a"), None, json!(1)))
            .with(Mutation::delete(address!("b"), Some(json!(2))))
            .with_source("test")
            .with_sequence(7);

        assert_eq!(log.len(), 2);
        assert_eq!(log.source.as_deref(), Some("test"));
        assert_eq!(log.sequence, Some(7));
    }

    #[test]
    fn test_log_roundtrip() {
        let log = MutationLog::new()
            .with(Mutation::set(address!("x"), Some(json!(0)), json!(1)))
            .with_source("op:increment");

        let text = serde_json::to_string(&log).unwrap();
        let parsed: MutationLog = serde_json::from_str(&text).unwrap();
        assert_eq!(log, parsed);
    }

    #[test]
    fn test_is_delete() {
        assert!(Mutation::delete(address!("a"), None).is_delete());
        assert!(!Mutation::set(address!("a"), None, json!(1)).is_delete());
    }
}
