//! Snapshot, rehydration, and mutation-log replay.
//!
//! `snapshot` walks the tracked tree into a plain JSON value, routing
//! model-tagged containers through their registered codec. `rehydrate`
//! applies a snapshot back onto a live tree through the normal write path,
//! so rehydration batches and notifies like any other mutation. `replay`
//! does the same for a recorded mutation log.

use crate::batch::BatchGuard;
use crate::error::{StoreError, StoreResult};
use crate::handle::Payload;
use crate::store::Store;
use crate::tree::{Entries, NodeId, Tree};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use trellis_state::{Address, Key, MutationKind, MutationLog, ValueError};

/// Converts a model-tagged container between its in-tree representation
/// and its serialized form.
pub trait ModelCodec: Send + Sync {
    /// Convert the materialized container to its serialized form.
    fn serialize(&self, value: &Value) -> StoreResult<Value>;
    /// Construct the in-tree representation from serialized data.
    fn deserialize(&self, data: &Value) -> StoreResult<Value>;
}

/// A codec that validates both directions through a serde type.
struct SerdeModel<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> ModelCodec for SerdeModel<T>
where
    T: Serialize + DeserializeOwned + 'static,
{
    fn serialize(&self, value: &Value) -> StoreResult<Value> {
        let typed: T = serde_json::from_value(value.clone()).map_err(ValueError::from)?;
        Ok(serde_json::to_value(&typed).map_err(ValueError::from)?)
    }

    fn deserialize(&self, data: &Value) -> StoreResult<Value> {
        let typed: T = serde_json::from_value(data.clone()).map_err(ValueError::from)?;
        Ok(serde_json::to_value(&typed).map_err(ValueError::from)?)
    }
}

/// Build a codec backed by a serde type: both directions round-trip
/// through `T`, failing loudly on shape mismatches.
pub fn serde_model<T>() -> Arc<dyn ModelCodec>
where
    T: Serialize + DeserializeOwned + 'static,
{
    Arc::new(SerdeModel::<T> {
        _marker: PhantomData,
    })
}

/// How a factory constructs the value at its path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FactoryShape {
    /// A single model instance.
    Instance,
    /// An array of model instances.
    List,
    /// An object whose values are model instances.
    Map,
}

/// Per-path constructors consulted during rehydration.
///
/// # Examples
///
/// ```
/// use trellis_store::Factories;
/// use trellis_state::address;
///
/// let factories = Factories::new()
///     .instance(address!("profile"), "Profile")
///     .list(address!("todos"), "Todo");
/// ```
#[derive(Clone, Debug, Default)]
pub struct Factories {
    entries: HashMap<Address, (String, FactoryShape)>,
}

impl Factories {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Construct a single model instance at the path (builder pattern).
    pub fn instance(mut self, address: Address, model: impl Into<String>) -> Self {
        self.entries
            .insert(address, (model.into(), FactoryShape::Instance));
        self
    }

    /// Construct an array of model instances at the path (builder pattern).
    pub fn list(mut self, address: Address, model: impl Into<String>) -> Self {
        self.entries
            .insert(address, (model.into(), FactoryShape::List));
        self
    }

    /// Construct a map of model instances at the path (builder pattern).
    pub fn map(mut self, address: Address, model: impl Into<String>) -> Self {
        self.entries
            .insert(address, (model.into(), FactoryShape::Map));
        self
    }

    fn get(&self, address: &Address) -> Option<&(String, FactoryShape)> {
        self.entries.get(address)
    }
}

impl Store {
    pub(crate) fn snapshot_tree(&self) -> StoreResult<Value> {
        let tree = self.inner.tree.lock().unwrap();
        self.snapshot_node(&tree, tree.root())
    }

    fn snapshot_node(&self, tree: &Tree, id: NodeId) -> StoreResult<Value> {
        let Some(node) = tree.container(id) else {
            return Ok(Value::Null);
        };

        let plain = match &node.entries {
            Entries::Object(map) => {
                let mut out = serde_json::Map::new();
                for (name, slot) in map {
                    let value = match slot {
                        crate::tree::Slot::Leaf(leaf) => leaf.clone(),
                        crate::tree::Slot::Child(child) => self.snapshot_node(tree, *child)?,
                    };
                    out.insert(name.clone(), value);
                }
                Value::Object(out)
            }
            Entries::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for slot in items {
                    let value = match slot {
                        crate::tree::Slot::Leaf(leaf) => leaf.clone(),
                        crate::tree::Slot::Child(child) => self.snapshot_node(tree, *child)?,
                    };
                    out.push(value);
                }
                Value::Array(out)
            }
        };

        match &node.model {
            Some(model) => {
                let codec = self.inner.models.get(model).ok_or_else(|| {
                    StoreError::unregistered_model(model.clone(), node.address.clone())
                })?;
                codec.serialize(&plain)
            }
            None => Ok(plain),
        }
    }

    pub(crate) fn rehydrate_tree(&self, data: Value, factories: &Factories) -> StoreResult<()> {
        let Value::Object(map) = data else {
            return Err(StoreError::operation("rehydrate requires an object"));
        };

        let guard = BatchGuard::enter(self);
        let result = (|| {
            for (name, value) in map {
                self.merge_in(Address::root().field(name), value, factories)?;
            }
            Ok(())
        })();
        drop(guard);
        result
    }

    fn merge_in(&self, address: Address, data: Value, factories: &Factories) -> StoreResult<()> {
        if let Some((model, shape)) = factories.get(&address) {
            let codec = self
                .inner
                .models
                .get(model)
                .ok_or_else(|| StoreError::unregistered_model(model.clone(), address.clone()))?
                .clone();
            return match shape {
                FactoryShape::Instance => {
                    let value = codec.deserialize(&data)?;
                    self.write_set(&address, Payload::model(model.clone(), value), true)
                }
                FactoryShape::List => {
                    let Value::Array(items) = data else {
                        return Err(StoreError::Value(ValueError::type_mismatch(
                            address,
                            "array",
                            trellis_state::value_type_name(&data),
                        )));
                    };
                    self.write_set(&address, Payload::Value(Value::Array(Vec::new())), true)?;
                    for item in items {
                        let value = codec.deserialize(&item)?;
                        let len = self.array_len(&address)?;
                        self.write_splice(
                            &address,
                            len,
                            0,
                            vec![Payload::model(model.clone(), value)],
                            true,
                        )?;
                    }
                    Ok(())
                }
                FactoryShape::Map => {
                    let Value::Object(entries) = data else {
                        return Err(StoreError::Value(ValueError::type_mismatch(
                            address,
                            "object",
                            trellis_state::value_type_name(&data),
                        )));
                    };
                    self.write_set(
                        &address,
                        Payload::Value(Value::Object(serde_json::Map::new())),
                        true,
                    )?;
                    for (name, item) in entries {
                        let value = codec.deserialize(&item)?;
                        self.write_set(
                            &address.child(Key::Field(name)),
                            Payload::model(model.clone(), value),
                            true,
                        )?;
                    }
                    Ok(())
                }
            };
        }

        // Structural merge: descend into objects that already exist as
        // objects; everything else is replaced wholesale.
        let existing_is_object = self
            .peek_value(&address)
            .map(|value| value.is_object())
            .unwrap_or(false);

        if let (Value::Object(entries), true) = (&data, existing_is_object) {
            for (name, value) in entries {
                self.merge_in(
                    address.child(Key::Field(name.clone())),
                    value.clone(),
                    factories,
                )?;
            }
            Ok(())
        } else {
            self.write_set(&address, Payload::Value(data), true)
        }
    }

    pub(crate) fn replay_log(&self, log: &MutationLog) -> StoreResult<()> {
        let guard = BatchGuard::enter(self);
        let result = (|| {
            for mutation in log.iter() {
                match &mutation.kind {
                    MutationKind::Delete => self.write_delete(&mutation.path, true)?,
                    MutationKind::Set | MutationKind::Splice | MutationKind::MethodCall { .. } => {
                        // Splice and method-call events carry whole-container
                        // after-images, so replay is a set at their path.
                        let value = mutation.value.clone().unwrap_or(Value::Null);
                        self.write_set(&mutation.path, Payload::Value(value), true)?;
                    }
                }
            }
            Ok(())
        })();
        drop(guard);
        result
    }
}
