//! State accessors: the explicit interception surface.
//!
//! Every read and write against the tracked tree goes through a
//! `StateHandle` (or its read-only sibling `StateReader`) addressed by
//! path. Reads are attributed to whichever observer is currently
//! collecting; writes are validated against the open batch, recorded as
//! mutation events, and applied to the tree immediately, so later reads in
//! the same synchronous segment observe them.

use crate::error::{StoreError, StoreResult};
use crate::store::Store;
use crate::tree::{Entries, NodeId, Slot};
use serde_json::Value;
use trellis_state::{
    value_type_name, Address, Key, Mutation, ValueError,
};

/// An identity handle on a tracked container.
///
/// Obtained from [`StateHandle::node`] or [`StateHandle::detach`]. Passing
/// a `TrackedRef` as a write payload re-inserts that same container; a ref
/// still attached elsewhere is rejected with
/// [`StoreError::AddressConflict`].
#[derive(Clone, Copy, Debug)]
pub struct TrackedRef {
    pub(crate) id: NodeId,
}

/// A value to write at an address.
pub enum Payload {
    /// A plain value; containers are wrapped recursively into fresh
    /// tracked nodes.
    Value(Value),
    /// An existing tracked container, re-attached by identity.
    Ref(TrackedRef),
    /// A container value tagged with a model name for the
    /// serialization codec.
    Model {
        /// The registered model name.
        name: String,
        /// The container value.
        value: Value,
    },
}

impl Payload {
    /// Create a model-tagged container payload.
    pub fn model(name: impl Into<String>, value: Value) -> Self {
        Payload::Model {
            name: name.into(),
            value,
        }
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Payload::Value(value)
    }
}

impl From<TrackedRef> for Payload {
    fn from(tracked: TrackedRef) -> Self {
        Payload::Ref(tracked)
    }
}

/// Read/write access to the tracked tree, relative to a base address.
///
/// Writes require an open batch scope; outside one they fail with
/// [`StoreError::MutationOutsideAction`]. Operations receive a root handle
/// through their context.
///
/// # Examples
///
/// ```
/// use trellis_store::Store;
/// use trellis_state::address;
/// use serde_json::{json, Value};
///
/// let store = Store::builder()
///     .state(json!({"count": 0}))
///     .action("increment", |ctx, _payload| async move {
///         let count = ctx.state.get(&address!("count")).unwrap_or(Value::Null);
///         let next = count.as_i64().unwrap_or(0) + 1;
///         ctx.state.set(&address!("count"), json!(next))?;
///         Ok(Value::Null)
///     })
///     .build();
///
/// futures::executor::block_on(store.run("increment", Value::Null)).unwrap();
/// assert_eq!(store.reader().get(&address!("count")), Some(json!(1)));
/// ```
#[derive(Clone)]
pub struct StateHandle {
    store: Store,
    base: Address,
}

impl StateHandle {
    pub(crate) fn new(store: Store, base: Address) -> Self {
        Self { store, base }
    }

    /// A handle rooted at a sub-address.
    pub fn at(&self, address: &Address) -> StateHandle {
        StateHandle {
            store: self.store.clone(),
            base: self.base.join(address),
        }
    }

    /// The handle's base address.
    pub fn base(&self) -> &Address {
        &self.base
    }

    fn full(&self, address: &Address) -> Address {
        self.base.join(address)
    }

    /// Read the value at an address. Containers are materialized to plain
    /// values, which counts as a nested read of the whole subtree.
    pub fn get(&self, address: &Address) -> Option<Value> {
        self.store.read_value(&self.full(address))
    }

    /// List the field names of the object at an address. Listing counts as
    /// a nested read. Returns an empty list for arrays and non-containers.
    pub fn keys(&self, address: &Address) -> Vec<String> {
        self.store.read_keys(&self.full(address))
    }

    /// Number of entries in the container at an address.
    pub fn len(&self, address: &Address) -> Option<usize> {
        self.store.read_len(&self.full(address))
    }

    /// Whether a value (or child container) exists at an address.
    pub fn contains(&self, address: &Address) -> bool {
        self.store.read_contains(&self.full(address))
    }

    /// Identity handle on the container at an address, without reading it.
    pub fn node(&self, address: &Address) -> Option<TrackedRef> {
        self.store.node_ref(&self.full(address))
    }

    /// Set a value, a model-tagged value, or re-attach a tracked container
    /// at an address. Intermediate objects are created as needed.
    pub fn set(&self, address: &Address, payload: impl Into<Payload>) -> StoreResult<()> {
        self.store.write_set(&self.full(address), payload.into(), false)
    }

    /// Delete the key at an address. No-op if the key does not exist.
    pub fn delete(&self, address: &Address) -> StoreResult<()> {
        self.store.write_delete(&self.full(address), false)
    }

    /// Append to the array at an address.
    pub fn push(&self, address: &Address, payload: impl Into<Payload>) -> StoreResult<()> {
        let full = self.full(address);
        let len = self.store.array_len(&full)?;
        self.store
            .write_splice(&full, len, 0, vec![payload.into()], false)
    }

    /// Insert into the array at an address.
    pub fn insert(
        &self,
        address: &Address,
        index: usize,
        payload: impl Into<Payload>,
    ) -> StoreResult<()> {
        self.store
            .write_splice(&self.full(address), index, 0, vec![payload.into()], false)
    }

    /// Remove one element from the array at an address.
    pub fn remove(&self, address: &Address, index: usize) -> StoreResult<()> {
        self.store
            .write_splice(&self.full(address), index, 1, Vec::new(), false)
    }

    /// Splice the array at an address: delete `delete_count` elements at
    /// `start` and insert `items` in their place. Recorded as a single
    /// splice event covering the whole array.
    pub fn splice(
        &self,
        address: &Address,
        start: usize,
        delete_count: usize,
        items: Vec<Payload>,
    ) -> StoreResult<()> {
        self.store
            .write_splice(&self.full(address), start, delete_count, items, false)
    }

    /// Empty the array at an address.
    pub fn clear(&self, address: &Address) -> StoreResult<()> {
        let full = self.full(address);
        let len = self.store.array_len(&full)?;
        self.store.write_splice(&full, 0, len, Vec::new(), false)
    }

    /// Remove the container at an address from the tree, returning an
    /// identity handle for re-attachment elsewhere.
    pub fn detach(&self, address: &Address) -> StoreResult<TrackedRef> {
        self.store.write_detach(&self.full(address), false)
    }

    /// Mutate the container at an address through a named method. The
    /// closure receives the materialized value; the result is written back
    /// and recorded as one method-call event.
    pub fn invoke<R>(
        &self,
        address: &Address,
        method: &str,
        f: impl FnOnce(&mut Value) -> R,
    ) -> StoreResult<R> {
        self.store.write_invoke(&self.full(address), method, f, false)
    }
}

/// Read-only access to the tracked tree, relative to a base address.
///
/// Derived projections receive two readers: one rooted at the derived
/// field's parent and one at the tree root.
#[derive(Clone)]
pub struct StateReader {
    store: Store,
    base: Address,
}

impl StateReader {
    pub(crate) fn new(store: Store, base: Address) -> Self {
        Self { store, base }
    }

    /// A reader rooted at a sub-address.
    pub fn at(&self, address: &Address) -> StateReader {
        StateReader {
            store: self.store.clone(),
            base: self.base.join(address),
        }
    }

    /// Read the value at an address.
    pub fn get(&self, address: &Address) -> Option<Value> {
        self.store.read_value(&self.base.join(address))
    }

    /// List the field names of the object at an address.
    pub fn keys(&self, address: &Address) -> Vec<String> {
        self.store.read_keys(&self.base.join(address))
    }

    /// Number of entries in the container at an address.
    pub fn len(&self, address: &Address) -> Option<usize> {
        self.store.read_len(&self.base.join(address))
    }

    /// Whether a value exists at an address.
    pub fn contains(&self, address: &Address) -> bool {
        self.store.read_contains(&self.base.join(address))
    }
}

impl Store {
    /// Read the value at an address, attributing the read to the active
    /// collector.
    pub(crate) fn read_value(&self, address: &Address) -> Option<Value> {
        if let Some(result) = self.read_derived(address) {
            return result;
        }

        let active = self.inner.observe.lock().unwrap().active();

        let (value, nested, record) = {
            let mut tree = self.inner.tree.lock().unwrap();
            if address.is_root() {
                let root = tree.root();
                if let Some(observer) = active {
                    tree.register_nested(root, observer);
                }
                (Some(tree.materialize(root)), true, true)
            } else {
                let Some(parent_addr) = address.parent() else {
                    return None;
                };
                let Some(key) = address.last().cloned() else {
                    return None;
                };
                match tree.resolve(&parent_addr) {
                    None => (None, false, false),
                    Some(parent) => {
                        if let Some(observer) = active {
                            tree.register_reader(parent, &key, observer);
                        }
                        let slot = tree.container(parent).and_then(|c| c.get(&key)).cloned();
                        match slot {
                            None => (None, false, true),
                            Some(Slot::Leaf(value)) => (Some(value), false, true),
                            Some(Slot::Child(child)) => {
                                if let Some(observer) = active {
                                    tree.register_nested(child, observer);
                                }
                                (Some(tree.materialize(child)), true, true)
                            }
                        }
                    }
                }
            }
        };

        if record && active.is_some() {
            self.inner
                .observe
                .lock()
                .unwrap()
                .record(address.clone(), nested);
        }
        value
    }

    /// Read the value at an address without attributing the read. Used by
    /// internal machinery (machine dispatch, snapshots of `current`).
    pub(crate) fn peek_value(&self, address: &Address) -> Option<Value> {
        let tree = self.inner.tree.lock().unwrap();
        if address.is_root() {
            return Some(tree.materialize(tree.root()));
        }
        let parent = tree.resolve(&address.parent()?)?;
        let key = address.last()?;
        let slot = tree.container(parent)?.get(key)?;
        Some(tree.materialize_slot(slot))
    }

    pub(crate) fn read_keys(&self, address: &Address) -> Vec<String> {
        let active = self.inner.observe.lock().unwrap().active();
        let keys = {
            let mut tree = self.inner.tree.lock().unwrap();
            let Some(id) = tree.resolve(address) else {
                return Vec::new();
            };
            if let Some(observer) = active {
                tree.register_nested(id, observer);
            }
            match tree.container(id).map(|node| &node.entries) {
                Some(Entries::Object(map)) => map.keys().cloned().collect(),
                _ => Vec::new(),
            }
        };
        if active.is_some() {
            // Key listing reacts to any structural change underneath
            self.inner.observe.lock().unwrap().record(address.clone(), true);
        }
        keys
    }

    pub(crate) fn read_len(&self, address: &Address) -> Option<usize> {
        let active = self.inner.observe.lock().unwrap().active();
        let len = {
            let mut tree = self.inner.tree.lock().unwrap();
            let id = tree.resolve(address)?;
            if let Some(observer) = active {
                tree.register_nested(id, observer);
            }
            tree.container(id).map(|node| node.len())
        };
        if active.is_some() {
            self.inner.observe.lock().unwrap().record(address.clone(), true);
        }
        len
    }

    pub(crate) fn read_contains(&self, address: &Address) -> bool {
        if address.is_root() {
            return true;
        }
        let active = self.inner.observe.lock().unwrap().active();
        let found = {
            let mut tree = self.inner.tree.lock().unwrap();
            let Some(parent_addr) = address.parent() else {
                return false;
            };
            let Some(key) = address.last().cloned() else {
                return false;
            };
            match tree.resolve(&parent_addr) {
                None => return false,
                Some(parent) => {
                    if let Some(observer) = active {
                        tree.register_reader(parent, &key, observer);
                    }
                    tree.container(parent)
                        .map(|node| node.get(&key).is_some())
                        .unwrap_or(false)
                }
            }
        };
        if active.is_some() {
            self.inner
                .observe
                .lock()
                .unwrap()
                .record(address.clone(), false);
        }
        found
    }

    /// Identity lookup; does not count as a read.
    pub(crate) fn node_ref(&self, address: &Address) -> Option<TrackedRef> {
        let tree = self.inner.tree.lock().unwrap();
        tree.resolve(address).map(|id| TrackedRef { id })
    }

    pub(crate) fn array_len(&self, address: &Address) -> StoreResult<usize> {
        let tree = self.inner.tree.lock().unwrap();
        let id = tree
            .resolve(address)
            .ok_or_else(|| StoreError::path_not_found(address.clone()))?;
        let node = tree
            .container(id)
            .ok_or_else(|| StoreError::path_not_found(address.clone()))?;
        if !node.is_array() {
            return Err(StoreError::Value(ValueError::type_mismatch(
                address.clone(),
                "array",
                node.type_name(),
            )));
        }
        Ok(node.len())
    }

    pub(crate) fn write_set(
        &self,
        address: &Address,
        payload: Payload,
        sanctioned: bool,
    ) -> StoreResult<()> {
        self.check_write(address, sanctioned)?;
        if address.is_root() {
            return Err(StoreError::operation("cannot replace the root container"));
        }
        let Some(key) = address.last().cloned() else {
            return Err(StoreError::path_not_found(address.clone()));
        };

        let mutation = {
            let mut tree = self.inner.tree.lock().unwrap();
            let parent = tree.ensure_parent(address)?;

            // Validate the target slot up front so a failing write cannot
            // leave a payload half-attached.
            {
                let node = tree
                    .container(parent)
                    .ok_or_else(|| StoreError::path_not_found(address.clone()))?;
                match (&node.entries, &key) {
                    (Entries::Object(_), Key::Field(_)) => {}
                    (Entries::Array(items), Key::Index(idx)) if *idx <= items.len() => {}
                    (Entries::Array(items), Key::Index(idx)) => {
                        return Err(StoreError::Value(ValueError::index_out_of_bounds(
                            address.clone(),
                            *idx,
                            items.len(),
                        )));
                    }
                    _ => {
                        return Err(StoreError::Value(ValueError::type_mismatch(
                            address.clone(),
                            "container",
                            node.type_name(),
                        )));
                    }
                }
            }

            let previous = tree
                .container(parent)
                .and_then(|node| node.get(&key))
                .map(|slot| tree.materialize_slot(slot));

            let (slot, new_value) = match payload {
                Payload::Value(value) => (tree.wrap(value.clone(), address.clone()), value),
                Payload::Model { name, value } => {
                    if !value.is_object() && !value.is_array() {
                        return Err(StoreError::Value(ValueError::type_mismatch(
                            address.clone(),
                            "container",
                            value_type_name(&value),
                        )));
                    }
                    let id = tree.wrap_container(value.clone(), address.clone());
                    if let Some(node) = tree.container_mut(id) {
                        node.model = Some(name);
                    }
                    (Slot::Child(id), value)
                }
                Payload::Ref(tracked) => {
                    let Some(node) = tree.container(tracked.id) else {
                        return Err(StoreError::path_not_found(address.clone()));
                    };
                    if node.attached {
                        return Err(StoreError::address_conflict(
                            address.clone(),
                            node.address.clone(),
                        ));
                    }
                    tree.attach_subtree(tracked.id, address.clone());
                    (Slot::Child(tracked.id), tree.materialize(tracked.id))
                }
            };

            let replaced = tree.set_slot(parent, key, slot)?;
            if let Some(Slot::Child(old)) = replaced {
                tree.detach_subtree(old);
            }
            Mutation::set(address.clone(), previous, new_value)
        };

        self.record_mutation(mutation);
        Ok(())
    }

    pub(crate) fn write_delete(&self, address: &Address, sanctioned: bool) -> StoreResult<()> {
        self.check_write(address, sanctioned)?;
        if address.is_root() {
            return Err(StoreError::operation("cannot delete the root container"));
        }
        let mutation = {
            let mut tree = self.inner.tree.lock().unwrap();
            let Some(parent_addr) = address.parent() else {
                return Ok(());
            };
            let Some(key) = address.last().cloned() else {
                return Ok(());
            };
            let Some(parent) = tree.resolve(&parent_addr) else {
                return Ok(()); // deleting a missing path is a no-op
            };
            let Some(removed) = tree.remove_slot(parent, &key) else {
                return Ok(());
            };
            let previous = tree.materialize_slot(&removed);
            if let Slot::Child(child) = removed {
                tree.detach_subtree(child);
            }
            Mutation::delete(address.clone(), Some(previous))
        };
        self.record_mutation(mutation);
        Ok(())
    }

    pub(crate) fn write_splice(
        &self,
        address: &Address,
        start: usize,
        delete_count: usize,
        items: Vec<Payload>,
        sanctioned: bool,
    ) -> StoreResult<()> {
        self.check_write(address, sanctioned)?;
        let mutation = {
            let mut tree = self.inner.tree.lock().unwrap();
            let Some(id) = tree.resolve(address) else {
                return Err(StoreError::path_not_found(address.clone()));
            };
            {
                let node = tree
                    .container(id)
                    .ok_or_else(|| StoreError::path_not_found(address.clone()))?;
                if !node.is_array() {
                    return Err(StoreError::Value(ValueError::type_mismatch(
                        address.clone(),
                        "array",
                        node.type_name(),
                    )));
                }
            }

            // Conflict-check identity payloads before mutating anything
            for item in &items {
                if let Payload::Ref(tracked) = item {
                    if let Some(node) = tree.container(tracked.id) {
                        if node.attached {
                            return Err(StoreError::address_conflict(
                                address.clone(),
                                node.address.clone(),
                            ));
                        }
                    }
                }
            }

            let previous = tree.materialize(id);

            let mut slots = Vec::with_capacity(items.len());
            for (offset, item) in items.into_iter().enumerate() {
                let slot_addr = address.child(Key::Index(start + offset));
                let slot = match item {
                    Payload::Value(value) => tree.wrap(value, slot_addr),
                    Payload::Model { name, value } => {
                        if !value.is_object() && !value.is_array() {
                            return Err(StoreError::Value(ValueError::type_mismatch(
                                slot_addr,
                                "container",
                                value_type_name(&value),
                            )));
                        }
                        let child = tree.wrap_container(value, slot_addr);
                        if let Some(node) = tree.container_mut(child) {
                            node.model = Some(name);
                        }
                        Slot::Child(child)
                    }
                    Payload::Ref(tracked) => {
                        tree.attach_subtree(tracked.id, slot_addr);
                        Slot::Child(tracked.id)
                    }
                };
                slots.push(slot);
            }

            let removed = tree.splice_array(id, start, delete_count, slots)?;
            for slot in removed {
                if let Slot::Child(child) = slot {
                    tree.detach_subtree(child);
                }
            }

            Mutation::splice(address.clone(), previous, tree.materialize(id))
        };
        self.record_mutation(mutation);
        Ok(())
    }

    pub(crate) fn write_invoke<R>(
        &self,
        address: &Address,
        method: &str,
        f: impl FnOnce(&mut Value) -> R,
        sanctioned: bool,
    ) -> StoreResult<R> {
        self.check_write(address, sanctioned)?;
        let (id, previous) = {
            let tree = self.inner.tree.lock().unwrap();
            let Some(id) = tree.resolve(address) else {
                return Err(StoreError::path_not_found(address.clone()));
            };
            (id, tree.materialize(id))
        };

        let mut value = previous.clone();
        let result = f(&mut value);

        {
            let mut tree = self.inner.tree.lock().unwrap();
            tree.replace_entries(id, value.clone(), address);
        }
        self.record_mutation(Mutation::method_call(
            address.clone(),
            method,
            previous,
            value,
        ));
        Ok(result)
    }

    pub(crate) fn write_detach(
        &self,
        address: &Address,
        sanctioned: bool,
    ) -> StoreResult<TrackedRef> {
        self.check_write(address, sanctioned)?;
        let mutation_and_ref = {
            let mut tree = self.inner.tree.lock().unwrap();
            let Some(id) = tree.resolve(address) else {
                return Err(StoreError::path_not_found(address.clone()));
            };
            let Some(parent_addr) = address.parent() else {
                return Err(StoreError::operation("cannot detach the root container"));
            };
            let Some(key) = address.last().cloned() else {
                return Err(StoreError::path_not_found(address.clone()));
            };
            let Some(parent) = tree.resolve(&parent_addr) else {
                return Err(StoreError::path_not_found(address.clone()));
            };
            let Some(removed) = tree.remove_slot(parent, &key) else {
                return Err(StoreError::path_not_found(address.clone()));
            };
            let previous = tree.materialize_slot(&removed);
            tree.detach_subtree(id);
            (
                Mutation::delete(address.clone(), Some(previous)),
                TrackedRef { id },
            )
        };
        let (mutation, tracked) = mutation_and_ref;
        self.record_mutation(mutation);
        Ok(tracked)
    }
}
