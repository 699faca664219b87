//! The tracked container tree.
//!
//! Containers (objects and arrays) live in an arena keyed by `NodeId`;
//! primitive values stay inline in their parent's slot and are never
//! tracked themselves. Each container carries its current address, a read
//! registry of observers depending on its keys, and a generation counter
//! bumped on structural change.
//!
//! Node identity is what makes the single-address invariant enforceable: a
//! node detached from the tree keeps its id and can be re-attached
//! elsewhere, but attaching a node that is still live at another address is
//! rejected by the store layer.

use crate::error::{StoreError, StoreResult};
use crate::observe::ObserverId;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use trellis_state::{Address, Key};

/// Identity of a tracked container in the arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct NodeId(u64);

/// One entry of a container: an untracked primitive or a child container.
#[derive(Clone, Debug)]
pub(crate) enum Slot {
    Leaf(Value),
    Child(NodeId),
}

#[derive(Debug)]
pub(crate) enum Entries {
    Object(BTreeMap<String, Slot>),
    Array(Vec<Slot>),
}

#[derive(Debug)]
pub(crate) struct Container {
    pub entries: Entries,
    pub address: Address,
    pub generation: u64,
    pub attached: bool,
    pub model: Option<String>,
    /// Observers depending on individual keys of this container. Keyed
    /// independently of `entries`, so a dependency on a currently-missing
    /// key is representable.
    pub readers: HashMap<Key, BTreeSet<ObserverId>>,
    /// Observers that materialized or iterated this whole subtree.
    pub nested_readers: BTreeSet<ObserverId>,
}

impl Container {
    fn new(entries: Entries, address: Address) -> Self {
        Self {
            entries,
            address,
            generation: 0,
            attached: true,
            model: None,
            readers: HashMap::new(),
            nested_readers: BTreeSet::new(),
        }
    }

    pub fn get(&self, key: &Key) -> Option<&Slot> {
        match (&self.entries, key) {
            (Entries::Object(map), Key::Field(name)) => map.get(name),
            (Entries::Array(items), Key::Index(idx)) => items.get(*idx),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        match &self.entries {
            Entries::Object(map) => map.len(),
            Entries::Array(items) => items.len(),
        }
    }

    pub fn is_array(&self) -> bool {
        matches!(self.entries, Entries::Array(_))
    }

    pub fn type_name(&self) -> &'static str {
        match self.entries {
            Entries::Object(_) => "object",
            Entries::Array(_) => "array",
        }
    }
}

pub(crate) struct Tree {
    nodes: HashMap<NodeId, Container>,
    root: NodeId,
    next_id: u64,
}

impl Tree {
    /// Build a tree from an initial plain value. A non-container value is
    /// replaced with an empty object root.
    pub fn new(initial: Value) -> Self {
        let mut tree = Tree {
            nodes: HashMap::new(),
            root: NodeId(0),
            next_id: 0,
        };
        let value = match initial {
            v @ (Value::Object(_) | Value::Array(_)) => v,
            other => {
                tracing::warn!(found = %other, "initial state must be a container, using empty object");
                Value::Object(Map::new())
            }
        };
        tree.root = tree.wrap_container(value, Address::root());
        tree
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn container(&self, id: NodeId) -> Option<&Container> {
        self.nodes.get(&id)
    }

    pub fn container_mut(&mut self, id: NodeId) -> Option<&mut Container> {
        self.nodes.get_mut(&id)
    }

    /// Wrap a plain value into a slot, allocating nodes for containers.
    pub fn wrap(&mut self, value: Value, address: Address) -> Slot {
        match value {
            v @ (Value::Object(_) | Value::Array(_)) => {
                Slot::Child(self.wrap_container(v, address))
            }
            leaf => Slot::Leaf(leaf),
        }
    }

    /// Wrap a container value, recursively allocating child nodes.
    pub fn wrap_container(&mut self, value: Value, address: Address) -> NodeId {
        let entries = match value {
            Value::Object(map) => {
                let mut entries = BTreeMap::new();
                for (name, child) in map {
                    let child_addr = address.child(Key::Field(name.clone()));
                    let slot = self.wrap(child, child_addr);
                    entries.insert(name, slot);
                }
                Entries::Object(entries)
            }
            Value::Array(items) => {
                let mut slots = Vec::with_capacity(items.len());
                for (idx, child) in items.into_iter().enumerate() {
                    let child_addr = address.child(Key::Index(idx));
                    slots.push(self.wrap(child, child_addr));
                }
                Entries::Array(slots)
            }
            _ => Entries::Object(BTreeMap::new()),
        };

        let id = NodeId(self.next_id);
        self.next_id += 1;
        self.nodes.insert(id, Container::new(entries, address));
        id
    }

    /// Convert a subtree back into a plain value.
    pub fn materialize(&self, id: NodeId) -> Value {
        match self.nodes.get(&id).map(|node| &node.entries) {
            Some(Entries::Object(map)) => Value::Object(
                map.iter()
                    .map(|(name, slot)| (name.clone(), self.materialize_slot(slot)))
                    .collect(),
            ),
            Some(Entries::Array(items)) => {
                Value::Array(items.iter().map(|slot| self.materialize_slot(slot)).collect())
            }
            None => Value::Null,
        }
    }

    pub fn materialize_slot(&self, slot: &Slot) -> Value {
        match slot {
            Slot::Leaf(value) => value.clone(),
            Slot::Child(id) => self.materialize(*id),
        }
    }

    /// Walk an address from the root to the container it names.
    pub fn resolve(&self, address: &Address) -> Option<NodeId> {
        let mut id = self.root;
        for key in address {
            let node = self.nodes.get(&id)?;
            match node.get(key)? {
                Slot::Child(child) => id = *child,
                Slot::Leaf(_) => return None,
            }
        }
        Some(id)
    }

    /// Resolve the container holding the address's last key, creating
    /// intermediate object containers for missing field keys on the way.
    pub fn ensure_parent(&mut self, address: &Address) -> StoreResult<NodeId> {
        let mut id = self.root;
        let keys = address.keys();
        let parent_keys = &keys[..keys.len().saturating_sub(1)];

        for (depth, key) in parent_keys.iter().enumerate() {
            let existing = self
                .nodes
                .get(&id)
                .and_then(|node| node.get(key))
                .cloned();

            match existing {
                Some(Slot::Child(child)) => id = child,
                Some(Slot::Leaf(_)) | None => {
                    let here = Address::from_keys(keys[..=depth].to_vec());
                    match key {
                        Key::Field(_) => {
                            // Intermediate objects spring into existence
                            let child =
                                self.wrap_container(Value::Object(Map::new()), here.clone());
                            self.set_slot(id, key.clone(), Slot::Child(child))?;
                            id = child;
                        }
                        Key::Index(idx) => {
                            let len = self.nodes.get(&id).map(|n| n.len()).unwrap_or(0);
                            return Err(StoreError::Value(
                                trellis_state::ValueError::index_out_of_bounds(here, *idx, len),
                            ));
                        }
                    }
                }
            }
        }
        Ok(id)
    }

    /// Insert or replace the slot at `(parent, key)`.
    ///
    /// Returns the previous slot, if any. The caller is responsible for
    /// detaching a replaced child subtree.
    pub fn set_slot(
        &mut self,
        parent: NodeId,
        key: Key,
        slot: Slot,
    ) -> StoreResult<Option<Slot>> {
        let address = self
            .nodes
            .get(&parent)
            .map(|n| n.address.clone())
            .unwrap_or_default();
        let Some(node) = self.nodes.get_mut(&parent) else {
            return Err(StoreError::path_not_found(address));
        };

        match (&mut node.entries, key) {
            (Entries::Object(map), Key::Field(name)) => {
                let previous = map.insert(name, slot);
                if previous.is_none() {
                    node.generation += 1;
                }
                Ok(previous)
            }
            (Entries::Array(items), Key::Index(idx)) => {
                if idx < items.len() {
                    Ok(Some(std::mem::replace(&mut items[idx], slot)))
                } else if idx == items.len() {
                    items.push(slot);
                    node.generation += 1;
                    Ok(None)
                } else {
                    let len = items.len();
                    Err(StoreError::Value(
                        trellis_state::ValueError::index_out_of_bounds(
                            address.child(Key::Index(idx)),
                            idx,
                            len,
                        ),
                    ))
                }
            }
            (_, key) => Err(StoreError::Value(trellis_state::ValueError::type_mismatch(
                address.child(key),
                "container",
                node.type_name(),
            ))),
        }
    }

    /// Remove the slot at `(parent, key)`, if present.
    pub fn remove_slot(&mut self, parent: NodeId, key: &Key) -> Option<Slot> {
        let node = self.nodes.get_mut(&parent)?;
        let removed = match (&mut node.entries, key) {
            (Entries::Object(map), Key::Field(name)) => map.remove(name),
            (Entries::Array(items), Key::Index(idx)) if *idx < items.len() => {
                Some(items.remove(*idx))
            }
            _ => None,
        };
        if removed.is_some() {
            node.generation += 1;
            if node.is_array() {
                // Later elements shifted down one index
                let address = node.address.clone();
                self.readdress_children(parent, &address);
            }
        }
        removed
    }

    /// Splice an array container in place. Bounds are clamped, matching the
    /// permissive splice semantics of the mutating array methods this
    /// intercepts.
    pub fn splice_array(
        &mut self,
        id: NodeId,
        start: usize,
        delete_count: usize,
        slots: Vec<Slot>,
    ) -> StoreResult<Vec<Slot>> {
        let Some(node) = self.nodes.get_mut(&id) else {
            return Err(StoreError::path_not_found(Address::root()));
        };
        let address = node.address.clone();
        let Entries::Array(items) = &mut node.entries else {
            return Err(StoreError::Value(trellis_state::ValueError::type_mismatch(
                address,
                "array",
                "object",
            )));
        };

        let start = start.min(items.len());
        let end = (start + delete_count).min(items.len());
        let removed: Vec<Slot> = items.splice(start..end, slots).collect();
        node.generation += 1;

        self.readdress_children(id, &address);
        Ok(removed)
    }

    /// Rebuild a container's entries from a plain value, keeping its node
    /// identity, model tag, and read registries.
    pub fn replace_entries(&mut self, id: NodeId, value: Value, address: &Address) {
        for child in self.child_ids(id) {
            self.detach_subtree(child);
        }
        let fresh = self.wrap_container(value, address.clone());
        if let Some(fresh_node) = self.nodes.remove(&fresh) {
            if let Some(node) = self.nodes.get_mut(&id) {
                node.entries = fresh_node.entries;
                node.generation += 1;
            }
        }
    }

    /// Mark a subtree detached. Registries are left in place; a detached
    /// container is never the target of a recorded mutation again, so stale
    /// entries are harmless.
    pub fn detach_subtree(&mut self, id: NodeId) {
        let children = self.child_ids(id);
        if let Some(node) = self.nodes.get_mut(&id) {
            node.attached = false;
        }
        for child in children {
            self.detach_subtree(child);
        }
    }

    /// Re-attach a subtree at a new address.
    pub fn attach_subtree(&mut self, id: NodeId, address: Address) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.attached = true;
        }
        self.readdress(id, address);
    }

    /// Recompute the addresses of a subtree after a move or array shift.
    pub fn readdress(&mut self, id: NodeId, address: Address) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.address = address.clone();
            node.attached = true;
        }
        self.readdress_children(id, &address);
    }

    fn readdress_children(&mut self, id: NodeId, address: &Address) {
        let children = self.child_entries(id, address);
        for (child, child_addr) in children {
            self.readdress(child, child_addr);
        }
    }

    fn child_ids(&self, id: NodeId) -> Vec<NodeId> {
        let Some(node) = self.nodes.get(&id) else {
            return Vec::new();
        };
        match &node.entries {
            Entries::Object(map) => map
                .values()
                .filter_map(|slot| match slot {
                    Slot::Child(child) => Some(*child),
                    Slot::Leaf(_) => None,
                })
                .collect(),
            Entries::Array(items) => items
                .iter()
                .filter_map(|slot| match slot {
                    Slot::Child(child) => Some(*child),
                    Slot::Leaf(_) => None,
                })
                .collect(),
        }
    }

    fn child_entries(&self, id: NodeId, address: &Address) -> Vec<(NodeId, Address)> {
        let Some(node) = self.nodes.get(&id) else {
            return Vec::new();
        };
        match &node.entries {
            Entries::Object(map) => map
                .iter()
                .filter_map(|(name, slot)| match slot {
                    Slot::Child(child) => {
                        Some((*child, address.child(Key::Field(name.clone()))))
                    }
                    Slot::Leaf(_) => None,
                })
                .collect(),
            Entries::Array(items) => items
                .iter()
                .enumerate()
                .filter_map(|(idx, slot)| match slot {
                    Slot::Child(child) => Some((*child, address.child(Key::Index(idx)))),
                    Slot::Leaf(_) => None,
                })
                .collect(),
        }
    }

    /// Register an observer's dependency on one key of a container.
    pub fn register_reader(&mut self, parent: NodeId, key: &Key, observer: ObserverId) {
        if let Some(node) = self.nodes.get_mut(&parent) {
            node.readers.entry(key.clone()).or_default().insert(observer);
        }
    }

    /// Register an observer's nested dependency on a whole subtree.
    pub fn register_nested(&mut self, id: NodeId, observer: ObserverId) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.nested_readers.insert(observer);
        }
    }

    /// Remove an observer's registration for one dependency path. Tolerates
    /// containers that have since been replaced or detached.
    pub fn deregister(&mut self, address: &Address, nested: bool, observer: ObserverId) {
        if let (Some(parent_addr), Some(key)) = (address.parent(), address.last().cloned()) {
            if let Some(parent) = self.resolve(&parent_addr) {
                if let Some(node) = self.nodes.get_mut(&parent) {
                    if let Some(readers) = node.readers.get_mut(&key) {
                        readers.remove(&observer);
                        if readers.is_empty() {
                            node.readers.remove(&key);
                        }
                    }
                }
            }
        }
        if nested {
            if let Some(id) = self.resolve(address) {
                if let Some(node) = self.nodes.get_mut(&id) {
                    node.nested_readers.remove(&observer);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use trellis_state::address;

    fn tree() -> Tree {
        Tree::new(json!({
            "user": {"name": "Alice", "tags": ["a", "b"]},
            "count": 0,
        }))
    }

    #[test]
    fn test_wrap_and_materialize_roundtrip() {
        let t = tree();
        assert_eq!(
            t.materialize(t.root()),
            json!({"user": {"name": "Alice", "tags": ["a", "b"]}, "count": 0})
        );
    }

    #[test]
    fn test_resolve_containers_only() {
        let t = tree();
        assert!(t.resolve(&address!("user")).is_some());
        assert!(t.resolve(&address!("user", "tags")).is_some());
        // Leaves and missing paths do not resolve to containers
        assert!(t.resolve(&address!("user", "name")).is_none());
        assert!(t.resolve(&address!("missing")).is_none());
    }

    #[test]
    fn test_addresses_assigned_recursively() {
        let t = tree();
        let tags = t.resolve(&address!("user", "tags")).unwrap();
        assert_eq!(t.container(tags).unwrap().address, address!("user", "tags"));
    }

    #[test]
    fn test_set_slot_bumps_generation_on_new_key() {
        let mut t = tree();
        let user = t.resolve(&address!("user")).unwrap();
        let before = t.container(user).unwrap().generation;

        // Replacing an existing key is not structural
        t.set_slot(user, Key::field("name"), Slot::Leaf(json!("Bob")))
            .unwrap();
        assert_eq!(t.container(user).unwrap().generation, before);

        t.set_slot(user, Key::field("email"), Slot::Leaf(json!("b@x")))
            .unwrap();
        assert_eq!(t.container(user).unwrap().generation, before + 1);
    }

    #[test]
    fn test_splice_readdresses_elements() {
        let mut t = Tree::new(json!({"items": [{"id": 1}, {"id": 2}]}));
        let items = t.resolve(&address!("items")).unwrap();

        let removed = t.splice_array(items, 0, 1, Vec::new()).unwrap();
        assert_eq!(removed.len(), 1);

        let survivor = t.resolve(&address!("items", 0)).unwrap();
        assert_eq!(t.materialize(survivor), json!({"id": 2}));
        assert_eq!(t.container(survivor).unwrap().address, address!("items", 0));
    }

    #[test]
    fn test_detach_marks_subtree() {
        let mut t = tree();
        let user = t.resolve(&address!("user")).unwrap();
        let tags = t.resolve(&address!("user", "tags")).unwrap();

        t.detach_subtree(user);
        assert!(!t.container(user).unwrap().attached);
        assert!(!t.container(tags).unwrap().attached);
    }

    #[test]
    fn test_ensure_parent_creates_intermediates() {
        let mut t = Tree::new(json!({}));
        let parent = t.ensure_parent(&address!("a", "b", "c")).unwrap();
        assert_eq!(t.container(parent).unwrap().address, address!("a", "b"));
        assert_eq!(t.materialize(t.root()), json!({"a": {"b": {}}}));
    }

    #[test]
    fn test_reader_registration_and_cleanup() {
        let mut t = tree();
        let user = t.resolve(&address!("user")).unwrap();
        let observer = ObserverId(1);

        t.register_reader(user, &Key::field("name"), observer);
        assert!(t
            .container(user)
            .unwrap()
            .readers
            .contains_key(&Key::field("name")));

        t.deregister(&address!("user", "name"), false, observer);
        assert!(t.container(user).unwrap().readers.is_empty());
    }
}
