//! The store: configuration, the operation runner, and the subscribe/
//! collect surface consumed by view-layer bindings.
//!
//! All mutable runtime state (the tracked tree, observers, the open batch,
//! derived entries) lives behind one shared inner value threaded through
//! every handle and context, so independent store instances stay fully
//! isolated.

use crate::action::{action, ActionHandler, ActionProxy, OpContext};
use crate::batch::{BatchGuard, BatchScope};
use crate::codec::{serde_model, Factories, ModelCodec};
use crate::derived::{DerivedEntry, Projection};
use crate::effects::Effects;
use crate::error::{StoreError, StoreResult};
use crate::handle::{StateHandle, StateReader};
use crate::inspect::{Inspector, StoreEvent};
use crate::machine::MachineDef;
use crate::observe::{CollectorFrame, DependencyTree, Observe, ObserverId, ObserverKind};
use crate::tree::Tree;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use trellis_state::{Address, Mutation, MutationLog};

pub(crate) struct StoreInner {
    pub(crate) tree: Mutex<Tree>,
    pub(crate) observe: Mutex<Observe>,
    pub(crate) batch: Mutex<Option<BatchScope>>,
    pub(crate) derived: Mutex<Vec<DerivedEntry>>,
    pub(crate) actions: HashMap<String, ActionHandler>,
    pub(crate) machines: HashMap<Address, Arc<MachineDef>>,
    pub(crate) models: HashMap<String, Arc<dyn ModelCodec>>,
    pub(crate) effects: Effects,
    pub(crate) inspector: Option<Arc<dyn Inspector>>,
    pub(crate) strict: bool,
}

impl StoreInner {
    pub(crate) fn emit(&self, event: StoreEvent) {
        if let Some(inspector) = &self.inspector {
            inspector.on_event(&event);
        }
    }
}

/// A reactive state-tracking store.
///
/// Cloning is cheap and shares the underlying state.
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
///     .action("increment", |ctx, _| async move {
///         let count = ctx.state.get(&address!("count")).and_then(|v| v.as_i64()).unwrap_or(0);
///         ctx.state.set(&address!("count"), json!(count + 1))?;
///         Ok(Value::Null)
///     })
///     .build();
///
/// let seen = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
/// let seen_by_observer = seen.clone();
/// let sub = store.subscribe(move || {
///     seen_by_observer.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
/// });
///
/// // Collect what the observer reads
/// store.start_collecting(sub.id());
/// let _ = store.reader().get(&address!("count"));
/// store.stop_collecting(sub.id()).unwrap();
///
/// futures::executor::block_on(store.run("increment", Value::Null)).unwrap();
/// assert_eq!(seen.load(std::sync::atomic::Ordering::SeqCst), 1);
/// ```
#[derive(Clone)]
pub struct Store {
    pub(crate) inner: Arc<StoreInner>,
}

impl Store {
    /// Start building a store.
    pub fn builder() -> StoreBuilder {
        StoreBuilder::new()
    }

    /// A read/write handle rooted at the tree root. Writes through it
    /// still require an open batch scope.
    pub fn handle(&self) -> StateHandle {
        StateHandle::new(self.clone(), Address::root())
    }

    /// A read-only view rooted at the tree root.
    pub fn reader(&self) -> StateReader {
        StateReader::new(self.clone(), Address::root())
    }

    /// Invoke a named operation.
    ///
    /// Opens a batch scope (or joins the one already open, for nested
    /// invocations) and holds it across every `await` inside the handler,
    /// so all mutations of one logical operation coalesce into a single
    /// flush after the handler fully settles. Errors propagate unmodified;
    /// the scope is released on every path.
    pub async fn run(&self, name: &str, payload: Value) -> StoreResult<Value> {
        let Some(handler) = self.inner.actions.get(name).cloned() else {
            return Err(StoreError::unknown_action(name));
        };

        let guard = BatchGuard::enter(self);
        self.inner.emit(StoreEvent::OperationStarted {
            name: name.to_owned(),
        });
        tracing::debug!(action = name, "operation started");

        let ctx = OpContext {
            state: self.handle(),
            actions: ActionProxy::new(self.clone()),
            effects: self.inner.effects.clone(),
        };
        let result = handler(ctx, payload).await;

        if let Err(error) = &result {
            tracing::warn!(action = name, error = %error, "operation failed");
        }
        drop(guard);
        self.inner.emit(StoreEvent::OperationFinished {
            name: name.to_owned(),
            ok: result.is_ok(),
        });
        result
    }

    /// Dispatch an event to the transition machine at `address`.
    ///
    /// An event with no handler for the machine's current state is
    /// silently ignored.
    pub fn send(&self, address: &Address, event: &str, payload: Value) -> StoreResult<()> {
        self.dispatch(address, event, payload)
    }

    /// Register an observer. The notify callback fires at most once per
    /// flush, whenever the batch's touched paths intersect the dependency
    /// tree collected for this observer.
    ///
    /// Dropping the returned subscription deregisters the observer from
    /// every read registry it touched.
    pub fn subscribe(&self, notify: impl Fn() + Send + Sync + 'static) -> Subscription {
        let id = self
            .inner
            .observe
            .lock()
            .unwrap()
            .allocate(ObserverKind::Callback(Arc::new(notify)));
        tracing::debug!(observer = %id, "observer subscribed");
        Subscription {
            store: self.clone(),
            id,
            active: true,
        }
    }

    /// Attribute subsequent tracked reads to this observer.
    pub fn start_collecting(&self, observer: ObserverId) {
        self.begin_collect(observer);
    }

    /// Stop collecting for this observer and reconcile its dependency
    /// tree: paths no longer read are deregistered, fresh ones were
    /// registered as they were read.
    ///
    /// Fails with [`StoreError::CollectorMismatch`] when this observer is
    /// not the one currently collecting (including a second stop in a
    /// row).
    pub fn stop_collecting(&self, observer: ObserverId) -> StoreResult<DependencyTree> {
        self.end_collect(observer)
    }

    pub(crate) fn begin_collect(&self, observer: ObserverId) {
        let mut observe = self.inner.observe.lock().unwrap();
        observe.collectors.push(CollectorFrame {
            owner: observer,
            deps: DependencyTree::new(),
        });
    }

    pub(crate) fn end_collect(&self, observer: ObserverId) -> StoreResult<DependencyTree> {
        let (cleared, fresh) = {
            let mut observe = self.inner.observe.lock().unwrap();
            let frame = match observe.collectors.pop() {
                Some(frame) if frame.owner == observer => frame,
                Some(frame) => {
                    let active = frame.owner;
                    observe.collectors.push(frame);
                    return Err(StoreError::CollectorMismatch {
                        found: observer,
                        active: Some(active),
                    });
                }
                None => {
                    return Err(StoreError::CollectorMismatch {
                        found: observer,
                        active: None,
                    });
                }
            };
            let fresh = frame.deps;
            let cleared = match observe.observers.get_mut(&observer) {
                Some(record) => {
                    let old = std::mem::replace(&mut record.deps, fresh.clone());
                    old.removed_since(&fresh)
                }
                None => Vec::new(),
            };
            (cleared, fresh)
        };

        if !cleared.is_empty() {
            let mut tree = self.inner.tree.lock().unwrap();
            for (address, entry) in &cleared {
                tree.deregister(address, entry.nested, observer);
            }
        }
        Ok(fresh)
    }

    /// Snapshot the tracked tree as a plain value. Model-tagged containers
    /// go through their registered codec; derived fields are not part of
    /// the tree and are omitted.
    pub fn snapshot(&self) -> StoreResult<Value> {
        self.snapshot_tree()
    }

    /// Apply a snapshot onto the live tree as a structural merge through
    /// the normal write path, in one batch.
    pub fn rehydrate(&self, data: Value) -> StoreResult<()> {
        self.rehydrate_tree(data, &Factories::default())
    }

    /// Like [`rehydrate`](Store::rehydrate), consulting per-path
    /// factories to reconstruct model instances.
    pub fn rehydrate_with(&self, data: Value, factories: &Factories) -> StoreResult<()> {
        self.rehydrate_tree(data, factories)
    }

    /// Replay a recorded mutation log through the normal write path, in
    /// one batch.
    pub fn replay(&self, log: &MutationLog) -> StoreResult<()> {
        self.replay_log(log)
    }
}

/// Registration of an observer; dropping it unsubscribes.
pub struct Subscription {
    store: Store,
    id: ObserverId,
    active: bool,
}

impl Subscription {
    /// The observer's id, for `start_collecting`/`stop_collecting`.
    pub fn id(&self) -> ObserverId {
        self.id
    }

    /// Deregister now instead of at drop.
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;

        let deps = {
            let mut observe = self.store.inner.observe.lock().unwrap();
            observe.observers.remove(&self.id).map(|record| record.deps)
        };
        if let Some(deps) = deps {
            let mut tree = self.store.inner.tree.lock().unwrap();
            for (address, entry) in deps.iter() {
                tree.deregister(address, entry.nested, self.id);
            }
        }
        tracing::debug!(observer = %self.id, "observer unsubscribed");
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

/// A composable configuration fragment: a state subtree plus the
/// operations and effects that belong to it, mounted under a namespace
/// key with [`StoreBuilder::namespace`].
pub struct Module {
    state: Value,
    actions: HashMap<String, ActionHandler>,
    effects: Effects,
}

impl Module {
    /// Create a module around a state fragment.
    pub fn new(state: Value) -> Self {
        Self {
            state,
            actions: HashMap::new(),
            effects: Effects::new(),
        }
    }

    /// Register an operation on this module (builder pattern).
    pub fn action<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(OpContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = StoreResult<Value>> + Send + 'static,
    {
        self.actions.insert(name.into(), action(f));
        self
    }

    /// Register an effect handle on this module (builder pattern).
    pub fn effect<T: Any + Send + Sync>(mut self, name: impl Into<String>, handle: T) -> Self {
        self.effects.insert(name, handle);
        self
    }
}

/// Builder for [`Store`].
pub struct StoreBuilder {
    state: Value,
    actions: HashMap<String, ActionHandler>,
    machines: HashMap<Address, Arc<MachineDef>>,
    models: HashMap<String, Arc<dyn ModelCodec>>,
    derived: Vec<(Address, Projection)>,
    effects: Effects,
    inspector: Option<Arc<dyn Inspector>>,
    strict: bool,
}

impl Default for StoreBuilder {
    fn default() -> Self {
        Self {
            state: Value::Object(Map::new()),
            actions: HashMap::new(),
            machines: HashMap::new(),
            models: HashMap::new(),
            derived: Vec::new(),
            effects: Effects::new(),
            inspector: None,
            strict: false,
        }
    }
}

impl StoreBuilder {
    /// Create a builder with an empty object root.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the initial state tree (must be an object).
    pub fn state(mut self, value: Value) -> Self {
        self.state = value;
        self
    }

    /// Register a named operation.
    pub fn action<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(OpContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = StoreResult<Value>> + Send + 'static,
    {
        self.actions.insert(name.into(), action(f));
        self
    }

    /// Register a pre-built operation handler.
    pub fn action_handler(mut self, name: impl Into<String>, handler: ActionHandler) -> Self {
        self.actions.insert(name.into(), handler);
        self
    }

    /// Register an effect handle, passed through operation contexts
    /// untouched.
    pub fn effect<T: Any + Send + Sync>(mut self, name: impl Into<String>, handle: T) -> Self {
        self.effects.insert(name, handle);
        self
    }

    /// Declare a derived field at an address. The projection runs lazily
    /// on read and is cached until a dependency changes.
    pub fn derived<F>(mut self, address: Address, projection: F) -> Self
    where
        F: Fn(&StateReader, &StateReader) -> Value + Send + Sync + 'static,
    {
        self.derived.push((address, Arc::new(projection)));
        self
    }

    /// Mount a transition machine at an address. Its instance value is
    /// written into the initial state.
    pub fn machine(mut self, address: Address, def: MachineDef) -> Self {
        self.machines.insert(address, Arc::new(def));
        self
    }

    /// Register a model codec by name.
    pub fn model(mut self, name: impl Into<String>, codec: Arc<dyn ModelCodec>) -> Self {
        self.models.insert(name.into(), codec);
        self
    }

    /// Register a serde-typed model codec by name.
    pub fn model_of<T>(self, name: impl Into<String>) -> Self
    where
        T: Serialize + DeserializeOwned + 'static,
    {
        self.model(name, serde_model::<T>())
    }

    /// In strict mode, direct operation writes are rejected; only
    /// transition handlers (and rehydration/replay) may mutate state.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Attach an inspection hook receiving every store event.
    pub fn inspector(mut self, inspector: Arc<dyn Inspector>) -> Self {
        self.inspector = Some(inspector);
        self
    }

    /// Mount a module's state under a key and its actions and effects
    /// under `"key.name"`.
    pub fn namespace(mut self, key: &str, module: Module) -> Self {
        match &mut self.state {
            Value::Object(map) => {
                map.insert(key.to_owned(), module.state);
            }
            _ => {
                tracing::warn!(key, "namespace requires an object root, fragment dropped");
            }
        }
        for (name, handler) in module.actions {
            self.actions.insert(format!("{key}.{name}"), handler);
        }
        self.effects.merge_under(key, module.effects);
        self
    }

    /// Build the store.
    ///
    /// # Panics
    ///
    /// Panics when a machine declares an initial state it does not define,
    /// or is mounted at an address the initial state cannot hold.
    pub fn build(self) -> Store {
        let mut state = self.state;
        for (address, def) in &self.machines {
            assert!(
                def.states.contains_key(&def.initial),
                "machine at {address} declares unknown initial state {:?}",
                def.initial
            );
            trellis_state::apply_in_place(
                &mut state,
                &Mutation::set(address.clone(), None, def.instance_value()),
            )
            .expect("machine address must be reachable in the initial state");
        }

        let mut observe = Observe::default();
        let derived = self
            .derived
            .into_iter()
            .enumerate()
            .map(|(index, (address, projection))| DerivedEntry {
                observer: observe.allocate(ObserverKind::Derived(index)),
                address,
                projection,
                cached: None,
                dirty: true,
            })
            .collect();

        Store {
            inner: Arc::new(StoreInner {
                tree: Mutex::new(Tree::new(state)),
                observe: Mutex::new(observe),
                batch: Mutex::new(None),
                derived: Mutex::new(derived),
                actions: self.actions,
                machines: self.machines,
                models: self.models,
                effects: self.effects,
                inspector: self.inspector,
                strict: self.strict,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use trellis_state::address;

    #[test]
    fn test_reader_reads_initial_state() {
        let store = Store::builder()
            .state(json!({"user": {"name": "Alice"}}))
            .build();

        assert_eq!(
            store.reader().get(&address!("user", "name")),
            Some(json!("Alice"))
        );
        assert_eq!(store.reader().get(&address!("user", "missing")), None);
    }

    #[test]
    fn test_stop_collecting_twice_errors() {
        let store = Store::builder().state(json!({"a": 1})).build();
        let sub = store.subscribe(|| {});

        store.start_collecting(sub.id());
        let _ = store.reader().get(&address!("a"));
        assert!(store.stop_collecting(sub.id()).is_ok());

        let err = store.stop_collecting(sub.id()).unwrap_err();
        assert!(matches!(err, StoreError::CollectorMismatch { .. }));
    }

    #[test]
    fn test_subscription_drop_deregisters() {
        let store = Store::builder().state(json!({"a": 1})).build();
        let hits = Arc::new(AtomicUsize::new(0));

        let hits_seen = hits.clone();
        let sub = store.subscribe(move || {
            hits_seen.fetch_add(1, Ordering::SeqCst);
        });
        store.start_collecting(sub.id());
        let _ = store.reader().get(&address!("a"));
        store.stop_collecting(sub.id()).unwrap();
        sub.unsubscribe();

        store.retain_batch();
        store
            .write_set(&address!("a"), json!(2).into(), false)
            .unwrap();
        store.release_batch();

        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_namespace_mounts_state_and_actions() {
        let module = Module::new(json!({"items": []})).action("add", |ctx, payload| async move {
            ctx.state.push(&address!("todos", "items"), payload)?;
            Ok(Value::Null)
        });

        let store = Store::builder()
            .state(json!({}))
            .namespace("todos", module)
            .build();

        futures::executor::block_on(store.run("todos.add", json!("milk"))).unwrap();
        assert_eq!(
            store.reader().get(&address!("todos", "items")),
            Some(json!(["milk"]))
        );
    }

    #[test]
    fn test_machine_instance_mounted_at_build() {
        let def = crate::machine::MachineDef::new("IDLE")
            .state("IDLE", crate::machine::StateDef::new().field("hint", json!("ready")));

        let store = Store::builder()
            .state(json!({"session": {}}))
            .machine(address!("session", "auth"), def)
            .build();

        assert_eq!(
            store.reader().get(&address!("session", "auth", "current")),
            Some(json!("IDLE"))
        );
        assert_eq!(
            store.reader().get(&address!("session", "auth", "hint")),
            Some(json!("ready"))
        );
    }
}
