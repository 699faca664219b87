//! Mutation batching and the flush scheduler.
//!
//! A batch scope accumulates every mutation recorded during one logical
//! operation. The scope is reference counted: the operation runner retains
//! it on entry and across asynchronous gaps, and the release that brings
//! the count back to zero performs the flush. `BatchGuard` ties the
//! retain/release pair to a scope so release happens on every exit path.

use crate::error::{StoreError, StoreResult};
use crate::inspect::StoreEvent;
use crate::observe::{DependencyTree, ObserverId, ObserverKind};
use crate::store::Store;
use trellis_state::{compute_touched, Address, Mutation, MutationLog};

pub(crate) struct BatchScope {
    pub mutations: Vec<Mutation>,
    pub refs: usize,
}

/// Scoped retain on the store's batch. Dropping the guard releases the
/// batch, flushing it if this was the last retain.
pub(crate) struct BatchGuard {
    store: Store,
}

impl BatchGuard {
    pub fn enter(store: &Store) -> Self {
        store.retain_batch();
        BatchGuard {
            store: store.clone(),
        }
    }
}

impl Drop for BatchGuard {
    fn drop(&mut self) {
        self.store.release_batch();
    }
}

impl Store {
    /// Open the batch, or join the one already open.
    pub(crate) fn retain_batch(&self) {
        let mut batch = self.inner.batch.lock().unwrap();
        match batch.as_mut() {
            Some(scope) => scope.refs += 1,
            None => {
                *batch = Some(BatchScope {
                    mutations: Vec::new(),
                    refs: 1,
                })
            }
        }
    }

    /// Release one retain; the release reaching zero drains the scope and
    /// flushes it.
    pub(crate) fn release_batch(&self) {
        let drained = {
            let mut batch = self.inner.batch.lock().unwrap();
            match batch.as_mut() {
                Some(scope) => {
                    scope.refs -= 1;
                    if scope.refs == 0 {
                        batch.take().map(|scope| scope.mutations)
                    } else {
                        None
                    }
                }
                None => None,
            }
        };
        if let Some(mutations) = drained {
            self.flush(mutations);
        }
    }

    /// Validate that a write at `address` is currently permitted.
    ///
    /// `sanctioned` marks writes entering through a sanctioned path (a
    /// transition handler, rehydration, replay); in strict mode only those
    /// are allowed.
    pub(crate) fn check_write(&self, address: &Address, sanctioned: bool) -> StoreResult<()> {
        let batch = self.inner.batch.lock().unwrap();
        if batch.is_none() || (self.inner.strict && !sanctioned) {
            return Err(StoreError::mutation_outside_action(address.clone()));
        }
        Ok(())
    }

    /// Append a mutation to the open batch and emit it on the event feed.
    pub(crate) fn record_mutation(&self, mutation: Mutation) {
        tracing::debug!(path = %mutation.path, "mutation recorded");
        {
            let mut batch = self.inner.batch.lock().unwrap();
            if let Some(scope) = batch.as_mut() {
                scope.mutations.push(mutation.clone());
            }
        }
        self.inner.emit(StoreEvent::Mutated { mutation });
    }

    /// Notify every observer whose dependency tree intersects the batch's
    /// touched addresses, exactly once each, in registration order.
    fn flush(&self, mutations: Vec<Mutation>) {
        if mutations.is_empty() {
            return;
        }
        let log = MutationLog::with_mutations(mutations);
        let mut touched = compute_touched(&log);

        let mut cleared: Vec<(ObserverId, DependencyTree)> = Vec::new();
        let mut invalidated: Vec<Address> = Vec::new();

        // Derived entries cascade: invalidating one makes its address count
        // as touched, so consumers of the derived field (including other
        // derived entries) react in the same flush.
        loop {
            let mut changed = false;
            {
                let mut derived = self.inner.derived.lock().unwrap();
                let mut observe = self.inner.observe.lock().unwrap();
                for entry in derived.iter_mut() {
                    if entry.dirty {
                        continue;
                    }
                    let Some(record) = observe.observers.get_mut(&entry.observer) else {
                        continue;
                    };
                    if record.deps.matches(&touched) {
                        entry.dirty = true;
                        entry.cached = None;
                        touched.insert(entry.address.clone());
                        cleared.push((entry.observer, std::mem::take(&mut record.deps)));
                        invalidated.push(entry.address.clone());
                        changed = true;
                    }
                }
            }
            if !changed {
                break;
            }
        }

        // Matched callbacks, in registration (id) order
        let mut callbacks = Vec::new();
        {
            let mut observe = self.inner.observe.lock().unwrap();
            for (id, record) in observe.observers.iter_mut() {
                if let ObserverKind::Callback(notify) = &record.kind {
                    if record.deps.matches(&touched) {
                        callbacks.push(notify.clone());
                        cleared.push((*id, std::mem::take(&mut record.deps)));
                    }
                }
            }
        }

        // Notified observers re-collect on their next read; drop their old
        // registrations now.
        {
            let mut tree = self.inner.tree.lock().unwrap();
            for (id, deps) in &cleared {
                for (address, entry) in deps.iter() {
                    tree.deregister(address, entry.nested, *id);
                }
            }
        }

        for address in invalidated {
            self.inner.emit(StoreEvent::DerivedInvalidated { address });
        }

        let touched: Vec<Address> = touched.into_iter().collect();
        tracing::debug!(
            mutations = log.len(),
            touched = touched.len(),
            notified = callbacks.len(),
            "flush"
        );
        self.inner.emit(StoreEvent::Flushed {
            touched,
            notified: callbacks.len(),
        });

        for notify in callbacks {
            notify();
        }
    }
}
