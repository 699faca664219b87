//! Derived-value cache.
//!
//! A derived entry memoizes a pure projection over the tracked tree,
//! registered at an address at build time. The entry is an observer from
//! the flush scheduler's point of view: a flush that intersects its
//! dependency tree only marks it dirty. Recomputation happens lazily on
//! the next read, collecting a fresh dependency tree of its own.

use crate::handle::StateReader;
use crate::inspect::StoreEvent;
use crate::observe::ObserverId;
use crate::store::Store;
use serde_json::Value;
use std::sync::Arc;
use trellis_state::{get_at, Address};

/// A pure projection computing a derived value from `(local, root)`
/// readers. `local` is rooted at the derived field's parent address.
pub type Projection = Arc<dyn Fn(&StateReader, &StateReader) -> Value + Send + Sync>;

pub(crate) struct DerivedEntry {
    pub address: Address,
    pub observer: ObserverId,
    pub projection: Projection,
    pub cached: Option<Value>,
    pub dirty: bool,
}

impl Store {
    /// Intercept reads that land on or under a derived field.
    ///
    /// Returns `None` when the address is not derived; `Some(result)` with
    /// the (possibly recomputed) value otherwise. The consumer's collector
    /// records a dependency on the read address, which the flush scheduler
    /// connects to the derived entry through the invalidation cascade.
    pub(crate) fn read_derived(&self, address: &Address) -> Option<Option<Value>> {
        let (index, entry_addr) = {
            let derived = self.inner.derived.lock().unwrap();
            derived
                .iter()
                .enumerate()
                .find(|(_, entry)| entry.address.is_ancestor_of(address))
                .map(|(index, entry)| (index, entry.address.clone()))?
        };

        let value = self.derived_value(index, &entry_addr);

        {
            let mut observe = self.inner.observe.lock().unwrap();
            if observe.active().is_some() {
                let nested = value.is_object() || value.is_array();
                observe.record(address.clone(), nested);
            }
        }

        let result = address
            .relative_to(&entry_addr)
            .and_then(|rest| get_at(&value, &rest).cloned());
        Some(result)
    }

    /// Return the cached value, recomputing under the entry's own
    /// collector if it is dirty.
    fn derived_value(&self, index: usize, address: &Address) -> Value {
        {
            let derived = self.inner.derived.lock().unwrap();
            if let Some(entry) = derived.get(index) {
                if !entry.dirty {
                    if let Some(cached) = &entry.cached {
                        return cached.clone();
                    }
                }
            }
        }

        let (observer, projection) = {
            let derived = self.inner.derived.lock().unwrap();
            match derived.get(index) {
                Some(entry) => (entry.observer, entry.projection.clone()),
                None => return Value::Null,
            }
        };

        self.begin_collect(observer);
        let local_base = address.parent().unwrap_or_default();
        let local = StateReader::new(self.clone(), local_base);
        let root = StateReader::new(self.clone(), Address::root());
        let value = projection(&local, &root);
        if let Err(error) = self.end_collect(observer) {
            tracing::warn!(address = %address, error = %error, "derived collector unbalanced");
        }

        {
            let mut derived = self.inner.derived.lock().unwrap();
            if let Some(entry) = derived.get_mut(index) {
                entry.cached = Some(value.clone());
                entry.dirty = false;
            }
        }
        tracing::debug!(address = %address, "derived recomputed");
        self.inner.emit(StoreEvent::DerivedRecomputed {
            address: address.clone(),
        });
        value
    }
}
