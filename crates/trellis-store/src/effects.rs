//! Injected side-effect handles.
//!
//! Effects are opaque values configured on the store and passed through
//! the operation context untouched. Operations look them up by name and
//! downcast to the concrete type they expect; the core imposes no
//! interface on them.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

/// A named registry of opaque effect handles.
///
/// # Examples
///
/// ```
/// use trellis_store::Effects;
///
/// struct Clock {
///     epoch: u64,
/// }
///
/// let effects = Effects::new().with("clock", Clock { epoch: 42 });
///
/// let clock = effects.get::<Clock>("clock").unwrap();
/// assert_eq!(clock.epoch, 42);
/// assert!(effects.get::<String>("clock").is_none()); // wrong type
/// assert!(effects.get::<Clock>("missing").is_none());
/// ```
#[derive(Clone, Default)]
pub struct Effects {
    handles: HashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl Effects {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handle (builder pattern).
    pub fn with<T: Any + Send + Sync>(mut self, name: impl Into<String>, handle: T) -> Self {
        self.insert(name, handle);
        self
    }

    /// Register a handle.
    pub fn insert<T: Any + Send + Sync>(&mut self, name: impl Into<String>, handle: T) {
        self.handles.insert(name.into(), Arc::new(handle));
    }

    /// Look up a handle by name and concrete type.
    pub fn get<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.handles
            .get(name)
            .cloned()
            .and_then(|handle| handle.downcast::<T>().ok())
    }

    /// Whether a handle is registered under the name.
    pub fn contains(&self, name: &str) -> bool {
        self.handles.contains_key(name)
    }

    /// Registered handle names, in arbitrary order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handles.keys().map(String::as_str)
    }

    /// Merge another registry in under a namespace prefix.
    pub(crate) fn merge_under(&mut self, prefix: &str, other: Effects) {
        for (name, handle) in other.handles {
            self.handles.insert(format!("{prefix}.{name}"), handle);
        }
    }
}
