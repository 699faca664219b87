//! Transition-guard state machines.
//!
//! A machine wraps a state subtree in a declared set of named states and
//! the transitions valid between them. Events are dispatched with
//! [`Store::send`](crate::Store::send); an event with no handler for the
//! current state is silently ignored, so a `send` call site is safe
//! regardless of where the machine currently is.
//!
//! Handlers are synchronous closures: mutation through the
//! [`TransitionScope`] is only possible for the duration of the call, so a
//! handler cannot hold write access across a suspension point.
//! Asynchronous work re-enters through a fresh `send`, which re-reads the
//! current state before dispatching.

use crate::error::{StoreError, StoreResult};
use crate::handle::Payload;
use crate::store::Store;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use trellis_state::{Address, Key};

/// A transition handler: inspects the machine, optionally mutates through
/// the scope, and may return the shape to transition into.
pub type TransitionHandler =
    Arc<dyn Fn(&TransitionScope, Value) -> Option<Transition> + Send + Sync>;

/// The target shape returned by a handler.
///
/// # Examples
///
/// ```
/// use trellis_store::Transition;
/// use serde_json::json;
///
/// let t = Transition::to("AUTHENTICATED").field("token", json!("abc"));
/// ```
pub struct Transition {
    pub(crate) target: String,
    pub(crate) fields: Map<String, Value>,
}

impl Transition {
    /// Transition into the named state.
    pub fn to(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            fields: Map::new(),
        }
    }

    /// Override one of the target state's fields (builder pattern).
    pub fn field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }
}

/// One named state: its declared payload fields (with defaults) and the
/// events it handles.
#[derive(Default)]
pub struct StateDef {
    pub(crate) fields: Map<String, Value>,
    pub(crate) transitions: BTreeMap<String, TransitionHandler>,
}

impl StateDef {
    /// Create a state with no fields or transitions. A state with no
    /// transitions is terminal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a payload field with its default value (builder pattern).
    pub fn field(mut self, name: impl Into<String>, default: Value) -> Self {
        self.fields.insert(name.into(), default);
        self
    }

    /// Declare an event handler (builder pattern).
    pub fn on<F>(mut self, event: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&TransitionScope, Value) -> Option<Transition> + Send + Sync + 'static,
    {
        self.transitions.insert(event.into(), Arc::new(handler));
        self
    }
}

/// A machine declaration: named states, their shapes, and the base fields
/// present in every state.
///
/// # Examples
///
/// ```
/// use trellis_store::{MachineDef, StateDef, Transition};
/// use serde_json::json;
///
/// let auth = MachineDef::new("UNAUTHENTICATED")
///     .base_field("attempts", json!(0))
///     .state(
///         "UNAUTHENTICATED",
///         StateDef::new().on("LOGIN", |_scope, payload| {
///             Some(Transition::to("AUTHENTICATING").field("username", payload))
///         }),
///     )
///     .state(
///         "AUTHENTICATING",
///         StateDef::new()
///             .field("username", json!(null))
///             .on("SUCCESS", |_scope, token| {
///                 Some(Transition::to("AUTHENTICATED").field("token", token))
///             })
///             .on("FAILURE", |_scope, _| Some(Transition::to("UNAUTHENTICATED"))),
///     )
///     .state("AUTHENTICATED", StateDef::new().field("token", json!(null)));
/// ```
pub struct MachineDef {
    pub(crate) initial: String,
    pub(crate) base: Map<String, Value>,
    pub(crate) states: BTreeMap<String, StateDef>,
}

impl MachineDef {
    /// Create a machine starting in the named state.
    pub fn new(initial: impl Into<String>) -> Self {
        Self {
            initial: initial.into(),
            base: Map::new(),
            states: BTreeMap::new(),
        }
    }

    /// Declare a field present in every state (builder pattern).
    pub fn base_field(mut self, name: impl Into<String>, default: Value) -> Self {
        self.base.insert(name.into(), default);
        self
    }

    /// Declare a named state (builder pattern).
    pub fn state(mut self, name: impl Into<String>, def: StateDef) -> Self {
        self.states.insert(name.into(), def);
        self
    }

    /// The instance value mounted at the machine's address: `current`,
    /// the base fields, and the initial state's fields.
    pub(crate) fn instance_value(&self) -> Value {
        let mut instance = Map::new();
        instance.insert("current".into(), Value::String(self.initial.clone()));
        for (name, default) in &self.base {
            instance.insert(name.clone(), default.clone());
        }
        if let Some(state) = self.states.get(&self.initial) {
            for (name, default) in &state.fields {
                instance.insert(name.clone(), default.clone());
            }
        }
        Value::Object(instance)
    }
}

/// Write-permitted view of a machine's subtree, valid only for the
/// synchronous duration of a transition handler.
pub struct TransitionScope {
    store: Store,
    base: Address,
}

impl TransitionScope {
    /// The machine's current named state.
    pub fn current(&self) -> Option<String> {
        self.get(&Address::root().field("current"))
            .and_then(|value| value.as_str().map(str::to_owned))
    }

    /// Read a value relative to the machine's address.
    pub fn get(&self, address: &Address) -> Option<Value> {
        self.store.read_value(&self.base.join(address))
    }

    /// Write a value relative to the machine's address.
    pub fn set(&self, address: &Address, payload: impl Into<Payload>) -> StoreResult<()> {
        self.store
            .write_set(&self.base.join(address), payload.into(), true)
    }

    /// Delete a key relative to the machine's address.
    pub fn delete(&self, address: &Address) -> StoreResult<()> {
        self.store.write_delete(&self.base.join(address), true)
    }

    /// Append to an array relative to the machine's address.
    pub fn push(&self, address: &Address, payload: impl Into<Payload>) -> StoreResult<()> {
        let full = self.base.join(address);
        let len = self.store.array_len(&full)?;
        self.store
            .write_splice(&full, len, 0, vec![payload.into()], true)
    }
}

impl Store {
    /// Dispatch an event to the machine at `address`.
    ///
    /// Opens (or joins) a batch scope for the duration, so handler
    /// mutations and the transition's atomic field swap flush together.
    pub(crate) fn dispatch(&self, address: &Address, event: &str, payload: Value) -> StoreResult<()> {
        let Some(def) = self.inner.machines.get(address).cloned() else {
            return Err(StoreError::UnknownMachine {
                address: address.clone(),
            });
        };

        let guard = crate::batch::BatchGuard::enter(self);

        let current = self
            .peek_value(&address.clone().field("current"))
            .and_then(|value| value.as_str().map(str::to_owned))
            .ok_or_else(|| StoreError::unknown_state(address.clone(), "<missing current>"))?;

        let Some(state) = def.states.get(&current) else {
            return Err(StoreError::unknown_state(address.clone(), current));
        };

        let Some(handler) = state.transitions.get(event).cloned() else {
            tracing::debug!(machine = %address, state = %current, event, "event ignored");
            return Ok(());
        };

        let scope = TransitionScope {
            store: self.clone(),
            base: address.clone(),
        };
        let outcome = handler(&scope, payload);

        if let Some(transition) = outcome {
            let Some(target) = def.states.get(&transition.target) else {
                return Err(StoreError::unknown_state(address.clone(), transition.target));
            };

            // Atomic shape swap: drop old-state-only fields, merge the new
            // state's fields, then move `current`.
            for field in state.fields.keys() {
                let kept = target.fields.contains_key(field)
                    || transition.fields.contains_key(field)
                    || def.base.contains_key(field);
                if !kept {
                    self.write_delete(&address.child(Key::field(field)), true)?;
                }
            }
            for (field, default) in &target.fields {
                if !transition.fields.contains_key(field) {
                    self.write_set(
                        &address.child(Key::field(field)),
                        Payload::Value(default.clone()),
                        true,
                    )?;
                }
            }
            for (field, value) in &transition.fields {
                self.write_set(
                    &address.child(Key::field(field)),
                    Payload::Value(value.clone()),
                    true,
                )?;
            }
            self.write_set(
                &address.child(Key::field("current")),
                Payload::Value(Value::String(transition.target.clone())),
                true,
            )?;
            tracing::debug!(machine = %address, from = %current, to = %transition.target, event, "transition");
        }

        drop(guard);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_instance_value_merges_base_and_initial_fields() {
        let def = MachineDef::new("IDLE")
            .base_field("retries", json!(0))
            .state("IDLE", StateDef::new().field("hint", json!("ready")));

        assert_eq!(
            def.instance_value(),
            json!({"current": "IDLE", "retries": 0, "hint": "ready"})
        );
    }
}
