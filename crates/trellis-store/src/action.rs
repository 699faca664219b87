//! Operation handlers and the context they run with.
//!
//! Operations ("actions") are the only sanctioned entry point for mutating
//! the tracked tree. A handler receives an [`OpContext`] carrying the root
//! state handle, a proxy for invoking sibling operations, and the injected
//! effect handles. Batching is managed by the runner in
//! [`Store::run`](crate::Store::run); handlers never see it directly.

use crate::effects::Effects;
use crate::error::StoreError;
use crate::handle::StateHandle;
use crate::store::Store;
use futures::future::BoxFuture;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

/// The result of an operation.
pub type ActionResult = Result<Value, StoreError>;

/// A registered, type-erased operation handler.
pub type ActionHandler =
    Arc<dyn Fn(OpContext, Value) -> BoxFuture<'static, ActionResult> + Send + Sync>;

/// The context an operation runs with.
pub struct OpContext {
    /// Root handle on the tracked tree.
    pub state: StateHandle,
    /// Invoke sibling operations; nested calls share the caller's batch.
    pub actions: ActionProxy,
    /// Injected side-effect handles.
    pub effects: Effects,
}

/// Cross-operation call handle.
///
/// Calling through the proxy re-enters the runner: the already-open batch
/// scope is joined, so an operation calling another operation still
/// produces a single flush.
#[derive(Clone)]
pub struct ActionProxy {
    store: Store,
}

impl ActionProxy {
    pub(crate) fn new(store: Store) -> Self {
        Self { store }
    }

    /// Invoke a named operation with a payload.
    pub fn call(&self, name: &str, payload: Value) -> BoxFuture<'static, ActionResult> {
        let store = self.store.clone();
        let name = name.to_owned();
        Box::pin(async move { store.run(&name, payload).await })
    }
}

/// Wrap an async closure into a registered handler.
///
/// This is what [`StoreBuilder::action`](crate::StoreBuilder::action) uses
/// under the hood; reach for it directly when building handler maps by
/// hand (e.g. for [`Module`](crate::Module) composition).
pub fn action<F, Fut>(f: F) -> ActionHandler
where
    F: Fn(OpContext, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ActionResult> + Send + 'static,
{
    Arc::new(move |ctx, payload| Box::pin(f(ctx, payload)))
}

/// Wrap a synchronous closure into a registered handler.
pub fn sync_action<F>(f: F) -> ActionHandler
where
    F: Fn(OpContext, Value) -> ActionResult + Send + Sync + 'static,
{
    Arc::new(move |ctx, payload| {
        let result = f(ctx, payload);
        Box::pin(std::future::ready(result))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Store;
    use serde_json::json;
    use trellis_state::address;

    #[test]
    fn test_sync_action_runs_to_completion() {
        let store = Store::builder()
            .state(json!({"hits": 0}))
            .action_handler(
                "bump",
                sync_action(|ctx, _| {
                    ctx.state.set(&address!("hits"), json!(1))?;
                    Ok(Value::Null)
                }),
            )
            .build();

        futures::executor::block_on(store.run("bump", Value::Null)).unwrap();
        assert_eq!(store.reader().get(&address!("hits")), Some(json!(1)));
    }

    #[test]
    fn test_unknown_action() {
        let store = Store::builder().state(json!({})).build();
        let err = futures::executor::block_on(store.run("missing", Value::Null)).unwrap_err();
        assert!(matches!(err, StoreError::UnknownAction { .. }));
    }
}
