//! Reactive state-tracking store.
//!
//! `trellis-store` wraps a JSON-shaped state tree in tracked containers,
//! records fine-grained read/write dependencies, and notifies observers
//! only when the paths they actually read have changed.
//!
//! # Core concepts
//!
//! - **Tracked tree**: every object/array reachable from the root lives in
//!   a container arena; primitives stay untracked, addressed through their
//!   parent's key. Each container has exactly one address at a time.
//! - **Operations**: the only sanctioned entry point for mutation. The
//!   runner opens a batch scope, holds it across `await` points, and
//!   flushes exactly once when the operation fully settles.
//! - **Observers**: components and reactions subscribe, collect the paths
//!   they read, and are notified at most once per flush when those paths
//!   change.
//! - **Derived fields**: cached pure projections, invalidated by flushes
//!   and recomputed lazily on the next read.
//! - **Transition machines**: state subtrees restricted to declared named
//!   states and transitions, mutated only through `send`.
//! - **Snapshot/rehydrate**: plain-value snapshots (with model codecs for
//!   typed containers) and structural rehydration through the normal
//!   write pipeline.
//!
//! # Quick start
//!
//! ```
//! use trellis_store::Store;
//! use trellis_state::address;
//! use serde_json::{json, Value};
//!
//! let store = Store::builder()
//!     .state(json!({"count": 0, "posts": []}))
//!     .action("increment", |ctx, _| async move {
//!         let count = ctx.state.get(&address!("count")).and_then(|v| v.as_i64()).unwrap_or(0);
//!         ctx.state.set(&address!("count"), json!(count + 1))?;
//!         Ok(Value::Null)
//!     })
//!     .build();
//!
//! futures::executor::block_on(store.run("increment", Value::Null)).unwrap();
//! assert_eq!(store.reader().get(&address!("count")), Some(json!(1)));
//! ```

mod action;
mod batch;
mod codec;
mod derived;
mod effects;
mod error;
mod handle;
mod inspect;
mod machine;
mod observe;
mod store;
mod tree;

pub use action::{action, sync_action, ActionHandler, ActionProxy, ActionResult, OpContext};
pub use codec::{serde_model, Factories, FactoryShape, ModelCodec};
pub use derived::Projection;
pub use effects::Effects;
pub use error::{StoreError, StoreResult};
pub use handle::{Payload, StateHandle, StateReader, TrackedRef};
pub use inspect::{Inspector, RecordingInspector, StoreEvent};
pub use machine::{MachineDef, StateDef, Transition, TransitionHandler, TransitionScope};
pub use observe::{DepEntry, DependencyTree, ObserverId};
pub use store::{Module, Store, StoreBuilder, Subscription};

// Re-export the value-level foundation for convenience
pub use trellis_state::{
    address, parse_address, Address, Key, Mutation, MutationKind, MutationLog, Value,
};
