//! Address, mutation event, and replay primitives for the trellis store.
//!
//! `trellis-state` is the value-level foundation underneath `trellis-store`:
//! structural addresses into a JSON state tree, mutation events recorded at
//! those addresses, and pure application/replay of mutation logs.
//!
//! # Deterministic replay
//!
//! ```text
//! State' = apply_log(State, MutationLog)
//! ```
//!
//! - Same `(State, MutationLog)` always produces the same `State'`
//! - `apply_log` is a pure function that never mutates its input
//! - A recorded log replays standalone: splice and method-call events carry
//!   whole-container after-images
//!
//! # Quick Start
//!
//! ```
//! use trellis_state::{address, apply_log, compute_touched, Mutation, MutationLog};
//! use serde_json::json;
//!
//! let state = json!({"count": 0, "user": {"name": "Alice"}});
//!
//! let log = MutationLog::new()
//!     .with(Mutation::set(address!("count"), Some(json!(0)), json!(1)))
//!     .with(Mutation::set(address!("user", "name"), Some(json!("Alice")), json!("Bob")));
//!
//! let next = apply_log(&state, &log).unwrap();
//! assert_eq!(next["count"], 1);
//! assert_eq!(next["user"]["name"], "Bob");
//! assert_eq!(state["count"], 0); // original unchanged
//!
//! let touched = compute_touched(&log);
//! assert!(touched.contains(&address!("count")));
//! ```

mod address;
mod apply;
mod error;
mod mutation;
mod touched;

pub use address::{parse_address, Address, Key};
pub use apply::{apply_in_place, apply_log, apply_mutation, get_at};
pub use error::{value_type_name, ValueError, ValueResult};
pub use mutation::{Mutation, MutationKind, MutationLog};
pub use touched::{compute_touched, intersects};

// Re-export serde_json::Value for convenience
pub use serde_json::Value;
