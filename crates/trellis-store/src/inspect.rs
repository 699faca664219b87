//! Inspection event feed.
//!
//! The store emits a stream of lifecycle events (operation start/end,
//! individual mutations, flushes, derived-value activity) to an optional
//! hook so external tooling can observe it without being part of the core.

use serde::Serialize;
use std::sync::Mutex;
use trellis_state::{Address, Mutation};

/// An event on the store's inspection feed.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum StoreEvent {
    /// An operation began executing.
    OperationStarted {
        /// The operation name.
        name: String,
    },
    /// An operation finished (successfully or not).
    OperationFinished {
        /// The operation name.
        name: String,
        /// Whether the operation completed without error.
        ok: bool,
    },
    /// A mutation was recorded.
    Mutated {
        /// The recorded mutation.
        mutation: Mutation,
    },
    /// A batch flushed: touched addresses were computed and observers
    /// notified.
    Flushed {
        /// Distinct addresses the batch touched.
        touched: Vec<Address>,
        /// How many observers were notified.
        notified: usize,
    },
    /// A derived entry was invalidated by a flush.
    DerivedInvalidated {
        /// The derived entry's address.
        address: Address,
    },
    /// A derived entry recomputed its value on read.
    DerivedRecomputed {
        /// The derived entry's address.
        address: Address,
    },
}

/// Hook receiving every store event.
///
/// Implementations must be cheap or hand off to their own channel; events
/// are delivered synchronously from inside store calls.
pub trait Inspector: Send + Sync {
    /// Handle a single event.
    fn on_event(&self, event: &StoreEvent);
}

/// An inspector that records every event it sees. Mainly useful in tests.
#[derive(Default)]
pub struct RecordingInspector {
    events: Mutex<Vec<StoreEvent>>,
}

impl RecordingInspector {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clone out the events recorded so far.
    pub fn events(&self) -> Vec<StoreEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Count recorded flush events.
    pub fn flush_count(&self) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| matches!(e, StoreEvent::Flushed { .. }))
            .count()
    }
}

impl Inspector for RecordingInspector {
    fn on_event(&self, event: &StoreEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use trellis_state::address;

    #[test]
    fn test_event_serde_shape() {
        let event = StoreEvent::Mutated {
            mutation: Mutation::set(address!("count"), None, json!(1)),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "mutated");
        assert_eq!(json["mutation"]["type"], "set");

        let event = StoreEvent::Flushed {
            touched: vec![address!("count")],
            notified: 2,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "flushed");
        assert_eq!(json["notified"], 2);
    }

    #[test]
    fn test_recording_inspector() {
        let recorder = RecordingInspector::new();
        recorder.on_event(&StoreEvent::OperationStarted {
            name: "increment".into(),
        });
        recorder.on_event(&StoreEvent::Flushed {
            touched: vec![],
            notified: 0,
        });

        assert_eq!(recorder.events().len(), 2);
        assert_eq!(recorder.flush_count(), 1);
    }
}
