//! Observer records, dependency trees, and read collection.
//!
//! Every entity interested in change notifications (a view-layer component,
//! a reaction callback, a derived-value entry) is registered here as an
//! observer. While an observer is "collecting", every tracked read is
//! attributed to it; stopping the collection reconciles the freshly read
//! paths against the previous ones so dependencies can change freely
//! between evaluations.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use trellis_state::{intersects, Address};

/// Identifies a registered observer.
///
/// Ids are allocated monotonically, so registration order and id order
/// coincide; notification order within a flush follows id order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ObserverId(pub(crate) u64);

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "observer#{}", self.0)
    }
}

/// How a single dependency path was read.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DepEntry {
    /// True when the read traversed into the container at this address
    /// (materialization, iteration, key listing), so writes anywhere in the
    /// subtree are of interest.
    pub nested: bool,
}

/// The set of paths an observer read during its last evaluation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DependencyTree {
    entries: BTreeMap<Address, DepEntry>,
}

impl DependencyTree {
    /// Create an empty dependency tree.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a read at an address. A nested read upgrades an existing
    /// key-only entry; it is never downgraded.
    pub fn record(&mut self, address: Address, nested: bool) {
        let entry = self.entries.entry(address).or_default();
        entry.nested |= nested;
    }

    /// Look up the entry for an address.
    #[inline]
    pub fn get(&self, address: &Address) -> Option<&DepEntry> {
        self.entries.get(address)
    }

    /// Whether this tree records a read at the address.
    #[inline]
    pub fn contains(&self, address: &Address) -> bool {
        self.entries.contains_key(address)
    }

    /// Iterate over recorded dependencies in address order.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = (&Address, &DepEntry)> {
        self.entries.iter()
    }

    /// Number of recorded dependencies.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no dependencies are recorded.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Test whether any recorded dependency intersects a set of touched
    /// addresses.
    pub fn matches(&self, touched: &BTreeSet<Address>) -> bool {
        self.entries
            .iter()
            .any(|(dep, entry)| intersects(touched, dep, entry.nested))
    }

    /// Entries present in `self` but absent from `newer`. Used to
    /// deregister paths an observer no longer reads.
    pub fn removed_since(&self, newer: &DependencyTree) -> Vec<(Address, DepEntry)> {
        self.entries
            .iter()
            .filter(|(addr, _)| !newer.entries.contains_key(*addr))
            .map(|(addr, entry)| (addr.clone(), *entry))
            .collect()
    }
}

/// What to do when a flush matches an observer.
pub(crate) enum ObserverKind {
    /// Invoke the notify callback.
    Callback(Arc<dyn Fn() + Send + Sync>),
    /// Mark the derived entry at this index dirty.
    Derived(usize),
}

pub(crate) struct ObserverRecord {
    pub kind: ObserverKind,
    pub deps: DependencyTree,
}

/// One level of the collector stack: reads are attributed to the top frame.
pub(crate) struct CollectorFrame {
    pub owner: ObserverId,
    pub deps: DependencyTree,
}

/// Observer registry plus the active collector stack.
#[derive(Default)]
pub(crate) struct Observe {
    pub observers: BTreeMap<ObserverId, ObserverRecord>,
    pub collectors: Vec<CollectorFrame>,
    next_id: u64,
}

impl Observe {
    pub fn allocate(&mut self, kind: ObserverKind) -> ObserverId {
        let id = ObserverId(self.next_id);
        self.next_id += 1;
        self.observers.insert(
            id,
            ObserverRecord {
                kind,
                deps: DependencyTree::new(),
            },
        );
        id
    }

    /// The observer currently collecting, if any.
    pub fn active(&self) -> Option<ObserverId> {
        self.collectors.last().map(|frame| frame.owner)
    }

    /// Record a read into the top collector frame.
    pub fn record(&mut self, address: Address, nested: bool) {
        if let Some(frame) = self.collectors.last_mut() {
            frame.deps.record(address, nested);
        }
    }
}
