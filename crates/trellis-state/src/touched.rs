//! Touched-path computation and intersection tests.
//!
//! A flush needs to know which addresses a batch of mutations affected, and
//! whether a given dependency path intersects that set.

use crate::{Address, MutationLog};
use std::collections::BTreeSet;

/// Compute the set of distinct addresses touched by a mutation log.
///
/// # Examples
///
/// ```
/// use trellis_state::{address, compute_touched, Mutation, MutationLog};
/// use serde_json::json;
///
/// let log = MutationLog::new()
///     .with(Mutation::set(address!("user", "name"), None, json!("Alice")))
///     .with(Mutation::set(address!("user", "name"), None, json!("Bob")))
///     .with(Mutation::delete(address!("draft"), None));
///
/// let touched = compute_touched(&log);
/// assert_eq!(touched.len(), 2);
/// assert!(touched.contains(&address!("user", "name")));
/// assert!(touched.contains(&address!("draft")));
/// ```
pub fn compute_touched(log: &MutationLog) -> BTreeSet<Address> {
    log.iter().map(|m| m.path.clone()).collect()
}

/// Test whether a dependency path intersects a set of touched addresses.
///
/// A dependency matches a touched address `M` when `M` is an ancestor of the
/// dependency (wholesale replacement of an ancestor, or the exact address),
/// or, for `nested` dependencies, when `M` lies anywhere underneath it. This
/// is the over-notifying reading: a nested read of a container reacts to any
/// write inside that subtree.
///
/// # Examples
///
/// ```
/// use trellis_state::{address, intersects};
/// use std::collections::BTreeSet;
///
/// let touched = BTreeSet::from([address!("user", "name")]);
///
/// assert!(intersects(&touched, &address!("user", "name"), false));
/// assert!(intersects(&touched, &address!("user"), true));       // nested read of user
/// assert!(!intersects(&touched, &address!("user"), false));     // key-only read of user
/// assert!(intersects(&touched, &address!("user", "name", "x"), false)); // ancestor replaced
/// assert!(!intersects(&touched, &address!("posts"), true));
/// ```
pub fn intersects(touched: &BTreeSet<Address>, dependency: &Address, nested: bool) -> bool {
    touched
        .iter()
        .any(|m| m.is_ancestor_of(dependency) || (nested && dependency.is_ancestor_of(m)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{address, Mutation};
    use serde_json::json;

    fn touched(addresses: &[Address]) -> BTreeSet<Address> {
        addresses.iter().cloned().collect()
    }

    #[test]
    fn test_compute_touched_dedupes() {
        let log = MutationLog::new()
            .with(Mutation::set(address!("a"), None, json!(1)))
            .with(Mutation::set(address!("a"), None, json!(2)));
        assert_eq!(compute_touched(&log).len(), 1);
    }

    #[test]
    fn test_exact_match() {
        let t = touched(&[address!("count")]);
        assert!(intersects(&t, &address!("count"), false));
    }

    #[test]
    fn test_ancestor_replacement_matches_leaf_dependency() {
        // Whole `user` replaced: a reader of user.name must be notified.
        let t = touched(&[address!("user")]);
        assert!(intersects(&t, &address!("user", "name"), false));
    }

    #[test]
    fn test_descendant_write_needs_nested() {
        let t = touched(&[address!("user", "name")]);
        assert!(!intersects(&t, &address!("user"), false));
        assert!(intersects(&t, &address!("user"), true));
    }

    #[test]
    fn test_disjoint_paths_never_match() {
        let t = touched(&[address!("posts", 0)]);
        assert!(!intersects(&t, &address!("user", "name"), false));
        assert!(!intersects(&t, &address!("user"), true));
    }
}
