//! Structural addresses for locating containers in a state tree.
//!
//! An address is a sequence of keys describing one position from the tree
//! root. Each key is either an object field or an array index.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single key in an address.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Key {
    /// Object field access: `{"field": value}`
    Field(String),
    /// Array index access: `[index]`
    Index(usize),
}

impl Key {
    /// Create a field key.
    #[inline]
    pub fn field(name: impl Into<String>) -> Self {
        Key::Field(name.into())
    }

    /// Create an index key.
    #[inline]
    pub fn index(i: usize) -> Self {
        Key::Index(i)
    }

    /// Get the field name if this is a field key.
    #[inline]
    pub fn as_field(&self) -> Option<&str> {
        match self {
            Key::Field(name) => Some(name),
            Key::Index(_) => None,
        }
    }

    /// Get the index if this is an index key.
    #[inline]
    pub fn as_index(&self) -> Option<usize> {
        match self {
            Key::Field(_) => None,
            Key::Index(i) => Some(*i),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Field(name) => write!(f, ".{}", name),
            Key::Index(i) => write!(f, "[{}]", i),
        }
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::Field(s)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Field(s.to_owned())
    }
}

impl From<usize> for Key {
    fn from(i: usize) -> Self {
        Key::Index(i)
    }
}

/// A complete address into a state tree.
///
/// Addresses are immutable sequences of keys. Builder methods return new
/// values; the empty address is the tree root.
///
/// # Examples
///
/// ```
/// use trellis_state::Address;
///
/// let addr = Address::root().field("users").index(0).field("name");
/// assert_eq!(addr.len(), 3);
/// assert_eq!(addr.to_string(), "$.users[0].name");
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address(Vec<Key>);

impl Address {
    /// Create the root address (no keys).
    #[inline]
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Create an address from a vector of keys.
    #[inline]
    pub fn from_keys(keys: Vec<Key>) -> Self {
        Self(keys)
    }

    /// Append a field key (builder pattern).
    #[inline]
    pub fn field(mut self, name: impl Into<String>) -> Self {
        self.0.push(Key::Field(name.into()));
        self
    }

    /// Append an index key (builder pattern).
    #[inline]
    pub fn index(mut self, i: usize) -> Self {
        self.0.push(Key::Index(i));
        self
    }

    /// Push a key onto the address (mutating).
    #[inline]
    pub fn push(&mut self, key: Key) {
        self.0.push(key);
    }

    /// Pop the last key from the address.
    #[inline]
    pub fn pop(&mut self) -> Option<Key> {
        self.0.pop()
    }

    /// Get the keys of this address.
    #[inline]
    pub fn keys(&self) -> &[Key] {
        &self.0
    }

    /// Check whether this address is the root.
    #[inline]
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of keys in this address.
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check whether this address has no keys.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Get the last key.
    #[inline]
    pub fn last(&self) -> Option<&Key> {
        self.0.last()
    }

    /// Concatenate two addresses.
    #[inline]
    pub fn join(&self, other: &Address) -> Address {
        let mut result = self.clone();
        result.0.extend(other.0.iter().cloned());
        result
    }

    /// Append a single key, returning a new address.
    #[inline]
    pub fn child(&self, key: Key) -> Address {
        let mut result = self.clone();
        result.0.push(key);
        result
    }

    /// The address without its last key, or `None` for the root.
    #[inline]
    pub fn parent(&self) -> Option<Address> {
        if self.0.is_empty() {
            None
        } else {
            Some(Address(self.0[..self.0.len() - 1].to_vec()))
        }
    }

    /// Reflexive ancestor test: true when every key of `self` matches the
    /// start of `other`. The root is an ancestor of every address, and an
    /// address is an ancestor of itself.
    ///
    /// # Examples
    ///
    /// ```
    /// use trellis_state::address;
    ///
    /// let parent = address!("user");
    /// let child = address!("user", "name");
    ///
    /// assert!(parent.is_ancestor_of(&child));
    /// assert!(!child.is_ancestor_of(&parent));
    /// assert!(parent.is_ancestor_of(&parent));
    /// ```
    #[inline]
    pub fn is_ancestor_of(&self, other: &Address) -> bool {
        other.0.starts_with(&self.0)
    }

    /// The remainder of `self` after stripping `prefix`, when `prefix` is an
    /// ancestor.
    pub fn relative_to(&self, prefix: &Address) -> Option<Address> {
        if prefix.is_ancestor_of(self) {
            Some(Address(self.0[prefix.len()..].to_vec()))
        } else {
            None
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "$")?;
        for key in &self.0 {
            write!(f, "{}", key)?;
        }
        Ok(())
    }
}

impl FromIterator<Key> for Address {
    fn from_iter<I: IntoIterator<Item = Key>>(iter: I) -> Self {
        Address(iter.into_iter().collect())
    }
}

impl IntoIterator for Address {
    type Item = Key;
    type IntoIter = std::vec::IntoIter<Key>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Address {
    type Item = &'a Key;
    type IntoIter = std::slice::Iter<'a, Key>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl std::ops::Index<usize> for Address {
    type Output = Key;

    fn index(&self, index: usize) -> &Self::Output {
        &self.0[index]
    }
}

/// Parse a dot-separated field path into an `Address`.
///
/// Empty segments are skipped, so leading/trailing/doubled dots are
/// tolerated. Index keys cannot be expressed in dot notation; use the
/// [`address!`](crate::address) macro or builder methods for those.
pub fn parse_address(path: &str) -> Address {
    let mut result = Address::root();
    for segment in path.split('.') {
        if !segment.is_empty() {
            result = result.field(segment);
        }
    }
    result
}

/// Construct an [`Address`] from a sequence of keys.
///
/// # Examples
///
/// ```
/// use trellis_state::address;
///
/// // String literals become Field keys
/// let a = address!("users", "alice", "email");
///
/// // Numbers become Index keys
/// let a = address!("items", 0, "name");
/// ```
#[macro_export]
macro_rules! address {
    () => {
        $crate::Address::root()
    };
    ($($key:expr),+ $(,)?) => {{
        let mut a = $crate::Address::root();
        $(
            a.push($crate::Key::from($key));
        )+
        a
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_construction() {
        let addr = Address::root().field("users").index(0).field("name");
        assert_eq!(addr.len(), 3);
        assert_eq!(addr[0], Key::Field("users".into()));
        assert_eq!(addr[1], Key::Index(0));
        assert_eq!(addr[2], Key::Field("name".into()));
    }

    #[test]
    fn test_address_display() {
        let addr = Address::root().field("users").index(0).field("name");
        assert_eq!(format!("{}", addr), "$.users[0].name");
        assert_eq!(format!("{}", Address::root()), "$");
    }

    #[test]
    fn test_address_macro() {
        let a = address!("users", 0, "name");
        assert_eq!(a.len(), 3);
        assert_eq!(a[0], Key::Field("users".into()));
        assert_eq!(a[1], Key::Index(0));
    }

    #[test]
    fn test_parent() {
        let addr = address!("a", "b");
        let parent = addr.parent().unwrap();
        assert_eq!(parent, address!("a"));
        assert!(Address::root().parent().is_none());
    }

    #[test]
    fn test_is_ancestor_of() {
        let root = Address::root();
        let user = address!("user");
        let name = address!("user", "name");

        assert!(root.is_ancestor_of(&name));
        assert!(user.is_ancestor_of(&name));
        assert!(user.is_ancestor_of(&user));
        assert!(!name.is_ancestor_of(&user));
        assert!(!address!("posts").is_ancestor_of(&name));
    }

    #[test]
    fn test_relative_to() {
        let full = address!("user", "addresses", 0);
        let rel = full.relative_to(&address!("user")).unwrap();
        assert_eq!(rel, address!("addresses", 0));
        assert!(full.relative_to(&address!("posts")).is_none());
    }

    #[test]
    fn test_parse_address() {
        assert_eq!(parse_address(""), Address::root());
        assert_eq!(parse_address("a.b"), address!("a", "b"));
        assert_eq!(parse_address(".a..b."), address!("a", "b"));
    }

    #[test]
    fn test_address_serde() {
        let addr = address!("users", 0, "name");
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, r#"["users",0,"name"]"#);
        let parsed: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(addr, parsed);
    }
}
