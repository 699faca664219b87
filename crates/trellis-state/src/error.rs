//! Error types for value-level operations.

use crate::Address;
use thiserror::Error;

/// Result type alias for value-level operations.
pub type ValueResult<T> = Result<T, ValueError>;

/// Errors that can occur while applying mutations to a plain value tree.
#[derive(Debug, Error)]
pub enum ValueError {
    /// Type mismatch when navigating a value.
    #[error("type mismatch at {address}: expected {expected}, found {found}")]
    TypeMismatch {
        /// The address where the mismatch occurred.
        address: Address,
        /// The expected type.
        expected: &'static str,
        /// The actual type found.
        found: &'static str,
    },

    /// Array index is out of bounds.
    #[error("index {index} out of bounds (len: {len}) at {address}")]
    IndexOutOfBounds {
        /// The address of the array.
        address: Address,
        /// The index that was accessed.
        index: usize,
        /// The actual length of the array.
        len: usize,
    },

    /// JSON serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ValueError {
    /// Create a type mismatch error.
    #[inline]
    pub fn type_mismatch(address: Address, expected: &'static str, found: &'static str) -> Self {
        ValueError::TypeMismatch {
            address,
            expected,
            found,
        }
    }

    /// Create an index out of bounds error.
    #[inline]
    pub fn index_out_of_bounds(address: Address, index: usize, len: usize) -> Self {
        ValueError::IndexOutOfBounds {
            address,
            index,
            len,
        }
    }
}

/// Get the type name of a JSON value.
#[inline]
pub fn value_type_name(v: &serde_json::Value) -> &'static str {
    match v {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address;

    #[test]
    fn test_error_display() {
        let err = ValueError::type_mismatch(address!("items", 0), "array", "string");
        assert!(err.to_string().contains("type mismatch"));
        assert!(err.to_string().contains("$.items[0]"));
    }

    #[test]
    fn test_value_type_name() {
        use serde_json::json;

        assert_eq!(value_type_name(&json!(null)), "null");
        assert_eq!(value_type_name(&json!(true)), "boolean");
        assert_eq!(value_type_name(&json!(42)), "number");
        assert_eq!(value_type_name(&json!("hello")), "string");
        assert_eq!(value_type_name(&json!([1, 2, 3])), "array");
        assert_eq!(value_type_name(&json!({"a": 1})), "object");
    }
}
