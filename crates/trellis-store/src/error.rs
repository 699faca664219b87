//! Error types for store operations.

use crate::observe::ObserverId;
use thiserror::Error;
use trellis_state::{Address, ValueError};

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A container already attached at one address was assigned at another.
    #[error("container already attached at {existing}, cannot attach at {address}")]
    AddressConflict {
        /// The address the caller tried to attach at.
        address: Address,
        /// The address the container currently occupies.
        existing: Address,
    },

    /// A write was attempted with no open batch scope, or, in strict mode,
    /// outside a sanctioned entry point.
    #[error("mutation outside action at {address}")]
    MutationOutsideAction {
        /// The address of the offending write.
        address: Address,
    },

    /// `stop_collecting` did not match the active collector.
    #[error("collector mismatch: stopped {found}, active {active:?}")]
    CollectorMismatch {
        /// The observer passed to `stop_collecting`.
        found: ObserverId,
        /// The observer actually on top of the collector stack, if any.
        active: Option<ObserverId>,
    },

    /// Dispatch of an unregistered operation.
    #[error("unknown action: {name}")]
    UnknownAction {
        /// The requested operation name.
        name: String,
    },

    /// No transition machine is registered at the address.
    #[error("no machine registered at {address}")]
    UnknownMachine {
        /// The address the send targeted.
        address: Address,
    },

    /// A machine referenced a state name absent from its declaration.
    #[error("unknown state {state:?} for machine at {address}")]
    UnknownState {
        /// The machine's address.
        address: Address,
        /// The undeclared state name.
        state: String,
    },

    /// Snapshot reached a model-tagged container with no registered codec.
    #[error("no codec registered for model {model:?} at {address}")]
    UnregisteredModel {
        /// The model tag on the container.
        model: String,
        /// The container's address.
        address: Address,
    },

    /// The address does not resolve to a live container or value.
    #[error("path not found: {address}")]
    PathNotFound {
        /// The address that was not found.
        address: Address,
    },

    /// An operation handler failed.
    #[error("operation failed: {message}")]
    Operation {
        /// Description of what went wrong.
        message: String,
    },

    /// Value-level error from applying a mutation.
    #[error(transparent)]
    Value(#[from] ValueError),
}

impl StoreError {
    /// Create an address conflict error.
    #[inline]
    pub fn address_conflict(address: Address, existing: Address) -> Self {
        StoreError::AddressConflict { address, existing }
    }

    /// Create a mutation outside action error.
    #[inline]
    pub fn mutation_outside_action(address: Address) -> Self {
        StoreError::MutationOutsideAction { address }
    }

    /// Create an unknown action error.
    #[inline]
    pub fn unknown_action(name: impl Into<String>) -> Self {
        StoreError::UnknownAction { name: name.into() }
    }

    /// Create an unknown state error.
    #[inline]
    pub fn unknown_state(address: Address, state: impl Into<String>) -> Self {
        StoreError::UnknownState {
            address,
            state: state.into(),
        }
    }

    /// Create an unregistered model error.
    #[inline]
    pub fn unregistered_model(model: impl Into<String>, address: Address) -> Self {
        StoreError::UnregisteredModel {
            model: model.into(),
            address,
        }
    }

    /// Create a path not found error.
    #[inline]
    pub fn path_not_found(address: Address) -> Self {
        StoreError::PathNotFound { address }
    }

    /// Create an operation failure from a message.
    #[inline]
    pub fn operation(message: impl Into<String>) -> Self {
        StoreError::Operation {
            message: message.into(),
        }
    }
}
