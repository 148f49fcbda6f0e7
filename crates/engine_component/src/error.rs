//! Error types for the component core.

use thiserror::Error;

/// Errors raised by [`ComponentRegistry`](crate::ComponentRegistry).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Every bit of the 64-bit mask is already assigned.
    #[error("cannot register {name}: registry already holds {max} component types")]
    CapacityExceeded { name: String, max: usize },

    /// A lookup named a type that was never registered in this scope.
    #[error("component type not registered: {0}")]
    UnregisteredType(String),
}

/// Errors raised by a single component's dynamic field access.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ComponentError {
    /// The component type has no field with this name.
    #[error("{component} has no field named {field}")]
    UnknownField { component: String, field: String },

    /// The value does not fit the field's declared type.
    #[error("value does not fit {component}.{field}")]
    FieldType { component: String, field: String },
}

/// Errors raised by the storage strategies.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The component handed to a storage is of a different type.
    #[error("storage for {expected} cannot hold {found}")]
    TypeMismatch { expected: String, found: String },

    /// The storage's component type has no factory, so stored components
    /// could never be rebuilt.
    #[error("component type {0} has no factory")]
    NoFactory(String),

    #[error("failed to encode collection field: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("failed to decode collection field: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error(transparent)]
    Component(#[from] ComponentError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}
