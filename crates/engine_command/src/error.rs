//! Error types for deferred entity mutation.

use engine_component::{Entity, RegistryError, StorageError};

/// Failure reported by an [`EntityHandle`](crate::EntityHandle) when a
/// mutation is applied.
#[derive(Debug, thiserror::Error)]
pub enum EntityError {
    /// The entity has left its scene.
    #[error("entity {0} is no longer alive")]
    Dead(Entity),

    /// Removal of a component the entity does not have.
    #[error("component '{component}' not found on entity {entity}")]
    MissingComponent { entity: Entity, component: String },

    /// The entity's storage rejected the component.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The owning scene refused the operation.
    #[error("{0}")]
    Rejected(String),
}

/// Failure while recording a command.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// The component's type has no registry bit.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}
