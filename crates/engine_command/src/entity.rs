//! The entity side of deferred mutation.
//!
//! The command buffer never owns entities. It holds shared handles and calls
//! back into them at flush time; the scene that owns the entity decides what
//! an add or a destroy actually means.

use std::cell::RefCell;
use std::rc::Rc;

use engine_component::{Component, ComponentRegistry, ComponentType, Entity};

use crate::error::EntityError;

/// Mutation interface of a scene-owned entity.
///
/// Methods take `&self` because handles are shared; implementations use
/// interior mutability and may re-enter the command buffer.
pub trait EntityHandle {
    fn id(&self) -> Entity;

    /// Human-readable name for log output.
    fn name(&self) -> String;

    /// `false` once the entity has left its scene. Dead handles are skipped
    /// at flush.
    fn is_alive(&self) -> bool;

    /// Attach `component`, replacing one of the same type.
    ///
    /// # Errors
    ///
    /// Returns an [`EntityError`] if the scene refuses the component.
    fn add_component(&self, component: Box<dyn Component>) -> Result<(), EntityError>;

    /// Detach the component of type `ty`.
    ///
    /// # Errors
    ///
    /// Returns [`EntityError::MissingComponent`] if there is none.
    fn remove_component_by_type(&self, ty: &ComponentType) -> Result<(), EntityError>;

    /// Remove the entity from its scene.
    ///
    /// # Errors
    ///
    /// Returns an [`EntityError`] if the entity is already gone.
    fn destroy(&self) -> Result<(), EntityError>;

    /// # Errors
    ///
    /// Returns an [`EntityError`] if the entity is already gone.
    fn set_active(&self, active: bool) -> Result<(), EntityError>;
}

/// Shared handle to an entity.
pub type SharedEntity = Rc<dyn EntityHandle>;

/// Registry shared between a scene and its command buffer.
pub type SharedRegistry = Rc<RefCell<ComponentRegistry>>;
