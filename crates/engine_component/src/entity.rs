//! Entity identifiers and serialisable entity references.
//!
//! Components record the entity they are attached to as a plain [`Entity`]
//! value. Who issues ids is up to the host scene; the core only needs them to
//! be unique within one scene.

use serde::{Deserialize, Serialize};

/// Scene-local entity id. `0` is reserved for [`Entity::INVALID`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Entity(pub u64);

impl Entity {
    /// Never issued; marks a detached or unresolved reference.
    pub const INVALID: Entity = Entity(0);

    #[must_use]
    pub const fn from_raw(id: u64) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn id(self) -> u64 {
        self.0
    }

    /// `false` only for [`Entity::INVALID`].
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Entity({})", self.0)
    }
}

/// A reference from a component field to another entity.
///
/// The `id` is only meaningful inside the scene that produced it; the `guid`
/// survives a save/load cycle and is what a loader uses to re-link the
/// reference once every entity has been rebuilt.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    /// Scene-local entity identifier at the time the reference was taken.
    pub id: Entity,
    /// Stable identifier of the target entity.
    pub guid: String,
}

impl EntityRef {
    /// Create a reference to `id` carrying the stable `guid`.
    #[must_use]
    pub fn new(id: Entity, guid: impl Into<String>) -> Self {
        Self {
            id,
            guid: guid.into(),
        }
    }
}
