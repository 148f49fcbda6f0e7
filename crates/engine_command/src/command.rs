//! Tagged commands of the queued (non-deduplicating) mode.

use std::fmt;

use engine_component::Component;

use crate::entity::SharedEntity;

/// One recorded mutation, applied in recording order.
pub enum Command {
    Add {
        entity: SharedEntity,
        type_bit: u8,
        component: Box<dyn Component>,
    },
    Remove {
        entity: SharedEntity,
        type_bit: u8,
    },
    SetActive {
        entity: SharedEntity,
        active: bool,
    },
    Destroy {
        entity: SharedEntity,
    },
}

impl Command {
    /// The entity the command targets.
    #[must_use]
    pub fn entity(&self) -> &SharedEntity {
        match self {
            Self::Add { entity, .. }
            | Self::Remove { entity, .. }
            | Self::SetActive { entity, .. }
            | Self::Destroy { entity } => entity,
        }
    }

    /// Short tag for log output.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Add { .. } => "add",
            Self::Remove { .. } => "remove",
            Self::SetActive { .. } => "set_active",
            Self::Destroy { .. } => "destroy",
        }
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Command");
        s.field("kind", &self.kind())
            .field("entity", &self.entity().id());
        match self {
            Self::Add {
                type_bit, component, ..
            } => s
                .field("type_bit", type_bit)
                .field("component", &component.component_type().name()),
            Self::Remove { type_bit, .. } => s.field("type_bit", type_bit),
            Self::SetActive { active, .. } => s.field("active", active),
            Self::Destroy { .. } => &mut s,
        };
        s.finish()
    }
}
