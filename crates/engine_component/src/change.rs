//! Epoch-based change detection.
//!
//! Every component carries a `last_write_epoch` stamped by `mark_dirty`. A
//! system keeps a [`ChangeTracker`] holding the epoch at which it last ran and
//! asks whether any of the components it cares about were stamped after that.
//!
//! The epoch itself comes from the host's frame clock through
//! [`EpochSource`]. Nothing here clamps against a clock running backwards.

use std::cell::Cell;

use crate::component::Component;
use crate::entity::Entity;
use crate::registry::ComponentMask;
use crate::storage::StorageManager;

/// Anything that can report the current frame epoch.
pub trait EpochSource {
    fn current_epoch(&self) -> u64;
}

/// A frame counter owned by the host loop.
#[derive(Debug, Default)]
pub struct EpochClock {
    epoch: Cell<u64>,
}

impl EpochClock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn starting_at(epoch: u64) -> Self {
        Self {
            epoch: Cell::new(epoch),
        }
    }

    #[must_use]
    pub fn current(&self) -> u64 {
        self.epoch.get()
    }

    /// Step to the next epoch and return it.
    pub fn advance(&self) -> u64 {
        let next = self.epoch.get() + 1;
        self.epoch.set(next);
        next
    }

    pub fn set(&self, epoch: u64) {
        self.epoch.set(epoch);
    }
}

impl EpochSource for EpochClock {
    fn current_epoch(&self) -> u64 {
        self.current()
    }
}

/// Per-system checkpoint for change queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeTracker {
    last_process_epoch: u64,
}

impl ChangeTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn last_process_epoch(&self) -> u64 {
        self.last_process_epoch
    }

    /// Whether any of `components` was stamped after `since`, which
    /// defaults to the saved checkpoint.
    #[must_use]
    pub fn has_changed(&self, components: &[&dyn Component], since: Option<u64>) -> bool {
        self.has_changed_epochs(components.iter().map(|c| c.last_write_epoch()), since)
    }

    /// [`has_changed`](Self::has_changed) over raw write stamps.
    #[must_use]
    pub fn has_changed_epochs(&self, epochs: impl IntoIterator<Item = u64>, since: Option<u64>) -> bool {
        let since = since.unwrap_or(self.last_process_epoch);
        epochs.into_iter().any(|epoch| epoch > since)
    }

    /// Whether any of `entity`'s components selected by `mask` changed.
    #[must_use]
    pub fn has_entity_changed(
        &self,
        storages: &StorageManager,
        entity: Entity,
        mask: ComponentMask,
        since: Option<u64>,
    ) -> bool {
        self.has_changed_epochs(storages.epochs(entity, mask), since)
    }

    /// Record the source's epoch as of now. Returns the saved value.
    pub fn save_checkpoint(&mut self, source: &dyn EpochSource) -> u64 {
        self.last_process_epoch = source.current_epoch();
        self.last_process_epoch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ComponentRegistry;
    use crate::ComponentDescriptor;

    crate::component! {
        pub struct Transform {
            pub x: f32,
        }
    }

    crate::component! {
        pub struct Particle {
            pub life: f32,
        }
        storage = Columnar;
    }

    #[test]
    fn test_epoch_law() {
        let mut c = Transform::default();
        c.mark_dirty(5);
        let tracker = ChangeTracker::new();
        assert!(tracker.has_changed(&[&c], Some(4)));
        assert!(!tracker.has_changed(&[&c], Some(5)));
    }

    #[test]
    fn test_defaults_to_checkpoint() {
        let clock = EpochClock::starting_at(3);
        let mut tracker = ChangeTracker::new();
        assert_eq!(tracker.save_checkpoint(&clock), 3);

        let mut c = Transform::default();
        c.mark_dirty(3);
        assert!(!tracker.has_changed(&[&c], None));
        c.mark_dirty(clock.advance());
        assert!(tracker.has_changed(&[&c], None));
    }

    #[test]
    fn test_checkpoint_reads_current_epoch() {
        let clock = EpochClock::new();
        let mut tracker = ChangeTracker::new();
        clock.advance();
        clock.advance();
        assert_eq!(tracker.save_checkpoint(&clock), 2);
        clock.set(10);
        assert_eq!(tracker.save_checkpoint(&clock), 10);
        assert_eq!(tracker.last_process_epoch(), 10);
    }

    #[test]
    fn test_regression_is_not_clamped() {
        let mut c = Transform::default();
        c.mark_dirty(9);
        c.mark_dirty(2);
        assert_eq!(c.last_write_epoch(), 2);
    }

    #[test]
    fn test_never_marked_is_unchanged() {
        let c = Transform::default();
        assert!(!ChangeTracker::new().has_changed(&[&c], None));
        assert!(!ChangeTracker::new().has_changed(&[], Some(0)));
    }

    #[test]
    fn test_entity_query_over_both_strategies() {
        let mut registry = ComponentRegistry::new();
        let mut storages = StorageManager::new();
        let t = storages.register(&mut registry, &Transform::descriptor()).unwrap();
        let p = storages.register(&mut registry, &Particle::descriptor()).unwrap();
        let entity = Entity::from_raw(1);
        storages.add(&registry, entity, Box::new(Transform::default())).unwrap();
        storages.add(&registry, entity, Box::new(Particle::default())).unwrap();

        let tracker = ChangeTracker::new();
        let both = ComponentMask::from_bit(t).with(p);
        assert!(!tracker.has_entity_changed(&storages, entity, both, Some(0)));
        storages.mark_dirty(p, entity, 4);
        assert!(tracker.has_entity_changed(&storages, entity, both, Some(3)));
        assert!(!tracker.has_entity_changed(&storages, entity, ComponentMask::from_bit(t), Some(3)));
    }
}
