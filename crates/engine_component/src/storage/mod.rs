//! Component storage strategies.
//!
//! Every component type is stored by exactly one [`ComponentStorage`],
//! chosen from the type's [`StorageStrategy`] when the type is first seen:
//!
//! - [`RecordStorage`] keeps one boxed component per entity. The default.
//! - [`ColumnarStorage`] splits the fields into parallel columns for batch
//!   processing.
//!
//! A [`StorageManager`] owns the storages of one scope, keyed by the type's
//! registry bit index.

mod columnar;
mod record;

use std::any::Any;
use std::collections::HashMap;
use std::fmt;

use tracing::debug;

use crate::component::{Component, ComponentType, StorageStrategy};
use crate::config::StorageConfig;
use crate::entity::Entity;
use crate::error::{RegistryError, StorageError};
use crate::registry::{ComponentMask, ComponentRegistry};

pub use columnar::{Column, ColumnarMut, ColumnarRef, ColumnarStats, ColumnarStorage, FieldColumns};
pub use record::RecordStorage;

/// The interface shared by both storage strategies.
pub trait ComponentStorage: fmt::Debug {
    fn component_type(&self) -> &ComponentType;

    fn strategy(&self) -> StorageStrategy;

    /// Store `component` for `entity`, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::TypeMismatch`] if `component` is of another
    /// type. Columnar storage can also fail to encode a field.
    fn add(&mut self, entity: Entity, component: Box<dyn Component>) -> Result<(), StorageError>;

    /// An independent copy of `entity`'s component.
    fn snapshot(&self, entity: Entity) -> Option<Box<dyn Component>>;

    /// Take `entity`'s component out, detached.
    fn remove(&mut self, entity: Entity) -> Option<Box<dyn Component>>;

    fn contains(&self, entity: Entity) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entities with a component here.
    fn entities(&self) -> Vec<Entity>;

    fn last_write_epoch(&self, entity: Entity) -> Option<u64>;

    /// Stamp `entity`'s component. Returns `false` if there is none.
    fn mark_dirty(&mut self, entity: Entity, epoch: u64) -> bool;

    fn clear(&mut self);

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Create the storage `ty` asks for.
#[must_use]
pub fn create_storage(ty: &ComponentType, config: &StorageConfig) -> Box<dyn ComponentStorage> {
    match ty.strategy() {
        StorageStrategy::Record => Box::new(RecordStorage::new(ty.clone())),
        StorageStrategy::Columnar => Box::new(ColumnarStorage::with_config(ty.clone(), config)),
    }
}

/// All storages of one scope, keyed by registry bit index.
#[derive(Debug, Default)]
pub struct StorageManager {
    storages: HashMap<u8, Box<dyn ComponentStorage>>,
    config: StorageConfig,
}

impl StorageManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_config(config: StorageConfig) -> Self {
        Self {
            storages: HashMap::new(),
            config,
        }
    }

    /// Register `ty` in `registry` and make sure it has a storage.
    ///
    /// # Errors
    ///
    /// Propagates [`RegistryError`] from registration.
    pub fn register(
        &mut self,
        registry: &mut ComponentRegistry,
        ty: &ComponentType,
    ) -> Result<u8, RegistryError> {
        let bit = registry.register(ty)?;
        self.ensure(bit, ty);
        Ok(bit)
    }

    /// The storage at `bit`, created for `ty` if missing.
    ///
    /// A storage created for another type at the same bit (after a hot
    /// reload) is replaced, dropping its contents.
    pub fn ensure(&mut self, bit: u8, ty: &ComponentType) -> &mut dyn ComponentStorage {
        let stale = self
            .storages
            .get(&bit)
            .is_some_and(|s| s.component_type() != ty);
        if stale {
            debug!(component = ty.name(), type_bit = bit, "replacing storage for reloaded type");
            self.storages.remove(&bit);
        }
        let config = &self.config;
        self.storages
            .entry(bit)
            .or_insert_with(|| {
                debug!(component = ty.name(), type_bit = bit, strategy = ?ty.strategy(), "created storage");
                create_storage(ty, config)
            })
            .as_mut()
    }

    /// Store `component` for `entity`, returning the type's bit.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Registry`] if the type is not registered, or
    /// the storage's own error.
    pub fn add(
        &mut self,
        registry: &ComponentRegistry,
        entity: Entity,
        component: Box<dyn Component>,
    ) -> Result<u8, StorageError> {
        let ty = component.component_type();
        let bit = registry.bit_index(&ty)?;
        self.ensure(bit, &ty).add(entity, component)?;
        Ok(bit)
    }

    pub fn remove(&mut self, bit: u8, entity: Entity) -> Option<Box<dyn Component>> {
        self.storages.get_mut(&bit)?.remove(entity)
    }

    /// Remove every component of `entity`, in bit order.
    pub fn remove_entity(&mut self, entity: Entity) -> Vec<Box<dyn Component>> {
        let mut bits: Vec<u8> = self.storages.keys().copied().collect();
        bits.sort_unstable();
        bits.into_iter()
            .filter_map(|bit| self.remove(bit, entity))
            .collect()
    }

    #[must_use]
    pub fn snapshot(&self, bit: u8, entity: Entity) -> Option<Box<dyn Component>> {
        self.storages.get(&bit)?.snapshot(entity)
    }

    #[must_use]
    pub fn get(&self, bit: u8) -> Option<&dyn ComponentStorage> {
        self.storages.get(&bit).map(|s| &**s)
    }

    pub fn get_mut(&mut self, bit: u8) -> Option<&mut (dyn ComponentStorage + 'static)> {
        self.storages.get_mut(&bit).map(|s| &mut **s)
    }

    #[must_use]
    pub fn record(&self, bit: u8) -> Option<&RecordStorage> {
        self.storages.get(&bit)?.as_any().downcast_ref()
    }

    pub fn record_mut(&mut self, bit: u8) -> Option<&mut RecordStorage> {
        self.storages.get_mut(&bit)?.as_any_mut().downcast_mut()
    }

    #[must_use]
    pub fn columnar(&self, bit: u8) -> Option<&ColumnarStorage> {
        self.storages.get(&bit)?.as_any().downcast_ref()
    }

    pub fn columnar_mut(&mut self, bit: u8) -> Option<&mut ColumnarStorage> {
        self.storages.get_mut(&bit)?.as_any_mut().downcast_mut()
    }

    /// The bits of every type stored for `entity`.
    #[must_use]
    pub fn mask_of(&self, entity: Entity) -> ComponentMask {
        self.storages
            .iter()
            .filter(|(_, s)| s.contains(entity))
            .fold(ComponentMask::EMPTY, |mask, (&bit, _)| mask.with(bit))
    }

    /// Stamp one of `entity`'s components.
    pub fn mark_dirty(&mut self, bit: u8, entity: Entity, epoch: u64) -> bool {
        self.storages
            .get_mut(&bit)
            .is_some_and(|s| s.mark_dirty(entity, epoch))
    }

    /// The change stamps of `entity`'s components selected by `mask`.
    #[must_use]
    pub fn epochs(&self, entity: Entity, mask: ComponentMask) -> Vec<u64> {
        mask.bits()
            .filter_map(|bit| self.storages.get(&bit)?.last_write_epoch(entity))
            .collect()
    }

    /// Number of storages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.storages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.storages.is_empty()
    }

    /// Empty every storage, keeping the storages themselves.
    pub fn clear(&mut self) {
        for storage in self.storages.values_mut() {
            storage.clear();
        }
    }
}
