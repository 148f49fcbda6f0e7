//! Record storage: one boxed component per entity.

use std::any::Any;
use std::collections::HashMap;

use super::ComponentStorage;
use crate::component::{Component, ComponentDescriptor, ComponentType, StorageStrategy};
use crate::entity::Entity;
use crate::error::StorageError;

/// Stores each component as its own heap object, keyed by entity.
#[derive(Debug)]
pub struct RecordStorage {
    ty: ComponentType,
    components: HashMap<Entity, Box<dyn Component>>,
}

impl RecordStorage {
    #[must_use]
    pub fn new(ty: ComponentType) -> Self {
        Self {
            ty,
            components: HashMap::new(),
        }
    }

    #[must_use]
    pub fn of<T: ComponentDescriptor>() -> Self {
        Self::new(T::descriptor())
    }

    #[must_use]
    pub fn get(&self, entity: Entity) -> Option<&dyn Component> {
        self.components.get(&entity).map(|c| &**c)
    }

    pub fn get_mut(&mut self, entity: Entity) -> Option<&mut dyn Component> {
        match self.components.get_mut(&entity) {
            Some(c) => Some(&mut **c),
            None => None,
        }
    }

    #[must_use]
    pub fn get_as<T: Component>(&self, entity: Entity) -> Option<&T> {
        self.components.get(&entity)?.downcast_ref::<T>()
    }

    pub fn get_as_mut<T: Component>(&mut self, entity: Entity) -> Option<&mut T> {
        self.components.get_mut(&entity)?.downcast_mut::<T>()
    }

    /// Iterate `(entity, component)` pairs in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (Entity, &dyn Component)> {
        self.components.iter().map(|(e, c)| (*e, &**c))
    }
}

impl ComponentStorage for RecordStorage {
    fn component_type(&self) -> &ComponentType {
        &self.ty
    }

    fn strategy(&self) -> StorageStrategy {
        StorageStrategy::Record
    }

    fn add(&mut self, entity: Entity, mut component: Box<dyn Component>) -> Result<(), StorageError> {
        let found = component.component_type();
        if found != self.ty {
            return Err(StorageError::TypeMismatch {
                expected: self.ty.name().to_string(),
                found: found.name().to_string(),
            });
        }
        component.base_mut().attach(entity);
        if let Some(mut old) = self.components.insert(entity, component) {
            old.base_mut().detach();
        }
        Ok(())
    }

    fn snapshot(&self, entity: Entity) -> Option<Box<dyn Component>> {
        self.components.get(&entity).map(|c| c.clone_component())
    }

    fn remove(&mut self, entity: Entity) -> Option<Box<dyn Component>> {
        let mut component = self.components.remove(&entity)?;
        component.base_mut().detach();
        Some(component)
    }

    fn contains(&self, entity: Entity) -> bool {
        self.components.contains_key(&entity)
    }

    fn len(&self) -> usize {
        self.components.len()
    }

    fn entities(&self) -> Vec<Entity> {
        let mut entities: Vec<Entity> = self.components.keys().copied().collect();
        entities.sort();
        entities
    }

    fn last_write_epoch(&self, entity: Entity) -> Option<u64> {
        self.components.get(&entity).map(|c| c.last_write_epoch())
    }

    fn mark_dirty(&mut self, entity: Entity, epoch: u64) -> bool {
        match self.components.get_mut(&entity) {
            Some(c) => {
                c.mark_dirty(epoch);
                true
            }
            None => false,
        }
    }

    fn clear(&mut self) {
        for component in self.components.values_mut() {
            component.base_mut().detach();
        }
        self.components.clear();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    crate::component! {
        pub struct Health {
            pub current: f32,
            pub max: f32,
        }
    }

    crate::component! {
        pub struct Armor {
            pub rating: u16,
        }
    }

    #[test]
    fn test_add_attaches_and_remove_detaches() {
        let mut storage = RecordStorage::of::<Health>();
        let entity = Entity::from_raw(1);
        storage.add(entity, Box::new(Health::default())).unwrap();
        assert_eq!(storage.get(entity).unwrap().entity_id(), Some(entity));

        let removed = storage.remove(entity).unwrap();
        assert_eq!(removed.entity_id(), None);
        assert!(!storage.contains(entity));
    }

    #[test]
    fn test_typed_access() {
        let mut storage = RecordStorage::of::<Health>();
        let entity = Entity::from_raw(2);
        storage.add(entity, Box::new(Health::default())).unwrap();
        storage.get_as_mut::<Health>(entity).unwrap().current = 30.0;
        assert_eq!(storage.get_as::<Health>(entity).unwrap().current, 30.0);
        assert!(storage.get_as::<Armor>(entity).is_none());
    }

    #[test]
    fn test_snapshot_is_independent() {
        let mut storage = RecordStorage::of::<Health>();
        let entity = Entity::from_raw(3);
        storage.add(entity, Box::new(Health::default())).unwrap();
        let mut snap = storage.snapshot(entity).unwrap();
        snap.downcast_mut::<Health>().unwrap().max = 99.0;
        assert_eq!(storage.get_as::<Health>(entity).unwrap().max, 0.0);
    }

    #[test]
    fn test_rejects_other_types() {
        let mut storage = RecordStorage::of::<Health>();
        let result = storage.add(Entity::from_raw(1), Box::new(Armor::default()));
        assert!(matches!(result, Err(StorageError::TypeMismatch { .. })));
    }

    #[test]
    fn test_mark_dirty_and_entities() {
        let mut storage = RecordStorage::of::<Health>();
        for id in [5, 2, 9] {
            storage.add(Entity::from_raw(id), Box::new(Health::default())).unwrap();
        }
        assert!(storage.mark_dirty(Entity::from_raw(2), 11));
        assert!(!storage.mark_dirty(Entity::from_raw(4), 11));
        assert_eq!(storage.last_write_epoch(Entity::from_raw(2)), Some(11));
        assert_eq!(
            storage.entities(),
            vec![Entity::from_raw(2), Entity::from_raw(5), Entity::from_raw(9)]
        );
        storage.clear();
        assert!(storage.is_empty());
    }
}
