//! Per-scope component type registry.
//!
//! A [`ComponentRegistry`] assigns every component type a bit index in
//! `0..64` and the matching single-bit [`ComponentMask`]. Indices are local
//! to one registry: two scenes can register the same types in a different
//! order and their masks are not comparable.
//!
//! ## Hot reload
//!
//! With hot reload enabled, registering a type whose *name* is already known
//! but whose identity differs (a reloaded definition) reuses the existing
//! index and drops every cached compound mask. Without it, the new definition
//! gets its own index and name lookups follow the newest registration.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::component::{ComponentDescriptor, ComponentType};
use crate::error::RegistryError;
use crate::type_utils::{ComponentTypeId, TypeIdentity, type_identity_of};

/// Number of distinct component types one registry can hold.
pub const MAX_COMPONENT_TYPES: usize = 64;

/// A set of component type bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ComponentMask(pub u64);

impl ComponentMask {
    pub const EMPTY: ComponentMask = ComponentMask(0);

    /// The single-bit mask for `index`.
    #[must_use]
    pub const fn from_bit(index: u8) -> Self {
        Self(1u64 << index)
    }

    #[must_use]
    pub const fn with(self, index: u8) -> Self {
        Self(self.0 | (1u64 << index))
    }

    #[must_use]
    pub const fn without(self, index: u8) -> Self {
        Self(self.0 & !(1u64 << index))
    }

    #[must_use]
    pub const fn contains(self, index: u8) -> bool {
        self.0 & (1u64 << index) != 0
    }

    /// Returns `true` if every bit of `other` is set in `self`.
    #[must_use]
    pub const fn contains_all(self, other: ComponentMask) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub const fn intersects(self, other: ComponentMask) -> bool {
        self.0 & other.0 != 0
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub const fn count(self) -> u32 {
        self.0.count_ones()
    }

    /// Iterate the set bit indices in ascending order.
    pub fn bits(self) -> impl Iterator<Item = u8> {
        (0..MAX_COMPONENT_TYPES as u8).filter(move |&i| self.contains(i))
    }
}

impl BitOr for ComponentMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for ComponentMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for ComponentMask {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl fmt::Display for ComponentMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

/// Maps component types to bit indices within one scope.
pub struct ComponentRegistry {
    by_identity: HashMap<TypeIdentity, u8>,
    by_name: HashMap<String, u8>,
    types: Vec<Option<ComponentType>>,
    mask_cache: RefCell<HashMap<Vec<ComponentTypeId>, ComponentMask>>,
    hot_reload: bool,
}

impl ComponentRegistry {
    /// Create an empty registry with hot reload disabled.
    #[must_use]
    pub fn new() -> Self {
        Self {
            by_identity: HashMap::new(),
            by_name: HashMap::new(),
            types: vec![None; MAX_COMPONENT_TYPES],
            mask_cache: RefCell::new(HashMap::new()),
            hot_reload: false,
        }
    }

    /// Register `ty`, returning its bit index.
    ///
    /// Registering the same type again returns the same index.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::CapacityExceeded`] when all 64 indices are
    /// taken.
    pub fn register(&mut self, ty: &ComponentType) -> Result<u8, RegistryError> {
        if let Some(&index) = self.by_identity.get(ty.identity()) {
            return Ok(index);
        }

        if let Some(&index) = self.by_name.get(ty.name()) {
            let placeholder = self.types[usize::from(index)]
                .as_ref()
                .is_some_and(|existing| existing.identity().is_named());
            if self.hot_reload || placeholder {
                self.replace_in_place(index, ty);
                return Ok(index);
            }
            warn!(
                component = ty.name(),
                previous_bit = index,
                "component name registered again with a different definition"
            );
        }

        let index = self
            .types
            .iter()
            .position(Option::is_none)
            .ok_or_else(|| RegistryError::CapacityExceeded {
                name: ty.name().to_string(),
                max: MAX_COMPONENT_TYPES,
            })? as u8;

        self.types[usize::from(index)] = Some(ty.clone());
        self.by_identity.insert(ty.identity().clone(), index);
        if self.by_name.insert(ty.name().to_string(), index).is_some() {
            self.clear_mask_cache();
        }
        debug!(component = ty.name(), type_bit = index, "registered component type");
        Ok(index)
    }

    /// Register the Rust component type `T`.
    ///
    /// # Errors
    ///
    /// See [`ComponentRegistry::register`].
    pub fn register_type<T: ComponentDescriptor>(&mut self) -> Result<u8, RegistryError> {
        self.register(&T::descriptor())
    }

    /// Register a name-only placeholder, or return the index the name already
    /// has. A Rust type registered later under the same name takes over the
    /// placeholder's index.
    ///
    /// # Errors
    ///
    /// See [`ComponentRegistry::register`].
    pub fn register_component_by_name(&mut self, name: &str) -> Result<u8, RegistryError> {
        if let Some(&index) = self.by_name.get(name) {
            return Ok(index);
        }
        self.register(&ComponentType::named(name.to_string()))
    }

    fn replace_in_place(&mut self, index: u8, ty: &ComponentType) {
        let slot = usize::from(index);
        if let Some(old) = self.types[slot].take() {
            self.by_identity.remove(old.identity());
        }
        self.types[slot] = Some(ty.clone());
        self.by_identity.insert(ty.identity().clone(), index);
        self.clear_mask_cache();
        debug!(component = ty.name(), type_bit = index, "remapped component type in place");
    }

    /// # Errors
    ///
    /// Returns [`RegistryError::UnregisteredType`] if `ty` is unknown here.
    pub fn bit_index(&self, ty: &ComponentType) -> Result<u8, RegistryError> {
        self.by_identity
            .get(ty.identity())
            .copied()
            .ok_or_else(|| RegistryError::UnregisteredType(ty.name().to_string()))
    }

    /// # Errors
    ///
    /// Returns [`RegistryError::UnregisteredType`] if `ty` is unknown here.
    pub fn bit_mask(&self, ty: &ComponentType) -> Result<ComponentMask, RegistryError> {
        self.bit_index(ty).map(ComponentMask::from_bit)
    }

    /// # Errors
    ///
    /// Returns [`RegistryError::UnregisteredType`] if `T` is unknown here.
    pub fn bit_index_of<T: ComponentDescriptor>(&self) -> Result<u8, RegistryError> {
        self.by_identity
            .get(&type_identity_of::<T>())
            .copied()
            .ok_or_else(|| RegistryError::UnregisteredType(T::NAME.to_string()))
    }

    /// # Errors
    ///
    /// Returns [`RegistryError::UnregisteredType`] if `T` is unknown here.
    pub fn bit_mask_of<T: ComponentDescriptor>(&self) -> Result<ComponentMask, RegistryError> {
        self.bit_index_of::<T>().map(ComponentMask::from_bit)
    }

    /// # Errors
    ///
    /// Returns [`RegistryError::UnregisteredType`] if no type has this name.
    pub fn bit_index_by_name(&self, name: &str) -> Result<u8, RegistryError> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| RegistryError::UnregisteredType(name.to_string()))
    }

    /// The type registered at `index`, if any.
    #[must_use]
    pub fn type_by_bit_index(&self, index: u8) -> Option<&ComponentType> {
        self.types.get(usize::from(index))?.as_ref()
    }

    /// The newest type registered under `name`.
    #[must_use]
    pub fn type_by_name(&self, name: &str) -> Option<&ComponentType> {
        let index = *self.by_name.get(name)?;
        self.type_by_bit_index(index)
    }

    /// Combined mask for a list of component names. Results are cached per
    /// list of name hashes until the next remap.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnregisteredType`] for the first unknown name.
    pub fn create_component_mask(&self, names: &[&str]) -> Result<ComponentMask, RegistryError> {
        let key: Vec<ComponentTypeId> =
            names.iter().map(|n| ComponentTypeId::from_name(n)).collect();
        if let Some(&mask) = self.mask_cache.borrow().get(&key) {
            return Ok(mask);
        }
        let mut mask = ComponentMask::EMPTY;
        for name in names {
            mask = mask.with(self.bit_index_by_name(name)?);
        }
        self.mask_cache.borrow_mut().insert(key, mask);
        Ok(mask)
    }

    /// Combined mask for a list of types.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnregisteredType`] for the first unknown type.
    pub fn mask_for(&self, types: &[ComponentType]) -> Result<ComponentMask, RegistryError> {
        types
            .iter()
            .try_fold(ComponentMask::EMPTY, |mask, ty| Ok(mask.with(self.bit_index(ty)?)))
    }

    /// Replace this registry's mappings with a copy of `source`'s.
    ///
    /// The two registries are independent afterwards. The hot reload flag of
    /// `self` is kept.
    pub fn clone_from(&mut self, source: &ComponentRegistry) {
        self.by_identity = source.by_identity.clone();
        self.by_name = source.by_name.clone();
        self.types = source.types.clone();
        self.clear_mask_cache();
    }

    /// Remove every definition registered under `name`, freeing their
    /// indices. Returns the freed indices in ascending order; empty if the
    /// name is unknown.
    pub fn unregister(&mut self, name: &str) -> Vec<u8> {
        if self.by_name.remove(name).is_none() {
            return Vec::new();
        }
        let mut freed = Vec::new();
        for (index, slot) in self.types.iter_mut().enumerate() {
            if slot.as_ref().is_some_and(|ty| ty.name() == name)
                && let Some(ty) = slot.take()
            {
                self.by_identity.remove(ty.identity());
                freed.push(index as u8);
            }
        }
        self.clear_mask_cache();
        debug!(component = name, type_bits = ?freed, "unregistered component type");
        freed
    }

    #[must_use]
    pub fn is_registered(&self, ty: &ComponentType) -> bool {
        self.by_identity.contains_key(ty.identity())
    }

    #[must_use]
    pub fn is_name_registered(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Number of occupied indices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.types.iter().filter(|t| t.is_some()).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_identity.is_empty()
    }

    /// Iterate `(bit index, type)` pairs in index order.
    pub fn types(&self) -> impl Iterator<Item = (u8, &ComponentType)> {
        self.types
            .iter()
            .enumerate()
            .filter_map(|(i, t)| t.as_ref().map(|t| (i as u8, t)))
    }

    pub fn set_hot_reload(&mut self, enabled: bool) {
        self.hot_reload = enabled;
    }

    #[must_use]
    pub fn hot_reload(&self) -> bool {
        self.hot_reload
    }

    /// Drop every cached compound mask.
    pub fn clear_mask_cache(&self) {
        self.mask_cache.borrow_mut().clear();
    }

    /// Forget every registration. The hot reload flag is kept.
    pub fn reset(&mut self) {
        self.by_identity.clear();
        self.by_name.clear();
        self.types.iter_mut().for_each(|t| *t = None);
        self.clear_mask_cache();
    }

    #[cfg(test)]
    fn cached_masks(&self) -> usize {
        self.mask_cache.borrow().len()
    }
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentRegistry")
            .field("types", &self.types().map(|(i, t)| (i, t.name())).collect::<Vec<_>>())
            .field("hot_reload", &self.hot_reload)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    crate::component! {
        pub struct Position {
            pub x: f32,
            pub y: f32,
        }
    }

    crate::component! {
        pub struct Velocity {
            pub vx: f32,
            pub vy: f32,
        }
    }

    mod reloaded {
        crate::component! {
            pub struct Position {
                pub x: f64,
                pub y: f64,
                pub z: f64,
            }
        }
    }

    #[test]
    fn test_register_is_idempotent() {
        let mut registry = ComponentRegistry::new();
        let a = registry.register_type::<Position>().unwrap();
        let b = registry.register_type::<Position>().unwrap();
        assert_eq!(a, b);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_distinct_types_get_distinct_bits() {
        let mut registry = ComponentRegistry::new();
        let p = registry.register_type::<Position>().unwrap();
        let v = registry.register_type::<Velocity>().unwrap();
        assert_ne!(p, v);
        assert_eq!(registry.bit_mask_of::<Velocity>().unwrap(), ComponentMask::from_bit(v));
    }

    #[test]
    fn test_unregistered_lookup_fails() {
        let registry = ComponentRegistry::new();
        assert_eq!(
            registry.bit_index_of::<Position>(),
            Err(RegistryError::UnregisteredType("Position".into()))
        );
        assert!(registry.bit_index_by_name("Position").is_err());
        assert!(registry.type_by_bit_index(0).is_none());
    }

    #[test]
    fn test_capacity_exceeded() {
        let mut registry = ComponentRegistry::new();
        for i in 0..MAX_COMPONENT_TYPES {
            registry.register_component_by_name(&format!("T{i}")).unwrap();
        }
        assert!(matches!(
            registry.register_type::<Position>(),
            Err(RegistryError::CapacityExceeded { max: 64, .. })
        ));
    }

    #[test]
    fn test_reverse_lookups() {
        let mut registry = ComponentRegistry::new();
        let bit = registry.register_type::<Velocity>().unwrap();
        assert_eq!(registry.type_by_bit_index(bit), Some(&Velocity::descriptor()));
        assert_eq!(registry.type_by_name("Velocity"), Some(&Velocity::descriptor()));
    }

    #[test]
    fn test_component_mask_is_cached() {
        let mut registry = ComponentRegistry::new();
        let p = registry.register_type::<Position>().unwrap();
        let v = registry.register_type::<Velocity>().unwrap();
        let mask = registry.create_component_mask(&["Position", "Velocity"]).unwrap();
        assert!(mask.contains(p) && mask.contains(v));
        assert_eq!(mask.count(), 2);
        assert_eq!(registry.cached_masks(), 1);
        assert_eq!(registry.create_component_mask(&["Position", "Velocity"]).unwrap(), mask);
        assert_eq!(registry.cached_masks(), 1);
        assert!(registry.create_component_mask(&["Nope"]).is_err());
    }

    #[test]
    fn test_hot_reload_keeps_index_and_clears_cache() {
        let mut registry = ComponentRegistry::new();
        registry.set_hot_reload(true);
        let bit = registry.register_type::<Position>().unwrap();
        registry.register_type::<Velocity>().unwrap();
        registry.create_component_mask(&["Position"]).unwrap();

        let reloaded = registry.register_type::<reloaded::Position>().unwrap();
        assert_eq!(reloaded, bit);
        assert_eq!(registry.cached_masks(), 0);
        assert_eq!(registry.len(), 2);
        assert!(registry.bit_index_of::<Position>().is_err());
        assert_eq!(registry.type_by_name("Position").unwrap().fields().len(), 3);
    }

    #[test]
    fn test_without_hot_reload_name_follows_newest() {
        let mut registry = ComponentRegistry::new();
        let old = registry.register_type::<Position>().unwrap();
        let new = registry.register_type::<reloaded::Position>().unwrap();
        assert_ne!(old, new);
        assert_eq!(registry.bit_index_by_name("Position").unwrap(), new);
        assert_eq!(registry.bit_index_of::<Position>().unwrap(), old);
    }

    #[test]
    fn test_placeholder_upgraded_by_native_type() {
        let mut registry = ComponentRegistry::new();
        let named = registry.register_component_by_name("Position").unwrap();
        let native = registry.register_type::<Position>().unwrap();
        assert_eq!(named, native);
        assert_eq!(registry.len(), 1);
        assert!(registry.type_by_name("Position").unwrap().has_factory());
    }

    #[test]
    fn test_clone_from_gives_independent_scopes() {
        let mut base = ComponentRegistry::new();
        base.register_type::<Position>().unwrap();

        let mut scene = ComponentRegistry::new();
        scene.clone_from(&base);
        assert_eq!(
            scene.bit_index_of::<Position>().unwrap(),
            base.bit_index_of::<Position>().unwrap()
        );

        scene.register_type::<Velocity>().unwrap();
        assert!(base.bit_index_of::<Velocity>().is_err());
        assert_eq!(base.len(), 1);
        assert_eq!(scene.len(), 2);
    }

    #[test]
    fn test_unregister_frees_index() {
        let mut registry = ComponentRegistry::new();
        let p = registry.register_type::<Position>().unwrap();
        registry.register_type::<Velocity>().unwrap();
        assert_eq!(registry.unregister("Position"), vec![p]);
        assert!(!registry.is_registered(&Position::descriptor()));
        assert_eq!(registry.register_component_by_name("Other").unwrap(), p);
        assert!(registry.unregister("Position").is_empty());
    }

    #[test]
    fn test_unregister_frees_every_definition_under_a_name() {
        let mut registry = ComponentRegistry::new();
        let old = registry.register_type::<Position>().unwrap();
        let v = registry.register_type::<Velocity>().unwrap();
        let new = registry.register_type::<reloaded::Position>().unwrap();

        assert_eq!(registry.unregister("Position"), vec![old, new]);
        assert!(!registry.is_registered(&Position::descriptor()));
        assert!(!registry.is_registered(&reloaded::Position::descriptor()));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.bit_index_of::<Velocity>().unwrap(), v);
        assert_eq!(registry.register_type::<Position>().unwrap(), old);
    }

    #[test]
    fn test_reset_is_total_and_idempotent() {
        let mut registry = ComponentRegistry::new();
        registry.register_type::<Position>().unwrap();
        registry.reset();
        registry.reset();
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
        assert_eq!(registry.register_type::<Velocity>().unwrap(), 0);
    }

    #[test]
    fn test_mask_operations() {
        let a = ComponentMask::from_bit(1) | ComponentMask::from_bit(3);
        let b = ComponentMask::EMPTY.with(3);
        assert!(a.contains_all(b));
        assert!(!b.contains_all(a));
        assert!(a.intersects(b));
        assert_eq!((a & b), b);
        assert_eq!(a.without(1), b);
        assert_eq!(a.bits().collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(ComponentMask::from_bit(63).0, 1u64 << 63);
    }
}
