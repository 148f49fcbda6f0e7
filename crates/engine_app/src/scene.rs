//! Scene: entity ownership on top of the component core.
//!
//! The [`Scene`] allocates entities, owns their component storages and hands
//! out [`SceneEntity`] handles through which the command buffer applies
//! deferred mutations. Handles hold the scene weakly; once the scene is gone
//! or the entity destroyed, the handle reports itself dead and the command
//! buffer skips it.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::{Rc, Weak};

use engine_command::{CommandBuffer, EntityError, EntityHandle, SharedEntity, SharedRegistry};
use engine_component::{
    Component, ComponentDescriptor, ComponentIds, ComponentRegistry, ComponentSerializer,
    ComponentType, Entity, EntityRef, PendingRefs, RegistryError, SerializedComponent,
    StorageConfig, StorageManager,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Issues the entity ids of one scene.
///
/// Ids are scene-local and never handed out twice, even after a destroy.
/// They do not survive save/load; entity refs are re-linked by guid.
#[derive(Debug)]
struct SceneIds {
    next: u64,
}

impl SceneIds {
    fn new() -> Self {
        Self {
            next: Entity::INVALID.id() + 1,
        }
    }

    fn issue(&mut self) -> Entity {
        let entity = Entity::from_raw(self.next);
        self.next += 1;
        entity
    }
}

#[derive(Debug, Clone)]
struct EntityRecord {
    name: String,
    guid: String,
    active: bool,
}

#[derive(Debug)]
struct SceneState {
    name: String,
    ids: SceneIds,
    registry: SharedRegistry,
    storages: StorageManager,
    entities: BTreeMap<Entity, EntityRecord>,
}

// ── Entity handle ───────────────────────────────────────────────────────

/// Handle to an entity of a [`Scene`].
#[derive(Debug, Clone)]
pub struct SceneEntity {
    id: Entity,
    name: String,
    scene: Weak<RefCell<SceneState>>,
}

impl SceneEntity {
    fn state(&self) -> Result<Rc<RefCell<SceneState>>, EntityError> {
        self.scene.upgrade().ok_or(EntityError::Dead(self.id))
    }
}

impl EntityHandle for SceneEntity {
    fn id(&self) -> Entity {
        self.id
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn is_alive(&self) -> bool {
        self.scene
            .upgrade()
            .is_some_and(|state| state.borrow().entities.contains_key(&self.id))
    }

    fn add_component(&self, component: Box<dyn Component>) -> Result<(), EntityError> {
        let state = self.state()?;
        let mut state = state.borrow_mut();
        if !state.entities.contains_key(&self.id) {
            return Err(EntityError::Dead(self.id));
        }
        let registry = Rc::clone(&state.registry);
        let registry = registry.borrow();
        state.storages.add(&registry, self.id, component)?;
        Ok(())
    }

    fn remove_component_by_type(&self, ty: &ComponentType) -> Result<(), EntityError> {
        let state = self.state()?;
        let mut state = state.borrow_mut();
        let bit = state.registry.borrow().bit_index(ty).ok();
        bit.and_then(|bit| state.storages.remove(bit, self.id))
            .map(|_| ())
            .ok_or_else(|| EntityError::MissingComponent {
                entity: self.id,
                component: ty.name().to_string(),
            })
    }

    fn destroy(&self) -> Result<(), EntityError> {
        let state = self.state()?;
        let mut state = state.borrow_mut();
        if state.entities.remove(&self.id).is_none() {
            return Err(EntityError::Dead(self.id));
        }
        let removed = state.storages.remove_entity(self.id);
        debug!(entity = %self.id, components = removed.len(), "destroyed entity");
        Ok(())
    }

    fn set_active(&self, active: bool) -> Result<(), EntityError> {
        let state = self.state()?;
        let mut state = state.borrow_mut();
        let record = state
            .entities
            .get_mut(&self.id)
            .ok_or(EntityError::Dead(self.id))?;
        record.active = active;
        Ok(())
    }
}

// ── Saved form ──────────────────────────────────────────────────────────

/// One entity of a saved scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedEntity {
    pub guid: String,
    pub name: String,
    pub active: bool,
    pub components: Vec<SerializedComponent>,
}

/// A whole scene as written to disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedScene {
    pub name: String,
    pub entities: Vec<SavedEntity>,
}

/// Counters of a [`Scene::load`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub entities: usize,
    pub components: usize,
    pub skipped_components: usize,
    pub resolved_refs: usize,
    pub dangling_refs: usize,
}

// ── Scene ───────────────────────────────────────────────────────────────

/// Entities, their components and the command buffer that mutates them.
pub struct Scene {
    state: Rc<RefCell<SceneState>>,
    registry: SharedRegistry,
    commands: Rc<CommandBuffer>,
}

impl Scene {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, StorageConfig::default())
    }

    #[must_use]
    pub fn with_config(name: impl Into<String>, config: StorageConfig) -> Self {
        let name = name.into();
        let registry: SharedRegistry = Rc::new(RefCell::new(ComponentRegistry::new()));
        let commands = CommandBuffer::new(Rc::clone(&registry)).with_scene(name.clone());
        let state = SceneState {
            name,
            ids: SceneIds::new(),
            registry: Rc::clone(&registry),
            storages: StorageManager::with_config(config),
            entities: BTreeMap::new(),
        };
        Self {
            state: Rc::new(RefCell::new(state)),
            registry,
            commands: Rc::new(commands),
        }
    }

    #[must_use]
    pub fn name(&self) -> String {
        self.state.borrow().name.clone()
    }

    #[must_use]
    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    #[must_use]
    pub fn commands(&self) -> &Rc<CommandBuffer> {
        &self.commands
    }

    /// Register `T` and create its storage.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::CapacityExceeded`] when every type bit is
    /// taken.
    pub fn register<T: ComponentDescriptor>(&self) -> Result<u8, RegistryError> {
        let mut state = self.state.borrow_mut();
        let mut registry = self.registry.borrow_mut();
        state.storages.register(&mut registry, &T::descriptor())
    }

    /// Create an entity with a fresh guid.
    pub fn spawn(&self, name: impl Into<String>) -> SharedEntity {
        self.spawn_with_guid(name, Uuid::new_v4().to_string())
    }

    fn spawn_with_guid(&self, name: impl Into<String>, guid: String) -> SharedEntity {
        let name = name.into();
        let mut state = self.state.borrow_mut();
        let id = state.ids.issue();
        state.entities.insert(
            id,
            EntityRecord {
                name: name.clone(),
                guid,
                active: true,
            },
        );
        Rc::new(SceneEntity {
            id,
            name,
            scene: Rc::downgrade(&self.state),
        })
    }

    /// A handle to a live entity.
    #[must_use]
    pub fn handle(&self, id: Entity) -> Option<SharedEntity> {
        let state = self.state.borrow();
        let record = state.entities.get(&id)?;
        Some(Rc::new(SceneEntity {
            id,
            name: record.name.clone(),
            scene: Rc::downgrade(&self.state),
        }))
    }

    /// A serialisable reference to `id`.
    #[must_use]
    pub fn entity_ref(&self, id: Entity) -> Option<EntityRef> {
        let state = self.state.borrow();
        let record = state.entities.get(&id)?;
        Some(EntityRef::new(id, record.guid.clone()))
    }

    #[must_use]
    pub fn is_active(&self, id: Entity) -> Option<bool> {
        self.state.borrow().entities.get(&id).map(|r| r.active)
    }

    /// Live entities in id order.
    #[must_use]
    pub fn entities(&self) -> Vec<Entity> {
        self.state.borrow().entities.keys().copied().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state.borrow().entities.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run `f` with the storages and registry.
    ///
    /// Must not be called from inside a command buffer flush.
    pub fn with_storages<R>(&self, f: impl FnOnce(&mut StorageManager, &ComponentRegistry) -> R) -> R {
        let mut state = self.state.borrow_mut();
        let registry = self.registry.borrow();
        f(&mut state.storages, &registry)
    }

    /// An independent copy of `entity`'s `T`.
    #[must_use]
    pub fn snapshot<T: ComponentDescriptor>(&self, entity: Entity) -> Option<T> {
        self.with_storages(|storages, registry| {
            let bit = registry.bit_index_of::<T>().ok()?;
            storages
                .snapshot(bit, entity)?
                .downcast::<T>()
                .map(|boxed| *boxed)
        })
    }

    /// Apply everything the command buffer holds.
    pub fn flush(&self) -> usize {
        self.commands.flush()
    }

    // ── Persistence ─────────────────────────────────────────────────────

    /// Serialise every entity and component.
    #[must_use]
    pub fn save(&self, serializer: &ComponentSerializer) -> SavedScene {
        let state = self.state.borrow();
        let entities = state
            .entities
            .iter()
            .map(|(&id, record)| {
                let components = state
                    .storages
                    .mask_of(id)
                    .bits()
                    .filter_map(|bit| state.storages.snapshot(bit, id))
                    .filter_map(|component| serializer.serialize(component.as_ref()))
                    .collect();
                SavedEntity {
                    guid: record.guid.clone(),
                    name: record.name.clone(),
                    active: record.active,
                    components,
                }
            })
            .collect();
        SavedScene {
            name: state.name.clone(),
            entities,
        }
    }

    /// Rebuild `saved` into this scene.
    ///
    /// Every entity is created first; entity references are resolved by
    /// guid once all of them exist, so forward references work. Components
    /// of unknown types are skipped, and references to guids that are not
    /// part of the save are left empty.
    pub fn load(
        &self,
        saved: &SavedScene,
        serializer: &ComponentSerializer,
        ids: &ComponentIds,
    ) -> LoadReport {
        let mut report = LoadReport::default();
        let mut pending = PendingRefs::new();
        let mut built: Vec<(SharedEntity, Box<dyn Component>)> = Vec::new();
        let mut by_guid: HashMap<&str, Entity> = HashMap::new();

        for entity in &saved.entities {
            let handle = self.spawn_with_guid(entity.name.clone(), entity.guid.clone());
            by_guid.insert(entity.guid.as_str(), handle.id());
            report.entities += 1;
            if !entity.active
                && let Err(e) = handle.set_active(false)
            {
                warn!(entity = %handle.id(), error = %e, "could not restore active flag");
            }

            for data in &entity.components {
                let registry = self.registry.borrow();
                match serializer.deserialize(data, &registry, ids, &mut pending) {
                    Some(component) => built.push((SharedEntity::clone(&handle), component)),
                    None => report.skipped_components += 1,
                }
            }
        }

        let by_component: HashMap<u64, usize> = built
            .iter()
            .enumerate()
            .map(|(i, (_, c))| (c.id(), i))
            .collect();
        for pending_ref in pending.take() {
            let Some(&target) = by_guid.get(pending_ref.target_guid.as_str()) else {
                warn!(
                    field = %pending_ref.field,
                    guid = %pending_ref.target_guid,
                    "entity reference to unknown guid left empty"
                );
                report.dangling_refs += 1;
                continue;
            };
            let Some(&index) = by_component.get(&pending_ref.component_id) else {
                continue;
            };
            let component = built[index].1.as_mut();
            let target = EntityRef::new(target, pending_ref.target_guid.clone());
            match pending_ref.apply(component, target) {
                Ok(()) => report.resolved_refs += 1,
                Err(e) => warn!(field = %pending_ref.field, error = %e, "could not resolve entity reference"),
            }
        }

        for (handle, component) in built {
            match handle.add_component(component) {
                Ok(()) => report.components += 1,
                Err(e) => {
                    warn!(entity = %handle.id(), error = %e, "could not attach loaded component");
                    report.skipped_components += 1;
                }
            }
        }

        info!(
            scene = %saved.name,
            entities = report.entities,
            components = report.components,
            resolved_refs = report.resolved_refs,
            "loaded scene"
        );
        report
    }
}

impl std::fmt::Debug for Scene {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("Scene")
            .field("name", &state.name)
            .field("entities", &state.entities.len())
            .field("storages", &state.storages.len())
            .field("commands", &self.commands)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use engine_component::EcsContext;

    use super::*;
    use crate::components::{Follow, Label, Lifetime, Position, Velocity};

    fn scene() -> Scene {
        let scene = Scene::new("test");
        scene.register::<Position>().unwrap();
        scene.register::<Velocity>().unwrap();
        scene.register::<Lifetime>().unwrap();
        scene.register::<Follow>().unwrap();
        scene.register::<Label>().unwrap();
        scene
    }

    #[test]
    fn test_entity_ids_are_scene_local_and_never_reused() {
        let a = Scene::new("a");
        let b = Scene::new("b");
        let first = a.spawn("first");
        assert_eq!(first.id(), Entity::from_raw(1));
        assert_eq!(b.spawn("other").id(), Entity::from_raw(1));

        first.destroy().unwrap();
        assert!(!first.is_alive());
        assert_eq!(a.spawn("second").id(), Entity::from_raw(2));
        assert_eq!(a.len(), 1);
    }

    #[test]
    fn test_commands_apply_through_handles() {
        let scene = scene();
        let ctx = EcsContext::new();
        let e = scene.spawn("mover");
        let mut position = ctx.create::<Position>();
        position.x = 3.0;
        scene.commands().add_component(&e, Box::new(position)).unwrap();
        scene.commands().set_entity_active(&e, false);
        assert!(scene.snapshot::<Position>(e.id()).is_none());

        assert_eq!(scene.flush(), 2);
        assert_eq!(scene.snapshot::<Position>(e.id()).unwrap().x, 3.0);
        assert_eq!(scene.is_active(e.id()), Some(false));
    }

    #[test]
    fn test_destroy_kills_handle() {
        let scene = scene();
        let e = scene.spawn("doomed");
        scene.commands().add_component(&e, Box::new(Lifetime::default())).unwrap();
        scene.flush();
        scene.commands().destroy_entity(&e);
        assert_eq!(scene.flush(), 1);
        assert!(!e.is_alive());
        assert!(scene.is_empty());
        assert!(matches!(e.destroy(), Err(EntityError::Dead(_))));
    }

    #[test]
    fn test_handle_outliving_scene_is_dead() {
        let e = scene().spawn("orphan");
        assert!(!e.is_alive());
        assert!(e.set_active(true).is_err());
    }

    #[test]
    fn test_remove_missing_component_errors() {
        let scene = scene();
        let e = scene.spawn("bare");
        let result = e.remove_component_by_type(&Lifetime::descriptor());
        assert!(matches!(result, Err(EntityError::MissingComponent { .. })));
    }

    #[test]
    fn test_save_load_resolves_forward_references() {
        let scene = scene();
        let ctx = EcsContext::new();
        let follower = scene.spawn("follower");
        let leader = scene.spawn("leader");

        let mut follow = ctx.create::<Follow>();
        follow.target = scene.entity_ref(leader.id());
        follow.distance = 2.5;
        follower.add_component(Box::new(follow)).unwrap();
        let mut position = ctx.create::<Position>();
        position.y = 7.0;
        leader.add_component(Box::new(position)).unwrap();
        let mut label = ctx.create::<Label>();
        label.text = "boss".to_string();
        label.tags = vec!["a".to_string(), "b".to_string()];
        leader.add_component(Box::new(label)).unwrap();
        leader.set_active(false).unwrap();

        let serializer = ComponentSerializer::for_registry(&scene.registry().borrow());
        let saved = scene.save(&serializer);
        let json = serde_json::to_string(&saved).unwrap();
        let saved: SavedScene = serde_json::from_str(&json).unwrap();

        let restored = self::scene();
        let report = restored.load(&saved, &serializer, ctx.ids());
        assert_eq!(report.entities, 2);
        assert_eq!(report.components, 3);
        assert_eq!(report.resolved_refs, 1);
        assert_eq!(report.dangling_refs, 0);

        let entities = restored.entities();
        let (new_follower, new_leader) = (entities[0], entities[1]);
        let follow = restored.snapshot::<Follow>(new_follower).unwrap();
        assert_eq!(follow.distance, 2.5);
        assert_eq!(follow.target, restored.entity_ref(new_leader));
        assert_eq!(restored.snapshot::<Position>(new_leader).unwrap().y, 7.0);
        assert_eq!(restored.snapshot::<Label>(new_leader).unwrap().tags, vec!["a", "b"]);
        assert_eq!(restored.is_active(new_leader), Some(false));
    }

    #[test]
    fn test_load_skips_unknown_types_and_dangling_refs() {
        let scene = scene();
        let ctx = EcsContext::new();
        let lonely = scene.spawn("lonely");
        let mut follow = ctx.create::<Follow>();
        follow.target = Some(EntityRef::new(Entity::from_raw(99), "missing-guid"));
        lonely.add_component(Box::new(follow)).unwrap();

        let serializer = ComponentSerializer::for_registry(&scene.registry().borrow());
        let mut saved = scene.save(&serializer);
        saved.entities[0].components.push(SerializedComponent {
            type_name: "NoSuchType".to_string(),
            version: 1,
            data: serde_json::Map::new(),
        });

        let restored = self::scene();
        let report = restored.load(&saved, &serializer, ctx.ids());
        assert_eq!(report.components, 1);
        assert_eq!(report.skipped_components, 1);
        assert_eq!(report.dangling_refs, 1);
        let follow = restored.snapshot::<Follow>(restored.entities()[0]).unwrap();
        assert_eq!(follow.target, None);
    }
}
