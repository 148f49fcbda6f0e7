//! Deferred structural mutation.
//!
//! A system iterating entities must not add or remove components under its
//! own feet. It records the mutation in a [`CommandBuffer`] instead, and the
//! scene applies everything at a fixed point with [`CommandBuffer::flush`].
//!
//! ## Deduplicated mode
//!
//! Operations are merged into one bucket per entity:
//!
//! - an add evicts a pending remove of the same type and overwrites a pending
//!   add;
//! - a remove cancels a pending add of the same type, or is recorded if
//!   there was none;
//! - `set_entity_active` keeps only the last value;
//! - `destroy_entity` drops everything else and makes later calls for that
//!   entity no-ops until the next flush.
//!
//! Flush applies removes, then adds, then active flags, then destroys, each
//! phase across all entities before the next starts.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::mem;

use engine_component::{Component, ComponentDescriptor, ComponentType, Entity, component_name};
use tracing::{debug, error};

use crate::command::Command;
use crate::config::{CommandBufferConfig, CommandMode};
use crate::entity::{SharedEntity, SharedRegistry};
use crate::error::CommandError;

/// Everything recorded for one entity since the last flush.
struct PendingOps {
    handle: SharedEntity,
    destroy: bool,
    active: Option<bool>,
    adds: BTreeMap<u8, Box<dyn Component>>,
    removes: BTreeSet<u8>,
}

impl PendingOps {
    fn new(handle: SharedEntity) -> Self {
        Self {
            handle,
            destroy: false,
            active: None,
            adds: BTreeMap::new(),
            removes: BTreeSet::new(),
        }
    }

    fn operation_count(&self) -> usize {
        if self.destroy {
            return 1;
        }
        self.adds.len() + self.removes.len() + usize::from(self.active.is_some())
    }
}

/// Buckets in first-touched order.
#[derive(Default)]
struct PendingMap {
    index: HashMap<Entity, usize>,
    buckets: Vec<PendingOps>,
}

impl PendingMap {
    fn bucket(&mut self, handle: &SharedEntity) -> &mut PendingOps {
        let id = handle.id();
        let slot = match self.index.get(&id) {
            Some(&slot) => slot,
            None => {
                self.buckets.push(PendingOps::new(SharedEntity::clone(handle)));
                let slot = self.buckets.len() - 1;
                self.index.insert(id, slot);
                slot
            }
        };
        &mut self.buckets[slot]
    }

    fn is_destroying(&self, id: Entity) -> bool {
        self.index
            .get(&id)
            .is_some_and(|&slot| self.buckets[slot].destroy)
    }
}

/// Records entity mutations and applies them on [`flush`](Self::flush).
///
/// Every method takes `&self` so the buffer can be shared with entity
/// callbacks; anything recorded while a flush is running is applied by the
/// next flush.
pub struct CommandBuffer {
    registry: SharedRegistry,
    config: CommandBufferConfig,
    scene: Option<String>,
    pending: RefCell<PendingMap>,
    queue: RefCell<Vec<Command>>,
}

impl CommandBuffer {
    #[must_use]
    pub fn new(registry: SharedRegistry) -> Self {
        Self::with_config(registry, CommandBufferConfig::default())
    }

    #[must_use]
    pub fn with_config(registry: SharedRegistry, config: CommandBufferConfig) -> Self {
        Self {
            registry,
            config,
            scene: None,
            pending: RefCell::new(PendingMap::default()),
            queue: RefCell::new(Vec::new()),
        }
    }

    /// Name the scene this buffer belongs to, for log output.
    #[must_use]
    pub fn with_scene(mut self, scene: impl Into<String>) -> Self {
        self.scene = Some(scene.into());
        self
    }

    #[must_use]
    pub fn scene(&self) -> Option<&str> {
        self.scene.as_deref()
    }

    #[must_use]
    pub fn mode(&self) -> CommandMode {
        self.config.mode
    }

    fn type_bit(&self, ty: &ComponentType) -> Result<u8, CommandError> {
        Ok(self.registry.borrow().bit_index(ty)?)
    }

    // ── Recording ───────────────────────────────────────────────────────

    /// Record adding `component` to `entity`.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Registry`] if the component's type is not
    /// registered.
    pub fn add_component(
        &self,
        entity: &SharedEntity,
        component: Box<dyn Component>,
    ) -> Result<(), CommandError> {
        let type_bit = self.type_bit(&component.component_type())?;
        if self.config.mode == CommandMode::Queued {
            self.queue.borrow_mut().push(Command::Add {
                entity: SharedEntity::clone(entity),
                type_bit,
                component,
            });
            return Ok(());
        }

        let mut pending = self.pending.borrow_mut();
        if pending.is_destroying(entity.id()) {
            debug!(entity = %entity.id(), type_bit, "add ignored, entity pending destroy");
            return Ok(());
        }
        let bucket = pending.bucket(entity);
        bucket.removes.remove(&type_bit);
        bucket.adds.insert(type_bit, component);
        Ok(())
    }

    /// Record removing the component of type `ty` from `entity`.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Registry`] if `ty` is not registered.
    pub fn remove_component(
        &self,
        entity: &SharedEntity,
        ty: &ComponentType,
    ) -> Result<(), CommandError> {
        let type_bit = self.type_bit(ty)?;
        if self.config.mode == CommandMode::Queued {
            self.queue.borrow_mut().push(Command::Remove {
                entity: SharedEntity::clone(entity),
                type_bit,
            });
            return Ok(());
        }

        let mut pending = self.pending.borrow_mut();
        if pending.is_destroying(entity.id()) {
            return Ok(());
        }
        let bucket = pending.bucket(entity);
        if bucket.adds.remove(&type_bit).is_none() {
            bucket.removes.insert(type_bit);
        }
        Ok(())
    }

    /// [`remove_component`](Self::remove_component) for a Rust type.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Registry`] if `T` is not registered.
    pub fn remove_component_of<T: ComponentDescriptor>(
        &self,
        entity: &SharedEntity,
    ) -> Result<(), CommandError> {
        self.remove_component(entity, &T::descriptor())
    }

    /// Record the final active state of `entity`.
    pub fn set_entity_active(&self, entity: &SharedEntity, active: bool) {
        if self.config.mode == CommandMode::Queued {
            self.queue.borrow_mut().push(Command::SetActive {
                entity: SharedEntity::clone(entity),
                active,
            });
            return;
        }

        let mut pending = self.pending.borrow_mut();
        if pending.is_destroying(entity.id()) {
            return;
        }
        pending.bucket(entity).active = Some(active);
    }

    /// Record destroying `entity`, discarding everything else pending for it.
    pub fn destroy_entity(&self, entity: &SharedEntity) {
        if self.config.mode == CommandMode::Queued {
            self.queue.borrow_mut().push(Command::Destroy {
                entity: SharedEntity::clone(entity),
            });
            return;
        }

        let mut pending = self.pending.borrow_mut();
        let bucket = pending.bucket(entity);
        bucket.adds.clear();
        bucket.removes.clear();
        bucket.active = None;
        bucket.destroy = true;
    }

    // ── Inspection ──────────────────────────────────────────────────────

    /// Entities with something recorded.
    #[must_use]
    pub fn pending_entity_count(&self) -> usize {
        let mut entities: BTreeSet<Entity> = self.pending.borrow().index.keys().copied().collect();
        entities.extend(self.queue.borrow().iter().map(|c| c.entity().id()));
        entities.len()
    }

    /// Operations a flush would attempt.
    #[must_use]
    pub fn pending_operation_count(&self) -> usize {
        let merged: usize = self
            .pending
            .borrow()
            .buckets
            .iter()
            .map(PendingOps::operation_count)
            .sum();
        merged + self.queue.borrow().len()
    }

    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.pending_operation_count() > 0
    }

    /// Drop everything recorded without applying it.
    pub fn clear(&self) {
        *self.pending.borrow_mut() = PendingMap::default();
        self.queue.borrow_mut().clear();
    }

    // ── Flush ───────────────────────────────────────────────────────────

    /// Apply everything recorded so far. Returns the number of operations
    /// that succeeded.
    ///
    /// Failures are logged and skipped; the remaining operations still run.
    pub fn flush(&self) -> usize {
        let pending = mem::take(&mut *self.pending.borrow_mut());
        let queued = mem::take(&mut *self.queue.borrow_mut());
        if pending.buckets.is_empty() && queued.is_empty() {
            return 0;
        }

        let entities = pending.buckets.len();
        let applied = self.apply_queued(queued) + self.apply_pending(pending.buckets);
        debug!(
            scene = self.scene.as_deref().unwrap_or("-"),
            entities,
            applied,
            "flushed command buffer"
        );
        applied
    }

    fn apply_pending(&self, mut buckets: Vec<PendingOps>) -> usize {
        let mut applied = 0;

        for bucket in &buckets {
            if bucket.destroy || !bucket.handle.is_alive() {
                continue;
            }
            for &type_bit in &bucket.removes {
                applied += usize::from(self.apply_remove(&bucket.handle, type_bit));
            }
        }

        for bucket in &mut buckets {
            if bucket.destroy || !bucket.handle.is_alive() {
                continue;
            }
            for (type_bit, component) in mem::take(&mut bucket.adds) {
                applied += usize::from(self.apply_add(&bucket.handle, type_bit, component));
            }
        }

        for bucket in &buckets {
            if bucket.destroy || !bucket.handle.is_alive() {
                continue;
            }
            if let Some(active) = bucket.active {
                applied += usize::from(self.apply_active(&bucket.handle, active));
            }
        }

        for bucket in &buckets {
            if bucket.destroy && bucket.handle.is_alive() {
                applied += usize::from(self.apply_destroy(&bucket.handle));
            }
        }

        applied
    }

    fn apply_queued(&self, queued: Vec<Command>) -> usize {
        let mut applied = 0;
        for command in queued {
            if !command.entity().is_alive() {
                continue;
            }
            let ok = match command {
                Command::Add {
                    entity,
                    type_bit,
                    component,
                } => self.apply_add(&entity, type_bit, component),
                Command::Remove { entity, type_bit } => self.apply_remove(&entity, type_bit),
                Command::SetActive { entity, active } => self.apply_active(&entity, active),
                Command::Destroy { entity } => self.apply_destroy(&entity),
            };
            applied += usize::from(ok);
        }
        applied
    }

    fn apply_remove(&self, entity: &SharedEntity, type_bit: u8) -> bool {
        let ty = self.registry.borrow().type_by_bit_index(type_bit).cloned();
        let Some(ty) = ty else {
            error!(
                entity = %entity.id(),
                name = %entity.name(),
                type_bit,
                "remove failed: no component type at bit"
            );
            return false;
        };
        match entity.remove_component_by_type(&ty) {
            Ok(()) => true,
            Err(e) => {
                error!(
                    entity = %entity.id(),
                    name = %entity.name(),
                    type_bit,
                    component = ty.name(),
                    error = %e,
                    "remove failed"
                );
                false
            }
        }
    }

    fn apply_add(&self, entity: &SharedEntity, type_bit: u8, component: Box<dyn Component>) -> bool {
        let name = component_name(&*component);
        match entity.add_component(component) {
            Ok(()) => true,
            Err(e) => {
                error!(
                    entity = %entity.id(),
                    name = %entity.name(),
                    type_bit,
                    component = %name,
                    error = %e,
                    "add failed"
                );
                false
            }
        }
    }

    fn apply_active(&self, entity: &SharedEntity, active: bool) -> bool {
        match entity.set_active(active) {
            Ok(()) => true,
            Err(e) => {
                error!(entity = %entity.id(), name = %entity.name(), active, error = %e, "set_active failed");
                false
            }
        }
    }

    fn apply_destroy(&self, entity: &SharedEntity) -> bool {
        match entity.destroy() {
            Ok(()) => true,
            Err(e) => {
                error!(entity = %entity.id(), name = %entity.name(), error = %e, "destroy failed");
                false
            }
        }
    }
}

impl fmt::Debug for CommandBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandBuffer")
            .field("scene", &self.scene)
            .field("mode", &self.config.mode)
            .field("pending_entities", &self.pending_entity_count())
            .field("pending_operations", &self.pending_operation_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::{Rc, Weak};

    use engine_component::{ComponentRegistry, component};

    use super::*;
    use crate::entity::EntityHandle;
    use crate::error::EntityError;

    component! {
        pub struct Health {
            pub hp: f32,
        }
    }

    component! {
        pub struct Armor {
            pub rating: u16,
        }
    }

    type Log = Rc<RefCell<Vec<String>>>;

    /// Records every call in a shared log.
    struct Recorder {
        id: Entity,
        log: Log,
        alive: Cell<bool>,
        fail_adds: bool,
        on_add: RefCell<Option<Box<dyn Fn()>>>,
    }

    impl Recorder {
        fn new(id: u64, log: &Log) -> Rc<Self> {
            Rc::new(Self {
                id: Entity::from_raw(id),
                log: Rc::clone(log),
                alive: Cell::new(true),
                fail_adds: false,
                on_add: RefCell::new(None),
            })
        }

        fn failing(id: u64, log: &Log) -> Rc<Self> {
            Rc::new(Self {
                id: Entity::from_raw(id),
                log: Rc::clone(log),
                alive: Cell::new(true),
                fail_adds: true,
                on_add: RefCell::new(None),
            })
        }

        fn record(&self, what: String) {
            self.log.borrow_mut().push(format!("{}:{what}", self.id.id()));
        }
    }

    impl EntityHandle for Recorder {
        fn id(&self) -> Entity {
            self.id
        }

        fn name(&self) -> String {
            format!("recorder-{}", self.id.id())
        }

        fn is_alive(&self) -> bool {
            self.alive.get()
        }

        fn add_component(&self, component: Box<dyn Component>) -> Result<(), EntityError> {
            if self.fail_adds {
                return Err(EntityError::Rejected("adds disabled".to_string()));
            }
            self.record(format!("add {}", component.component_type().name()));
            if let Some(hook) = self.on_add.borrow().as_ref() {
                hook();
            }
            Ok(())
        }

        fn remove_component_by_type(&self, ty: &ComponentType) -> Result<(), EntityError> {
            self.record(format!("remove {}", ty.name()));
            Ok(())
        }

        fn destroy(&self) -> Result<(), EntityError> {
            self.record("destroy".to_string());
            self.alive.set(false);
            Ok(())
        }

        fn set_active(&self, active: bool) -> Result<(), EntityError> {
            self.record(format!("active {active}"));
            Ok(())
        }
    }

    fn registry() -> SharedRegistry {
        let mut registry = ComponentRegistry::new();
        registry.register_type::<Health>().unwrap();
        registry.register_type::<Armor>().unwrap();
        Rc::new(RefCell::new(registry))
    }

    fn shared(recorder: &Rc<Recorder>) -> SharedEntity {
        Rc::clone(recorder) as SharedEntity
    }

    fn entries(log: &Log) -> Vec<String> {
        log.borrow().clone()
    }

    #[test]
    fn test_add_then_remove_cancels() {
        let log = Log::default();
        let e = shared(&Recorder::new(1, &log));
        let buffer = CommandBuffer::new(registry());
        buffer.add_component(&e, Box::new(Health::default())).unwrap();
        buffer.remove_component_of::<Health>(&e).unwrap();
        assert_eq!(buffer.flush(), 0);
        assert!(entries(&log).is_empty());
    }

    #[test]
    fn test_remove_then_add_keeps_add() {
        let log = Log::default();
        let e = shared(&Recorder::new(1, &log));
        let buffer = CommandBuffer::new(registry());
        buffer.remove_component_of::<Health>(&e).unwrap();
        buffer.add_component(&e, Box::new(Health::default())).unwrap();
        assert_eq!(buffer.flush(), 1);
        assert_eq!(entries(&log), vec!["1:add Health"]);
    }

    #[test]
    fn test_latest_add_wins() {
        let log = Log::default();
        let e = shared(&Recorder::new(1, &log));
        let buffer = CommandBuffer::new(registry());
        buffer.add_component(&e, Box::new(Health::default())).unwrap();
        buffer.add_component(&e, Box::new(Health::default())).unwrap();
        assert_eq!(buffer.pending_operation_count(), 1);
        assert_eq!(buffer.flush(), 1);
    }

    #[test]
    fn test_destroy_has_priority() {
        let log = Log::default();
        let e = shared(&Recorder::new(1, &log));
        let buffer = CommandBuffer::new(registry());
        buffer.add_component(&e, Box::new(Health::default())).unwrap();
        buffer.remove_component_of::<Armor>(&e).unwrap();
        buffer.set_entity_active(&e, false);
        buffer.destroy_entity(&e);
        buffer.add_component(&e, Box::new(Armor::default())).unwrap();
        buffer.set_entity_active(&e, true);

        assert_eq!(buffer.pending_operation_count(), 1);
        assert_eq!(buffer.flush(), 1);
        assert_eq!(entries(&log), vec!["1:destroy"]);
    }

    #[test]
    fn test_phase_order_across_entities() {
        let log = Log::default();
        let a = shared(&Recorder::new(1, &log));
        let b = shared(&Recorder::new(2, &log));
        let c = shared(&Recorder::new(3, &log));
        let buffer = CommandBuffer::new(registry());
        buffer.destroy_entity(&c);
        buffer.set_entity_active(&b, true);
        buffer.add_component(&b, Box::new(Health::default())).unwrap();
        buffer.remove_component_of::<Armor>(&a).unwrap();

        assert_eq!(buffer.pending_entity_count(), 3);
        assert_eq!(buffer.flush(), 4);
        assert_eq!(
            entries(&log),
            vec!["1:remove Armor", "2:add Health", "2:active true", "3:destroy"]
        );
        assert!(!buffer.has_pending());
    }

    #[test]
    fn test_dead_handles_are_skipped() {
        let log = Log::default();
        let gone = Recorder::new(1, &log);
        let doomed = Recorder::new(2, &log);
        let buffer = CommandBuffer::new(registry());
        buffer.add_component(&shared(&gone), Box::new(Health::default())).unwrap();
        buffer.set_entity_active(&shared(&gone), true);
        buffer.destroy_entity(&shared(&doomed));
        gone.alive.set(false);
        doomed.alive.set(false);
        assert_eq!(buffer.flush(), 0);
        assert!(entries(&log).is_empty());
    }

    #[test]
    fn test_failures_are_isolated() {
        let log = Log::default();
        let bad = shared(&Recorder::failing(1, &log));
        let good = shared(&Recorder::new(2, &log));
        let buffer = CommandBuffer::new(registry());
        buffer.add_component(&bad, Box::new(Health::default())).unwrap();
        buffer.add_component(&good, Box::new(Health::default())).unwrap();
        buffer.set_entity_active(&bad, false);
        assert_eq!(buffer.flush(), 2);
        assert_eq!(entries(&log), vec!["2:add Health", "1:active false"]);
    }

    #[test]
    fn test_unregistered_type_is_rejected_at_record_time() {
        component! {
            pub struct Unknown {
                pub x: f32,
            }
        }
        let log = Log::default();
        let e = shared(&Recorder::new(1, &log));
        let buffer = CommandBuffer::new(registry());
        let result = buffer.add_component(&e, Box::new(Unknown::default()));
        assert!(matches!(result, Err(CommandError::Registry(_))));
        assert!(!buffer.has_pending());
    }

    #[test]
    fn test_reentrant_ops_land_in_next_flush() {
        let log = Log::default();
        let buffer = Rc::new(CommandBuffer::new(registry()));
        let first = Recorder::new(1, &log);
        let second = shared(&Recorder::new(2, &log));

        let weak: Weak<CommandBuffer> = Rc::downgrade(&buffer);
        let target = SharedEntity::clone(&second);
        *first.on_add.borrow_mut() = Some(Box::new(move || {
            if let Some(buffer) = weak.upgrade() {
                buffer.add_component(&target, Box::new(Armor::default())).unwrap();
            }
        }));

        buffer.add_component(&shared(&first), Box::new(Health::default())).unwrap();
        assert_eq!(buffer.flush(), 1);
        assert_eq!(entries(&log), vec!["1:add Health"]);
        assert!(buffer.has_pending());

        assert_eq!(buffer.flush(), 1);
        assert_eq!(entries(&log), vec!["1:add Health", "2:add Armor"]);
    }

    #[test]
    fn test_queued_mode_keeps_order_without_merging() {
        let log = Log::default();
        let e = shared(&Recorder::new(1, &log));
        let config = CommandBufferConfig::default().with_mode(CommandMode::Queued);
        let buffer = CommandBuffer::with_config(registry(), config).with_scene("level-1");
        buffer.add_component(&e, Box::new(Health::default())).unwrap();
        buffer.remove_component_of::<Health>(&e).unwrap();
        buffer.destroy_entity(&e);
        buffer.set_entity_active(&e, true);

        assert_eq!(buffer.scene(), Some("level-1"));
        assert_eq!(buffer.pending_operation_count(), 4);
        assert_eq!(buffer.pending_entity_count(), 1);
        // The destroy kills the handle, so the trailing set_active is skipped.
        assert_eq!(buffer.flush(), 3);
        assert_eq!(entries(&log), vec!["1:add Health", "1:remove Health", "1:destroy"]);
    }

    #[test]
    fn test_queued_mode_isolates_failures() {
        let log = Log::default();
        let bad = shared(&Recorder::failing(1, &log));
        let good = shared(&Recorder::new(2, &log));
        let gone = Recorder::new(3, &log);
        let config = CommandBufferConfig::default().with_mode(CommandMode::Queued);
        let buffer = CommandBuffer::with_config(registry(), config);
        buffer.add_component(&bad, Box::new(Health::default())).unwrap();
        buffer.add_component(&shared(&gone), Box::new(Health::default())).unwrap();
        buffer.set_entity_active(&bad, false);
        buffer.add_component(&good, Box::new(Armor::default())).unwrap();
        buffer.destroy_entity(&bad);
        gone.alive.set(false);

        assert_eq!(buffer.flush(), 3);
        assert_eq!(
            entries(&log),
            vec!["1:active false", "2:add Armor", "1:destroy"]
        );
        assert!(!buffer.has_pending());
    }

    #[test]
    fn test_clear_discards_everything() {
        let log = Log::default();
        let e = shared(&Recorder::new(1, &log));
        let buffer = CommandBuffer::new(registry());
        buffer.add_component(&e, Box::new(Health::default())).unwrap();
        buffer.destroy_entity(&e);
        buffer.clear();
        assert!(!buffer.has_pending());
        assert_eq!(buffer.flush(), 0);
    }
}
