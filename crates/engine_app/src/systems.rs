//! Demo systems driven by the tick loop.

use engine_component::{
    ChangeTracker, Component, ComponentDescriptor, ComponentMask, EcsContext, Entity, EpochSource,
    RegistryError, StorageManager,
};
use tracing::{debug, warn};

use crate::components::{Lifetime, Position, Velocity};
use crate::scene::Scene;

/// Per-tick input handed to every system.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frame {
    pub tick_id: u64,
    pub epoch: u64,
    pub dt: f32,
}

impl EpochSource for Frame {
    fn current_epoch(&self) -> u64 {
        self.epoch
    }
}

/// A unit of per-tick logic.
///
/// Systems read and write component data directly but must route structural
/// changes through the scene's command buffer.
pub trait System {
    fn name(&self) -> &str;

    fn run(&mut self, scene: &Scene, ctx: &mut EcsContext, frame: &Frame);
}

// ── Movement ────────────────────────────────────────────────────────────

/// Integrates `Velocity` into `Position` over the columnar storages.
#[derive(Debug, Default)]
pub struct MovementSystem;

impl MovementSystem {
    /// Returns the number of entities moved.
    pub fn integrate(scene: &Scene, frame: &Frame) -> usize {
        scene.with_storages(|storages, registry| {
            let (Ok(p), Ok(v)) = (
                registry.bit_index_of::<Position>(),
                registry.bit_index_of::<Velocity>(),
            ) else {
                return 0;
            };
            let Some(velocities) = storages.columnar(v) else {
                return 0;
            };
            let columns = velocities.columns();
            let (Some(vx), Some(vy)) = (columns.f32("vx"), columns.f32("vy")) else {
                return 0;
            };
            let moving: Vec<(Entity, f32, f32)> = velocities
                .active_slots()
                .into_iter()
                .filter_map(|slot| Some((velocities.entity_at(slot)?, vx[slot], vy[slot])))
                .collect();

            let Some(positions) = storages.columnar_mut(p) else {
                return 0;
            };
            let moves: Vec<(usize, f32, f32)> = moving
                .into_iter()
                .filter_map(|(entity, vx, vy)| Some((positions.slot_of(entity)?, vx, vy)))
                .collect();

            positions.perform_vectorized_operation(|columns, _| {
                for &(slot, vx, vy) in &moves {
                    if let Some(xs) = columns.f32_mut("x") {
                        xs[slot] += vx * frame.dt;
                    }
                    if let Some(ys) = columns.f32_mut("y") {
                        ys[slot] += vy * frame.dt;
                    }
                    columns.mark_dirty(slot, frame.epoch);
                }
                moves.len()
            })
        })
    }
}

impl System for MovementSystem {
    fn name(&self) -> &str {
        "movement"
    }

    fn run(&mut self, scene: &Scene, _ctx: &mut EcsContext, frame: &Frame) {
        let moved = Self::integrate(scene, frame);
        debug!(tick_id = frame.tick_id, moved, "movement");
    }
}

// ── Lifetime ────────────────────────────────────────────────────────────

/// Counts `Lifetime` down and destroys entities whose time ran out.
#[derive(Debug, Default)]
pub struct LifetimeSystem;

impl System for LifetimeSystem {
    fn name(&self) -> &str {
        "lifetime"
    }

    fn run(&mut self, scene: &Scene, _ctx: &mut EcsContext, frame: &Frame) {
        let expired: Vec<Entity> = scene.with_storages(|storages, registry| {
            let Ok(bit) = registry.bit_index_of::<Lifetime>() else {
                return Vec::new();
            };
            let Some(storage) = storages.record_mut(bit) else {
                return Vec::new();
            };
            let entities: Vec<Entity> = storage.iter().map(|(entity, _)| entity).collect();
            entities
                .into_iter()
                .filter(|&entity| {
                    let Some(lifetime) = storage.get_as_mut::<Lifetime>(entity) else {
                        return false;
                    };
                    lifetime.remaining -= frame.dt;
                    lifetime.mark_dirty(frame.epoch);
                    lifetime.remaining <= 0.0
                })
                .collect()
        });

        for entity in expired {
            match scene.handle(entity) {
                Some(handle) => scene.commands().destroy_entity(&handle),
                None => warn!(%entity, "expired entity has no handle"),
            }
        }
    }
}

// ── Spawner ─────────────────────────────────────────────────────────────

/// Emits a short-lived particle every `interval` ticks from pooled
/// components.
#[derive(Debug)]
pub struct SpawnerSystem {
    interval: u64,
    lifetime: f32,
    spawned: u64,
}

impl SpawnerSystem {
    #[must_use]
    pub fn new(interval: u64, lifetime: f32) -> Self {
        Self {
            interval: interval.max(1),
            lifetime,
            spawned: 0,
        }
    }

    #[must_use]
    pub fn spawned(&self) -> u64 {
        self.spawned
    }
}

impl System for SpawnerSystem {
    fn name(&self) -> &str {
        "spawner"
    }

    fn run(&mut self, scene: &Scene, ctx: &mut EcsContext, frame: &Frame) {
        if frame.tick_id % self.interval != 0 {
            return;
        }
        let entity = scene.spawn(format!("particle-{}", self.spawned));
        self.spawned += 1;

        let position = ctx.acquire::<Position>();
        let mut velocity = ctx.acquire::<Velocity>();
        velocity.vx = 1.0;
        velocity.vy = (self.spawned % 3) as f32 - 1.0;
        let mut lifetime = ctx.acquire::<Lifetime>();
        lifetime.remaining = self.lifetime;

        let commands = scene.commands();
        let results = [
            commands.add_component(&entity, Box::new(position)),
            commands.add_component(&entity, Box::new(velocity)),
            commands.add_component(&entity, Box::new(lifetime)),
        ];
        for result in results {
            if let Err(e) = result {
                warn!(entity = %entity.id(), error = %e, "spawn failed");
            }
        }
    }
}

// ── Change report ───────────────────────────────────────────────────────

/// Counts entities whose position changed since the last run.
#[derive(Debug, Default)]
pub struct ChangeReportSystem {
    tracker: ChangeTracker,
    last_changed: usize,
}

impl ChangeReportSystem {
    #[must_use]
    pub fn last_changed(&self) -> usize {
        self.last_changed
    }
}

impl System for ChangeReportSystem {
    fn name(&self) -> &str {
        "change_report"
    }

    fn run(&mut self, scene: &Scene, _ctx: &mut EcsContext, frame: &Frame) {
        let tracker = self.tracker;
        self.last_changed = scene.with_storages(|storages, registry| {
            let Ok(mask) = registry.bit_mask_of::<Position>() else {
                return 0;
            };
            scene_entities(storages, mask)
                .into_iter()
                .filter(|&entity| tracker.has_entity_changed(storages, entity, mask, None))
                .count()
        });
        self.tracker.save_checkpoint(frame);
        debug!(tick_id = frame.tick_id, changed = self.last_changed, "position changes");
    }
}

fn scene_entities(storages: &StorageManager, mask: ComponentMask) -> Vec<Entity> {
    mask.bits()
        .filter_map(|bit| storages.get(bit))
        .flat_map(|storage| storage.entities())
        .collect()
}

/// The default system set of the demo, in run order.
#[must_use]
pub fn default_systems() -> Vec<Box<dyn System>> {
    vec![
        Box::new(SpawnerSystem::new(10, 0.5)),
        Box::new(MovementSystem),
        Box::new(LifetimeSystem),
        Box::new(ChangeReportSystem::default()),
    ]
}

/// Register every demo component type in `scene` and give the pooled ones a
/// pool in `ctx`.
///
/// # Errors
///
/// Propagates registry capacity errors.
pub fn register_components(scene: &Scene, ctx: &mut EcsContext) -> Result<(), RegistryError> {
    scene.register::<Position>()?;
    scene.register::<Velocity>()?;
    scene.register::<Lifetime>()?;
    scene.register::<crate::components::Follow>()?;
    scene.register::<crate::components::Label>()?;
    ctx.register_pool::<Position>();
    ctx.register_pool::<Velocity>();
    ctx.register_pool::<Lifetime>();
    debug!(pools = ctx.pools().len(), component = Position::NAME, "registered demo components");
    Ok(())
}
