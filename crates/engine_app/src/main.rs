//! # engine_app: demo host
//!
//! Drives the component core the way a game would: a scene owning entities,
//! a handful of systems, and a fixed-timestep loop that flushes deferred
//! commands at the end of every tick.
//!
//! ## Startup Sequence
//!
//! 1. Register the demo component types and their pools.
//! 2. Spawn a leader and a follower that references it.
//! 3. Run the tick loop for a fixed number of ticks.
//! 4. Save the scene and reload it into a fresh one.

mod components;
mod scene;
mod systems;
mod tick;

use anyhow::{Context, Result};
use engine_component::{ComponentSerializer, EcsContext};
use tracing::info;
use tracing_subscriber::EnvFilter;

use components::{Follow, Label, Position, Velocity};
use scene::Scene;
use systems::{default_systems, register_components};
use tick::{TickConfig, TickLoop};

fn main() -> Result<()> {
    // Initialise structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("engine_app=info".parse()?))
        .init();

    info!("engine demo starting");

    let scene = Scene::new("demo");
    let mut context = EcsContext::new();
    register_components(&scene, &mut context)?;

    let leader = scene.spawn("leader");
    let mut velocity = context.create::<Velocity>();
    velocity.vx = 3.0;
    scene.commands().add_component(&leader, Box::new(context.create::<Position>()))?;
    scene.commands().add_component(&leader, Box::new(velocity))?;
    let mut label = context.create::<Label>();
    label.text = "leader".to_string();
    scene.commands().add_component(&leader, Box::new(label))?;

    let follower = scene.spawn("follower");
    let mut follow = context.create::<Follow>();
    follow.target = scene.entity_ref(leader.id());
    follow.distance = 1.5;
    scene.commands().add_component(&follower, Box::new(follow))?;
    scene.flush();

    let config = TickConfig::default().with_tick_rate(120.0).with_max_ticks(120);
    let mut tick_loop = TickLoop::new(config, scene, context);
    for system in default_systems() {
        tick_loop.add_system(system);
    }
    tick_loop.run();

    let scene = tick_loop.scene();
    let serializer = ComponentSerializer::for_registry(&scene.registry().borrow());
    let saved = scene.save(&serializer);
    let json = serde_json::to_string_pretty(&saved).context("failed to encode saved scene")?;
    info!(entities = saved.entities.len(), bytes = json.len(), "saved scene");

    let restored = Scene::new("restored");
    let mut restored_context = EcsContext::new();
    register_components(&restored, &mut restored_context)?;
    let report = restored.load(&saved, &serializer, restored_context.ids());
    info!(
        entities = report.entities,
        components = report.components,
        resolved_refs = report.resolved_refs,
        "restored scene"
    );

    if let Some(position) = restored
        .entities()
        .first()
        .and_then(|&leader| restored.snapshot::<Position>(leader))
    {
        info!(x = position.x, y = position.y, "leader position after reload");
    }

    info!("engine demo shut down");
    Ok(())
}
