//! Fixed-timestep tick loop.
//!
//! Each tick:
//!
//! 1. Advance the epoch clock.
//! 2. Run every system in registration order.
//! 3. Flush the scene's command buffer.
//! 4. Give the pool manager a maintenance pass.

use std::time::{Duration, Instant};

use engine_component::{EcsContext, EpochClock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::scene::Scene;
use crate::systems::{Frame, System};

/// Configuration for the tick loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickConfig {
    /// Target ticks per second.
    pub tick_rate: f64,
    /// Maximum number of ticks to run (0 = unlimited).
    pub max_ticks: u64,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            tick_rate: 60.0,
            max_ticks: 0,
        }
    }
}

impl TickConfig {
    #[must_use]
    pub fn with_tick_rate(mut self, tick_rate: f64) -> Self {
        self.tick_rate = tick_rate;
        self
    }

    #[must_use]
    pub fn with_max_ticks(mut self, max_ticks: u64) -> Self {
        self.max_ticks = max_ticks;
        self
    }
}

/// What one tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickSummary {
    pub tick_id: u64,
    pub epoch: u64,
    /// Deferred operations applied by the flush.
    pub applied: usize,
    /// Pools shrunk by maintenance.
    pub pools_shrunk: usize,
}

/// The tick loop state.
pub struct TickLoop {
    /// Current tick counter.
    tick_id: u64,
    config: TickConfig,
    scene: Scene,
    context: EcsContext,
    clock: EpochClock,
    systems: Vec<Box<dyn System>>,
}

impl TickLoop {
    #[must_use]
    pub fn new(config: TickConfig, scene: Scene, context: EcsContext) -> Self {
        Self {
            tick_id: 0,
            config,
            scene,
            context,
            clock: EpochClock::new(),
            systems: Vec::new(),
        }
    }

    /// Append a system; systems run in the order they were added.
    pub fn add_system(&mut self, system: Box<dyn System>) {
        info!(system = system.name(), "registered system");
        self.systems.push(system);
    }

    #[must_use]
    pub fn tick_id(&self) -> u64 {
        self.tick_id
    }

    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.clock.current()
    }

    #[must_use]
    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    #[must_use]
    pub fn context(&self) -> &EcsContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut EcsContext {
        &mut self.context
    }

    /// Run one tick.
    pub fn tick(&mut self, dt: f64) -> TickSummary {
        self.tick_id += 1;
        let frame = Frame {
            tick_id: self.tick_id,
            epoch: self.clock.advance(),
            dt: dt as f32,
        };

        for system in &mut self.systems {
            system.run(&self.scene, &mut self.context, &frame);
        }

        let applied = self.scene.flush();
        let pools_shrunk = self.context.pools_mut().update();

        debug!(
            tick_id = self.tick_id,
            epoch = frame.epoch,
            applied,
            entities = self.scene.len(),
            "tick complete"
        );

        TickSummary {
            tick_id: self.tick_id,
            epoch: frame.epoch,
            applied,
            pools_shrunk,
        }
    }

    /// Run the tick loop for the configured number of ticks, or indefinitely.
    pub fn run(&mut self) {
        let tick_duration = Duration::from_secs_f64(1.0 / self.config.tick_rate);
        let mut tick_count = 0u64;

        info!(
            tick_rate = self.config.tick_rate,
            max_ticks = self.config.max_ticks,
            systems = self.systems.len(),
            "starting tick loop"
        );

        loop {
            let start = Instant::now();

            let dt = tick_duration.as_secs_f64();
            self.tick(dt);

            tick_count += 1;
            if self.config.max_ticks > 0 && tick_count >= self.config.max_ticks {
                info!(ticks = tick_count, entities = self.scene.len(), "tick loop complete");
                break;
            }

            let elapsed = start.elapsed();
            if elapsed < tick_duration {
                std::thread::sleep(tick_duration - elapsed);
            } else {
                warn!(
                    tick_id = self.tick_id,
                    elapsed_ms = elapsed.as_millis() as u64,
                    budget_ms = tick_duration.as_millis() as u64,
                    "tick exceeded time budget"
                );
            }
        }
    }
}

impl std::fmt::Debug for TickLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TickLoop")
            .field("tick_id", &self.tick_id)
            .field("config", &self.config)
            .field("scene", &self.scene)
            .field(
                "systems",
                &self.systems.iter().map(|s| s.name().to_string()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::systems::{default_systems, register_components};

    fn tick_loop(config: TickConfig) -> TickLoop {
        let scene = Scene::new("tick");
        let mut context = EcsContext::new();
        register_components(&scene, &mut context).unwrap();
        let mut tick_loop = TickLoop::new(config, scene, context);
        for system in default_systems() {
            tick_loop.add_system(system);
        }
        tick_loop
    }

    #[test]
    fn test_tick_advances_counter_and_epoch() {
        let mut tick_loop = tick_loop(TickConfig::default());
        assert_eq!(tick_loop.tick_id(), 0);
        let summary = tick_loop.tick(1.0 / 60.0);
        assert_eq!(summary.tick_id, 1);
        assert_eq!(summary.epoch, 1);
        tick_loop.tick(1.0 / 60.0);
        assert_eq!(tick_loop.tick_id(), 2);
        assert_eq!(tick_loop.epoch(), 2);
    }

    #[test]
    fn test_spawned_particles_expire() {
        let mut tick_loop = tick_loop(TickConfig::default());
        let mut applied = 0;
        for _ in 0..10 {
            applied += tick_loop.tick(0.1).applied;
        }
        // Tick 10 spawns one particle: three adds.
        assert_eq!(applied, 3);
        assert_eq!(tick_loop.scene().len(), 1);

        // Half a second of lifetime, plus slack for float rounding.
        for _ in 0..6 {
            tick_loop.tick(0.1);
        }
        assert_eq!(tick_loop.scene().len(), 0);
    }

    #[test]
    fn test_run_limited_ticks() {
        let config = TickConfig::default().with_tick_rate(1000.0).with_max_ticks(5);
        let mut tick_loop = tick_loop(config);
        tick_loop.run();
        assert_eq!(tick_loop.tick_id(), 5);
    }
}
