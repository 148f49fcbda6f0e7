//! Component instance pooling.
//!
//! A [`ComponentPool`] keeps released instances on a free list and hands them
//! out again instead of constructing new ones. A [`PoolManager`] owns the
//! pools of one host, tracks when each was last used, and periodically trims
//! pools that have gone quiet.
//!
//! Pooling is a latency/memory trade-off only. Nothing else in the core
//! depends on whether an instance came from a pool.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::debug;

use crate::component::{ComponentDescriptor, ComponentIds};
use crate::config::PoolConfig;

/// Counters of a single pool.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PoolStats {
    /// Instances waiting on the free list.
    pub available: usize,
    /// Instances constructed because the free list was empty on acquire.
    pub total_created: u64,
    /// Instances constructed ahead of time by `prewarm`.
    pub total_prewarmed: u64,
    pub total_acquired: u64,
    pub total_released: u64,
    pub hit_rate: f64,
}

/// A free list of reusable `T`s.
pub struct ComponentPool<T> {
    free: Vec<T>,
    factory: Box<dyn Fn() -> T>,
    reset: Option<Box<dyn Fn(&mut T)>>,
    max_size: usize,
    min_size: usize,
    total_created: u64,
    total_prewarmed: u64,
    total_acquired: u64,
    total_released: u64,
}

impl<T> ComponentPool<T> {
    /// A pool building new instances with `factory`.
    #[must_use]
    pub fn new(factory: impl Fn() -> T + 'static, config: &PoolConfig) -> Self {
        Self {
            free: Vec::new(),
            factory: Box::new(factory),
            reset: None,
            max_size: config.max_size,
            min_size: config.min_size,
            total_created: 0,
            total_prewarmed: 0,
            total_acquired: 0,
            total_released: 0,
        }
    }

    /// Run `reset` on every released instance before it is pooled.
    #[must_use]
    pub fn with_reset(mut self, reset: impl Fn(&mut T) + 'static) -> Self {
        self.reset = Some(Box::new(reset));
        self
    }

    /// Take an instance from the free list, or build one.
    pub fn acquire(&mut self) -> T {
        self.total_acquired += 1;
        match self.free.pop() {
            Some(item) => item,
            None => {
                self.total_created += 1;
                (self.factory)()
            }
        }
    }

    /// Return an instance. It is reset and pooled, or dropped if the pool is
    /// already at `max_size`. Returns `true` if it was pooled.
    pub fn release(&mut self, mut item: T) -> bool {
        self.total_released += 1;
        if self.free.len() >= self.max_size {
            return false;
        }
        if let Some(reset) = &self.reset {
            reset(&mut item);
        }
        self.free.push(item);
        true
    }

    /// Fill the free list up to `min(n, max_size)` instances. Returns how
    /// many were built.
    pub fn prewarm(&mut self, n: usize) -> usize {
        let target = n.min(self.max_size);
        let mut built = 0;
        while self.free.len() < target {
            self.free.push((self.factory)());
            built += 1;
        }
        self.total_prewarmed += built as u64;
        built
    }

    /// Drop pooled instances down to `min_size`. Returns how many were
    /// dropped.
    pub fn shrink(&mut self) -> usize {
        let excess = self.free.len().saturating_sub(self.min_size);
        self.free.truncate(self.min_size.min(self.free.len()));
        excess
    }

    /// Drop every pooled instance.
    pub fn clear(&mut self) {
        self.free.clear();
    }

    #[must_use]
    pub fn available(&self) -> usize {
        self.free.len()
    }

    #[must_use]
    pub fn total_created(&self) -> u64 {
        self.total_created
    }

    #[must_use]
    pub fn total_acquired(&self) -> u64 {
        self.total_acquired
    }

    #[must_use]
    pub fn total_released(&self) -> u64 {
        self.total_released
    }

    /// Share of acquisitions served from the free list:
    /// `(acquired - created) / acquired`, or `0.0` before the first acquire.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        if self.total_acquired == 0 {
            return 0.0;
        }
        (self.total_acquired - self.total_created) as f64 / self.total_acquired as f64
    }

    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            available: self.free.len(),
            total_created: self.total_created,
            total_prewarmed: self.total_prewarmed,
            total_acquired: self.total_acquired,
            total_released: self.total_released,
            hit_rate: self.hit_rate(),
        }
    }
}

impl<T> fmt::Debug for ComponentPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentPool")
            .field("type", &std::any::type_name::<T>())
            .field("max_size", &self.max_size)
            .field("min_size", &self.min_size)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Pool that resets a component to its defaults while keeping its id.
#[must_use]
pub fn component_pool<T: ComponentDescriptor>(
    ids: Rc<ComponentIds>,
    config: &PoolConfig,
) -> ComponentPool<T> {
    ComponentPool::new(move || ids.create::<T>(), config).with_reset(reset_component::<T>)
}

/// Restore every field of `component` to its default, keeping the id.
pub fn reset_component<T: ComponentDescriptor>(component: &mut T) {
    let id = component.id();
    *component = T::default();
    component.base_mut().set_id(id);
}

trait ErasedPool {
    fn shrink(&mut self) -> usize;
    fn stats(&self) -> PoolStats;
    fn clear(&mut self);
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: 'static> ErasedPool for ComponentPool<T> {
    fn shrink(&mut self) -> usize {
        ComponentPool::shrink(self)
    }

    fn stats(&self) -> PoolStats {
        ComponentPool::stats(self)
    }

    fn clear(&mut self) {
        ComponentPool::clear(self);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Usage tracker kept by the manager for each pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolUsage {
    /// Instances handed out through the manager.
    pub create_count: u64,
    /// Instances returned through the manager.
    pub release_count: u64,
    pub last_access: Instant,
}

/// One line of [`PoolManager::stats`].
#[derive(Debug, Clone, PartialEq)]
pub struct PoolReport {
    pub name: String,
    pub stats: PoolStats,
    pub usage: PoolUsage,
}

struct ManagedPool {
    pool: Box<dyn ErasedPool>,
    usage: PoolUsage,
}

/// Named pools of one host, with idle trimming.
pub struct PoolManager {
    pools: HashMap<String, ManagedPool>,
    config: PoolConfig,
    last_update: Option<Instant>,
}

impl PoolManager {
    #[must_use]
    pub fn new(config: PoolConfig) -> Self {
        Self {
            pools: HashMap::new(),
            config,
            last_update: None,
        }
    }

    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Install `pool` under `name`, replacing any previous pool.
    pub fn register<T: 'static>(&mut self, name: impl Into<String>, pool: ComponentPool<T>) {
        let name = name.into();
        debug!(pool = %name, "registered component pool");
        self.pools.insert(
            name,
            ManagedPool {
                pool: Box::new(pool),
                usage: PoolUsage {
                    create_count: 0,
                    release_count: 0,
                    last_access: Instant::now(),
                },
            },
        );
    }

    /// Install a resetting pool for `T` under `T::NAME`, built from the
    /// manager's configuration.
    pub fn register_component<T: ComponentDescriptor>(&mut self, ids: Rc<ComponentIds>) {
        let pool = component_pool::<T>(ids, &self.config);
        self.register(T::NAME, pool);
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.pools.contains_key(name)
    }

    #[must_use]
    pub fn pool<T: 'static>(&self, name: &str) -> Option<&ComponentPool<T>> {
        self.pools.get(name)?.pool.as_any().downcast_ref()
    }

    pub fn pool_mut<T: 'static>(&mut self, name: &str) -> Option<&mut ComponentPool<T>> {
        self.pools.get_mut(name)?.pool.as_any_mut().downcast_mut()
    }

    /// Acquire from the pool named `name`. `None` if there is no such pool
    /// or it holds another type.
    pub fn acquire<T: 'static>(&mut self, name: &str) -> Option<T> {
        let entry = self.pools.get_mut(name)?;
        let pool = entry.pool.as_any_mut().downcast_mut::<ComponentPool<T>>()?;
        let item = pool.acquire();
        entry.usage.create_count += 1;
        entry.usage.last_access = Instant::now();
        Some(item)
    }

    /// Release into the pool named `name`. Returns `false` if the item was
    /// dropped, either because no matching pool exists or it is full.
    pub fn release<T: 'static>(&mut self, name: &str, item: T) -> bool {
        let Some(entry) = self.pools.get_mut(name) else {
            return false;
        };
        let Some(pool) = entry.pool.as_any_mut().downcast_mut::<ComponentPool<T>>() else {
            return false;
        };
        let pooled = pool.release(item);
        entry.usage.release_count += 1;
        entry.usage.last_access = Instant::now();
        pooled
    }

    /// Maintenance pass at the current time. See [`PoolManager::update_at`].
    pub fn update(&mut self) -> usize {
        self.update_at(Instant::now())
    }

    /// Shrink every pool idle for longer than the inactive threshold.
    ///
    /// Runs at most once per update interval; calls in between do nothing.
    /// Returns the number of pools shrunk.
    pub fn update_at(&mut self, now: Instant) -> usize {
        if let Some(last) = self.last_update
            && now.saturating_duration_since(last) < self.config.update_interval
        {
            return 0;
        }
        self.last_update = Some(now);

        let threshold = self.config.inactive_threshold;
        let mut shrunk = 0;
        for (name, entry) in &mut self.pools {
            let idle = now.saturating_duration_since(entry.usage.last_access);
            if idle > threshold {
                let dropped = entry.pool.shrink();
                if dropped > 0 {
                    debug!(pool = %name, dropped, idle_secs = idle.as_secs(), "shrank idle pool");
                }
                shrunk += 1;
            }
        }
        shrunk
    }

    /// Time until the next maintenance pass may run.
    #[must_use]
    pub fn next_update_in(&self, now: Instant) -> Duration {
        match self.last_update {
            Some(last) => self
                .config
                .update_interval
                .saturating_sub(now.saturating_duration_since(last)),
            None => Duration::ZERO,
        }
    }

    /// Report every pool, sorted by name.
    #[must_use]
    pub fn stats(&self) -> Vec<PoolReport> {
        let mut reports: Vec<PoolReport> = self
            .pools
            .iter()
            .map(|(name, entry)| PoolReport {
                name: name.clone(),
                stats: entry.pool.stats(),
                usage: entry.usage,
            })
            .collect();
        reports.sort_by(|a, b| a.name.cmp(&b.name));
        reports
    }

    pub fn remove_pool(&mut self, name: &str) -> bool {
        self.pools.remove(name).is_some()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pools.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    /// Drop every pool and forget the maintenance schedule.
    pub fn reset(&mut self) {
        for entry in self.pools.values_mut() {
            entry.pool.clear();
        }
        self.pools.clear();
        self.last_update = None;
    }
}

impl Default for PoolManager {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

impl fmt::Debug for PoolManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolManager")
            .field("pools", &self.pools.keys().collect::<Vec<_>>())
            .field("config", &self.config)
            .finish()
    }
}
