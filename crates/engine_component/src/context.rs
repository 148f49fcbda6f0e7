//! The per-host bundle of component singletons.

use std::rc::Rc;

use crate::component::{ComponentDescriptor, ComponentIds};
use crate::config::PoolConfig;
use crate::pool::PoolManager;

/// Id generator and pools shared by everything a host creates.
///
/// A host owns one context and hands it to whatever constructs components.
/// Two contexts never share ids or pooled instances.
#[derive(Debug, Default)]
pub struct EcsContext {
    ids: Rc<ComponentIds>,
    pools: PoolManager,
}

impl EcsContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_pool_config(config: PoolConfig) -> Self {
        Self {
            ids: Rc::new(ComponentIds::new()),
            pools: PoolManager::new(config),
        }
    }

    #[must_use]
    pub fn ids(&self) -> &Rc<ComponentIds> {
        &self.ids
    }

    #[must_use]
    pub fn pools(&self) -> &PoolManager {
        &self.pools
    }

    pub fn pools_mut(&mut self) -> &mut PoolManager {
        &mut self.pools
    }

    /// A fresh `T` with the next id.
    #[must_use]
    pub fn create<T: ComponentDescriptor>(&self) -> T {
        self.ids.create::<T>()
    }

    /// Give `T` a pool under its type name.
    pub fn register_pool<T: ComponentDescriptor>(&mut self) {
        self.pools.register_component::<T>(Rc::clone(&self.ids));
    }

    /// A `T` from its pool, or a fresh one if it has none.
    pub fn acquire<T: ComponentDescriptor>(&mut self) -> T {
        match self.pools.acquire::<T>(T::NAME) {
            Some(component) => component,
            None => self.create(),
        }
    }

    /// Hand `component` back to its pool. Returns `false` if it was dropped.
    pub fn release<T: ComponentDescriptor>(&mut self, component: T) -> bool {
        self.pools.release(T::NAME, component)
    }

    /// Restart ids from 1 and drop every pool.
    pub fn reset(&mut self) {
        self.ids.reset();
        self.pools.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Component;

    crate::component! {
        pub struct Bullet {
            pub speed: f32,
        }
    }

    #[test]
    fn test_contexts_do_not_share_ids() {
        let a = EcsContext::new();
        let b = EcsContext::new();
        assert_eq!(a.create::<Bullet>().id(), 1);
        assert_eq!(a.create::<Bullet>().id(), 2);
        assert_eq!(b.create::<Bullet>().id(), 1);
    }

    #[test]
    fn test_acquire_without_pool_creates() {
        let mut ctx = EcsContext::new();
        let bullet = ctx.acquire::<Bullet>();
        assert_eq!(bullet.id(), 1);
        assert!(!ctx.release(bullet));
    }

    #[test]
    fn test_pooled_round_trip() {
        let mut ctx = EcsContext::new();
        ctx.register_pool::<Bullet>();
        let mut bullet = ctx.acquire::<Bullet>();
        bullet.speed = 40.0;
        assert!(ctx.release(bullet));

        let reused = ctx.acquire::<Bullet>();
        assert_eq!(reused.id(), 1);
        assert_eq!(reused.speed, 0.0);
    }

    #[test]
    fn test_reset() {
        let mut ctx = EcsContext::new();
        ctx.register_pool::<Bullet>();
        let _ = ctx.create::<Bullet>();
        ctx.reset();
        ctx.reset();
        assert!(ctx.pools().is_empty());
        assert_eq!(ctx.create::<Bullet>().id(), 1);
    }
}
