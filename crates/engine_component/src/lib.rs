//! # engine_component
//!
//! The "C" in ECS: what a component is, how it is stored, how it is reused,
//! how its changes are detected and how it is serialised.
//!
//! This crate provides:
//!
//! - [`Component`] trait and the [`component!`] macro that implements it.
//! - [`ComponentRegistry`] mapping component types to compact bit indices.
//! - [`RecordStorage`] and [`ColumnarStorage`], behind [`ComponentStorage`].
//! - [`ComponentPool`] / [`PoolManager`] for instance reuse.
//! - [`ChangeTracker`] for epoch-based change detection.
//! - [`ValueSerializer`] / [`ComponentSerializer`] for JSON round-trips.
//! - [`EcsContext`] bundling the id generator and pools a host owns.

pub mod change;
pub mod component;
pub mod config;
pub mod context;
pub mod entity;
pub mod error;
pub mod field;
pub mod pool;
pub mod registry;
pub mod serialize;
pub mod storage;
pub mod type_utils;
pub mod value;

pub use change::{ChangeTracker, EpochClock, EpochSource};
pub use component::{
    Component, ComponentBase, ComponentDescriptor, ComponentIds, ComponentType, StorageStrategy,
};
pub use config::{PoolConfig, StorageConfig};
pub use context::EcsContext;
pub use entity::{Entity, EntityRef};
pub use error::{ComponentError, RegistryError, StorageError};
pub use field::{Complex, FieldDescriptor, FieldKind, FieldType, NumericKind};
pub use pool::{
    ComponentPool, PoolManager, PoolReport, PoolStats, PoolUsage, component_pool, reset_component,
};
pub use registry::{ComponentMask, ComponentRegistry, MAX_COMPONENT_TYPES};
pub use serialize::{
    ComponentSerializer, FieldMetadata, FieldSerializer, PendingRef, PendingRefs,
    SerializationContext, SerializedComponent, TypeHandler, ValueSerializer,
};
pub use storage::{
    ColumnarMut, ColumnarRef, ColumnarStats, ColumnarStorage, ComponentStorage, RecordStorage,
    StorageManager,
};
pub use type_utils::{ComponentTypeId, TypeIdentity, component_name, short_type_name};
pub use value::{Opaque, Value};
