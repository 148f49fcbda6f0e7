//! JSON serialisation of values and components.
//!
//! - [`ValueSerializer`] turns a [`Value`](crate::Value) graph into JSON and
//!   back, with tagged envelopes for maps, sets, dates and any registered
//!   [`TypeHandler`].
//! - [`ComponentSerializer`] writes whole components as
//!   [`SerializedComponent`] records and rebuilds them through the registry.

mod component;
mod value;

pub use component::{
    ComponentSerializer, FieldEntry, FieldMetadata, FieldSerializer, PendingRef, PendingRefs,
    SerializationContext, SerializedComponent,
};
pub use value::{
    ENTITY_REF_TAG, Encoder, TYPE_TAG, TypeHandler, VALUE_TAG, ValueSerializer,
    entity_ref_envelope, parse_entity_ref,
};
