//! Static field-descriptor tables.
//!
//! Every component type publishes an explicit list of [`FieldDescriptor`]s at
//! registration time. Storage and serialisation read this table instead of
//! inspecting an instance, so nothing ever has to construct a throwaway
//! component just to discover its shape.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::entity::EntityRef;
use crate::value::{Opaque, Value};

/// Declared width and signedness of a numeric field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NumericKind {
    I8,
    I16,
    I32,
    U8,
    U16,
    U32,
    F32,
    F64,
}

impl NumericKind {
    /// Returns `true` for the floating point kinds.
    #[must_use]
    pub const fn is_float(self) -> bool {
        matches!(self, Self::F32 | Self::F64)
    }
}

/// How a field is stored and serialised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldKind {
    /// A fixed-width number, stored in a typed column.
    Numeric(NumericKind),
    /// A boolean, stored as `0`/`1` in a byte column.
    Bool,
    /// A string, stored in a plain string column.
    String,
    /// A map, set or list; stored as an encoded blob and decoded on read.
    Collection,
    /// A reference to another entity.
    EntityRef,
    /// A host value that is kept as-is in a per-entity side table.
    Complex {
        /// Copy the value on the way in and out of storage instead of sharing it.
        deep_copy: bool,
    },
}

/// One entry of a component type's field table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldDescriptor {
    /// The field name, as used by [`Component::field`](crate::Component::field).
    pub name: &'static str,
    /// The storage kind.
    pub kind: FieldKind,
}

impl FieldDescriptor {
    /// Create a descriptor.
    #[must_use]
    pub const fn new(name: &'static str, kind: FieldKind) -> Self {
        Self { name, kind }
    }
}

/// A Rust type usable as a component field.
///
/// Provides the default [`FieldKind`] for the type and the conversion to and
/// from [`Value`].
pub trait FieldType: Sized {
    /// The kind a field of this type is declared with unless overridden.
    const KIND: FieldKind;

    /// Convert the field into a dynamic value.
    fn to_value(&self) -> Value;

    /// Convert a dynamic value back. Returns `None` if the shape does not fit.
    fn from_value(value: Value) -> Option<Self>;
}

macro_rules! int_field {
    ($($ty:ty => $kind:ident),* $(,)?) => {
        $(
            impl FieldType for $ty {
                const KIND: FieldKind = FieldKind::Numeric(NumericKind::$kind);

                fn to_value(&self) -> Value {
                    Value::Int(i64::from(*self))
                }

                fn from_value(value: Value) -> Option<Self> {
                    value.as_i64().and_then(|v| <$ty>::try_from(v).ok())
                }
            }
        )*
    };
}

int_field!(i8 => I8, i16 => I16, i32 => I32, u8 => U8, u16 => U16, u32 => U32);

impl FieldType for f32 {
    const KIND: FieldKind = FieldKind::Numeric(NumericKind::F32);

    fn to_value(&self) -> Value {
        Value::Float(f64::from(*self))
    }

    fn from_value(value: Value) -> Option<Self> {
        value.as_f64().map(|v| v as f32)
    }
}

impl FieldType for f64 {
    const KIND: FieldKind = FieldKind::Numeric(NumericKind::F64);

    fn to_value(&self) -> Value {
        Value::Float(*self)
    }

    fn from_value(value: Value) -> Option<Self> {
        value.as_f64()
    }
}

impl FieldType for bool {
    const KIND: FieldKind = FieldKind::Bool;

    fn to_value(&self) -> Value {
        Value::Bool(*self)
    }

    fn from_value(value: Value) -> Option<Self> {
        value.as_bool()
    }
}

impl FieldType for String {
    const KIND: FieldKind = FieldKind::String;

    fn to_value(&self) -> Value {
        Value::String(self.clone())
    }

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(s),
            Value::Null => Some(String::new()),
            _ => None,
        }
    }
}

impl<T: FieldType> FieldType for Vec<T> {
    const KIND: FieldKind = FieldKind::Collection;

    fn to_value(&self) -> Value {
        Value::Array(self.iter().map(FieldType::to_value).collect())
    }

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Array(items) | Value::Set(items) => {
                items.into_iter().map(T::from_value).collect()
            }
            Value::Null => Some(Vec::new()),
            _ => None,
        }
    }
}

impl<K: FieldType + Ord, V: FieldType> FieldType for BTreeMap<K, V> {
    const KIND: FieldKind = FieldKind::Collection;

    fn to_value(&self) -> Value {
        Value::Map(
            self.iter()
                .map(|(k, v)| (k.to_value(), v.to_value()))
                .collect(),
        )
    }

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Map(entries) => entries
                .into_iter()
                .map(|(k, v)| Some((K::from_value(k)?, V::from_value(v)?)))
                .collect(),
            Value::Object(map) => map
                .into_iter()
                .map(|(k, v)| Some((K::from_value(Value::String(k))?, V::from_value(v)?)))
                .collect(),
            Value::Null => Some(BTreeMap::new()),
            _ => None,
        }
    }
}

impl<K: FieldType + Eq + std::hash::Hash, V: FieldType> FieldType for HashMap<K, V> {
    const KIND: FieldKind = FieldKind::Collection;

    fn to_value(&self) -> Value {
        Value::Map(
            self.iter()
                .map(|(k, v)| (k.to_value(), v.to_value()))
                .collect(),
        )
    }

    fn from_value(value: Value) -> Option<Self> {
        BTreeMapShim::<K, V>::entries(value).map(|entries| entries.into_iter().collect())
    }
}

/// Shared decoding for the hash-keyed collections, which cannot reuse the
/// `Ord`-bounded `BTreeMap` impl.
struct BTreeMapShim<K, V>(std::marker::PhantomData<(K, V)>);

impl<K: FieldType, V: FieldType> BTreeMapShim<K, V> {
    fn entries(value: Value) -> Option<Vec<(K, V)>> {
        match value {
            Value::Map(entries) => entries
                .into_iter()
                .map(|(k, v)| Some((K::from_value(k)?, V::from_value(v)?)))
                .collect(),
            Value::Object(map) => map
                .into_iter()
                .map(|(k, v)| Some((K::from_value(Value::String(k))?, V::from_value(v)?)))
                .collect(),
            Value::Null => Some(Vec::new()),
            _ => None,
        }
    }
}

impl<T: FieldType + Ord> FieldType for BTreeSet<T> {
    const KIND: FieldKind = FieldKind::Collection;

    fn to_value(&self) -> Value {
        Value::Set(self.iter().map(FieldType::to_value).collect())
    }

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Set(items) | Value::Array(items) => {
                items.into_iter().map(T::from_value).collect()
            }
            Value::Null => Some(BTreeSet::new()),
            _ => None,
        }
    }
}

impl FieldType for Value {
    const KIND: FieldKind = FieldKind::Collection;

    fn to_value(&self) -> Value {
        self.clone()
    }

    fn from_value(value: Value) -> Option<Self> {
        Some(value)
    }
}

impl FieldType for Option<EntityRef> {
    const KIND: FieldKind = FieldKind::EntityRef;

    fn to_value(&self) -> Value {
        match self {
            Some(r) => Value::EntityRef(r.clone()),
            None => Value::Null,
        }
    }

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::EntityRef(r) => Some(Some(r)),
            Value::Null => Some(None),
            _ => None,
        }
    }
}

/// A field holding an arbitrary host value that is never serialised.
///
/// Stored in columnar side tables as-is. Cloning a `Complex` shares the
/// value; declare the field with `FieldKind::Complex { deep_copy: true }` to
/// have storage copy it instead.
pub struct Complex<T>(pub Rc<T>);

impl<T> Complex<T> {
    /// Wrap `value`.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self(Rc::new(value))
    }

    /// Borrow the wrapped value.
    #[must_use]
    pub fn get(&self) -> &T {
        &self.0
    }
}

impl<T> Clone for Complex<T> {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

impl<T: Default> Default for Complex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: fmt::Debug> fmt::Debug for Complex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Complex").field(&self.0).finish()
    }
}

impl<T: Any + fmt::Debug + Clone> FieldType for Complex<T> {
    const KIND: FieldKind = FieldKind::Complex { deep_copy: false };

    fn to_value(&self) -> Value {
        Value::Opaque(Opaque::from_rc(Rc::clone(&self.0)))
    }

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Opaque(opaque) => opaque.downcast_rc::<T>().map(Self),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Entity;

    #[test]
    fn test_integer_fields_reject_out_of_range() {
        assert_eq!(u8::from_value(Value::Int(255)), Some(255));
        assert_eq!(u8::from_value(Value::Int(256)), None);
        assert_eq!(i16::from_value(Value::Float(-3.0)), Some(-3));
    }

    #[test]
    fn test_float_field_is_exact_for_f32() {
        let x: f32 = 0.1;
        assert_eq!(f32::from_value(x.to_value()), Some(x));
    }

    #[test]
    fn test_map_field_roundtrip() {
        let mut map = BTreeMap::new();
        map.insert("gold".to_string(), 5i32);
        map.insert("wood".to_string(), 12i32);
        let value = map.to_value();
        assert!(matches!(value, Value::Map(ref entries) if entries.len() == 2));
        assert_eq!(BTreeMap::<String, i32>::from_value(value), Some(map));
    }

    #[test]
    fn test_hash_map_accepts_object_form() {
        let value = Value::object([("a", Value::Int(1))]);
        let map = HashMap::<String, i32>::from_value(value).unwrap();
        assert_eq!(map.get("a"), Some(&1));
    }

    #[test]
    fn test_set_field_roundtrip() {
        let set: BTreeSet<i32> = [3, 1, 2].into_iter().collect();
        assert_eq!(BTreeSet::<i32>::from_value(set.to_value()), Some(set));
    }

    #[test]
    fn test_entity_ref_field() {
        let r = Some(EntityRef::new(Entity::from_raw(4), "g-4"));
        assert_eq!(<Option<EntityRef>>::KIND, FieldKind::EntityRef);
        assert_eq!(<Option<EntityRef>>::from_value(r.to_value()), Some(r));
        assert_eq!(<Option<EntityRef>>::from_value(Value::Null), Some(None));
    }

    #[test]
    fn test_complex_field_shares_pointer() {
        let field = Complex::new(vec![1u8, 2, 3]);
        let back = Complex::<Vec<u8>>::from_value(field.to_value()).unwrap();
        assert!(Rc::ptr_eq(&field.0, &back.0));
    }
}
