//! Dynamically typed field values.
//!
//! [`Value`] is the currency between a component's statically typed fields
//! and everything that handles components generically: columnar storage,
//! serialisation, and the deferred command buffer. It also models arbitrary
//! value graphs, including shared and cyclic ones built from
//! [`Value::Shared`], so collection fields can hold more than plain trees.

use std::any::Any;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::entity::EntityRef;
use crate::type_utils::short_type_name;

/// A value held by a component field.
#[derive(Clone, Default)]
pub enum Value {
    /// Absent / null.
    #[default]
    Null,
    /// A boolean.
    Bool(bool),
    /// A signed integer.
    Int(i64),
    /// A floating point number.
    Float(f64),
    /// A UTF-8 string.
    String(String),
    /// An ordered list.
    Array(Vec<Value>),
    /// A string-keyed record.
    Object(BTreeMap<String, Value>),
    /// An ordered key/value map with arbitrary keys.
    Map(Vec<(Value, Value)>),
    /// An ordered collection of unique values.
    Set(Vec<Value>),
    /// A point in time, in milliseconds since the Unix epoch.
    Date(i64),
    /// A reference to another entity.
    EntityRef(EntityRef),
    /// A node that may be shared between several places in a graph.
    Shared(Rc<RefCell<Value>>),
    /// An opaque, non-serialisable host value.
    Opaque(Opaque),
}

impl Value {
    /// Wrap `value` in a fresh shared node.
    #[must_use]
    pub fn shared(value: Value) -> Self {
        Self::Shared(Rc::new(RefCell::new(value)))
    }

    /// Build an object from `(key, value)` pairs.
    #[must_use]
    pub fn object<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        Self::Object(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Returns `true` for [`Value::Null`].
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Numeric view of the value. Booleans read as `0`/`1`.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            Self::Bool(b) => Some(f64::from(u8::from(*b))),
            _ => None,
        }
    }

    /// Integer view of the value. Floats are truncated towards zero.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Float(f) => Some(*f as i64),
            Self::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    /// Boolean view of the value. Numbers read as `!= 0`.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Int(i) => Some(*i != 0),
            Self::Float(f) => Some(*f != 0.0),
            _ => None,
        }
    }

    /// String view of the value.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Entity reference view of the value.
    #[must_use]
    pub fn as_entity_ref(&self) -> Option<&EntityRef> {
        match self {
            Self::EntityRef(r) => Some(r),
            _ => None,
        }
    }

    /// A copy of this value with every shared node replaced by a fresh copy
    /// of its contents. Opaque values are cloned through
    /// [`Opaque::deep_clone`].
    ///
    /// Cycles are cut: a shared node that is already being copied further up
    /// the current path becomes [`Value::Null`].
    #[must_use]
    pub fn deep_clone(&self) -> Self {
        let mut path = Vec::new();
        self.deep_clone_inner(&mut path)
    }

    fn deep_clone_inner(&self, path: &mut Vec<*const RefCell<Value>>) -> Self {
        match self {
            Self::Array(items) => {
                Self::Array(items.iter().map(|v| v.deep_clone_inner(path)).collect())
            }
            Self::Set(items) => Self::Set(items.iter().map(|v| v.deep_clone_inner(path)).collect()),
            Self::Object(map) => Self::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.deep_clone_inner(path)))
                    .collect(),
            ),
            Self::Map(entries) => Self::Map(
                entries
                    .iter()
                    .map(|(k, v)| (k.deep_clone_inner(path), v.deep_clone_inner(path)))
                    .collect(),
            ),
            Self::Shared(node) => {
                let ptr = Rc::as_ptr(node);
                if path.contains(&ptr) {
                    return Self::Null;
                }
                path.push(ptr);
                let inner = node.borrow().deep_clone_inner(path);
                path.pop();
                Self::shared(inner)
            }
            Self::Opaque(value) => Self::Opaque(value.deep_clone()),
            other => other.clone(),
        }
    }
}

type NodePair = (*const RefCell<Value>, *const RefCell<Value>);

impl Value {
    fn eq_inner(&self, other: &Self, path: &mut Vec<NodePair>) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Int(a), Self::Float(b)) | (Self::Float(b), Self::Int(a)) => (*a as f64) == *b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Array(a), Self::Array(b)) | (Self::Set(a), Self::Set(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.eq_inner(y, path))
            }
            (Self::Object(a), Self::Object(b)) => {
                a.len() == b.len()
                    && a
                        .iter()
                        .zip(b)
                        .all(|((ka, va), (kb, vb))| ka == kb && va.eq_inner(vb, path))
            }
            (Self::Map(a), Self::Map(b)) => {
                a.len() == b.len()
                    && a
                        .iter()
                        .zip(b)
                        .all(|((ka, va), (kb, vb))| ka.eq_inner(kb, path) && va.eq_inner(vb, path))
            }
            (Self::Date(a), Self::Date(b)) => a == b,
            (Self::EntityRef(a), Self::EntityRef(b)) => a == b,
            (Self::Shared(a), Self::Shared(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                // A pair already on the path is assumed equal; the rest of
                // the walk decides.
                let pair = (Rc::as_ptr(a), Rc::as_ptr(b));
                if path.contains(&pair) {
                    return true;
                }
                path.push(pair);
                let equal = a.borrow().eq_inner(&b.borrow(), path);
                path.pop();
                equal
            }
            (Self::Opaque(a), Self::Opaque(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl PartialEq for Value {
    /// Structural equality. Shared nodes compare by content (identical nodes
    /// short-circuit, cycles compare by shape), opaque values by identity.
    fn eq(&self, other: &Self) -> bool {
        let mut path = Vec::new();
        self.eq_inner(other, &mut path)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("Null"),
            Self::Bool(b) => write!(f, "Bool({b})"),
            Self::Int(i) => write!(f, "Int({i})"),
            Self::Float(x) => write!(f, "Float({x})"),
            Self::String(s) => write!(f, "String({s:?})"),
            Self::Array(items) => f.debug_tuple("Array").field(items).finish(),
            Self::Object(map) => f.debug_tuple("Object").field(map).finish(),
            Self::Map(entries) => f.debug_tuple("Map").field(entries).finish(),
            Self::Set(items) => f.debug_tuple("Set").field(items).finish(),
            Self::Date(ms) => write!(f, "Date({ms})"),
            Self::EntityRef(r) => f.debug_tuple("EntityRef").field(r).finish(),
            // Shared nodes may be cyclic; print the address only.
            Self::Shared(node) => write!(f, "Shared({:p})", Rc::as_ptr(node)),
            Self::Opaque(value) => write!(f, "Opaque({})", value.type_name()),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Self::Float(f64::from(v))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<EntityRef> for Value {
    fn from(v: EntityRef) -> Self {
        Self::EntityRef(v)
    }
}

/// An opaque, non-serialisable host value held by a component.
///
/// Wraps any `Clone + Debug + 'static` value behind a shared pointer. Cloning
/// an `Opaque` shares the pointer; [`Opaque::deep_clone`] copies the value.
#[derive(Clone)]
pub struct Opaque {
    inner: Rc<dyn Any>,
    type_name: String,
    clone_fn: fn(&dyn Any) -> Option<Rc<dyn Any>>,
    debug_fn: fn(&dyn Any, &mut fmt::Formatter<'_>) -> fmt::Result,
}

impl Opaque {
    /// Wrap `value`.
    #[must_use]
    pub fn new<T: Any + fmt::Debug + Clone>(value: T) -> Self {
        Self::from_rc(Rc::new(value))
    }

    /// Wrap an already shared value without copying it.
    #[must_use]
    pub fn from_rc<T: Any + fmt::Debug + Clone>(value: Rc<T>) -> Self {
        Self {
            inner: value,
            type_name: short_type_name::<T>(),
            clone_fn: clone_any::<T>,
            debug_fn: debug_any::<T>,
        }
    }

    /// Short name of the wrapped type, module paths stripped.
    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Borrow the wrapped value as `T`.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }

    /// The shared pointer to the wrapped value, as `T`.
    #[must_use]
    pub fn downcast_rc<T: Any>(&self) -> Option<Rc<T>> {
        Rc::downcast::<T>(self.inner.clone()).ok()
    }

    /// A fresh, independent copy behind a new pointer.
    #[must_use]
    pub fn deep_clone(&self) -> Self {
        match (self.clone_fn)(&*self.inner) {
            Some(inner) => Self {
                inner,
                ..self.clone()
            },
            None => self.clone(),
        }
    }

    /// Returns `true` if both handles point at the same value.
    #[must_use]
    pub fn ptr_eq(&self, other: &Opaque) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Opaque {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        (self.debug_fn)(&*self.inner, f)
    }
}

fn clone_any<T: Any + Clone>(value: &dyn Any) -> Option<Rc<dyn Any>> {
    value
        .downcast_ref::<T>()
        .map(|v| Rc::new(v.clone()) as Rc<dyn Any>)
}

fn debug_any<T: Any + fmt::Debug>(value: &dyn Any, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match value.downcast_ref::<T>() {
        Some(v) => v.fmt(f),
        None => f.write_str("<opaque>"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Handle(u32);

    #[test]
    fn test_numeric_views() {
        assert_eq!(Value::Int(3).as_f64(), Some(3.0));
        assert_eq!(Value::Float(2.9).as_i64(), Some(2));
        assert_eq!(Value::Bool(true).as_i64(), Some(1));
        assert_eq!(Value::String("x".into()).as_f64(), None);
    }

    #[test]
    fn test_int_float_equality() {
        assert_eq!(Value::Int(2), Value::Float(2.0));
        assert_ne!(Value::Int(2), Value::Float(2.5));
    }

    #[test]
    fn test_deep_clone_detaches_shared_nodes() {
        let shared = Value::shared(Value::Int(1));
        let copy = shared.deep_clone();
        if let Value::Shared(node) = &shared {
            *node.borrow_mut() = Value::Int(2);
        }
        assert_eq!(copy, Value::shared(Value::Int(1)));
    }

    #[test]
    fn test_deep_clone_cuts_cycles() {
        let node = Rc::new(RefCell::new(Value::Null));
        *node.borrow_mut() = Value::Array(vec![Value::Int(1), Value::Shared(node.clone())]);
        let copy = Value::Shared(node.clone()).deep_clone();
        let Value::Shared(copied) = copy else {
            panic!("expected shared node");
        };
        assert_eq!(
            *copied.borrow(),
            Value::Array(vec![Value::Int(1), Value::Null])
        );
        // Break the cycle so the test does not leak.
        *node.borrow_mut() = Value::Null;
    }

    #[test]
    fn test_opaque_deep_clone_is_independent() {
        let original = Opaque::new(Handle(7));
        let shallow = original.clone();
        let copy = original.deep_clone();
        assert!(original.ptr_eq(&shallow));
        assert!(!original.ptr_eq(&copy));
        assert_eq!(copy.downcast_ref::<Handle>(), Some(&Handle(7)));
        assert_eq!(copy.type_name(), "Handle");
        assert_eq!(format!("{copy:?}"), "Handle(7)");
    }

    fn self_loop(tag: i64) -> (Rc<RefCell<Value>>, Value) {
        let node = Rc::new(RefCell::new(Value::Null));
        *node.borrow_mut() = Value::object([
            ("tag", Value::Int(tag)),
            ("self", Value::Shared(node.clone())),
        ]);
        let value = Value::Shared(node.clone());
        (node, value)
    }

    #[test]
    fn test_cyclic_graphs_compare_by_shape() {
        let (a_node, a) = self_loop(1);
        let (b_node, b) = self_loop(1);
        let (c_node, c) = self_loop(2);
        assert_eq!(a, b);
        assert_ne!(a, c);
        for node in [a_node, b_node, c_node] {
            *node.borrow_mut() = Value::Null;
        }
    }

    #[test]
    fn test_cyclic_collections_inside_arrays_compare() {
        let (a_node, a) = self_loop(5);
        let (b_node, b) = self_loop(5);
        assert_eq!(
            Value::Array(vec![Value::Int(1), a]),
            Value::Array(vec![Value::Int(1), b])
        );
        *a_node.borrow_mut() = Value::Null;
        *b_node.borrow_mut() = Value::Null;
    }

    #[test]
    fn test_debug_does_not_recurse_into_shared() {
        let node = Rc::new(RefCell::new(Value::Null));
        *node.borrow_mut() = Value::Shared(node.clone());
        let text = format!("{:?}", Value::Shared(node.clone()));
        assert!(text.starts_with("Shared("));
        *node.borrow_mut() = Value::Null;
    }
}
