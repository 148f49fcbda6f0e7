//! The [`Component`] trait, its per-type descriptor and the [`component!`]
//! declaration macro.
//!
//! ## Shape
//!
//! Every component embeds a [`ComponentBase`] carrying three pieces of engine
//! state:
//!
//! - `id`, a unique number handed out by a caller-owned [`ComponentIds`]
//!   generator at construction;
//! - `entity_id`, set only while the component is attached;
//! - `last_write_epoch`, the change-detection stamp written by
//!   [`Component::mark_dirty`].
//!
//! The user-facing fields are described once per type by a static
//! [`FieldDescriptor`] table. Storage and serialisation work from that table
//! and from the [`Component::field`] / [`Component::set_field`] pair, so they
//! never need to know the concrete Rust type.
//!
//! ## Declaring components
//!
//! ```rust
//! use engine_component::{component, ComponentDescriptor, StorageStrategy};
//!
//! component! {
//!     pub struct Velocity {
//!         pub vx: f32,
//!         pub vy: f32,
//!     }
//!     storage = Columnar;
//! }
//!
//! assert_eq!(Velocity::NAME, "Velocity");
//! assert_eq!(Velocity::STRATEGY, StorageStrategy::Columnar);
//! assert_eq!(Velocity::fields().len(), 2);
//! ```

use std::any::Any;
use std::borrow::Cow;
use std::cell::Cell;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::entity::Entity;
use crate::error::ComponentError;
use crate::field::FieldDescriptor;
use crate::type_utils::{TypeIdentity, type_identity_of};
use crate::value::Value;

// ── Base state ──────────────────────────────────────────────────────────

/// Engine-owned state embedded in every component.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComponentBase {
    id: u64,
    entity_id: Option<Entity>,
    last_write_epoch: u64,
}

impl ComponentBase {
    /// Base state with a freshly generated id.
    #[must_use]
    pub fn new(ids: &ComponentIds) -> Self {
        Self {
            id: ids.next_id(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The owning entity, if attached.
    #[must_use]
    pub fn entity_id(&self) -> Option<Entity> {
        self.entity_id
    }

    #[must_use]
    pub fn last_write_epoch(&self) -> u64 {
        self.last_write_epoch
    }

    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.entity_id.is_some()
    }

    /// Record the owning entity. Called by storage on attach.
    pub fn attach(&mut self, entity: Entity) {
        self.entity_id = Some(entity);
    }

    /// Clear the owning entity. Called by storage on detach.
    pub fn detach(&mut self) {
        self.entity_id = None;
    }

    /// Set the change stamp to `epoch`. No monotonicity check is made.
    pub fn mark_dirty(&mut self, epoch: u64) {
        self.last_write_epoch = epoch;
    }

    pub(crate) fn set_id(&mut self, id: u64) {
        self.id = id;
    }
}

/// Monotonic component id generator.
///
/// Owned by the host (see [`EcsContext`](crate::EcsContext)) rather than being
/// process-wide state. Ids start at 1; 0 marks a component that was never
/// stamped.
#[derive(Debug)]
pub struct ComponentIds {
    next: Cell<u64>,
}

impl ComponentIds {
    #[must_use]
    pub fn new() -> Self {
        Self { next: Cell::new(1) }
    }

    /// Hand out the next id.
    pub fn next_id(&self) -> u64 {
        let id = self.next.get();
        self.next.set(id + 1);
        id
    }

    /// Give `component` a fresh id and return it.
    #[must_use]
    pub fn stamp<T: Component>(&self, mut component: T) -> T {
        component.base_mut().set_id(self.next_id());
        component
    }

    /// Construct a default `T` with a fresh id.
    #[must_use]
    pub fn create<T: ComponentDescriptor>(&self) -> T {
        self.stamp(T::default())
    }

    /// Restart numbering at 1.
    pub fn reset(&self) {
        self.next.set(1);
    }
}

impl Default for ComponentIds {
    fn default() -> Self {
        Self::new()
    }
}

// ── Traits ──────────────────────────────────────────────────────────────

/// Object-safe component contract.
///
/// Normally implemented through [`component!`]. A hand-written
/// implementation must keep [`Component::field`] and
/// [`Component::set_field`] consistent with the type's descriptor table.
pub trait Component: Any + fmt::Debug {
    /// The descriptor of this component's type.
    fn component_type(&self) -> ComponentType;

    fn base(&self) -> &ComponentBase;

    fn base_mut(&mut self) -> &mut ComponentBase;

    /// Read a declared field as a dynamic value.
    fn field(&self, name: &str) -> Option<Value>;

    /// Write a declared field from a dynamic value.
    ///
    /// # Errors
    ///
    /// Returns [`ComponentError::UnknownField`] if no such field exists, and
    /// [`ComponentError::FieldType`] if the value does not fit it.
    fn set_field(&mut self, name: &str, value: Value) -> Result<(), ComponentError>;

    /// Clone into a new box, keeping the id.
    fn clone_component(&self) -> Box<dyn Component>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;

    fn into_any(self: Box<Self>) -> Box<dyn Any>;

    /// Hook run once a component has been rebuilt from serialised data.
    fn on_deserialized(&mut self) {}

    fn id(&self) -> u64 {
        self.base().id()
    }

    fn entity_id(&self) -> Option<Entity> {
        self.base().entity_id()
    }

    fn last_write_epoch(&self) -> u64 {
        self.base().last_write_epoch()
    }

    /// See [`ComponentBase::mark_dirty`].
    fn mark_dirty(&mut self, epoch: u64) {
        self.base_mut().mark_dirty(epoch);
    }
}

impl dyn Component {
    #[must_use]
    pub fn is<T: Component>(&self) -> bool {
        self.as_any().is::<T>()
    }

    #[must_use]
    pub fn downcast_ref<T: Component>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    pub fn downcast_mut<T: Component>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut::<T>()
    }

    /// Take the concrete component out of the box.
    #[must_use]
    pub fn downcast<T: Component>(self: Box<Self>) -> Option<Box<T>> {
        self.into_any().downcast::<T>().ok()
    }
}

/// Static description of a concrete component type.
pub trait ComponentDescriptor: Component + Default + Clone {
    /// Registered name. Also the serialised `type` tag.
    const NAME: &'static str;

    const STRATEGY: StorageStrategy = StorageStrategy::Record;

    /// Schema version written alongside serialised data.
    const VERSION: u32 = 1;

    /// The explicit field table.
    fn fields() -> &'static [FieldDescriptor];

    /// The shared [`ComponentType`] for this type.
    fn descriptor() -> ComponentType {
        ComponentType::of::<Self>()
    }
}

// ── ComponentType ───────────────────────────────────────────────────────

/// How instances of a component type are laid out in memory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageStrategy {
    /// One boxed instance per entity.
    #[default]
    Record,
    /// Parallel per-field columns indexed by slot.
    Columnar,
}

#[derive(Debug, Clone)]
struct ComponentTypeInner {
    name: Cow<'static, str>,
    identity: TypeIdentity,
    fields: &'static [FieldDescriptor],
    strategy: StorageStrategy,
    version: u32,
    factory: Option<fn() -> Box<dyn Component>>,
}

/// Cheap-to-clone handle describing a component type.
///
/// Two handles are equal when they name the same definition; a hot-reloaded
/// type keeps its name but has a new identity.
#[derive(Debug, Clone)]
pub struct ComponentType(Arc<ComponentTypeInner>);

fn make_default<T: ComponentDescriptor>() -> Box<dyn Component> {
    Box::new(T::default())
}

impl ComponentType {
    /// Describe the Rust type `T`.
    #[must_use]
    pub fn of<T: ComponentDescriptor>() -> Self {
        Self(Arc::new(ComponentTypeInner {
            name: Cow::Borrowed(T::NAME),
            identity: type_identity_of::<T>(),
            fields: T::fields(),
            strategy: T::STRATEGY,
            version: T::VERSION,
            factory: Some(make_default::<T>),
        }))
    }

    /// A name-only placeholder with no fields and no factory.
    #[must_use]
    pub fn named(name: impl Into<Cow<'static, str>>) -> Self {
        let name = name.into();
        Self(Arc::new(ComponentTypeInner {
            identity: TypeIdentity::Named(name.clone()),
            name,
            fields: &[],
            strategy: StorageStrategy::Record,
            version: 1,
            factory: None,
        }))
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.0.name
    }

    #[must_use]
    pub fn identity(&self) -> &TypeIdentity {
        &self.0.identity
    }

    #[must_use]
    pub fn fields(&self) -> &'static [FieldDescriptor] {
        self.0.fields
    }

    /// Look up one field descriptor by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&'static FieldDescriptor> {
        self.0.fields.iter().find(|f| f.name == name)
    }

    #[must_use]
    pub fn strategy(&self) -> StorageStrategy {
        self.0.strategy
    }

    #[must_use]
    pub fn version(&self) -> u32 {
        self.0.version
    }

    #[must_use]
    pub fn has_factory(&self) -> bool {
        self.0.factory.is_some()
    }

    /// Construct a default instance with a fresh id, if this type has a
    /// factory.
    #[must_use]
    pub fn instantiate(&self, ids: &ComponentIds) -> Option<Box<dyn Component>> {
        let factory = self.0.factory?;
        let mut component = factory();
        component.base_mut().set_id(ids.next_id());
        Some(component)
    }

    /// Construct a default instance without assigning an id. Storage uses
    /// this to rebuild components whose id it already holds.
    pub(crate) fn create_blank(&self) -> Option<Box<dyn Component>> {
        self.0.factory.map(|factory| factory())
    }
}

impl PartialEq for ComponentType {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
            || (self.0.identity == other.0.identity && self.0.name == other.0.name)
    }
}

impl Eq for ComponentType {}

impl Hash for ComponentType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.identity.hash(state);
        self.0.name.hash(state);
    }
}

impl fmt::Display for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.name)
    }
}

// ── Declaration macro ───────────────────────────────────────────────────

/// Declare a component struct together with its descriptor table.
///
/// Generates the struct (with a leading `pub base: ComponentBase` field and
/// `Debug`, `Clone` and `Default` derives) plus its [`Component`] and
/// [`ComponentDescriptor`] impls. A field's storage kind defaults to
/// `<Ty as FieldType>::KIND` and can be overridden with `=> kind`.
///
/// Optional trailing settings, in this order:
///
/// - `storage = Record | Columnar;`
/// - `name = "RegisteredName";`
/// - `version = 2;`
/// - `on_deserialized = path::to::hook;` where the hook is `fn(&mut Self)`.
///
/// ```rust
/// use engine_component::{component, Complex, FieldKind};
///
/// #[derive(Debug, Clone, Default)]
/// pub struct Mesh(Vec<u32>);
///
/// component! {
///     pub struct Renderable {
///         pub visible: bool,
///         pub mesh: Complex<Mesh> => FieldKind::Complex { deep_copy: true },
///     }
///     name = "render.Renderable";
///     version = 3;
/// }
/// ```
#[macro_export]
macro_rules! component {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $(
                $(#[$fmeta:meta])*
                $fvis:vis $field:ident : $ty:ty $(=> $kind:expr)?
            ),* $(,)?
        }
        $(storage = $strategy:ident;)?
        $(name = $tname:literal;)?
        $(version = $version:literal;)?
        $(on_deserialized = $hook:path;)?
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default)]
        $vis struct $name {
            pub base: $crate::ComponentBase,
            $(
                $(#[$fmeta])*
                $fvis $field: $ty,
            )*
        }

        impl $crate::ComponentDescriptor for $name {
            const NAME: &'static str = $crate::__component_name!($name $(, $tname)?);
            const STRATEGY: $crate::StorageStrategy = $crate::__component_strategy!($($strategy)?);
            const VERSION: u32 = $crate::__component_version!($($version)?);

            fn fields() -> &'static [$crate::FieldDescriptor] {
                const FIELDS: &[$crate::FieldDescriptor] = &[
                    $(
                        $crate::FieldDescriptor::new(
                            stringify!($field),
                            $crate::__field_kind!($ty $(, $kind)?),
                        ),
                    )*
                ];
                FIELDS
            }

            fn descriptor() -> $crate::ComponentType {
                static DESCRIPTOR: ::std::sync::OnceLock<$crate::ComponentType> =
                    ::std::sync::OnceLock::new();
                DESCRIPTOR
                    .get_or_init($crate::ComponentType::of::<$name>)
                    .clone()
            }
        }

        impl $crate::Component for $name {
            fn component_type(&self) -> $crate::ComponentType {
                <Self as $crate::ComponentDescriptor>::descriptor()
            }

            fn base(&self) -> &$crate::ComponentBase {
                &self.base
            }

            fn base_mut(&mut self) -> &mut $crate::ComponentBase {
                &mut self.base
            }

            fn field(&self, name: &str) -> ::std::option::Option<$crate::Value> {
                $(
                    if name == stringify!($field) {
                        return ::std::option::Option::Some(
                            $crate::FieldType::to_value(&self.$field),
                        );
                    }
                )*
                let _ = name;
                ::std::option::Option::None
            }

            fn set_field(
                &mut self,
                name: &str,
                value: $crate::Value,
            ) -> ::std::result::Result<(), $crate::ComponentError> {
                $(
                    if name == stringify!($field) {
                        return match <$ty as $crate::FieldType>::from_value(value) {
                            ::std::option::Option::Some(v) => {
                                self.$field = v;
                                ::std::result::Result::Ok(())
                            }
                            ::std::option::Option::None => {
                                ::std::result::Result::Err($crate::ComponentError::FieldType {
                                    component: <Self as $crate::ComponentDescriptor>::NAME.to_string(),
                                    field: name.to_string(),
                                })
                            }
                        };
                    }
                )*
                let _ = value;
                ::std::result::Result::Err($crate::ComponentError::UnknownField {
                    component: <Self as $crate::ComponentDescriptor>::NAME.to_string(),
                    field: name.to_string(),
                })
            }

            fn clone_component(&self) -> ::std::boxed::Box<dyn $crate::Component> {
                ::std::boxed::Box::new(::std::clone::Clone::clone(self))
            }

            fn as_any(&self) -> &dyn ::std::any::Any {
                self
            }

            fn as_any_mut(&mut self) -> &mut dyn ::std::any::Any {
                self
            }

            fn into_any(self: ::std::boxed::Box<Self>) -> ::std::boxed::Box<dyn ::std::any::Any> {
                self
            }

            $(
                fn on_deserialized(&mut self) {
                    $hook(self);
                }
            )?
        }
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __component_name {
    ($name:ident) => {
        stringify!($name)
    };
    ($name:ident, $tname:literal) => {
        $tname
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __component_strategy {
    () => {
        $crate::StorageStrategy::Record
    };
    ($strategy:ident) => {
        $crate::StorageStrategy::$strategy
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __component_version {
    () => {
        1
    };
    ($version:literal) => {
        $version
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __field_kind {
    ($ty:ty) => {
        <$ty as $crate::FieldType>::KIND
    };
    ($ty:ty, $kind:expr) => {
        $kind
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{Complex, FieldKind, NumericKind};

    crate::component! {
        pub struct Health {
            pub current: f32,
            pub max: f32,
        }
    }

    crate::component! {
        #[derive(PartialEq)]
        pub struct Tagged {
            pub label: String,
            pub flags: Vec<u8>,
        }
        storage = Columnar;
        name = "game.Tagged";
        version = 4;
        on_deserialized = Tagged::normalise;
    }

    impl Tagged {
        fn normalise(&mut self) {
            self.label = self.label.to_lowercase();
        }
    }

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Handle(u32);

    crate::component! {
        struct Holder {
            handle: Complex<Handle> => FieldKind::Complex { deep_copy: true },
        }
    }

    #[test]
    fn test_descriptor_defaults() {
        assert_eq!(Health::NAME, "Health");
        assert_eq!(Health::STRATEGY, StorageStrategy::Record);
        assert_eq!(Health::VERSION, 1);
        assert_eq!(
            Health::fields(),
            &[
                FieldDescriptor::new("current", FieldKind::Numeric(NumericKind::F32)),
                FieldDescriptor::new("max", FieldKind::Numeric(NumericKind::F32)),
            ]
        );
    }

    #[test]
    fn test_descriptor_settings() {
        assert_eq!(Tagged::NAME, "game.Tagged");
        assert_eq!(Tagged::STRATEGY, StorageStrategy::Columnar);
        assert_eq!(Tagged::VERSION, 4);
        assert_eq!(Tagged::fields()[1].kind, FieldKind::Collection);
        assert_eq!(
            Holder::fields()[0].kind,
            FieldKind::Complex { deep_copy: true }
        );
    }

    #[test]
    fn test_descriptor_is_shared() {
        let a = Health::descriptor();
        let b = Health::default().component_type();
        assert_eq!(a, b);
        assert_ne!(a, Tagged::descriptor());
    }

    #[test]
    fn test_named_type_differs_from_native() {
        let named = ComponentType::named("Health");
        assert_ne!(named, Health::descriptor());
        assert!(named.identity().is_named());
        assert!(!named.has_factory());
        assert!(named.instantiate(&ComponentIds::new()).is_none());
    }

    #[test]
    fn test_ids_are_monotonic_and_resettable() {
        let ids = ComponentIds::new();
        let a: Health = ids.create();
        let b: Health = ids.create();
        assert_eq!(a.id(), 1);
        assert_eq!(b.id(), 2);
        ids.reset();
        assert_eq!(ids.next_id(), 1);
    }

    #[test]
    fn test_instantiate_stamps_id() {
        let ids = ComponentIds::new();
        ids.next_id();
        let component = Health::descriptor().instantiate(&ids).unwrap();
        assert_eq!(component.id(), 2);
        assert!(component.is::<Health>());
    }

    #[test]
    fn test_dynamic_field_access() {
        let mut health = Health::default();
        health.set_field("current", Value::Float(42.5)).unwrap();
        assert_eq!(health.current, 42.5);
        assert_eq!(health.field("current"), Some(Value::Float(42.5)));
        assert_eq!(health.field("missing"), None);
    }

    #[test]
    fn test_set_field_errors() {
        let mut health = Health::default();
        assert!(matches!(
            health.set_field("nope", Value::Int(1)),
            Err(ComponentError::UnknownField { .. })
        ));
        assert!(matches!(
            health.set_field("max", Value::from("ten")),
            Err(ComponentError::FieldType { .. })
        ));
    }

    #[test]
    fn test_attach_and_mark_dirty() {
        let mut health = Health::default();
        assert_eq!(health.entity_id(), None);
        health.base_mut().attach(Entity::from_raw(9));
        assert_eq!(health.entity_id(), Some(Entity::from_raw(9)));
        health.mark_dirty(5);
        health.mark_dirty(3);
        assert_eq!(health.last_write_epoch(), 3);
        health.base_mut().detach();
        assert!(!health.base().is_attached());
    }

    #[test]
    fn test_downcast_through_trait_object() {
        let mut boxed: Box<dyn Component> = Box::new(Health {
            current: 1.0,
            ..Health::default()
        });
        boxed.downcast_mut::<Health>().unwrap().max = 10.0;
        assert!(boxed.downcast_ref::<Tagged>().is_none());
        let health = boxed.downcast::<Health>().unwrap();
        assert_eq!(health.max, 10.0);
    }

    #[test]
    fn test_on_deserialized_hook() {
        let mut tagged = Tagged {
            label: "LOUD".into(),
            ..Tagged::default()
        };
        Component::on_deserialized(&mut tagged);
        assert_eq!(tagged.label, "loud");
    }
}
