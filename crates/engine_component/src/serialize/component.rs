//! Component-level serialisation.
//!
//! A component is written as a [`SerializedComponent`]:
//!
//! ```json
//! { "type": "Position", "version": 1, "data": { "x": 10.0, "y": 20.0 } }
//! ```
//!
//! Which fields take part is decided by [`FieldMetadata`], built from the
//! registered descriptor tables. Complex fields are left out unless a custom
//! [`FieldSerializer`] is attached to them.
//!
//! Entity-reference fields are written as `{"__entityRef": {"id", "guid"}}`.
//! On the way back in they are not resolved: each one is reported to a
//! [`SerializationContext`] as a pending reference, to be linked once every
//! entity of the payload exists.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as Json};
use tracing::{debug, warn};

use super::value::{ValueSerializer, parse_entity_ref};
use crate::component::{Component, ComponentDescriptor, ComponentIds, ComponentType};
use crate::entity::{Entity, EntityRef};
use crate::error::ComponentError;
use crate::field::FieldKind;
use crate::registry::ComponentRegistry;
use crate::value::Value;

/// The persisted form of one component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedComponent {
    /// Registered component type name.
    #[serde(rename = "type")]
    pub type_name: String,
    /// Schema version of the writer.
    pub version: u32,
    /// Field name to encoded value.
    pub data: JsonMap<String, Json>,
}

/// Custom encoding for a single field.
pub trait FieldSerializer {
    fn serialize(&self, value: &Value, values: &ValueSerializer) -> Option<Json>;

    fn deserialize(&self, json: &Json, values: &ValueSerializer) -> Value;
}

/// Receives entity references found while rebuilding components.
pub trait SerializationContext {
    /// Record that `field` of the component with id `component_id` should
    /// point at the entity known as `target_guid` (`target_id` in the writer's
    /// scene) once it has been rebuilt.
    fn register_pending_ref(
        &mut self,
        component_id: u64,
        field: &str,
        target_id: Entity,
        target_guid: &str,
    );
}

/// One unresolved entity-reference field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRef {
    pub component_id: u64,
    pub field: String,
    pub target_id: Entity,
    pub target_guid: String,
}

impl PendingRef {
    /// Write the resolved reference into `component`.
    ///
    /// # Errors
    ///
    /// Propagates the component's [`ComponentError`] if the field is unknown
    /// or not an entity-reference field.
    pub fn apply(&self, component: &mut dyn Component, target: EntityRef) -> Result<(), ComponentError> {
        component.set_field(&self.field, Value::EntityRef(target))
    }
}

/// A [`SerializationContext`] that simply collects pending references for a
/// later resolution pass.
#[derive(Debug, Default)]
pub struct PendingRefs {
    refs: Vec<PendingRef>,
}

impl PendingRefs {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.refs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingRef> {
        self.refs.iter()
    }

    /// Drain every collected reference.
    pub fn take(&mut self) -> Vec<PendingRef> {
        std::mem::take(&mut self.refs)
    }
}

impl SerializationContext for PendingRefs {
    fn register_pending_ref(
        &mut self,
        component_id: u64,
        field: &str,
        target_id: Entity,
        target_guid: &str,
    ) {
        self.refs.push(PendingRef {
            component_id,
            field: field.to_string(),
            target_id,
            target_guid: target_guid.to_string(),
        });
    }
}

/// A field taking part in serialisation.
#[derive(Clone)]
pub struct FieldEntry {
    pub name: &'static str,
    pub kind: FieldKind,
    pub serializer: Option<Rc<dyn FieldSerializer>>,
}

impl fmt::Debug for FieldEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldEntry")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("custom", &self.serializer.is_some())
            .finish()
    }
}

/// Per-type lists of serialised fields.
#[derive(Debug, Default, Clone)]
pub struct FieldMetadata {
    types: HashMap<String, Vec<FieldEntry>>,
    complex: HashMap<String, Vec<FieldEntry>>,
}

impl FieldMetadata {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Metadata for every type registered in `registry`.
    #[must_use]
    pub fn from_registry(registry: &ComponentRegistry) -> Self {
        let mut metadata = Self::new();
        for (_, ty) in registry.types() {
            metadata.register_type(ty);
        }
        metadata
    }

    /// Take the field list of `ty` from its descriptor table, replacing any
    /// previous entry for the same name.
    pub fn register_type(&mut self, ty: &ComponentType) {
        let (complex, plain): (Vec<_>, Vec<_>) = ty
            .fields()
            .iter()
            .map(|f| FieldEntry {
                name: f.name,
                kind: f.kind,
                serializer: None,
            })
            .partition(|e| matches!(e.kind, FieldKind::Complex { .. }));
        self.types.insert(ty.name().to_string(), plain);
        self.complex.insert(ty.name().to_string(), complex);
    }

    pub fn register<T: ComponentDescriptor>(&mut self) {
        self.register_type(&T::descriptor());
    }

    /// Stop serialising `field` of `type_name`.
    pub fn exclude(&mut self, type_name: &str, field: &str) {
        if let Some(entries) = self.types.get_mut(type_name) {
            entries.retain(|e| e.name != field);
        }
    }

    /// Use `serializer` for `field` of `type_name`. A complex field becomes
    /// serialised once it has a custom serializer. Returns `false` if the
    /// type or field is unknown.
    pub fn set_serializer(
        &mut self,
        type_name: &str,
        field: &str,
        serializer: Rc<dyn FieldSerializer>,
    ) -> bool {
        let Some(entries) = self.types.get_mut(type_name) else {
            return false;
        };
        if let Some(entry) = entries.iter_mut().find(|e| e.name == field) {
            entry.serializer = Some(serializer);
            return true;
        }
        let Some(complex) = self.complex.get_mut(type_name) else {
            return false;
        };
        match complex.iter().position(|e| e.name == field) {
            Some(pos) => {
                let mut entry = complex.remove(pos);
                entry.serializer = Some(serializer);
                entries.push(entry);
                true
            }
            None => false,
        }
    }

    /// The serialised fields of `type_name`.
    #[must_use]
    pub fn fields(&self, type_name: &str) -> Option<&[FieldEntry]> {
        self.types.get(type_name).map(Vec::as_slice)
    }
}

/// Converts components to and from [`SerializedComponent`].
#[derive(Debug, Clone, Default)]
pub struct ComponentSerializer {
    values: ValueSerializer,
    metadata: FieldMetadata,
}

impl ComponentSerializer {
    #[must_use]
    pub fn new(values: ValueSerializer, metadata: FieldMetadata) -> Self {
        Self { values, metadata }
    }

    /// Built-in value handlers and metadata for every type in `registry`.
    #[must_use]
    pub fn for_registry(registry: &ComponentRegistry) -> Self {
        Self::new(ValueSerializer::new(), FieldMetadata::from_registry(registry))
    }

    #[must_use]
    pub fn values(&self) -> &ValueSerializer {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut ValueSerializer {
        &mut self.values
    }

    #[must_use]
    pub fn metadata(&self) -> &FieldMetadata {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut FieldMetadata {
        &mut self.metadata
    }

    /// Serialise `component`.
    ///
    /// Returns `None` (with a warning) if its type has no field metadata.
    #[must_use]
    pub fn serialize(&self, component: &dyn Component) -> Option<SerializedComponent> {
        let ty = component.component_type();
        let Some(fields) = self.metadata.fields(ty.name()) else {
            warn!(component = ty.name(), "no field metadata; component not serialized");
            return None;
        };

        let mut data = JsonMap::new();
        for entry in fields {
            let Some(value) = component.field(entry.name) else {
                continue;
            };
            let encoded = match &entry.serializer {
                Some(custom) => custom.serialize(&value, &self.values),
                None => self.values.serialize(&value),
            };
            if let Some(json) = encoded {
                data.insert(entry.name.to_string(), json);
            }
        }

        Some(SerializedComponent {
            type_name: ty.name().to_string(),
            version: ty.version(),
            data,
        })
    }

    /// Rebuild a component from `data`.
    ///
    /// The type is looked up by name in `registry` and instantiated with a
    /// fresh id from `ids`. Entity-reference fields are reported to `context`
    /// instead of being set. [`Component::on_deserialized`] runs last.
    ///
    /// Unknown types, types without a factory and types without metadata are
    /// logged and yield `None`. Fields that fail to convert are logged and
    /// keep their default.
    pub fn deserialize(
        &self,
        data: &SerializedComponent,
        registry: &ComponentRegistry,
        ids: &ComponentIds,
        context: &mut dyn SerializationContext,
    ) -> Option<Box<dyn Component>> {
        let Some(ty) = registry.type_by_name(&data.type_name) else {
            warn!(component = %data.type_name, "unknown component type; skipped");
            return None;
        };
        let Some(fields) = self.metadata.fields(ty.name()) else {
            warn!(component = ty.name(), "no field metadata; component skipped");
            return None;
        };
        let Some(mut component) = ty.instantiate(ids) else {
            warn!(component = ty.name(), "component type cannot be instantiated; skipped");
            return None;
        };
        if data.version != ty.version() {
            debug!(
                component = ty.name(),
                stored = data.version,
                current = ty.version(),
                "component version differs"
            );
        }

        for entry in fields {
            let Some(json) = data.data.get(entry.name) else {
                continue;
            };
            if let Some(target) = parse_entity_ref(json) {
                context.register_pending_ref(component.id(), entry.name, target.id, &target.guid);
                continue;
            }
            let value = match &entry.serializer {
                Some(custom) => custom.deserialize(json, &self.values),
                None => self.values.deserialize(json),
            };
            if let Err(err) = component.set_field(entry.name, value) {
                warn!(component = ty.name(), field = entry.name, error = %err, "field not restored");
            }
        }

        component.on_deserialized();
        Some(component)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::json;

    use super::*;
    use crate::field::Complex;

    crate::component! {
        pub struct Position {
            pub x: f32,
            pub y: f32,
        }
    }

    crate::component! {
        pub struct Inventory {
            pub owner: String,
            pub items: BTreeMap<String, i32>,
            pub target: Option<EntityRef>,
            pub cache: Complex<Vec<u8>>,
            pub loaded: bool,
        }
        version = 2;
        on_deserialized = Inventory::mark_loaded;
    }

    impl Inventory {
        fn mark_loaded(&mut self) {
            self.loaded = true;
        }
    }

    struct HexSerializer;

    impl FieldSerializer for HexSerializer {
        fn serialize(&self, value: &Value, _values: &ValueSerializer) -> Option<Json> {
            value.as_i64().map(|n| Json::String(format!("{n:x}")))
        }

        fn deserialize(&self, json: &Json, _values: &ValueSerializer) -> Value {
            json.as_str()
                .and_then(|s| i64::from_str_radix(s, 16).ok())
                .map_or(Value::Null, Value::Int)
        }
    }

    crate::component! {
        pub struct Counter {
            pub count: i32,
        }
    }

    fn setup() -> (ComponentRegistry, ComponentSerializer) {
        let mut registry = ComponentRegistry::new();
        registry.register_type::<Position>().unwrap();
        registry.register_type::<Inventory>().unwrap();
        registry.register_type::<Counter>().unwrap();
        let serializer = ComponentSerializer::for_registry(&registry);
        (registry, serializer)
    }

    #[test]
    fn test_serialize_plain_fields() {
        let (_, serializer) = setup();
        let position = Position {
            x: 10.0,
            y: 20.0,
            ..Position::default()
        };
        let out = serializer.serialize(&position).unwrap();
        assert_eq!(out.type_name, "Position");
        assert_eq!(out.version, 1);
        assert_eq!(Json::Object(out.data), json!({"x": 10.0, "y": 20.0}));
    }

    #[test]
    fn test_wire_shape() {
        let out = SerializedComponent {
            type_name: "Position".into(),
            version: 1,
            data: JsonMap::new(),
        };
        assert_eq!(
            serde_json::to_value(&out).unwrap(),
            json!({"type": "Position", "version": 1, "data": {}})
        );
    }

    #[test]
    fn test_roundtrip_with_entity_ref_goes_pending() {
        let (registry, serializer) = setup();
        let ids = ComponentIds::new();
        let mut items = BTreeMap::new();
        items.insert("gold".to_string(), 5);
        let inventory = Inventory {
            owner: "ada".into(),
            items: items.clone(),
            target: Some(EntityRef::new(Entity::from_raw(3), "guid-3")),
            cache: Complex::new(vec![9]),
            ..Inventory::default()
        };

        let out = serializer.serialize(&inventory).unwrap();
        assert_eq!(out.version, 2);
        assert!(!out.data.contains_key("cache"));
        assert_eq!(out.data["target"], json!({"__entityRef": {"id": 3, "guid": "guid-3"}}));

        let mut pending = PendingRefs::new();
        let restored = serializer
            .deserialize(&out, &registry, &ids, &mut pending)
            .unwrap();
        let restored = restored.downcast_ref::<Inventory>().unwrap();
        assert_eq!(restored.owner, "ada");
        assert_eq!(restored.items, items);
        assert_eq!(restored.target, None);
        assert!(restored.loaded);

        let refs = pending.take();
        assert_eq!(
            refs,
            vec![PendingRef {
                component_id: restored.base.id(),
                field: "target".into(),
                target_id: Entity::from_raw(3),
                target_guid: "guid-3".into(),
            }]
        );
    }

    #[test]
    fn test_pending_ref_apply() {
        let mut inventory = Inventory::default();
        let pending = PendingRef {
            component_id: 0,
            field: "target".into(),
            target_id: Entity::from_raw(3),
            target_guid: "guid-3".into(),
        };
        let resolved = EntityRef::new(Entity::from_raw(40), "guid-3");
        pending.apply(&mut inventory, resolved.clone()).unwrap();
        assert_eq!(inventory.target, Some(resolved));
    }

    #[test]
    fn test_unknown_type_yields_none() {
        let (registry, serializer) = setup();
        let data = SerializedComponent {
            type_name: "Ghost".into(),
            version: 1,
            data: JsonMap::new(),
        };
        let mut pending = PendingRefs::new();
        assert!(
            serializer
                .deserialize(&data, &registry, &ComponentIds::new(), &mut pending)
                .is_none()
        );
    }

    #[test]
    fn test_missing_metadata_yields_none() {
        let registry = ComponentRegistry::new();
        let serializer = ComponentSerializer::for_registry(&registry);
        assert!(serializer.serialize(&Position::default()).is_none());
    }

    #[test]
    fn test_bad_field_keeps_default() {
        let (registry, serializer) = setup();
        let data: SerializedComponent = serde_json::from_value(json!({
            "type": "Position",
            "version": 1,
            "data": {"x": "left", "y": 4}
        }))
        .unwrap();
        let mut pending = PendingRefs::new();
        let restored = serializer
            .deserialize(&data, &registry, &ComponentIds::new(), &mut pending)
            .unwrap();
        let position = restored.downcast_ref::<Position>().unwrap();
        assert_eq!(position.x, 0.0);
        assert_eq!(position.y, 4.0);
    }

    #[test]
    fn test_exclude_and_custom_serializer() {
        let (registry, mut serializer) = setup();
        serializer.metadata_mut().exclude("Position", "y");
        assert!(
            serializer
                .metadata_mut()
                .set_serializer("Counter", "count", Rc::new(HexSerializer))
        );
        assert!(
            !serializer
                .metadata_mut()
                .set_serializer("Counter", "missing", Rc::new(HexSerializer))
        );

        let out = serializer.serialize(&Position { x: 1.0, y: 2.0, ..Position::default() }).unwrap();
        assert_eq!(Json::Object(out.data), json!({"x": 1.0}));

        let out = serializer.serialize(&Counter { count: 255, ..Counter::default() }).unwrap();
        assert_eq!(out.data["count"], json!("ff"));
        let restored = serializer
            .deserialize(&out, &registry, &ComponentIds::new(), &mut PendingRefs::new())
            .unwrap();
        assert_eq!(restored.downcast_ref::<Counter>().unwrap().count, 255);
    }
}
