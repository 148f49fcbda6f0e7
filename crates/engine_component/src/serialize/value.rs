//! Conversion between [`Value`] graphs and JSON.
//!
//! Plain values map onto their JSON counterparts. Types JSON cannot express
//! directly are routed through a table of [`TypeHandler`]s and written as a
//! tagged envelope:
//!
//! ```json
//! { "__type": "Map", "value": [["gold", 5], ["wood", 12]] }
//! ```
//!
//! Entity references use their own envelope, `{"__entityRef": {"id", "guid"}}`,
//! and are never followed.
//!
//! Cycles through [`Value::Shared`] nodes are cut: a node that is already on
//! the path from the root is written as absent (dropped from objects, `null`
//! inside arrays). Opaque host values with no handler are absent too.

use std::cell::RefCell;
use std::rc::Rc;

use serde_json::{Map as JsonMap, Number, Value as Json, json};
use tracing::warn;

use crate::entity::{Entity, EntityRef};
use crate::value::Value;

/// Envelope key naming the handler of a tagged value.
pub const TYPE_TAG: &str = "__type";
/// Envelope key holding the payload of a tagged value.
pub const VALUE_TAG: &str = "value";
/// Envelope key of an entity reference.
pub const ENTITY_REF_TAG: &str = "__entityRef";

/// Encodes and decodes one family of values behind a `__type` tag.
pub trait TypeHandler {
    /// The tag written to `__type`.
    fn tag(&self) -> &str;

    /// Returns `true` if this handler is responsible for `value`.
    fn matches(&self, value: &Value) -> bool;

    /// Produce the envelope payload. `None` omits the value.
    fn encode(&self, value: &Value, encoder: &mut Encoder<'_>) -> Option<Json>;

    /// Rebuild a value from an envelope payload.
    fn decode(&self, payload: &Json, serializer: &ValueSerializer) -> Value;
}

/// Per-call encoding state handed to [`TypeHandler::encode`] so handlers can
/// encode nested values with cycle detection intact.
pub struct Encoder<'a> {
    serializer: &'a ValueSerializer,
    path: Vec<*const RefCell<Value>>,
}

impl Encoder<'_> {
    /// Encode a nested value. `None` means absent.
    pub fn encode(&mut self, value: &Value) -> Option<Json> {
        if let Some(handler) = self.serializer.handler_for(value) {
            let handler = Rc::clone(handler);
            let payload = handler.encode(value, self)?;
            return Some(json!({ TYPE_TAG: handler.tag(), VALUE_TAG: payload }));
        }

        match value {
            Value::Null => Some(Json::Null),
            Value::Bool(b) => Some(Json::Bool(*b)),
            Value::Int(i) => Some(Json::from(*i)),
            Value::Float(f) => Some(Number::from_f64(*f).map_or(Json::Null, Json::Number)),
            Value::String(s) => Some(Json::String(s.clone())),
            Value::Date(ms) => Some(Json::from(*ms)),
            Value::Array(items) | Value::Set(items) => Some(self.encode_items(items)),
            Value::Object(map) => {
                let out: JsonMap<String, Json> = map
                    .iter()
                    .filter_map(|(k, v)| Some((k.clone(), self.encode(v)?)))
                    .collect();
                Some(Json::Object(out))
            }
            Value::Map(entries) => Some(self.encode_pairs(entries)),
            Value::EntityRef(r) => Some(entity_ref_envelope(r)),
            Value::Shared(cell) => {
                let ptr = Rc::as_ptr(cell);
                if self.path.contains(&ptr) {
                    return None;
                }
                self.path.push(ptr);
                let out = self.encode(&cell.borrow());
                self.path.pop();
                out
            }
            Value::Opaque(_) => None,
        }
    }

    /// Encode a sequence; absent items become `null` so positions hold.
    pub fn encode_items(&mut self, items: &[Value]) -> Json {
        Json::Array(
            items
                .iter()
                .map(|v| self.encode(v).unwrap_or(Json::Null))
                .collect(),
        )
    }

    /// Encode key/value pairs as `[[k, v], ...]`.
    pub fn encode_pairs(&mut self, entries: &[(Value, Value)]) -> Json {
        Json::Array(
            entries
                .iter()
                .map(|(k, v)| {
                    Json::Array(vec![
                        self.encode(k).unwrap_or(Json::Null),
                        self.encode(v).unwrap_or(Json::Null),
                    ])
                })
                .collect(),
        )
    }
}

/// The JSON form of an entity reference.
#[must_use]
pub fn entity_ref_envelope(r: &EntityRef) -> Json {
    json!({ ENTITY_REF_TAG: { "id": r.id.id(), "guid": r.guid } })
}

/// If `json` is an entity-reference envelope, the reference it carries.
#[must_use]
pub fn parse_entity_ref(json: &Json) -> Option<EntityRef> {
    let object = json.as_object()?;
    if object.len() != 1 {
        return None;
    }
    let inner = object.get(ENTITY_REF_TAG)?.as_object()?;
    let id = inner.get("id")?.as_u64()?;
    let guid = inner.get("guid")?.as_str()?;
    Some(EntityRef::new(Entity::from_raw(id), guid))
}

/// JSON encoder/decoder for [`Value`] graphs with pluggable type handlers.
#[derive(Clone)]
pub struct ValueSerializer {
    handlers: Vec<Rc<dyn TypeHandler>>,
}

impl ValueSerializer {
    /// A serializer with the built-in `Date`, `Map` and `Set` handlers.
    #[must_use]
    pub fn new() -> Self {
        let mut serializer = Self::empty();
        serializer.register_handler(Rc::new(DateHandler));
        serializer.register_handler(Rc::new(MapHandler));
        serializer.register_handler(Rc::new(SetHandler));
        serializer
    }

    /// A serializer with no handlers. Dates then encode as plain integers,
    /// maps as pair arrays and sets as arrays.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// Add a handler. Later handlers take precedence over earlier ones for
    /// both matching and tag lookup.
    pub fn register_handler(&mut self, handler: Rc<dyn TypeHandler>) {
        self.handlers.push(handler);
    }

    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    fn handler_for(&self, value: &Value) -> Option<&Rc<dyn TypeHandler>> {
        self.handlers.iter().rev().find(|h| h.matches(value))
    }

    fn handler_by_tag(&self, tag: &str) -> Option<&Rc<dyn TypeHandler>> {
        self.handlers.iter().rev().find(|h| h.tag() == tag)
    }

    /// Encode `value`. `None` means the value is absent at the top level
    /// (an unhandled opaque value, or nothing left after cycle cutting).
    #[must_use]
    pub fn serialize(&self, value: &Value) -> Option<Json> {
        let mut encoder = Encoder {
            serializer: self,
            path: Vec::new(),
        };
        encoder.encode(value)
    }

    /// Decode `json`, dispatching tagged envelopes to their handler.
    ///
    /// An unknown `__type` tag is logged and decodes to [`Value::Null`].
    #[must_use]
    pub fn deserialize(&self, json: &Json) -> Value {
        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(*b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => n.as_f64().map_or(Value::Null, Value::Float),
            },
            Json::String(s) => Value::String(s.clone()),
            Json::Array(items) => Value::Array(items.iter().map(|v| self.deserialize(v)).collect()),
            Json::Object(map) => {
                if let Some(Json::String(tag)) = map.get(TYPE_TAG) {
                    let payload = map.get(VALUE_TAG).unwrap_or(&Json::Null);
                    return match self.handler_by_tag(tag) {
                        Some(handler) => handler.decode(payload, self),
                        None => {
                            warn!(tag = %tag, "unknown serialized type tag");
                            Value::Null
                        }
                    };
                }
                if let Some(r) = parse_entity_ref(json) {
                    return Value::EntityRef(r);
                }
                Value::Object(
                    map.iter()
                        .map(|(k, v)| (k.clone(), self.deserialize(v)))
                        .collect(),
                )
            }
        }
    }
}

impl Default for ValueSerializer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ValueSerializer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValueSerializer")
            .field(
                "handlers",
                &self.handlers.iter().map(|h| h.tag().to_string()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

// ── Built-in handlers ───────────────────────────────────────────────────

/// Milliseconds since the Unix epoch.
struct DateHandler;

impl TypeHandler for DateHandler {
    fn tag(&self) -> &str {
        "Date"
    }

    fn matches(&self, value: &Value) -> bool {
        matches!(value, Value::Date(_))
    }

    fn encode(&self, value: &Value, _encoder: &mut Encoder<'_>) -> Option<Json> {
        match value {
            Value::Date(ms) => Some(Json::from(*ms)),
            _ => None,
        }
    }

    fn decode(&self, payload: &Json, _serializer: &ValueSerializer) -> Value {
        match payload.as_i64() {
            Some(ms) => Value::Date(ms),
            None => {
                warn!(payload = %payload, "malformed Date payload");
                Value::Null
            }
        }
    }
}

/// Ordered key/value pairs.
struct MapHandler;

impl TypeHandler for MapHandler {
    fn tag(&self) -> &str {
        "Map"
    }

    fn matches(&self, value: &Value) -> bool {
        matches!(value, Value::Map(_))
    }

    fn encode(&self, value: &Value, encoder: &mut Encoder<'_>) -> Option<Json> {
        match value {
            Value::Map(entries) => Some(encoder.encode_pairs(entries)),
            _ => None,
        }
    }

    fn decode(&self, payload: &Json, serializer: &ValueSerializer) -> Value {
        let Some(pairs) = payload.as_array() else {
            warn!("malformed Map payload");
            return Value::Null;
        };
        Value::Map(
            pairs
                .iter()
                .filter_map(|pair| match pair.as_array().map(Vec::as_slice) {
                    Some([k, v]) => Some((serializer.deserialize(k), serializer.deserialize(v))),
                    _ => {
                        warn!("skipping malformed Map entry");
                        None
                    }
                })
                .collect(),
        )
    }
}

/// Unique members, order preserved.
struct SetHandler;

impl TypeHandler for SetHandler {
    fn tag(&self) -> &str {
        "Set"
    }

    fn matches(&self, value: &Value) -> bool {
        matches!(value, Value::Set(_))
    }

    fn encode(&self, value: &Value, encoder: &mut Encoder<'_>) -> Option<Json> {
        match value {
            Value::Set(items) => Some(encoder.encode_items(items)),
            _ => None,
        }
    }

    fn decode(&self, payload: &Json, serializer: &ValueSerializer) -> Value {
        match payload.as_array() {
            Some(items) => Value::Set(items.iter().map(|v| serializer.deserialize(v)).collect()),
            None => {
                warn!("malformed Set payload");
                Value::Null
            }
        }
    }
}
