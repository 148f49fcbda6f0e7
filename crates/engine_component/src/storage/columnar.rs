//! Columnar ("structure of arrays") component storage.
//!
//! All instances of one component type live in parallel columns indexed by a
//! dense slot:
//!
//! ```text
//!   slot:        0      1      2      3
//!   x: f32   [ 10.0 | 3.5  | ---- | 7.0  ]
//!   y: f32   [ 20.0 | 1.0  | ---- | 2.0  ]
//!   entity   [  E7  |  E2  | free |  E9  ]
//! ```
//!
//! Numeric fields get a typed column, booleans a byte column, strings a
//! string column. Collections are kept as MessagePack blobs of their JSON
//! form and decoded on read. Entity references and complex host values do
//! not fit a column and live in per-entity side tables.
//!
//! Freed slots go on a stack and are reused before the columns grow. Their
//! contents are left as they were: anything that walks a column by raw index
//! must filter with [`ColumnarStorage::active_slots`].

use std::any::Any;
use std::collections::HashMap;

use serde_json::Value as Json;
use tracing::{debug, warn};

use super::ComponentStorage;
use crate::component::{Component, ComponentDescriptor, ComponentType, StorageStrategy};
use crate::config::StorageConfig;
use crate::entity::Entity;
use crate::error::{ComponentError, StorageError};
use crate::field::{FieldKind, FieldType, NumericKind};
use crate::serialize::ValueSerializer;
use crate::value::Value;

// ── Columns ─────────────────────────────────────────────────────────────

/// One backing array. Its length is the storage capacity.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    I8(Vec<i8>),
    I16(Vec<i16>),
    I32(Vec<i32>),
    U8(Vec<u8>),
    U16(Vec<u16>),
    U32(Vec<u32>),
    F32(Vec<f32>),
    F64(Vec<f64>),
    /// Booleans as `0`/`1`.
    Bool(Vec<u8>),
    Str(Vec<String>),
    /// MessagePack of the JSON form; `None` for a null collection.
    Blob(Vec<Option<Vec<u8>>>),
}

macro_rules! for_each_column {
    ($column:expr, $v:ident => $body:expr) => {
        match $column {
            Column::I8($v) => $body,
            Column::I16($v) => $body,
            Column::I32($v) => $body,
            Column::U8($v) => $body,
            Column::U16($v) => $body,
            Column::U32($v) => $body,
            Column::F32($v) => $body,
            Column::F64($v) => $body,
            Column::Bool($v) => $body,
            Column::Str($v) => $body,
            Column::Blob($v) => $body,
        }
    };
}

macro_rules! typed_slices {
    ($($variant:ident: $ty:ty => $get:ident, $get_mut:ident;)*) => {
        impl Column {
            $(
                #[must_use]
                pub fn $get(&self) -> Option<&[$ty]> {
                    match self {
                        Column::$variant(v) => Some(v),
                        _ => None,
                    }
                }

                pub fn $get_mut(&mut self) -> Option<&mut [$ty]> {
                    match self {
                        Column::$variant(v) => Some(v),
                        _ => None,
                    }
                }
            )*
        }
    };
}

typed_slices! {
    I8: i8 => as_i8, as_i8_mut;
    I16: i16 => as_i16, as_i16_mut;
    I32: i32 => as_i32, as_i32_mut;
    U8: u8 => as_u8, as_u8_mut;
    U16: u16 => as_u16, as_u16_mut;
    U32: u32 => as_u32, as_u32_mut;
    F32: f32 => as_f32, as_f32_mut;
    F64: f64 => as_f64, as_f64_mut;
    Bool: u8 => as_bool_bytes, as_bool_bytes_mut;
    Str: String => as_strings, as_strings_mut;
}

fn clamp_int<T: TryFrom<i64> + Copy>(value: i64, min: T, max: T) -> T
where
    i64: From<T>,
{
    T::try_from(value).unwrap_or(if value < i64::from(min) { min } else { max })
}

impl Column {
    /// A column for `kind`, or `None` if the kind is kept in a side table.
    #[must_use]
    pub fn for_kind(kind: FieldKind, capacity: usize) -> Option<Self> {
        let column = match kind {
            FieldKind::Numeric(NumericKind::I8) => Column::I8(vec![0; capacity]),
            FieldKind::Numeric(NumericKind::I16) => Column::I16(vec![0; capacity]),
            FieldKind::Numeric(NumericKind::I32) => Column::I32(vec![0; capacity]),
            FieldKind::Numeric(NumericKind::U8) => Column::U8(vec![0; capacity]),
            FieldKind::Numeric(NumericKind::U16) => Column::U16(vec![0; capacity]),
            FieldKind::Numeric(NumericKind::U32) => Column::U32(vec![0; capacity]),
            FieldKind::Numeric(NumericKind::F32) => Column::F32(vec![0.0; capacity]),
            FieldKind::Numeric(NumericKind::F64) => Column::F64(vec![0.0; capacity]),
            FieldKind::Bool => Column::Bool(vec![0; capacity]),
            FieldKind::String => Column::Str(vec![String::new(); capacity]),
            FieldKind::Collection => Column::Blob(vec![None; capacity]),
            FieldKind::EntityRef | FieldKind::Complex { .. } => return None,
        };
        Some(column)
    }

    /// Backing length.
    #[must_use]
    pub fn len(&self) -> usize {
        for_each_column!(self, v => v.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn grow(&mut self, capacity: usize) {
        for_each_column!(self, v => v.resize_with(capacity, Default::default));
    }

    fn swap(&mut self, a: usize, b: usize) {
        for_each_column!(self, v => v.swap(a, b));
    }

    /// Read `slot` as a dynamic value.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Decode`] if a collection blob is corrupt.
    pub fn read(&self, slot: usize, values: &ValueSerializer) -> Result<Value, StorageError> {
        let value = match self {
            Column::I8(v) => Value::Int(i64::from(v[slot])),
            Column::I16(v) => Value::Int(i64::from(v[slot])),
            Column::I32(v) => Value::Int(i64::from(v[slot])),
            Column::U8(v) => Value::Int(i64::from(v[slot])),
            Column::U16(v) => Value::Int(i64::from(v[slot])),
            Column::U32(v) => Value::Int(i64::from(v[slot])),
            Column::F32(v) => Value::Float(f64::from(v[slot])),
            Column::F64(v) => Value::Float(v[slot]),
            Column::Bool(v) => Value::Bool(v[slot] != 0),
            Column::Str(v) => Value::String(v[slot].clone()),
            Column::Blob(v) => match &v[slot] {
                Some(bytes) => {
                    let json: Json = rmp_serde::from_slice(bytes)?;
                    values.deserialize(&json)
                }
                None => Value::Null,
            },
        };
        Ok(value)
    }

    /// Write `value` into `slot`. Out-of-range integers saturate.
    ///
    /// Returns `Ok(false)` if the value has the wrong shape for this column.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Encode`] if a collection cannot be encoded.
    pub fn write(
        &mut self,
        slot: usize,
        value: &Value,
        values: &ValueSerializer,
    ) -> Result<bool, StorageError> {
        match self.stage(value, values)? {
            Some(cell) => {
                self.commit(slot, cell);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Convert `value` into this column's cell type without touching any
    /// slot. `Ok(None)` if it has the wrong shape.
    fn stage(&self, value: &Value, values: &ValueSerializer) -> Result<Option<Cell>, StorageError> {
        let cell = match self {
            Column::F32(_) | Column::F64(_) => value.as_f64().map(Cell::Float),
            Column::Bool(_) => value.as_bool().map(Cell::Bool),
            Column::Str(_) => match value {
                Value::String(s) => Some(Cell::Str(s.clone())),
                Value::Null => Some(Cell::Str(String::new())),
                _ => None,
            },
            Column::Blob(_) => Some(Cell::Blob(match values.serialize(value) {
                Some(Json::Null) | None => None,
                Some(json) => Some(rmp_serde::to_vec_named(&json)?),
            })),
            _ => value.as_i64().map(Cell::Int),
        };
        Ok(cell)
    }

    /// Store a cell produced by [`Column::stage`] on this column.
    fn commit(&mut self, slot: usize, cell: Cell) {
        match (self, cell) {
            (Column::F32(v), Cell::Float(x)) => v[slot] = x as f32,
            (Column::F64(v), Cell::Float(x)) => v[slot] = x,
            (Column::Bool(v), Cell::Bool(b)) => v[slot] = u8::from(b),
            (Column::Str(v), Cell::Str(s)) => v[slot] = s,
            (Column::Blob(v), Cell::Blob(bytes)) => v[slot] = bytes,
            (Column::I8(v), Cell::Int(n)) => v[slot] = clamp_int(n, i8::MIN, i8::MAX),
            (Column::I16(v), Cell::Int(n)) => v[slot] = clamp_int(n, i16::MIN, i16::MAX),
            (Column::I32(v), Cell::Int(n)) => v[slot] = clamp_int(n, i32::MIN, i32::MAX),
            (Column::U8(v), Cell::Int(n)) => v[slot] = clamp_int(n, u8::MIN, u8::MAX),
            (Column::U16(v), Cell::Int(n)) => v[slot] = clamp_int(n, u16::MIN, u16::MAX),
            (Column::U32(v), Cell::Int(n)) => v[slot] = clamp_int(n, u32::MIN, u32::MAX),
            (_, cell) => warn!(?cell, "cell does not match column"),
        }
    }
}

/// A field value converted for its column, ready to be committed.
#[derive(Debug)]
enum Cell {
    Float(f64),
    Int(i64),
    Bool(bool),
    Str(String),
    Blob(Option<Vec<u8>>),
}

/// The column half of a columnar storage, handed to batch operations.
///
/// Column slices span the whole capacity; only the slots passed alongside
/// hold live data.
#[derive(Debug, Clone, Default)]
pub struct FieldColumns {
    names: Vec<&'static str>,
    columns: Vec<Column>,
    epochs: Vec<u64>,
}

impl FieldColumns {
    fn position(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| *n == name)
    }

    /// Names of the columnar fields, in declaration order.
    #[must_use]
    pub fn names(&self) -> &[&'static str] {
        &self.names
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Column> {
        self.position(name).map(|i| &self.columns[i])
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Column> {
        self.position(name).map(|i| &mut self.columns[i])
    }

    #[must_use]
    pub fn f32(&self, name: &str) -> Option<&[f32]> {
        self.get(name)?.as_f32()
    }

    pub fn f32_mut(&mut self, name: &str) -> Option<&mut [f32]> {
        self.get_mut(name)?.as_f32_mut()
    }

    #[must_use]
    pub fn f64(&self, name: &str) -> Option<&[f64]> {
        self.get(name)?.as_f64()
    }

    pub fn f64_mut(&mut self, name: &str) -> Option<&mut [f64]> {
        self.get_mut(name)?.as_f64_mut()
    }

    #[must_use]
    pub fn i32(&self, name: &str) -> Option<&[i32]> {
        self.get(name)?.as_i32()
    }

    pub fn i32_mut(&mut self, name: &str) -> Option<&mut [i32]> {
        self.get_mut(name)?.as_i32_mut()
    }

    /// Two distinct columns at once, the first mutable. Useful for
    /// `a[i] += b[i]` style updates.
    pub fn pair_mut(&mut self, write: &str, read: &str) -> Option<(&mut Column, &Column)> {
        let w = self.position(write)?;
        let r = self.position(read)?;
        if w == r {
            return None;
        }
        if w < r {
            let (left, right) = self.columns.split_at_mut(r);
            Some((&mut left[w], &right[0]))
        } else {
            let (left, right) = self.columns.split_at_mut(w);
            Some((&mut right[0], &left[r]))
        }
    }

    /// Change-detection stamps, by slot.
    #[must_use]
    pub fn epochs(&self) -> &[u64] {
        &self.epochs
    }

    /// Stamp `slot` as written at `epoch`.
    pub fn mark_dirty(&mut self, slot: usize, epoch: u64) {
        self.epochs[slot] = epoch;
    }

    fn grow(&mut self, capacity: usize) {
        for column in &mut self.columns {
            column.grow(capacity);
        }
        self.epochs.resize(capacity, 0);
    }

    fn swap(&mut self, a: usize, b: usize) {
        for column in &mut self.columns {
            column.swap(a, b);
        }
        self.epochs.swap(a, b);
    }
}

#[derive(Debug, Clone)]
struct SideTable {
    name: &'static str,
    deep_copy: bool,
    entries: HashMap<Entity, Value>,
}

impl SideTable {
    fn store(&mut self, entity: Entity, value: Value) {
        if value.is_null() {
            self.entries.remove(&entity);
        } else if self.deep_copy {
            self.entries.insert(entity, value.deep_clone());
        } else {
            self.entries.insert(entity, value);
        }
    }

    fn load(&self, entity: Entity) -> Value {
        match self.entries.get(&entity) {
            Some(value) if self.deep_copy => value.deep_clone(),
            Some(value) => value.clone(),
            None => Value::Null,
        }
    }
}

/// Occupancy figures for a [`ColumnarStorage`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColumnarStats {
    pub len: usize,
    pub capacity: usize,
    pub free_slots: usize,
    /// Slots ever handed out since the last compaction.
    pub high_water: usize,
    /// Share of handed-out slots that are currently free.
    pub fragmentation: f64,
}

// ── Storage ─────────────────────────────────────────────────────────────

/// Parallel-column storage for one component type.
#[derive(Debug)]
pub struct ColumnarStorage {
    ty: ComponentType,
    fields: FieldColumns,
    side_tables: Vec<SideTable>,
    ids: Vec<u64>,
    entity_to_slot: HashMap<Entity, usize>,
    slot_to_entity: Vec<Option<Entity>>,
    free_slots: Vec<usize>,
    next_slot: usize,
    capacity: usize,
    values: ValueSerializer,
}

impl ColumnarStorage {
    /// Storage for `ty` with the default [`StorageConfig`].
    #[must_use]
    pub fn new(ty: ComponentType) -> Self {
        Self::with_config(ty, &StorageConfig::default())
    }

    /// Storage for `ty`. Fields are classified once, from the type's
    /// descriptor table.
    #[must_use]
    pub fn with_config(ty: ComponentType, config: &StorageConfig) -> Self {
        let capacity = config.initial_capacity;
        let mut fields = FieldColumns {
            epochs: vec![0; capacity],
            ..FieldColumns::default()
        };
        let mut side_tables = Vec::new();
        for field in ty.fields() {
            match Column::for_kind(field.kind, capacity) {
                Some(column) => {
                    fields.names.push(field.name);
                    fields.columns.push(column);
                }
                None => side_tables.push(SideTable {
                    name: field.name,
                    deep_copy: matches!(field.kind, FieldKind::Complex { deep_copy: true }),
                    entries: HashMap::new(),
                }),
            }
        }
        Self {
            ty,
            fields,
            side_tables,
            ids: vec![0; capacity],
            entity_to_slot: HashMap::new(),
            slot_to_entity: vec![None; capacity],
            free_slots: Vec::new(),
            next_slot: 0,
            capacity,
            values: ValueSerializer::new(),
        }
    }

    /// Storage for the Rust component type `T`.
    #[must_use]
    pub fn of<T: ComponentDescriptor>() -> Self {
        Self::new(T::descriptor())
    }

    /// Store `component` for `entity`, returning its slot.
    ///
    /// An entity that already has a slot is updated in place. Otherwise a
    /// freed slot is reused, or a new one is appended, doubling the capacity
    /// when full.
    ///
    /// Every field is converted before any column is written, so a failed
    /// update leaves the entity's previous values intact.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NoFactory`] if this storage's type cannot be
    /// instantiated, [`StorageError::TypeMismatch`] for a component of
    /// another type, a field type error for a value that does not fit its
    /// column, or an encoding error for an unencodable collection field. No
    /// slot is allocated on error.
    pub fn add_component(
        &mut self,
        entity: Entity,
        component: &dyn Component,
    ) -> Result<usize, StorageError> {
        if !self.ty.has_factory() {
            return Err(StorageError::NoFactory(self.ty.name().to_string()));
        }
        let found = component.component_type();
        if found != self.ty {
            return Err(StorageError::TypeMismatch {
                expected: self.ty.name().to_string(),
                found: found.name().to_string(),
            });
        }

        let cells = self.stage_fields(entity, component)?;
        let slot = match self.entity_to_slot.get(&entity) {
            Some(&slot) => slot,
            None => self.allocate_slot(entity),
        };
        for (column, cell) in self.fields.columns.iter_mut().zip(cells) {
            column.commit(slot, cell);
        }

        for table in &mut self.side_tables {
            table.store(entity, component.field(table.name).unwrap_or(Value::Null));
        }
        self.ids[slot] = component.id();
        self.fields.epochs[slot] = component.last_write_epoch();
        Ok(slot)
    }

    fn stage_fields(
        &self,
        entity: Entity,
        component: &dyn Component,
    ) -> Result<Vec<Cell>, StorageError> {
        let mut cells = Vec::with_capacity(self.fields.columns.len());
        for (name, column) in self.fields.names.iter().zip(&self.fields.columns) {
            let value = component.field(name).unwrap_or(Value::Null);
            let Some(cell) = column.stage(&value, &self.values)? else {
                warn!(
                    component = self.ty.name(),
                    field = *name,
                    %entity,
                    "field value does not fit its column"
                );
                return Err(ComponentError::FieldType {
                    component: self.ty.name().to_string(),
                    field: (*name).to_string(),
                }
                .into());
            };
            cells.push(cell);
        }
        Ok(cells)
    }

    fn allocate_slot(&mut self, entity: Entity) -> usize {
        let slot = match self.free_slots.pop() {
            Some(slot) => slot,
            None => {
                if self.next_slot == self.capacity {
                    self.resize((self.capacity * 2).max(1));
                }
                self.next_slot += 1;
                self.next_slot - 1
            }
        };
        self.entity_to_slot.insert(entity, slot);
        self.slot_to_entity[slot] = Some(entity);
        slot
    }

    fn release_slot(&mut self, entity: Entity, slot: usize) {
        self.entity_to_slot.remove(&entity);
        self.slot_to_entity[slot] = None;
        self.free_slots.push(slot);
        for table in &mut self.side_tables {
            table.entries.remove(&entity);
        }
    }

    /// A read-only accessor bound to `entity`'s slot. Reads go straight to
    /// the columns.
    #[must_use]
    pub fn get_component(&self, entity: Entity) -> Option<ColumnarRef<'_>> {
        let slot = *self.entity_to_slot.get(&entity)?;
        Some(ColumnarRef {
            storage: self,
            slot,
            entity,
        })
    }

    /// A read-write accessor bound to `entity`'s slot.
    pub fn get_component_mut(&mut self, entity: Entity) -> Option<ColumnarMut<'_>> {
        let slot = *self.entity_to_slot.get(&entity)?;
        Some(ColumnarMut {
            storage: self,
            slot,
            entity,
        })
    }

    /// An independent copy of `entity`'s component, attached to `entity`.
    ///
    /// Returns `None` if the entity has no slot or the type has no factory.
    #[must_use]
    pub fn get_component_snapshot(&self, entity: Entity) -> Option<Box<dyn Component>> {
        let slot = *self.entity_to_slot.get(&entity)?;
        let Some(mut component) = self.ty.create_blank() else {
            warn!(component = self.ty.name(), "cannot snapshot a type without a factory");
            return None;
        };

        for (name, column) in self.fields.names.iter().zip(&self.fields.columns) {
            match column.read(slot, &self.values) {
                Ok(value) => self.restore(&mut *component, name, value),
                Err(err) => warn!(component = self.ty.name(), field = *name, error = %err, "column read failed"),
            }
        }
        for table in &self.side_tables {
            if table.entries.contains_key(&entity) {
                self.restore(&mut *component, table.name, table.load(entity));
            }
        }

        let base = component.base_mut();
        base.set_id(self.ids[slot]);
        base.mark_dirty(self.fields.epochs[slot]);
        base.attach(entity);
        Some(component)
    }

    fn restore(&self, component: &mut dyn Component, name: &str, value: Value) {
        if let Err(err) = component.set_field(name, value) {
            warn!(component = self.ty.name(), field = name, error = %err, "field not restored");
        }
    }

    /// Typed snapshot.
    #[must_use]
    pub fn snapshot_as<T: ComponentDescriptor>(&self, entity: Entity) -> Option<T> {
        self.get_component_snapshot(entity)?
            .downcast::<T>()
            .map(|boxed| *boxed)
    }

    /// Free `entity`'s slot, returning a detached snapshot of what it held.
    ///
    /// `None` means the entity had no slot: storages for factory-less types
    /// reject every add, so anything stored here can be snapshotted. The
    /// slot's column contents are left in place until reuse.
    pub fn remove_component(&mut self, entity: Entity) -> Option<Box<dyn Component>> {
        let slot = *self.entity_to_slot.get(&entity)?;
        let snapshot = self.get_component_snapshot(entity).map(|mut component| {
            component.base_mut().detach();
            component
        });
        self.release_slot(entity, slot);
        snapshot
    }

    /// Grow every column to `new_capacity`. Never shrinks.
    pub fn resize(&mut self, new_capacity: usize) {
        if new_capacity <= self.capacity {
            return;
        }
        self.fields.grow(new_capacity);
        self.ids.resize(new_capacity, 0);
        self.slot_to_entity.resize(new_capacity, None);
        debug!(
            component = self.ty.name(),
            from = self.capacity,
            to = new_capacity,
            "grew columnar storage"
        );
        self.capacity = new_capacity;
    }

    /// Move every active entity into a dense prefix of slots, keeping their
    /// relative order, and forget the free list. Returns how many entities
    /// moved.
    pub fn compact(&mut self) -> usize {
        if self.free_slots.is_empty() {
            return 0;
        }
        let active = self.active_slots();
        let mut moved = 0;
        for (target, &source) in active.iter().enumerate() {
            if target == source {
                continue;
            }
            self.fields.swap(source, target);
            self.ids.swap(source, target);
            self.slot_to_entity.swap(source, target);
            if let Some(entity) = self.slot_to_entity[target] {
                self.entity_to_slot.insert(entity, target);
            }
            moved += 1;
        }
        self.free_slots.clear();
        self.next_slot = active.len();
        debug!(component = self.ty.name(), moved, len = active.len(), "compacted columnar storage");
        moved
    }

    /// Hand the field columns and the active slots to `f`.
    pub fn perform_vectorized_operation<R>(
        &mut self,
        f: impl FnOnce(&mut FieldColumns, &[usize]) -> R,
    ) -> R {
        let slots = self.active_slots();
        f(&mut self.fields, &slots)
    }

    /// Active slots in ascending order.
    #[must_use]
    pub fn active_slots(&self) -> Vec<usize> {
        self.slot_to_entity[..self.next_slot]
            .iter()
            .enumerate()
            .filter_map(|(slot, e)| e.map(|_| slot))
            .collect()
    }

    #[must_use]
    pub fn slot_of(&self, entity: Entity) -> Option<usize> {
        self.entity_to_slot.get(&entity).copied()
    }

    #[must_use]
    pub fn entity_at(&self, slot: usize) -> Option<Entity> {
        self.slot_to_entity.get(slot).copied().flatten()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn free_slot_count(&self) -> usize {
        self.free_slots.len()
    }

    #[must_use]
    pub fn stats(&self) -> ColumnarStats {
        let free = self.free_slots.len();
        ColumnarStats {
            len: self.entity_to_slot.len(),
            capacity: self.capacity,
            free_slots: free,
            high_water: self.next_slot,
            fragmentation: if self.next_slot == 0 {
                0.0
            } else {
                free as f64 / self.next_slot as f64
            },
        }
    }

    /// Read-only view of the field columns.
    #[must_use]
    pub fn columns(&self) -> &FieldColumns {
        &self.fields
    }

    fn read_field(&self, slot: usize, entity: Entity, name: &str) -> Option<Value> {
        if let Some(i) = self.fields.position(name) {
            return match self.fields.columns[i].read(slot, &self.values) {
                Ok(value) => Some(value),
                Err(err) => {
                    warn!(component = self.ty.name(), field = name, error = %err, "column read failed");
                    None
                }
            };
        }
        self.side_tables
            .iter()
            .find(|t| t.name == name)
            .map(|t| t.load(entity))
    }

    fn write_field(
        &mut self,
        slot: usize,
        entity: Entity,
        name: &str,
        value: Value,
    ) -> Result<(), StorageError> {
        if let Some(i) = self.fields.position(name) {
            return if self.fields.columns[i].write(slot, &value, &self.values)? {
                Ok(())
            } else {
                Err(ComponentError::FieldType {
                    component: self.ty.name().to_string(),
                    field: name.to_string(),
                }
                .into())
            };
        }
        match self.side_tables.iter_mut().find(|t| t.name == name) {
            Some(table) => {
                table.store(entity, value);
                Ok(())
            }
            None => Err(ComponentError::UnknownField {
                component: self.ty.name().to_string(),
                field: name.to_string(),
            }
            .into()),
        }
    }
}

impl ComponentStorage for ColumnarStorage {
    fn component_type(&self) -> &ComponentType {
        &self.ty
    }

    fn strategy(&self) -> StorageStrategy {
        StorageStrategy::Columnar
    }

    fn add(&mut self, entity: Entity, component: Box<dyn Component>) -> Result<(), StorageError> {
        self.add_component(entity, &*component).map(|_| ())
    }

    fn snapshot(&self, entity: Entity) -> Option<Box<dyn Component>> {
        self.get_component_snapshot(entity)
    }

    fn remove(&mut self, entity: Entity) -> Option<Box<dyn Component>> {
        self.remove_component(entity)
    }

    fn contains(&self, entity: Entity) -> bool {
        self.entity_to_slot.contains_key(&entity)
    }

    fn len(&self) -> usize {
        self.entity_to_slot.len()
    }

    fn entities(&self) -> Vec<Entity> {
        self.active_slots()
            .into_iter()
            .filter_map(|slot| self.slot_to_entity[slot])
            .collect()
    }

    fn last_write_epoch(&self, entity: Entity) -> Option<u64> {
        self.slot_of(entity).map(|slot| self.fields.epochs[slot])
    }

    fn mark_dirty(&mut self, entity: Entity, epoch: u64) -> bool {
        match self.slot_of(entity) {
            Some(slot) => {
                self.fields.mark_dirty(slot, epoch);
                true
            }
            None => false,
        }
    }

    fn clear(&mut self) {
        self.entity_to_slot.clear();
        self.slot_to_entity.iter_mut().for_each(|e| *e = None);
        self.free_slots.clear();
        self.next_slot = 0;
        for table in &mut self.side_tables {
            table.entries.clear();
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ── Accessors ───────────────────────────────────────────────────────────

/// Read-only accessor over one entity's slot.
#[derive(Debug, Clone, Copy)]
pub struct ColumnarRef<'a> {
    storage: &'a ColumnarStorage,
    slot: usize,
    entity: Entity,
}

impl ColumnarRef<'_> {
    #[must_use]
    pub fn entity_id(&self) -> Entity {
        self.entity
    }

    #[must_use]
    pub fn slot(&self) -> usize {
        self.slot
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.storage.ids[self.slot]
    }

    #[must_use]
    pub fn last_write_epoch(&self) -> u64 {
        self.storage.fields.epochs[self.slot]
    }

    /// Read a field as a dynamic value.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Value> {
        self.storage.read_field(self.slot, self.entity, name)
    }

    /// Read a field as `T`.
    #[must_use]
    pub fn get_as<T: FieldType>(&self, name: &str) -> Option<T> {
        T::from_value(self.get(name)?)
    }
}

/// Read-write accessor over one entity's slot.
#[derive(Debug)]
pub struct ColumnarMut<'a> {
    storage: &'a mut ColumnarStorage,
    slot: usize,
    entity: Entity,
}

impl ColumnarMut<'_> {
    #[must_use]
    pub fn entity_id(&self) -> Entity {
        self.entity
    }

    #[must_use]
    pub fn slot(&self) -> usize {
        self.slot
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.storage.ids[self.slot]
    }

    #[must_use]
    pub fn last_write_epoch(&self) -> u64 {
        self.storage.fields.epochs[self.slot]
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Value> {
        self.storage.read_field(self.slot, self.entity, name)
    }

    #[must_use]
    pub fn get_as<T: FieldType>(&self, name: &str) -> Option<T> {
        T::from_value(self.get(name)?)
    }

    /// Write a field.
    ///
    /// # Errors
    ///
    /// Returns a [`ComponentError`] (wrapped in [`StorageError`]) for an
    /// unknown field or a value of the wrong shape.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<(), StorageError> {
        self.storage
            .write_field(self.slot, self.entity, name, value.into())
    }

    /// Write a field from a typed value.
    ///
    /// # Errors
    ///
    /// See [`ColumnarMut::set`].
    pub fn set_as<T: FieldType>(&mut self, name: &str, value: &T) -> Result<(), StorageError> {
        self.set(name, value.to_value())
    }

    pub fn mark_dirty(&mut self, epoch: u64) {
        self.storage.fields.mark_dirty(self.slot, epoch);
    }
}
