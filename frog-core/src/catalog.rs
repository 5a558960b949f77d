//! # Type Catalog
//!
//! The registry mapping native record types to their wire names and to an explicit description
//! of their fields. Everything else in the crate reads types through the catalog.
//!
//! ## How it works
//!
//! 1. A native type is described by a [`Model`] implementation: its wire name and an ordered
//!    list of [`FieldDef`]s, each carrying a [`TypeExpr`] annotation.
//! 2. [`TypeCatalog::register`] classifies every annotation into a [`FieldDescriptor`]
//!    (scalar, list, map or record). Nested models are registered on the fly, so callers only
//!    need to register the types they use directly.
//! 3. Entries live in an arena addressed by [`RecordId`]. Record references are ids, never
//!    pointers, which lets self-referential and mutually referential types be represented.
//!
//! Registration is idempotent: registering the same type twice returns the same [`RecordId`].
//!
//! The catalog is not synchronized. All registration must complete before serving starts;
//! afterwards the catalog is shared read-only (typically behind an `Arc`).
use crate::transcoder::ConversionError;
use crate::value::{NativeType, Record, Value};
use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing::debug;

/// Import path of the wire timestamp type.
pub const TIMESTAMP_IMPORT: &str = "google/protobuf/timestamp.proto";
/// Fully qualified name of the wire timestamp type.
pub const TIMESTAMP_TYPE: &str = "google.protobuf.Timestamp";

/// The fixed table of scalar kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    Int64,
    String,
    Bool,
    Float64,
    Timestamp,
}

impl ScalarKind {
    /// Native name of the kind.
    pub fn name(self) -> &'static str {
        match self {
            ScalarKind::Int64 => "int64",
            ScalarKind::String => "string",
            ScalarKind::Bool => "bool",
            ScalarKind::Float64 => "float64",
            ScalarKind::Timestamp => "timestamp",
        }
    }

    /// Name of the kind in schema text.
    pub fn wire_type(self) -> &'static str {
        match self {
            ScalarKind::Int64 => "int64",
            ScalarKind::String => "string",
            ScalarKind::Bool => "bool",
            ScalarKind::Float64 => "double",
            ScalarKind::Timestamp => TIMESTAMP_TYPE,
        }
    }

    /// Whether the wire format accepts this kind as a map key.
    pub fn is_map_key(self) -> bool {
        matches!(
            self,
            ScalarKind::Int64 | ScalarKind::String | ScalarKind::Bool
        )
    }
}

/// A handle to a native record type.
///
/// Holds the type's identity and function pointers to its [`Model`] description, so the catalog
/// can register it lazily when it is discovered as a nested field.
#[derive(Clone, Copy)]
pub struct ModelRef {
    id: TypeId,
    type_name: &'static str,
    wire_name: fn() -> String,
    fields: fn() -> Vec<FieldDef>,
}

impl ModelRef {
    pub fn of<T: Model>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            wire_name: T::wire_name,
            fields: T::fields,
        }
    }

    pub fn key(&self) -> TypeKey {
        TypeKey::Native(self.id)
    }

    /// Rust path of the type, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn wire_name(&self) -> String {
        (self.wire_name)()
    }

    pub fn fields(&self) -> Vec<FieldDef> {
        (self.fields)()
    }
}

impl fmt::Debug for ModelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ModelRef").field(&self.type_name).finish()
    }
}

impl PartialEq for ModelRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

/// A native type annotation, as declared on a model field, a method parameter or a method
/// return value.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeExpr {
    Scalar(ScalarKind),
    List(Box<TypeExpr>),
    Map(Box<TypeExpr>, Box<TypeExpr>),
    Model(ModelRef),
    /// A reference to a record by wire name, resolved against the catalog at registration.
    Named(String),
    /// Several alternative types. Never representable as a single wire field.
    Union(Vec<TypeExpr>),
    /// A generic mapping without declared fields.
    Mapping,
}

impl TypeExpr {
    pub fn of<T: NativeType>() -> Self {
        T::type_expr()
    }

    pub fn model<T: Model>() -> Self {
        TypeExpr::Model(ModelRef::of::<T>())
    }

    pub fn list(element: TypeExpr) -> Self {
        TypeExpr::List(Box::new(element))
    }

    pub fn map(key: TypeExpr, value: TypeExpr) -> Self {
        TypeExpr::Map(Box::new(key), Box::new(value))
    }

    pub fn named(wire_name: impl Into<String>) -> Self {
        TypeExpr::Named(wire_name.into())
    }

    /// Human readable rendering, used in error messages.
    pub fn describe(&self) -> String {
        match self {
            TypeExpr::Scalar(kind) => kind.name().to_string(),
            TypeExpr::List(element) => format!("list<{}>", element.describe()),
            TypeExpr::Map(key, value) => format!("map<{}, {}>", key.describe(), value.describe()),
            TypeExpr::Model(model) => model.type_name().to_string(),
            TypeExpr::Named(name) => name.clone(),
            TypeExpr::Union(options) => options
                .iter()
                .map(TypeExpr::describe)
                .collect::<Vec<_>>()
                .join(" | "),
            TypeExpr::Mapping => "mapping".to_string(),
        }
    }
}

/// Declaration of one field of a native record type.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub name: String,
    pub ty: TypeExpr,
    pub default: Option<Value>,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, ty: TypeExpr) -> Self {
        Self {
            name: name.into(),
            ty,
            default: None,
        }
    }

    /// Declares a field whose annotation is the native type `T`.
    pub fn of<T: NativeType>(name: impl Into<String>) -> Self {
        Self::new(name, T::type_expr())
    }

    /// Value used when decoding a wire message that does not carry this field.
    pub fn with_default(mut self, default: impl NativeType) -> Self {
        self.default = Some(default.into_value());
        self
    }
}

/// A native record type.
///
/// `into_record` and `from_record` are the converters between the typed struct and the
/// dynamic [`Record`] representation the transcoder works on.
pub trait Model: Sized + 'static {
    /// Name of the record in schema text. Defaults to the unqualified Rust type name.
    fn wire_name() -> String {
        let path = std::any::type_name::<Self>();
        path.rsplit("::").next().unwrap_or(path).to_string()
    }

    /// Field declarations, in wire order.
    fn fields() -> Vec<FieldDef>;

    fn into_record(self) -> Record;

    fn from_record(record: Record) -> Result<Self, ConversionError>;
}

/// Index of a record type in the catalog arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId(usize);

impl RecordId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Stable identity of a registered type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeKey {
    /// A Rust type implementing [`Model`].
    Native(TypeId),
    /// A record synthesized at run time, such as a method request.
    Synthetic(String),
}

/// The shape of a single field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldDescriptor {
    Scalar(ScalarKind),
    /// The element is always a `Scalar` or a `Record`.
    List(Box<FieldDescriptor>),
    /// The key is always a map-key scalar kind and the value a `Scalar` or a `Record`.
    Map(ScalarKind, Box<FieldDescriptor>),
    Record(RecordId),
}

impl FieldDescriptor {
    /// The record this field depends on, directly or through a list or map.
    pub fn record_dependency(&self) -> Option<RecordId> {
        match self {
            FieldDescriptor::Scalar(_) => None,
            FieldDescriptor::Record(id) => Some(*id),
            FieldDescriptor::List(inner) | FieldDescriptor::Map(_, inner) => {
                inner.record_dependency()
            }
        }
    }
}

/// A classified field of a [`RecordType`].
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    name: String,
    number: u32,
    descriptor: FieldDescriptor,
    default: Option<Value>,
}

impl Field {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wire ordinal, 1-based in declaration order.
    pub fn number(&self) -> u32 {
        self.number
    }

    pub fn descriptor(&self) -> &FieldDescriptor {
        &self.descriptor
    }

    pub fn default(&self) -> Option<&Value> {
        self.default.as_ref()
    }
}

/// A named, ordered set of classified fields.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordType {
    name: String,
    fields: Vec<Field>,
}

impl RecordType {
    /// The wire name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Records referenced by this record's fields, in field order, without duplicates.
    pub fn dependencies(&self) -> Vec<RecordId> {
        let mut seen = HashSet::new();
        self.fields
            .iter()
            .filter_map(|f| f.descriptor.record_dependency())
            .filter(|id| seen.insert(*id))
            .collect()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Unsupported type for field '{field}' of '{record}': {reason} (found '{found}')")]
    UnsupportedType {
        record: String,
        field: String,
        found: String,
        reason: &'static str,
    },
    #[error("Type '{0}' is not registered")]
    NotRegistered(String),
    #[error("Wire name '{wire_name}' is already used by '{existing}'")]
    WireNameConflict { wire_name: String, existing: String },
    #[error("Field '{field}' is declared twice in '{record}'")]
    DuplicateField { record: String, field: String },
    #[error(
        "Record '{wire_name}' is already registered with fields [{}], not [{}]",
        .existing.join(", "),
        .found.join(", ")
    )]
    SyntheticMismatch {
        wire_name: String,
        existing: Vec<String>,
        found: Vec<String>,
    },
}

#[derive(Debug)]
struct CatalogEntry {
    key: TypeKey,
    type_name: String,
    record: RecordType,
    /// Declarations a synthetic record was registered with.
    synthetic: Option<Vec<FieldDef>>,
}

/// Registry of every record type known to the process.
#[derive(Debug, Default)]
pub struct TypeCatalog {
    entries: Vec<CatalogEntry>,
    by_key: HashMap<TypeKey, RecordId>,
    by_wire_name: HashMap<String, RecordId>,
}

impl TypeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `T` under its default wire name.
    pub fn register<T: Model>(&mut self) -> Result<RecordId, CatalogError> {
        self.register_model(ModelRef::of::<T>(), None)
    }

    /// Registers `T` under an explicit wire name.
    pub fn register_as<T: Model>(&mut self, wire_name: &str) -> Result<RecordId, CatalogError> {
        self.register_model(ModelRef::of::<T>(), Some(wire_name))
    }

    /// Registers a native model, along with every model it references.
    ///
    /// Registering an already known model returns its existing id. When a wire name override is
    /// given for a known model, the entry is renamed in place.
    pub fn register_model(
        &mut self,
        model: ModelRef,
        wire_name: Option<&str>,
    ) -> Result<RecordId, CatalogError> {
        if let Some(&id) = self.by_key.get(&model.key()) {
            if let Some(name) = wire_name {
                self.rename(id, name)?;
            }
            return Ok(id);
        }

        let name = wire_name.map_or_else(|| model.wire_name(), str::to_string);
        self.register_atomically(|catalog| {
            catalog.register_new(model.key(), model.type_name(), name, model.fields())
        })
    }

    /// Registers a record that has no Rust type behind it, keyed by its wire name.
    ///
    /// Registering the same name again returns the existing id only when the field declarations
    /// are identical.
    pub fn register_synthetic(
        &mut self,
        wire_name: &str,
        fields: Vec<FieldDef>,
    ) -> Result<RecordId, CatalogError> {
        let key = TypeKey::Synthetic(wire_name.to_string());
        if let Some(&id) = self.by_key.get(&key) {
            let existing = self.entries[id.0].synthetic.as_deref().unwrap_or_default();
            if existing != fields.as_slice() {
                return Err(CatalogError::SyntheticMismatch {
                    wire_name: wire_name.to_string(),
                    existing: existing.iter().map(|f| f.name.clone()).collect(),
                    found: fields.into_iter().map(|f| f.name).collect(),
                });
            }
            return Ok(id);
        }

        let declared = fields.clone();
        let id = self.register_atomically(|catalog| {
            catalog.register_new(key, wire_name, wire_name.to_string(), fields)
        })?;
        self.entries[id.0].synthetic = Some(declared);

        Ok(id)
    }

    /// Runs a registration, dropping every entry it created if it fails.
    pub fn register_atomically<T, E>(
        &mut self,
        register: impl FnOnce(&mut Self) -> Result<T, E>,
    ) -> Result<T, E> {
        let mark = self.entries.len();
        let result = register(self);

        if result.is_err() {
            for entry in self.entries.drain(mark..) {
                self.by_key.remove(&entry.key);
                self.by_wire_name.remove(&entry.record.name);
            }
        }

        result
    }

    fn register_new(
        &mut self,
        key: TypeKey,
        type_name: &str,
        wire_name: String,
        defs: Vec<FieldDef>,
    ) -> Result<RecordId, CatalogError> {
        if let Some(&existing) = self.by_wire_name.get(&wire_name) {
            return Err(CatalogError::WireNameConflict {
                wire_name,
                existing: self.entries[existing.0].type_name.clone(),
            });
        }

        // The entry is reserved before its fields are classified, so references back to it
        // (directly or through other records) resolve to this id.
        let id = RecordId(self.entries.len());
        self.entries.push(CatalogEntry {
            key: key.clone(),
            type_name: type_name.to_string(),
            record: RecordType {
                name: wire_name.clone(),
                fields: Vec::new(),
            },
            synthetic: None,
        });
        self.by_key.insert(key, id);
        self.by_wire_name.insert(wire_name.clone(), id);

        let mut fields: Vec<Field> = Vec::with_capacity(defs.len());
        for (index, def) in defs.into_iter().enumerate() {
            if fields.iter().any(|f| f.name == def.name) {
                return Err(CatalogError::DuplicateField {
                    record: wire_name,
                    field: def.name,
                });
            }

            let descriptor = self.classify(&wire_name, &def.name, &def.ty)?;
            fields.push(Field {
                name: def.name,
                number: index as u32 + 1,
                descriptor,
                default: def.default,
            });
        }

        debug!(
            record = %wire_name,
            fields = fields.len(),
            "Registered record type"
        );
        self.entries[id.0].record.fields = fields;

        Ok(id)
    }

    fn classify(
        &mut self,
        record: &str,
        field: &str,
        ty: &TypeExpr,
    ) -> Result<FieldDescriptor, CatalogError> {
        let unsupported = |reason: &'static str| CatalogError::UnsupportedType {
            record: record.to_string(),
            field: field.to_string(),
            found: ty.describe(),
            reason,
        };

        match ty {
            TypeExpr::Scalar(kind) => Ok(FieldDescriptor::Scalar(*kind)),
            TypeExpr::List(element) => match self.classify(record, field, element)? {
                inner @ (FieldDescriptor::Scalar(_) | FieldDescriptor::Record(_)) => {
                    Ok(FieldDescriptor::List(Box::new(inner)))
                }
                _ => Err(unsupported("list elements must be scalars or records")),
            },
            TypeExpr::Map(key, value) => {
                let key = match **key {
                    TypeExpr::Scalar(kind) if kind.is_map_key() => kind,
                    _ => return Err(unsupported("map keys must be int64, string or bool")),
                };
                match self.classify(record, field, value)? {
                    inner @ (FieldDescriptor::Scalar(_) | FieldDescriptor::Record(_)) => {
                        Ok(FieldDescriptor::Map(key, Box::new(inner)))
                    }
                    _ => Err(unsupported("map values must be scalars or records")),
                }
            }
            TypeExpr::Model(model) => {
                let id = match self.by_key.get(&model.key()) {
                    Some(&id) => id,
                    None => self.register_new(
                        model.key(),
                        model.type_name(),
                        model.wire_name(),
                        model.fields(),
                    )?,
                };
                Ok(FieldDescriptor::Record(id))
            }
            TypeExpr::Named(name) => self
                .by_wire_name
                .get(name)
                .map(|&id| FieldDescriptor::Record(id))
                .ok_or_else(|| unsupported("unresolved forward reference")),
            TypeExpr::Union(_) => Err(unsupported("union types have no single wire shape")),
            TypeExpr::Mapping => Err(unsupported("untyped mappings have no wire shape")),
        }
    }

    fn rename(&mut self, id: RecordId, wire_name: &str) -> Result<(), CatalogError> {
        let current = &self.entries[id.0].record.name;
        if current == wire_name {
            return Ok(());
        }

        if let Some(&existing) = self.by_wire_name.get(wire_name) {
            return Err(CatalogError::WireNameConflict {
                wire_name: wire_name.to_string(),
                existing: self.entries[existing.0].type_name.clone(),
            });
        }

        let previous = std::mem::replace(
            &mut self.entries[id.0].record.name,
            wire_name.to_string(),
        );
        self.by_wire_name.remove(&previous);
        self.by_wire_name.insert(wire_name.to_string(), id);
        debug!(from = %previous, to = %wire_name, "Renamed record type");

        Ok(())
    }

    /// Returns the record type behind an id.
    ///
    /// # Panics
    ///
    /// If the id was not produced by this catalog.
    pub fn record(&self, id: RecordId) -> &RecordType {
        &self.entries[id.0].record
    }

    pub fn get(&self, id: RecordId) -> Option<&RecordType> {
        self.entries.get(id.0).map(|e| &e.record)
    }

    pub fn lookup<T: Model>(&self) -> Option<RecordId> {
        self.lookup_key(&TypeKey::Native(TypeId::of::<T>()))
    }

    pub fn lookup_key(&self, key: &TypeKey) -> Option<RecordId> {
        self.by_key.get(key).copied()
    }

    pub fn lookup_wire_name(&self, wire_name: &str) -> Option<RecordId> {
        self.by_wire_name.get(wire_name).copied()
    }

    /// The wire name registered for `T`.
    pub fn resolve_wire_name<T: Model>(&self) -> Result<&str, CatalogError> {
        self.lookup::<T>()
            .map(|id| self.record(id).name())
            .ok_or_else(|| CatalogError::NotRegistered(std::any::type_name::<T>().to_string()))
    }

    /// The wire name registered for a type handle.
    pub fn resolve_wire_name_of(&self, key: &TypeKey) -> Result<&str, CatalogError> {
        self.lookup_key(key)
            .map(|id| self.record(id).name())
            .ok_or_else(|| CatalogError::NotRegistered(format!("{key:?}")))
    }

    /// Classifies a native value into its scalar kind, if it is a scalar.
    pub fn scalar_kind_of(value: &Value) -> Option<ScalarKind> {
        match value {
            Value::Int(_) => Some(ScalarKind::Int64),
            Value::Str(_) => Some(ScalarKind::String),
            Value::Bool(_) => Some(ScalarKind::Bool),
            Value::Float(_) => Some(ScalarKind::Float64),
            Value::Timestamp(_) => Some(ScalarKind::Timestamp),
            Value::Null | Value::List(_) | Value::Map(_) | Value::Record(_) => None,
        }
    }

    /// Every record reachable from `roots`, roots included, in depth-first discovery order.
    pub fn closure(&self, roots: &[RecordId]) -> Vec<RecordId> {
        let mut seen = HashSet::new();
        let mut ordered = Vec::new();
        let mut stack: Vec<RecordId> = roots.iter().rev().copied().collect();

        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            ordered.push(id);
            stack.extend(self.record(id).dependencies().into_iter().rev());
        }

        ordered
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = RecordId> {
        (0..self.entries.len()).map(RecordId)
    }
}
