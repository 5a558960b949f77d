//! # Native Values
//!
//! The in-memory side of the bridge. A [`Value`] is a tree built fresh for every call: scalars,
//! lists, maps and nested [`Record`]s. Typed Rust structs reach this representation through the
//! [`NativeType`] trait (for scalars and containers) and the [`Model`] trait (for records).
use crate::catalog::{Model, ScalarKind, TypeExpr};
use crate::transcoder::ConversionError;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

/// Key of a native map. Only the scalar kinds the wire format accepts as map keys are allowed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MapKey {
    Int(i64),
    Str(String),
    Bool(bool),
}

impl From<&str> for MapKey {
    fn from(value: &str) -> Self {
        MapKey::Str(value.to_string())
    }
}

/// A dynamically typed native value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// An absent value (an unset optional record, or a field the caller did not provide).
    #[default]
    Null,
    Int(i64),
    Str(String),
    Bool(bool),
    Float(f64),
    Timestamp(DateTime<Utc>),
    List(Vec<Value>),
    Map(BTreeMap<MapKey, Value>),
    Record(Record),
}

impl Value {
    /// Short name of the variant, used in conversion errors.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Int(_) => "int64",
            Value::Str(_) => "string",
            Value::Bool(_) => "bool",
            Value::Float(_) => "float64",
            Value::Timestamp(_) => "timestamp",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Record(_) => "record",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Value::Record(record) => Some(record),
            _ => None,
        }
    }

    /// Converts the value into a [`Record`].
    ///
    /// A map whose keys are all strings is accepted as well, since business logic frequently
    /// returns a generic mapping instead of a typed record.
    pub fn into_record(self) -> Result<Record, ConversionError> {
        match self {
            Value::Record(record) => Ok(record),
            Value::Map(entries) => entries
                .into_iter()
                .map(|(key, value)| match key {
                    MapKey::Str(name) => Ok((name, value)),
                    _ => Err(ConversionError::TypeMismatch {
                        expected: "record",
                        found: "map",
                    }),
                })
                .collect(),
            other => Err(ConversionError::TypeMismatch {
                expected: "record",
                found: other.kind_name(),
            }),
        }
    }
}

impl From<Record> for Value {
    fn from(record: Record) -> Self {
        Value::Record(record)
    }
}

/// An ordered mapping from field name to [`Value`].
///
/// Records are what the transcoder produces when decoding a wire message, and what business
/// callables receive as their arguments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: IndexMap<String, Value>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            fields: IndexMap::with_capacity(capacity),
        }
    }

    /// Builder-style insert of any native value.
    pub fn with(mut self, name: impl Into<String>, value: impl NativeType) -> Self {
        self.fields.insert(name.into(), value.into_value());
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) -> Option<Value> {
        self.fields.insert(name.into(), value)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Removes a field, keeping the order of the remaining ones.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.fields.shift_remove(name)
    }

    /// Removes a field and converts it into `T`. A missing field is treated as [`Value::Null`],
    /// so optional and container types fall back to their empty value.
    pub fn take<T: NativeType>(&mut self, name: &str) -> Result<T, ConversionError> {
        let value = self.remove(name).unwrap_or_default();
        T::from_value(value).map_err(|err| err.at(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for Record {
    type Item = (String, Value);
    type IntoIter = indexmap::map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}

/// A Rust type with a known native annotation and a conversion to and from [`Value`].
pub trait NativeType: Sized {
    /// The annotation the catalog classifies when this type appears as a field.
    fn type_expr() -> TypeExpr;
    fn into_value(self) -> Value;
    fn from_value(value: Value) -> Result<Self, ConversionError>;
}

/// A Rust type usable as a map key.
pub trait NativeKey: Sized {
    fn key_kind() -> ScalarKind;
    fn into_key(self) -> MapKey;
    fn from_key(key: MapKey) -> Result<Self, ConversionError>;
}

fn mismatch(expected: &'static str, found: &Value) -> ConversionError {
    match found {
        Value::Null => ConversionError::MissingValue,
        other => ConversionError::TypeMismatch {
            expected,
            found: other.kind_name(),
        },
    }
}

macro_rules! scalar_native_type {
    ($ty:ty, $kind:expr, $variant:ident) => {
        impl NativeType for $ty {
            fn type_expr() -> TypeExpr {
                TypeExpr::Scalar($kind)
            }

            fn into_value(self) -> Value {
                Value::$variant(self)
            }

            fn from_value(value: Value) -> Result<Self, ConversionError> {
                match value {
                    Value::$variant(v) => Ok(v),
                    other => Err(mismatch($kind.name(), &other)),
                }
            }
        }
    };
}

scalar_native_type!(i64, ScalarKind::Int64, Int);
scalar_native_type!(String, ScalarKind::String, Str);
scalar_native_type!(bool, ScalarKind::Bool, Bool);
scalar_native_type!(DateTime<Utc>, ScalarKind::Timestamp, Timestamp);

impl NativeType for f64 {
    fn type_expr() -> TypeExpr {
        TypeExpr::Scalar(ScalarKind::Float64)
    }

    fn into_value(self) -> Value {
        Value::Float(self)
    }

    fn from_value(value: Value) -> Result<Self, ConversionError> {
        match value {
            Value::Float(v) => Ok(v),
            Value::Int(v) => Ok(v as f64),
            other => Err(mismatch("float64", &other)),
        }
    }
}

impl NativeType for &str {
    fn type_expr() -> TypeExpr {
        TypeExpr::Scalar(ScalarKind::String)
    }

    fn into_value(self) -> Value {
        Value::Str(self.to_string())
    }

    fn from_value(value: Value) -> Result<Self, ConversionError> {
        Err(mismatch("owned string", &value))
    }
}

impl NativeKey for i64 {
    fn key_kind() -> ScalarKind {
        ScalarKind::Int64
    }

    fn into_key(self) -> MapKey {
        MapKey::Int(self)
    }

    fn from_key(key: MapKey) -> Result<Self, ConversionError> {
        match key {
            MapKey::Int(v) => Ok(v),
            _ => Err(ConversionError::TypeMismatch {
                expected: "int64 key",
                found: "map key",
            }),
        }
    }
}

impl NativeKey for String {
    fn key_kind() -> ScalarKind {
        ScalarKind::String
    }

    fn into_key(self) -> MapKey {
        MapKey::Str(self)
    }

    fn from_key(key: MapKey) -> Result<Self, ConversionError> {
        match key {
            MapKey::Str(v) => Ok(v),
            _ => Err(ConversionError::TypeMismatch {
                expected: "string key",
                found: "map key",
            }),
        }
    }
}

impl NativeKey for bool {
    fn key_kind() -> ScalarKind {
        ScalarKind::Bool
    }

    fn into_key(self) -> MapKey {
        MapKey::Bool(self)
    }

    fn from_key(key: MapKey) -> Result<Self, ConversionError> {
        match key {
            MapKey::Bool(v) => Ok(v),
            _ => Err(ConversionError::TypeMismatch {
                expected: "bool key",
                found: "map key",
            }),
        }
    }
}

impl<T: NativeType> NativeType for Vec<T> {
    fn type_expr() -> TypeExpr {
        TypeExpr::list(T::type_expr())
    }

    fn into_value(self) -> Value {
        Value::List(self.into_iter().map(NativeType::into_value).collect())
    }

    fn from_value(value: Value) -> Result<Self, ConversionError> {
        match value {
            // An unset repeated field is an empty list on the wire.
            Value::Null => Ok(Vec::new()),
            Value::List(items) => items.into_iter().map(T::from_value).collect(),
            other => Err(mismatch("list", &other)),
        }
    }
}

impl<K: NativeKey + Ord, V: NativeType> NativeType for BTreeMap<K, V> {
    fn type_expr() -> TypeExpr {
        TypeExpr::map(TypeExpr::Scalar(K::key_kind()), V::type_expr())
    }

    fn into_value(self) -> Value {
        Value::Map(
            self.into_iter()
                .map(|(k, v)| (k.into_key(), v.into_value()))
                .collect(),
        )
    }

    fn from_value(value: Value) -> Result<Self, ConversionError> {
        match value {
            Value::Null => Ok(BTreeMap::new()),
            Value::Map(entries) => entries
                .into_iter()
                .map(|(k, v)| Ok((K::from_key(k)?, V::from_value(v)?)))
                .collect(),
            other => Err(mismatch("map", &other)),
        }
    }
}

impl<K: NativeKey + Eq + Hash, V: NativeType> NativeType for HashMap<K, V> {
    fn type_expr() -> TypeExpr {
        TypeExpr::map(TypeExpr::Scalar(K::key_kind()), V::type_expr())
    }

    fn into_value(self) -> Value {
        Value::Map(
            self.into_iter()
                .map(|(k, v)| (k.into_key(), v.into_value()))
                .collect(),
        )
    }

    fn from_value(value: Value) -> Result<Self, ConversionError> {
        match value {
            Value::Null => Ok(HashMap::new()),
            Value::Map(entries) => entries
                .into_iter()
                .map(|(k, v)| Ok((K::from_key(k)?, V::from_value(v)?)))
                .collect(),
            other => Err(mismatch("map", &other)),
        }
    }
}

impl<T: NativeType> NativeType for Option<T> {
    fn type_expr() -> TypeExpr {
        T::type_expr()
    }

    fn into_value(self) -> Value {
        self.map(NativeType::into_value).unwrap_or_default()
    }

    fn from_value(value: Value) -> Result<Self, ConversionError> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

impl<T: NativeType> NativeType for Box<T> {
    fn type_expr() -> TypeExpr {
        T::type_expr()
    }

    fn into_value(self) -> Value {
        (*self).into_value()
    }

    fn from_value(value: Value) -> Result<Self, ConversionError> {
        T::from_value(value).map(Box::new)
    }
}

/// A generic mapping. Usable as a return value, never as a declared field.
impl NativeType for Record {
    fn type_expr() -> TypeExpr {
        TypeExpr::Mapping
    }

    fn into_value(self) -> Value {
        Value::Record(self)
    }

    fn from_value(value: Value) -> Result<Self, ConversionError> {
        match value {
            Value::Null => Err(ConversionError::MissingValue),
            other => other.into_record(),
        }
    }
}

impl NativeType for Value {
    fn type_expr() -> TypeExpr {
        TypeExpr::Mapping
    }

    fn into_value(self) -> Value {
        self
    }

    fn from_value(value: Value) -> Result<Self, ConversionError> {
        Ok(value)
    }
}

/// Converts a [`Model`] into a [`Value::Record`].
pub fn model_into_value<T: Model>(model: T) -> Value {
    Value::Record(model.into_record())
}

/// Converts a [`Value`] holding a record (or a string-keyed map) into a [`Model`].
pub fn model_from_value<T: Model>(value: Value) -> Result<T, ConversionError> {
    match value {
        Value::Null => Err(ConversionError::MissingValue),
        other => T::from_record(other.into_record()?),
    }
}

/// Implements [`NativeType`] for one or more [`Model`] types, so they can be nested inside
/// other models, lists, maps and options.
///
/// ```rust,ignore
/// frog_core::native_model!(Point, Polygon);
/// ```
#[macro_export]
macro_rules! native_model {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl $crate::NativeType for $ty {
                fn type_expr() -> $crate::TypeExpr {
                    $crate::TypeExpr::model::<$ty>()
                }

                fn into_value(self) -> $crate::Value {
                    $crate::value::model_into_value(self)
                }

                fn from_value(value: $crate::Value) -> Result<Self, $crate::ConversionError> {
                    $crate::value::model_from_value(value)
                }
            }
        )+
    };
}
