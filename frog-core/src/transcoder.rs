//! # Message Transcoder
//!
//! Bidirectional conversion between native [`Value`] trees and wire messages
//! ([`prost_reflect::DynamicMessage`]), driven by the field descriptors stored in the
//! [`TypeCatalog`].
//!
//! ## How it works
//!
//! 1. **Encode (native -> wire)**:
//!    - Looks up the wire descriptor for the record through a [`MessageFactory`].
//!    - Walks the record's declared fields in order. Fields on the native value that the record
//!      does not declare are ignored, and `Null` values are left unset.
//!    - Nested records, list elements and map values are encoded recursively into sub-messages
//!      built from the descriptor of the enclosing wire field.
//!
//! 2. **Decode (wire -> native)**:
//!    - Reads every declared field back. A declared field missing from the wire descriptor falls
//!      back to its default, or fails with [`ConversionError::MissingField`].
//!    - Unset singular sub-messages decode to `Null`.
use crate::catalog::{FieldDescriptor, Model, RecordId, ScalarKind, TypeCatalog};
use crate::value::{MapKey, Record, Value};
use chrono::{DateTime, Utc};
use prost_reflect::{
    DynamicMessage, Kind, MapKey as WireKey, MessageDescriptor, ReflectMessage,
    Value as WireValue,
};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    #[error("Message '{message}' has no field '{field}'")]
    MissingField { message: String, field: String },
    #[error("A required value is missing")]
    MissingValue,
    #[error("Expected a {expected} value, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },
    #[error("Timestamp out of range: {seconds}s {nanos}ns")]
    InvalidTimestamp { seconds: i64, nanos: i32 },
    #[error("No wire message named '{0}'")]
    UnknownMessage(String),
    #[error("Type '{0}' is not registered")]
    NotRegistered(String),
    #[error("Failed to set wire field: {0}")]
    SetField(String),
    #[error("Field '{field}': {source}")]
    Field {
        field: String,
        #[source]
        source: Box<ConversionError>,
    },
}

impl ConversionError {
    /// Attributes the error to a field, building a dotted path as it bubbles up.
    pub(crate) fn at(self, field: &str) -> Self {
        match self {
            ConversionError::Field {
                field: inner,
                source,
            } => ConversionError::Field {
                field: format!("{field}.{inner}"),
                source,
            },
            other => ConversionError::Field {
                field: field.to_string(),
                source: Box::new(other),
            },
        }
    }

    /// Innermost error, with field attribution stripped.
    pub fn root_cause(&self) -> &ConversionError {
        match self {
            ConversionError::Field { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

/// Source of wire message descriptors, keyed by unqualified wire name.
///
/// Implemented by [`crate::schema::CompiledSchema`].
pub trait MessageFactory: Send + Sync {
    fn message_descriptor(&self, wire_name: &str) -> Option<MessageDescriptor>;
}

/// Converter between native values and wire messages.
#[derive(Clone, Copy)]
pub struct MessageTranscoder<'a> {
    catalog: &'a TypeCatalog,
    factory: &'a dyn MessageFactory,
}

impl<'a> MessageTranscoder<'a> {
    pub fn new(catalog: &'a TypeCatalog, factory: &'a dyn MessageFactory) -> Self {
        Self { catalog, factory }
    }

    pub fn catalog(&self) -> &'a TypeCatalog {
        self.catalog
    }

    /// Descriptor of the wire message generated for a record.
    pub fn descriptor(&self, record: RecordId) -> Result<MessageDescriptor, ConversionError> {
        let name = self.catalog.record(record).name();
        self.factory
            .message_descriptor(name)
            .ok_or_else(|| ConversionError::UnknownMessage(name.to_string()))
    }

    /// Encodes a native record (or a string-keyed map) into a new wire message.
    pub fn to_wire(&self, value: &Value, record: RecordId) -> Result<DynamicMessage, ConversionError> {
        let desc = self.descriptor(record)?;
        self.message_to_wire(value, record, desc)
    }

    /// Decodes a wire message into a native record.
    pub fn to_native(
        &self,
        message: &DynamicMessage,
        record: RecordId,
    ) -> Result<Record, ConversionError> {
        let record_type = self.catalog.record(record);
        let desc = message.descriptor();
        let mut native = Record::with_capacity(record_type.fields().len());

        for field in record_type.fields() {
            let Some(wire_field) = desc.get_field_by_name(field.name()) else {
                match field.default() {
                    Some(default) => {
                        native.insert(field.name(), default.clone());
                        continue;
                    }
                    None => {
                        return Err(ConversionError::MissingField {
                            message: desc.full_name().to_string(),
                            field: field.name().to_string(),
                        });
                    }
                }
            };

            let value = match field.descriptor() {
                // Singular messages have presence; everything else decodes to its wire default.
                FieldDescriptor::Record(_) | FieldDescriptor::Scalar(ScalarKind::Timestamp)
                    if !message.has_field(&wire_field) =>
                {
                    field.default().cloned().unwrap_or_default()
                }
                descriptor => self
                    .field_to_native(descriptor, &message.get_field(&wire_field))
                    .map_err(|err| err.at(field.name()))?,
            };

            native.insert(field.name(), value);
        }

        Ok(native)
    }

    /// Encodes a typed model.
    pub fn encode<T: Model>(&self, model: T) -> Result<DynamicMessage, ConversionError> {
        let id = self.lookup::<T>()?;
        self.to_wire(&Value::Record(model.into_record()), id)
    }

    /// Decodes a wire message into a typed model.
    pub fn decode<T: Model>(&self, message: &DynamicMessage) -> Result<T, ConversionError> {
        let id = self.lookup::<T>()?;
        T::from_record(self.to_native(message, id)?)
    }

    fn lookup<T: Model>(&self) -> Result<RecordId, ConversionError> {
        self.catalog
            .lookup::<T>()
            .ok_or_else(|| ConversionError::NotRegistered(std::any::type_name::<T>().to_string()))
    }

    fn message_to_wire(
        &self,
        value: &Value,
        record: RecordId,
        desc: MessageDescriptor,
    ) -> Result<DynamicMessage, ConversionError> {
        let converted;
        let fields = match value {
            Value::Record(native) => native,
            Value::Map(_) => {
                converted = value.clone().into_record()?;
                &converted
            }
            other => {
                return Err(ConversionError::TypeMismatch {
                    expected: "record",
                    found: other.kind_name(),
                });
            }
        };

        let record_type = self.catalog.record(record);
        let mut message = DynamicMessage::new(desc.clone());

        for field in record_type.fields() {
            let value = match fields.get(field.name()) {
                Some(value) if !value.is_null() => value,
                _ => continue,
            };

            let wire_field = desc.get_field_by_name(field.name()).ok_or_else(|| {
                ConversionError::MissingField {
                    message: desc.full_name().to_string(),
                    field: field.name().to_string(),
                }
            })?;

            let wire_value = self
                .field_to_wire(field.descriptor(), value, &wire_field.kind())
                .map_err(|err| err.at(field.name()))?;

            message
                .try_set_field(&wire_field, wire_value)
                .map_err(|err| ConversionError::SetField(err.to_string()).at(field.name()))?;
        }

        Ok(message)
    }

    fn field_to_wire(
        &self,
        descriptor: &FieldDescriptor,
        value: &Value,
        kind: &Kind,
    ) -> Result<WireValue, ConversionError> {
        match descriptor {
            FieldDescriptor::List(element) => {
                let Value::List(items) = value else {
                    return Err(mismatch("list", value));
                };
                items
                    .iter()
                    .enumerate()
                    .map(|(index, item)| {
                        self.element_to_wire(element, item, kind)
                            .map_err(|err| err.at(&index.to_string()))
                    })
                    .collect::<Result<Vec<_>, _>>()
                    .map(WireValue::List)
            }
            FieldDescriptor::Map(key_kind, element) => {
                let Value::Map(entries) = value else {
                    return Err(mismatch("map", value));
                };
                let entry = message_kind(kind)?;
                let value_kind = entry.map_entry_value_field().kind();

                entries
                    .iter()
                    .map(|(key, item)| {
                        let wire_key = key_to_wire(*key_kind, key)?;
                        let wire_value = self
                            .element_to_wire(element, item, &value_kind)
                            .map_err(|err| err.at(&key_label(key)))?;
                        Ok((wire_key, wire_value))
                    })
                    .collect::<Result<HashMap<_, _>, _>>()
                    .map(WireValue::Map)
            }
            single => self.element_to_wire(single, value, kind),
        }
    }

    fn element_to_wire(
        &self,
        descriptor: &FieldDescriptor,
        value: &Value,
        kind: &Kind,
    ) -> Result<WireValue, ConversionError> {
        match descriptor {
            FieldDescriptor::Scalar(scalar) => scalar_to_wire(*scalar, value, kind),
            FieldDescriptor::Record(id) => {
                if value.is_null() {
                    return Err(ConversionError::MissingValue);
                }
                let desc = message_kind(kind)?.clone();
                self.message_to_wire(value, *id, desc)
                    .map(WireValue::Message)
            }
            FieldDescriptor::List(_) | FieldDescriptor::Map(..) => {
                Err(ConversionError::TypeMismatch {
                    expected: "scalar or record element",
                    found: "container",
                })
            }
        }
    }

    fn field_to_native(
        &self,
        descriptor: &FieldDescriptor,
        value: &WireValue,
    ) -> Result<Value, ConversionError> {
        match descriptor {
            FieldDescriptor::List(element) => {
                let WireValue::List(items) = value else {
                    return Err(wire_mismatch("list", value));
                };
                items
                    .iter()
                    .enumerate()
                    .map(|(index, item)| {
                        self.element_to_native(element, item)
                            .map_err(|err| err.at(&index.to_string()))
                    })
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::List)
            }
            FieldDescriptor::Map(_, element) => {
                let WireValue::Map(entries) = value else {
                    return Err(wire_mismatch("map", value));
                };
                entries
                    .iter()
                    .map(|(key, item)| {
                        let key = key_to_native(key)?;
                        let item = self
                            .element_to_native(element, item)
                            .map_err(|err| err.at(&key_label(&key)))?;
                        Ok((key, item))
                    })
                    .collect::<Result<BTreeMap<_, _>, _>>()
                    .map(Value::Map)
            }
            single => self.element_to_native(single, value),
        }
    }

    fn element_to_native(
        &self,
        descriptor: &FieldDescriptor,
        value: &WireValue,
    ) -> Result<Value, ConversionError> {
        match descriptor {
            FieldDescriptor::Scalar(scalar) => scalar_to_native(*scalar, value),
            FieldDescriptor::Record(id) => match value {
                WireValue::Message(message) => self.to_native(message, *id).map(Value::Record),
                other => Err(wire_mismatch("message", other)),
            },
            FieldDescriptor::List(_) | FieldDescriptor::Map(..) => {
                Err(ConversionError::TypeMismatch {
                    expected: "scalar or record element",
                    found: "container",
                })
            }
        }
    }
}

fn message_kind(kind: &Kind) -> Result<&MessageDescriptor, ConversionError> {
    kind.as_message().ok_or(ConversionError::TypeMismatch {
        expected: "message field",
        found: "scalar field",
    })
}

fn mismatch(expected: &'static str, found: &Value) -> ConversionError {
    ConversionError::TypeMismatch {
        expected,
        found: found.kind_name(),
    }
}

fn wire_mismatch(expected: &'static str, found: &WireValue) -> ConversionError {
    let found = match found {
        WireValue::Bool(_) => "bool",
        WireValue::I32(_) | WireValue::U32(_) => "int32",
        WireValue::I64(_) | WireValue::U64(_) => "int64",
        WireValue::F32(_) => "float",
        WireValue::F64(_) => "double",
        WireValue::String(_) => "string",
        WireValue::Bytes(_) => "bytes",
        WireValue::EnumNumber(_) => "enum",
        WireValue::Message(_) => "message",
        WireValue::List(_) => "list",
        WireValue::Map(_) => "map",
    };
    ConversionError::TypeMismatch { expected, found }
}

fn scalar_to_wire(kind: ScalarKind, value: &Value, wire: &Kind) -> Result<WireValue, ConversionError> {
    match (kind, value) {
        (ScalarKind::Int64, Value::Int(v)) => Ok(WireValue::I64(*v)),
        (ScalarKind::String, Value::Str(v)) => Ok(WireValue::String(v.clone())),
        (ScalarKind::Bool, Value::Bool(v)) => Ok(WireValue::Bool(*v)),
        (ScalarKind::Float64, Value::Float(v)) => Ok(WireValue::F64(*v)),
        (ScalarKind::Float64, Value::Int(v)) => Ok(WireValue::F64(*v as f64)),
        (ScalarKind::Timestamp, Value::Timestamp(v)) => {
            timestamp_to_wire(v, message_kind(wire)?).map(WireValue::Message)
        }
        (_, Value::Null) => Err(ConversionError::MissingValue),
        (kind, other) => Err(ConversionError::TypeMismatch {
            expected: kind.name(),
            found: other.kind_name(),
        }),
    }
}

fn scalar_to_native(kind: ScalarKind, value: &WireValue) -> Result<Value, ConversionError> {
    match (kind, value) {
        (ScalarKind::Int64, WireValue::I64(v)) => Ok(Value::Int(*v)),
        (ScalarKind::Int64, WireValue::I32(v)) => Ok(Value::Int(i64::from(*v))),
        (ScalarKind::String, WireValue::String(v)) => Ok(Value::Str(v.clone())),
        (ScalarKind::Bool, WireValue::Bool(v)) => Ok(Value::Bool(*v)),
        (ScalarKind::Float64, WireValue::F64(v)) => Ok(Value::Float(*v)),
        (ScalarKind::Float64, WireValue::F32(v)) => Ok(Value::Float(f64::from(*v))),
        (ScalarKind::Timestamp, WireValue::Message(message)) => {
            timestamp_to_native(message).map(Value::Timestamp)
        }
        (kind, other) => Err(wire_mismatch(kind.name(), other)),
    }
}

fn timestamp_to_wire(
    value: &DateTime<Utc>,
    desc: &MessageDescriptor,
) -> Result<DynamicMessage, ConversionError> {
    let mut message = DynamicMessage::new(desc.clone());
    message
        .try_set_field_by_name("seconds", WireValue::I64(value.timestamp()))
        .map_err(|err| ConversionError::SetField(err.to_string()))?;
    message
        .try_set_field_by_name(
            "nanos",
            WireValue::I32(value.timestamp_subsec_nanos() as i32),
        )
        .map_err(|err| ConversionError::SetField(err.to_string()))?;
    Ok(message)
}

fn timestamp_to_native(message: &DynamicMessage) -> Result<DateTime<Utc>, ConversionError> {
    let seconds = message
        .get_field_by_name("seconds")
        .and_then(|v| v.as_i64())
        .unwrap_or_default();
    let nanos = message
        .get_field_by_name("nanos")
        .and_then(|v| v.as_i32())
        .unwrap_or_default();

    u32::try_from(nanos)
        .ok()
        .and_then(|n| DateTime::from_timestamp(seconds, n))
        .ok_or(ConversionError::InvalidTimestamp { seconds, nanos })
}

fn key_to_wire(kind: ScalarKind, key: &MapKey) -> Result<WireKey, ConversionError> {
    match (kind, key) {
        (ScalarKind::Int64, MapKey::Int(v)) => Ok(WireKey::I64(*v)),
        (ScalarKind::String, MapKey::Str(v)) => Ok(WireKey::String(v.clone())),
        (ScalarKind::Bool, MapKey::Bool(v)) => Ok(WireKey::Bool(*v)),
        (kind, _) => Err(ConversionError::TypeMismatch {
            expected: kind.name(),
            found: "map key",
        }),
    }
}

fn key_to_native(key: &WireKey) -> Result<MapKey, ConversionError> {
    match key {
        WireKey::I64(v) => Ok(MapKey::Int(*v)),
        WireKey::I32(v) => Ok(MapKey::Int(i64::from(*v))),
        WireKey::String(v) => Ok(MapKey::Str(v.clone())),
        WireKey::Bool(v) => Ok(MapKey::Bool(*v)),
        WireKey::U32(_) | WireKey::U64(_) => Err(ConversionError::TypeMismatch {
            expected: "int64, string or bool key",
            found: "unsigned key",
        }),
    }
}

fn key_label(key: &MapKey) -> String {
    match key {
        MapKey::Int(v) => v.to_string(),
        MapKey::Str(v) => v.clone(),
        MapKey::Bool(v) => v.to_string(),
    }
}
