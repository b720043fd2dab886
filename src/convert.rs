//! Record <-> wire message conversion
//!
//! [`Converter::to_wire`] walks the descriptor of the target message and
//! reads each field from the record by name; [`Converter::from_wire`] walks
//! the fields of a message and rebuilds the record, looking up
//! nested record types in the catalog's binding table. Every field is
//! re-resolved against the registry as it is visited.
//!
//! Any failure is reported as a [`ConvertError`] carrying the path of the
//! offending field, e.g. `lines[2].status`.

use crate::path::FieldPath;
use crate::record::{AttributeSource, NestedBinding, Record, RecordCatalog, RecordSchema, TypedRecord};
use crate::registry::SchemaRegistry;
use crate::types::{resolve, MapDetection, ResolveError, ResolvedType, TypeOrigins};
use crate::value::{EnumValue, MapKey, Value};
use chrono::{DateTime, Utc};
use prost_reflect::{
    DynamicMessage, EnumDescriptor, FieldDescriptor, Kind, MapKey as WireKey, MessageDescriptor,
    ReflectMessage, Value as WireValue,
};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use thiserror::Error;
use tracing::{debug, trace};

/// A record could not be converted to or from a wire message
#[derive(Error, Debug, Clone, PartialEq)]
#[error("conversion failed at {path}: {kind}")]
pub struct ConvertError {
    /// Field the failure occurred at
    pub path: FieldPath,
    /// What went wrong
    pub kind: ConvertErrorKind,
}

/// Reasons a conversion can fail
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConvertErrorKind {
    /// No record type of that name is registered
    #[error("unknown record type {0}")]
    UnknownRecordType(String),

    /// The record type is bound to a message the registry does not know
    #[error("record type {record_type} is bound to unregistered message {message}")]
    UnboundMessage {
        /// Record type name
        record_type: String,
        /// Message it is bound to
        message: String,
    },

    /// The value does not have the shape the field needs
    #[error("expected {expected}, found {found}")]
    ShapeMismatch {
        /// Expected shape
        expected: String,
        /// Actual value kind
        found: String,
    },

    /// An integer does not fit the field's wire type
    #[error("{value} is out of range for {wire_type}")]
    OutOfRange {
        /// Offending value
        value: String,
        /// Wire type of the field
        wire_type: String,
    },

    /// Enum name is not a member of the field's enum
    #[error("{name} is not a member of {enum_name}")]
    UnknownEnumName {
        /// Enum type
        enum_name: String,
        /// Offending name
        name: String,
    },

    /// Enum number is not a member of the field's enum
    #[error("{number} is not a member of {enum_name}")]
    UnknownEnumNumber {
        /// Enum type
        enum_name: String,
        /// Offending number
        number: i32,
    },

    /// Enum member belongs to another enum type
    #[error("member of {found} given for a field of enum {expected}")]
    EnumTypeMismatch {
        /// Field's enum type
        expected: String,
        /// Member's enum type
        found: String,
    },

    /// Text is not an ISO 8601 datetime
    #[error("malformed timestamp {0:?}")]
    MalformedTimestamp(String),

    /// Wire timestamp is outside the representable range
    #[error("timestamp {seconds}s {nanos}ns is out of range")]
    TimestampOutOfRange {
        /// Seconds since the epoch
        seconds: i64,
        /// Nanosecond part
        nanos: i32,
    },

    /// The attribute's declared type is a union of several record types
    #[error("ambiguous nested record type, candidates: {}", .0.join(", "))]
    AmbiguousNestedType(Vec<String>),

    /// The attribute's declared type names no record type
    #[error("attribute {attribute} of {record_type} does not declare a nested record type")]
    UnresolvedNestedType {
        /// Host record type
        record_type: String,
        /// Attribute name
        attribute: String,
    },

    /// The field could not be classified
    #[error(transparent)]
    Resolution(#[from] ResolveError),

    /// The wire message rejected a value
    #[error("{0}")]
    Wire(String),

    /// A typed record could not be built from a dynamic one
    #[error("cannot build {record_type}: {reason}")]
    Construction {
        /// Record type name
        record_type: String,
        /// Why
        reason: String,
    },
}

impl ConvertError {
    /// Create an error at a path
    pub fn new(path: FieldPath, kind: ConvertErrorKind) -> Self {
        Self { path, kind }
    }

    /// A typed record could not be built; for [`TypedRecord::from_record`]
    /// implementations
    pub fn construction(record_type: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::new(
            FieldPath::root(),
            ConvertErrorKind::Construction {
                record_type: record_type.into(),
                reason: reason.to_string(),
            },
        )
    }

    fn mismatch(path: &FieldPath, expected: impl fmt::Display, found: &Value) -> Self {
        Self::new(
            path.clone(),
            ConvertErrorKind::ShapeMismatch {
                expected: expected.to_string(),
                found: found.kind_name().to_string(),
            },
        )
    }
}

type Result<T> = std::result::Result<T, ConvertError>;

/// Converts records to wire messages and back
#[derive(Debug, Clone, Copy)]
pub struct Converter<'a> {
    registry: &'a SchemaRegistry,
    catalog: &'a RecordCatalog,
    detection: MapDetection,
}

impl<'a> Converter<'a> {
    /// Create a converter over a registry and a record catalog
    pub fn new(registry: &'a SchemaRegistry, catalog: &'a RecordCatalog) -> Self {
        Self {
            registry,
            catalog,
            detection: MapDetection::default(),
        }
    }

    /// Use a different map detection policy
    pub fn with_map_detection(mut self, detection: MapDetection) -> Self {
        self.detection = detection;
        self
    }

    /// Convert a record into the wire message its type is bound to
    pub fn to_wire(&self, record: &Record) -> Result<DynamicMessage> {
        let root = FieldPath::root();
        let schema = self.schema(record.type_name(), &root)?;
        let desc = self.bound_message(schema, &root)?;
        debug!(record = %schema.name, message = %desc.full_name(), "converting record to wire");
        self.encode_message(record, &desc, &root)
    }

    /// Convert a typed record into its wire message
    pub fn to_wire_typed<T: TypedRecord>(&self, record: &T) -> Result<DynamicMessage> {
        self.to_wire(&record.to_record())
    }

    /// Convert any attribute source into a given wire message type
    ///
    /// Attributes are read by field name; those without a counterpart field
    /// are ignored.
    pub fn to_wire_as(
        &self,
        source: &dyn AttributeSource,
        message: &MessageDescriptor,
    ) -> Result<DynamicMessage> {
        self.encode_message(source, message, &FieldPath::root())
    }

    /// Convert a wire message into a record of the given type
    pub fn from_wire(&self, record_type: &str, message: &DynamicMessage) -> Result<Record> {
        debug!(record = %record_type, message = %message.descriptor().full_name(), "converting wire to record");
        self.decode_record(record_type, message, &FieldPath::root())
    }

    /// Convert a wire message into a typed record
    pub fn from_wire_typed<T: TypedRecord>(&self, message: &DynamicMessage) -> Result<T> {
        T::from_record(self.from_wire(T::TYPE_NAME, message)?)
    }

    fn schema(&self, record_type: &str, path: &FieldPath) -> Result<&'a RecordSchema> {
        self.catalog.get(record_type).ok_or_else(|| {
            ConvertError::new(
                path.clone(),
                ConvertErrorKind::UnknownRecordType(record_type.to_string()),
            )
        })
    }

    fn bound_message(&self, schema: &RecordSchema, path: &FieldPath) -> Result<MessageDescriptor> {
        self.registry
            .find_message_type(&schema.message)
            .ok_or_else(|| {
                ConvertError::new(
                    path.clone(),
                    ConvertErrorKind::UnboundMessage {
                        record_type: schema.name.clone(),
                        message: schema.message.clone(),
                    },
                )
            })
    }

    fn resolve(&self, field: &FieldDescriptor, path: &FieldPath) -> Result<ResolvedType> {
        resolve(field, self.detection, &mut TypeOrigins::new())
            .map_err(|e| ConvertError::new(path.clone(), e.into()))
    }

    fn encode_message(
        &self,
        source: &dyn AttributeSource,
        desc: &MessageDescriptor,
        path: &FieldPath,
    ) -> Result<DynamicMessage> {
        let mut message = DynamicMessage::new(desc.clone());

        for field in desc.fields() {
            let Some(value) = source.attribute(field.name()) else {
                continue;
            };
            if value.is_null() {
                continue;
            }

            let field_path = path.field(field.name());
            let ty = self.resolve(&field, &field_path)?;

            let wire = if ty.is_map() {
                Some(self.encode_map(&field, &ty, value, &field_path)?)
            } else if field.is_map() {
                return Err(ConvertError::mismatch(
                    &field_path,
                    "a map entry recognized by the map detection policy",
                    value,
                ));
            } else if field.is_list() {
                Some(self.encode_list(&field, &ty, value, &field_path)?)
            } else {
                self.encode_single(&field.kind(), &ty, value, &field_path)?
            };

            let Some(wire) = wire else {
                trace!(field = %field_path, "leaving field unset");
                continue;
            };
            trace!(field = %field_path, "encoded field");
            message
                .try_set_field(&field, wire)
                .map_err(|e| ConvertError::new(field_path.clone(), ConvertErrorKind::Wire(e.to_string())))?;
        }

        Ok(message)
    }

    fn encode_list(
        &self,
        field: &FieldDescriptor,
        ty: &ResolvedType,
        value: &Value,
        path: &FieldPath,
    ) -> Result<WireValue> {
        let items = value
            .as_list()
            .ok_or_else(|| ConvertError::mismatch(path, "a list", value))?;

        let kind = field.kind();
        let mut encoded = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            let item_path = path.index(i);
            match self.encode_single(&kind, ty, item, &item_path)? {
                Some(wire) => encoded.push(wire),
                None => return Err(ConvertError::mismatch(&item_path, ty, item)),
            }
        }
        Ok(WireValue::List(encoded))
    }

    fn encode_map(
        &self,
        field: &FieldDescriptor,
        ty: &ResolvedType,
        value: &Value,
        path: &FieldPath,
    ) -> Result<WireValue> {
        let ResolvedType::Map { value: value_ty, .. } = ty else {
            return Err(ConvertError::mismatch(path, ty, value));
        };
        let entries = value
            .as_map()
            .ok_or_else(|| ConvertError::mismatch(path, "a map", value))?;
        let (key_kind, value_kind) = map_entry_kinds(field, path)?;

        let mut encoded = HashMap::with_capacity(entries.len());
        for (key, item) in entries {
            let entry_path = path.key(key);
            let wire_key = encode_map_key(&key_kind, key, &entry_path)?;

            let wire_value = if ty.is_string_map() {
                // String-valued maps pass through as-is
                let text = item
                    .as_str()
                    .ok_or_else(|| ConvertError::mismatch(&entry_path, "a string", item))?;
                WireValue::String(text.to_string())
            } else {
                self.encode_single(&value_kind, value_ty, item, &entry_path)?
                    .ok_or_else(|| ConvertError::mismatch(&entry_path, &**value_ty, item))?
            };
            encoded.insert(wire_key, wire_value);
        }
        Ok(WireValue::Map(encoded))
    }

    /// Encode one non-collection value; `None` leaves the field unset
    fn encode_single(
        &self,
        kind: &Kind,
        ty: &ResolvedType,
        value: &Value,
        path: &FieldPath,
    ) -> Result<Option<WireValue>> {
        match (ty, kind) {
            (ResolvedType::Timestamp, Kind::Message(desc)) => {
                if value.is_falsy() {
                    return Ok(None);
                }
                let at = match value {
                    Value::Timestamp(at) => *at,
                    Value::String(text) => crate::value::parse_datetime(text).ok_or_else(|| {
                        ConvertError::new(
                            path.clone(),
                            ConvertErrorKind::MalformedTimestamp(text.clone()),
                        )
                    })?,
                    other => return Err(ConvertError::mismatch(path, "a timestamp", other)),
                };
                encode_timestamp(desc, at, path).map(|m| Some(WireValue::Message(m)))
            }
            (ResolvedType::Enum(_), Kind::Enum(desc)) => {
                encode_enum(desc, value, path).map(|n| Some(WireValue::EnumNumber(n)))
            }
            (ResolvedType::Message(_), Kind::Message(desc)) => {
                let nested: &dyn AttributeSource = match value {
                    Value::Record(record) => record,
                    Value::Map(entries) => entries,
                    other => return Err(ConvertError::mismatch(path, "a record", other)),
                };
                self.encode_message(nested, desc, path)
                    .map(|m| Some(WireValue::Message(m)))
            }
            (ResolvedType::Scalar { .. }, kind) => encode_scalar(kind, value, path).map(Some),
            (ty, _) => Err(ConvertError::mismatch(path, ty, value)),
        }
    }

    fn decode_record(
        &self,
        record_type: &str,
        message: &DynamicMessage,
        path: &FieldPath,
    ) -> Result<Record> {
        let schema = self.schema(record_type, path)?;
        let mut attributes = BTreeMap::new();

        for field in message.descriptor().fields() {
            if schema.get(field.name()).is_none() {
                trace!(record = %schema.name, field = %field.name(), "skipping undeclared field");
                continue;
            }
            // Without presence a zero value is indistinguishable from an
            // unset one, so the wire value is taken as is.
            if field.supports_presence() && !message.has_field(&field) {
                continue;
            }

            let value = message.get_field(&field);
            let field_path = path.field(field.name());
            let ty = self.resolve(&field, &field_path)?;
            let decoded = match value.as_ref() {
                WireValue::List(items) if !ty.is_map() => Value::List(
                    items
                        .iter()
                        .enumerate()
                        .map(|(i, item)| {
                            self.decode_single(schema, field.name(), &ty, item, &field_path.index(i))
                        })
                        .collect::<Result<Vec<_>>>()?,
                ),
                WireValue::Map(entries) => {
                    self.decode_map(schema, field.name(), &ty, entries, &field_path)?
                }
                single => self.decode_single(schema, field.name(), &ty, single, &field_path)?,
            };

            trace!(field = %field_path, "decoded field");
            attributes.insert(field.name().to_string(), decoded);
        }

        Ok(schema.construct(attributes, self.registry))
    }

    fn decode_map(
        &self,
        schema: &RecordSchema,
        attribute: &str,
        ty: &ResolvedType,
        entries: &HashMap<WireKey, WireValue>,
        path: &FieldPath,
    ) -> Result<Value> {
        let ResolvedType::Map { value: value_ty, .. } = ty else {
            return Err(ConvertError::new(
                path.clone(),
                ConvertErrorKind::ShapeMismatch {
                    expected: ty.to_string(),
                    found: "map".to_string(),
                },
            ));
        };

        let mut decoded = BTreeMap::new();
        for (key, item) in entries {
            let key = decode_map_key(key);
            let entry_path = path.key(&key);
            let value = self.decode_single(schema, attribute, value_ty, item, &entry_path)?;
            decoded.insert(key, value);
        }
        Ok(Value::Map(decoded))
    }

    fn decode_single(
        &self,
        schema: &RecordSchema,
        attribute: &str,
        ty: &ResolvedType,
        value: &WireValue,
        path: &FieldPath,
    ) -> Result<Value> {
        match (ty, value) {
            (ResolvedType::Timestamp, WireValue::Message(message)) => {
                decode_timestamp(message, path).map(Value::Timestamp)
            }
            (ResolvedType::Enum(_), WireValue::EnumNumber(n)) => {
                Ok(Value::Enum(EnumValue::Number(*n)))
            }
            (ResolvedType::Message(_), WireValue::Message(message)) => {
                let nested = self.nested_type(schema, attribute, path)?;
                self.decode_record(nested, message, path).map(Value::Record)
            }
            (_, value) => decode_scalar(value, path),
        }
    }

    fn nested_type<'s>(
        &self,
        schema: &'s RecordSchema,
        attribute: &str,
        path: &FieldPath,
    ) -> Result<&'s str> {
        match schema.nested_binding(attribute) {
            Some(NestedBinding::Record(name)) => Ok(name),
            Some(NestedBinding::Ambiguous(candidates)) => Err(ConvertError::new(
                path.clone(),
                ConvertErrorKind::AmbiguousNestedType(candidates.clone()),
            )),
            None => Err(ConvertError::new(
                path.clone(),
                ConvertErrorKind::UnresolvedNestedType {
                    record_type: schema.name.clone(),
                    attribute: attribute.to_string(),
                },
            )),
        }
    }
}

fn map_entry_kinds(field: &FieldDescriptor, path: &FieldPath) -> Result<(Kind, Kind)> {
    let Kind::Message(entry) = field.kind() else {
        return Err(ConvertError::new(
            path.clone(),
            ConvertErrorKind::Wire(format!("{} is not a map field", field.full_name())),
        ));
    };
    let lookup = |name: &str| {
        entry.get_field_by_name(name).map(|f| f.kind()).ok_or_else(|| {
            ConvertError::new(
                path.clone(),
                ConvertErrorKind::Resolution(ResolveError::MalformedMapEntry {
                    field: field.full_name().to_string(),
                    entry: entry.full_name().to_string(),
                    reason: format!("missing `{}` field", name),
                }),
            )
        })
    };
    Ok((lookup("key")?, lookup("value")?))
}

fn out_of_range(path: &FieldPath, value: impl fmt::Display, wire_type: &str) -> ConvertError {
    ConvertError::new(
        path.clone(),
        ConvertErrorKind::OutOfRange {
            value: value.to_string(),
            wire_type: wire_type.to_string(),
        },
    )
}

fn encode_scalar(kind: &Kind, value: &Value, path: &FieldPath) -> Result<WireValue> {
    let expected = || ConvertError::mismatch(path, format!("{:?}", kind), value);

    Ok(match kind {
        Kind::Bool => WireValue::Bool(value.as_bool().ok_or_else(expected)?),
        Kind::Int32 | Kind::Sint32 | Kind::Sfixed32 => {
            let n = value.as_i64().ok_or_else(expected)?;
            WireValue::I32(i32::try_from(n).map_err(|_| out_of_range(path, n, "int32"))?)
        }
        Kind::Int64 | Kind::Sint64 | Kind::Sfixed64 => {
            match value {
                Value::UInt(n) => WireValue::I64(
                    i64::try_from(*n).map_err(|_| out_of_range(path, n, "int64"))?,
                ),
                _ => WireValue::I64(value.as_i64().ok_or_else(expected)?),
            }
        }
        Kind::Uint32 | Kind::Fixed32 => {
            let n = unsigned(value, path)?.ok_or_else(expected)?;
            WireValue::U32(u32::try_from(n).map_err(|_| out_of_range(path, n, "uint32"))?)
        }
        Kind::Uint64 | Kind::Fixed64 => WireValue::U64(unsigned(value, path)?.ok_or_else(expected)?),
        Kind::Float => WireValue::F32(value.as_f64().ok_or_else(expected)? as f32),
        Kind::Double => WireValue::F64(value.as_f64().ok_or_else(expected)?),
        Kind::String => WireValue::String(value.as_str().ok_or_else(expected)?.to_string()),
        Kind::Bytes => match value {
            Value::Bytes(bytes) => WireValue::Bytes(bytes.clone().into()),
            Value::String(text) => WireValue::Bytes(text.clone().into_bytes().into()),
            _ => return Err(expected()),
        },
        Kind::Message(_) | Kind::Enum(_) => return Err(expected()),
    })
}

/// Non-negative integer; negative signed values are out of range
fn unsigned(value: &Value, path: &FieldPath) -> Result<Option<u64>> {
    match value {
        Value::Int(n) => u64::try_from(*n)
            .map(Some)
            .map_err(|_| out_of_range(path, n, "unsigned")),
        _ => Ok(value.as_u64()),
    }
}

fn decode_scalar(value: &WireValue, path: &FieldPath) -> Result<Value> {
    Ok(match value {
        WireValue::Bool(b) => Value::Bool(*b),
        WireValue::I32(n) => Value::Int(i64::from(*n)),
        WireValue::I64(n) => Value::Int(*n),
        WireValue::U32(n) => Value::UInt(u64::from(*n)),
        WireValue::U64(n) => Value::UInt(*n),
        WireValue::F32(n) => Value::Float(f64::from(*n)),
        WireValue::F64(n) => Value::Float(*n),
        WireValue::String(s) => Value::String(s.clone()),
        WireValue::Bytes(b) => Value::Bytes(b.to_vec()),
        WireValue::EnumNumber(n) => Value::Enum(EnumValue::Number(*n)),
        WireValue::Message(_) | WireValue::List(_) | WireValue::Map(_) => {
            return Err(ConvertError::new(
                path.clone(),
                ConvertErrorKind::ShapeMismatch {
                    expected: "a scalar".to_string(),
                    found: "a nested wire value".to_string(),
                },
            ))
        }
    })
}

fn encode_map_key(kind: &Kind, key: &MapKey, path: &FieldPath) -> Result<WireKey> {
    let as_value = match key {
        MapKey::Bool(b) => Value::Bool(*b),
        MapKey::Int(n) => Value::Int(*n),
        MapKey::UInt(n) => Value::UInt(*n),
        MapKey::String(text) => {
            // Keys of loosely built mappings are often text
            let scalar = crate::types::ScalarKind::from_kind(kind);
            match crate::defaults::map_key_from_text(scalar, text) {
                Ok(MapKey::Bool(b)) => Value::Bool(b),
                Ok(MapKey::Int(n)) => Value::Int(n),
                Ok(MapKey::UInt(n)) => Value::UInt(n),
                Ok(MapKey::String(s)) => Value::String(s),
                Err(reason) => {
                    return Err(ConvertError::new(
                        path.clone(),
                        ConvertErrorKind::ShapeMismatch {
                            expected: format!("{:?} map key", kind),
                            found: reason,
                        },
                    ))
                }
            }
        }
    };

    Ok(match encode_scalar(kind, &as_value, path)? {
        WireValue::Bool(b) => WireKey::Bool(b),
        WireValue::I32(n) => WireKey::I32(n),
        WireValue::I64(n) => WireKey::I64(n),
        WireValue::U32(n) => WireKey::U32(n),
        WireValue::U64(n) => WireKey::U64(n),
        WireValue::String(s) => WireKey::String(s),
        _ => return Err(ConvertError::mismatch(path, "a valid map key type", &as_value)),
    })
}

fn decode_map_key(key: &WireKey) -> MapKey {
    match key {
        WireKey::Bool(b) => MapKey::Bool(*b),
        WireKey::I32(n) => MapKey::Int(i64::from(*n)),
        WireKey::I64(n) => MapKey::Int(*n),
        WireKey::U32(n) => MapKey::UInt(u64::from(*n)),
        WireKey::U64(n) => MapKey::UInt(*n),
        WireKey::String(s) => MapKey::String(s.clone()),
    }
}

fn encode_enum(desc: &EnumDescriptor, value: &Value, path: &FieldPath) -> Result<i32> {
    let unknown_number = |number: i32| {
        ConvertError::new(
            path.clone(),
            ConvertErrorKind::UnknownEnumNumber {
                enum_name: desc.full_name().to_string(),
                number,
            },
        )
    };
    let by_name = |name: &str| {
        desc.get_value_by_name(name).map(|v| v.number()).ok_or_else(|| {
            ConvertError::new(
                path.clone(),
                ConvertErrorKind::UnknownEnumName {
                    enum_name: desc.full_name().to_string(),
                    name: name.to_string(),
                },
            )
        })
    };
    let by_number = |number: i32| {
        desc.get_value(number)
            .map(|v| v.number())
            .ok_or_else(|| unknown_number(number))
    };

    match value {
        Value::Enum(EnumValue::Name(name)) | Value::String(name) => by_name(name),
        Value::Enum(EnumValue::Number(n)) => by_number(*n),
        Value::Enum(EnumValue::Member(member)) => {
            if !member.enum_name.is_empty()
                && member.enum_name.trim_start_matches('.') != desc.full_name()
            {
                return Err(ConvertError::new(
                    path.clone(),
                    ConvertErrorKind::EnumTypeMismatch {
                        expected: desc.full_name().to_string(),
                        found: member.enum_name.clone(),
                    },
                ));
            }
            by_name(&member.name)
        }
        Value::Int(_) | Value::UInt(_) => {
            let n = value.as_i64().unwrap_or(i64::MAX);
            let n = i32::try_from(n).map_err(|_| out_of_range(path, n, "enum"))?;
            by_number(n)
        }
        other => Err(ConvertError::mismatch(path, "an enum value", other)),
    }
}

fn encode_timestamp(
    desc: &MessageDescriptor,
    at: DateTime<Utc>,
    path: &FieldPath,
) -> Result<DynamicMessage> {
    // Leap seconds report up to 1_999_999_999 sub-second nanos
    let nanos = at.timestamp_subsec_nanos();
    if nanos >= 1_000_000_000 {
        return Err(ConvertError::new(
            path.clone(),
            ConvertErrorKind::TimestampOutOfRange {
                seconds: at.timestamp(),
                nanos: nanos as i32,
            },
        ));
    }
    let timestamp = prost_types::Timestamp {
        seconds: at.timestamp(),
        nanos: nanos as i32,
    };
    let mut message = DynamicMessage::new(desc.clone());
    message
        .transcode_from(&timestamp)
        .map_err(|e| ConvertError::new(path.clone(), ConvertErrorKind::Wire(e.to_string())))?;
    Ok(message)
}

fn decode_timestamp(message: &DynamicMessage, path: &FieldPath) -> Result<DateTime<Utc>> {
    let timestamp: prost_types::Timestamp = message
        .transcode_to()
        .map_err(|e| ConvertError::new(path.clone(), ConvertErrorKind::Wire(e.to_string())))?;
    let out_of_range = || {
        ConvertError::new(
            path.clone(),
            ConvertErrorKind::TimestampOutOfRange {
                seconds: timestamp.seconds,
                nanos: timestamp.nanos,
            },
        )
    };
    let nanos = u32::try_from(timestamp.nanos).map_err(|_| out_of_range())?;
    DateTime::from_timestamp(timestamp.seconds, nanos).ok_or_else(out_of_range)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_reports_path() {
        let err = ConvertError::new(
            FieldPath::root().field("lines").index(2).field("status"),
            ConvertErrorKind::UnknownEnumName {
                enum_name: "shop.Status".to_string(),
                name: "NOPE".to_string(),
            },
        );
        assert_eq!(
            err.to_string(),
            "conversion failed at lines[2].status: NOPE is not a member of shop.Status"
        );
    }

    #[test]
    fn test_scalar_range_checks() {
        let path = FieldPath::root().field("n");
        assert_eq!(
            encode_scalar(&Kind::Int32, &Value::Int(7), &path).unwrap(),
            WireValue::I32(7)
        );
        assert!(encode_scalar(&Kind::Int32, &Value::Int(i64::MAX), &path).is_err());
        assert!(encode_scalar(&Kind::Uint32, &Value::Int(-1), &path).is_err());
        assert_eq!(
            encode_scalar(&Kind::Uint64, &Value::Int(5), &path).unwrap(),
            WireValue::U64(5)
        );
        assert_eq!(
            encode_scalar(&Kind::Double, &Value::Int(2), &path).unwrap(),
            WireValue::F64(2.0)
        );
        assert!(encode_scalar(&Kind::String, &Value::Int(2), &path).is_err());
    }

    #[test]
    fn test_map_keys_from_text() {
        let path = FieldPath::root().field("m");
        assert_eq!(
            encode_map_key(&Kind::Int32, &MapKey::from("12"), &path).unwrap(),
            WireKey::I32(12)
        );
        assert_eq!(
            encode_map_key(&Kind::String, &MapKey::from("a"), &path).unwrap(),
            WireKey::String("a".to_string())
        );
        assert!(encode_map_key(&Kind::Int64, &MapKey::from("x"), &path).is_err());
        assert_eq!(decode_map_key(&WireKey::U32(3)), MapKey::UInt(3));
    }

    #[test]
    fn test_leap_second_timestamp_is_out_of_range() {
        let registry = SchemaRegistry::new().unwrap();
        let desc = registry
            .find_message_type("google.protobuf.Timestamp")
            .unwrap();
        let path = FieldPath::root().field("placed_at");

        let leap = chrono::NaiveDate::from_ymd_opt(2016, 12, 31)
            .unwrap()
            .and_hms_nano_opt(23, 59, 59, 1_500_000_000)
            .unwrap()
            .and_utc();
        let err = encode_timestamp(&desc, leap, &path).unwrap_err();
        assert_eq!(err.path, path);
        assert!(matches!(
            err.kind,
            ConvertErrorKind::TimestampOutOfRange { nanos: 1_500_000_000, .. }
        ));

        let regular = DateTime::from_timestamp(1_700_000_000, 250).unwrap();
        let message = encode_timestamp(&desc, regular, &path).unwrap();
        assert_eq!(decode_timestamp(&message, &path).unwrap(), regular);
    }
}
