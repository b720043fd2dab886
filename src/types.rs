//! Type resolution from protobuf field descriptors
//!
//! Every field of a wire message is classified into exactly one
//! [`ResolvedType`]. Maps are not a first-class wire type: protoc encodes
//! `map<K, V>` as a repeated field of a synthetic `XxxEntry` message flagged
//! `map_entry`, so they are recovered here from that shape. The same goes for
//! `google.protobuf.Timestamp`, which is recognized by name.

use prost_reflect::{Cardinality, FieldDescriptor, Kind, MessageDescriptor};
use prost_types::field_descriptor_proto::Type;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Fully-qualified name of the well-known timestamp message
pub const TIMESTAMP_TYPE_NAME: &str = "google.protobuf.Timestamp";

/// Name suffix protoc gives synthetic map-entry messages
pub const MAP_ENTRY_SUFFIX: &str = "Entry";

/// Errors raised while registering schema files or classifying fields
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResolveError {
    /// A schema file could not be added to the registry
    #[error("failed to register schema file {file}: {reason}")]
    Registration {
        /// Schema file name
        file: String,
        /// Underlying descriptor error
        reason: String,
    },

    /// A type reference names no registered type
    #[error("unknown type: {0}")]
    UnknownType(String),

    /// A map-entry message does not have the `key` / `value` field pair
    #[error("malformed map entry {entry} for field {field}: {reason}")]
    MalformedMapEntry {
        /// Field being resolved
        field: String,
        /// Map-entry message name
        entry: String,
        /// What is wrong with it
        reason: String,
    },
}

/// Scalar kinds a field can resolve to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarKind {
    /// `bool`
    Bool,
    /// Signed integers of any width and encoding
    Int,
    /// Unsigned integers of any width and encoding
    #[serde(rename = "uint")]
    UInt,
    /// `float` and `double`
    Float,
    /// `bytes`
    Bytes,
    /// `string`
    String,
    /// Untyped; produced for wire type tags outside the fixed table
    Any,
}

impl ScalarKind {
    /// Map a raw wire type tag onto a scalar kind
    ///
    /// Tags that do not name a scalar resolve to [`ScalarKind::Any`] so that
    /// resolution stays total.
    pub fn from_type_tag(tag: i32) -> Self {
        match Type::try_from(tag) {
            Ok(Type::Double) | Ok(Type::Float) => ScalarKind::Float,
            Ok(Type::Int64) | Ok(Type::Int32) | Ok(Type::Sint32) | Ok(Type::Sint64)
            | Ok(Type::Sfixed32) | Ok(Type::Sfixed64) => ScalarKind::Int,
            Ok(Type::Uint64) | Ok(Type::Uint32) | Ok(Type::Fixed64) | Ok(Type::Fixed32) => {
                ScalarKind::UInt
            }
            Ok(Type::Bool) => ScalarKind::Bool,
            Ok(Type::String) => ScalarKind::String,
            Ok(Type::Bytes) => ScalarKind::Bytes,
            Ok(Type::Group) | Ok(Type::Message) | Ok(Type::Enum) | Err(_) => ScalarKind::Any,
        }
    }

    /// Map a prost-reflect kind onto a scalar kind
    pub fn from_kind(kind: &Kind) -> Self {
        let ty = match kind {
            Kind::Double => Type::Double,
            Kind::Float => Type::Float,
            Kind::Int32 => Type::Int32,
            Kind::Int64 => Type::Int64,
            Kind::Uint32 => Type::Uint32,
            Kind::Uint64 => Type::Uint64,
            Kind::Sint32 => Type::Sint32,
            Kind::Sint64 => Type::Sint64,
            Kind::Fixed32 => Type::Fixed32,
            Kind::Fixed64 => Type::Fixed64,
            Kind::Sfixed32 => Type::Sfixed32,
            Kind::Sfixed64 => Type::Sfixed64,
            Kind::Bool => Type::Bool,
            Kind::String => Type::String,
            Kind::Bytes => Type::Bytes,
            Kind::Message(_) => Type::Message,
            Kind::Enum(_) => Type::Enum,
        };
        Self::from_type_tag(ty as i32)
    }
}

/// Reference to an enum type
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnumType {
    /// Simple name, e.g. `Status`
    pub name: String,
    /// Fully-qualified name, e.g. `example.Status`
    pub full_name: String,
    /// Member used as the default: the zero-valued one, else the first
    pub default_member: String,
}

/// Reference to a message type
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageType {
    /// Simple name, e.g. `Address`
    pub name: String,
    /// Fully-qualified name, e.g. `example.Address`
    pub full_name: String,
}

/// Semantic type of a field
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResolvedType {
    /// Scalar value
    Scalar {
        /// Scalar kind
        scalar: ScalarKind,
    },
    /// Enum reference
    Enum(EnumType),
    /// Nested message reference
    Message(MessageType),
    /// `map<K, V>`
    Map {
        /// Key kind; always scalar
        key: ScalarKind,
        /// Value type
        value: Box<ResolvedType>,
    },
    /// `google.protobuf.Timestamp`
    Timestamp,
}

impl ResolvedType {
    /// Scalar type of the given kind
    pub fn scalar(kind: ScalarKind) -> Self {
        ResolvedType::Scalar { scalar: kind }
    }

    /// Whether this is a map
    pub fn is_map(&self) -> bool {
        matches!(self, ResolvedType::Map { .. })
    }

    /// Whether this is a map whose values are string scalars
    pub fn is_string_map(&self) -> bool {
        matches!(
            self,
            ResolvedType::Map { value, .. }
                if **value == ResolvedType::scalar(ScalarKind::String)
        )
    }
}

impl fmt::Display for ResolvedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolvedType::Scalar { scalar } => write!(f, "{:?}", scalar),
            ResolvedType::Enum(e) => write!(f, "Enum({})", e.name),
            ResolvedType::Message(m) => write!(f, "Message({})", m.name),
            ResolvedType::Map { key, value } => write!(f, "Map({:?}, {})", key, value),
            ResolvedType::Timestamp => f.write_str("Timestamp"),
        }
    }
}

/// Classification of one field, including its collection shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedField {
    /// Field name as declared in the schema
    pub name: String,
    /// Wire tag
    pub number: u32,
    /// Semantic type; for repeated fields, the element type
    #[serde(rename = "type")]
    pub ty: ResolvedType,
    /// Repeated and not a map
    pub repeated: bool,
    /// Field tracks presence (proto2 optional, proto3 `optional`, messages)
    pub optional: bool,
}

/// Which schema file defines each referenced enum or message, keyed by
/// simple type name
pub type TypeOrigins = BTreeMap<String, String>;

/// How map fields are recognized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MapDetection {
    /// Repeated field of a message flagged `map_entry`
    #[default]
    EntryFlag,
    /// As `EntryFlag`, and the entry message name must end in `Entry`
    EntryFlagAndSuffix,
}

impl MapDetection {
    /// Parse a detection policy from a plugin parameter value
    pub fn from_param(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "flag" => Some(MapDetection::EntryFlag),
            "suffix" | "flag_and_suffix" => Some(MapDetection::EntryFlagAndSuffix),
            _ => None,
        }
    }

    /// Whether a repeated field of this message type is a map
    pub fn is_map_entry(&self, message: &MessageDescriptor) -> bool {
        match self {
            MapDetection::EntryFlag => message.is_map_entry(),
            MapDetection::EntryFlagAndSuffix => {
                message.is_map_entry() && message.name().ends_with(MAP_ENTRY_SUFFIX)
            }
        }
    }
}

/// Classify a field descriptor
///
/// Enum and message references encountered (including those inside map
/// entries) are recorded in `origins` with the schema file defining them.
pub fn resolve(
    field: &FieldDescriptor,
    detection: MapDetection,
    origins: &mut TypeOrigins,
) -> Result<ResolvedType, ResolveError> {
    match field.kind() {
        Kind::Message(message) => {
            if message.full_name() == TIMESTAMP_TYPE_NAME {
                return Ok(ResolvedType::Timestamp);
            }

            if field.cardinality() == Cardinality::Repeated && detection.is_map_entry(&message) {
                return resolve_map_entry(field, &message, detection, origins);
            }

            origins.insert(
                message.name().to_string(),
                message.parent_file().name().to_string(),
            );
            Ok(ResolvedType::Message(MessageType {
                name: message.name().to_string(),
                full_name: message.full_name().to_string(),
            }))
        }
        Kind::Enum(enum_desc) => {
            origins.insert(
                enum_desc.name().to_string(),
                enum_desc.parent_file().name().to_string(),
            );
            let default_member = enum_desc
                .get_value(0)
                .unwrap_or_else(|| enum_desc.default_value())
                .name()
                .to_string();
            Ok(ResolvedType::Enum(EnumType {
                name: enum_desc.name().to_string(),
                full_name: enum_desc.full_name().to_string(),
                default_member,
            }))
        }
        kind => Ok(ResolvedType::scalar(ScalarKind::from_kind(&kind))),
    }
}

/// Classify a field and capture its collection shape
pub fn resolve_field(
    field: &FieldDescriptor,
    detection: MapDetection,
    origins: &mut TypeOrigins,
) -> Result<ResolvedField, ResolveError> {
    let ty = resolve(field, detection, origins)?;
    let repeated = field.cardinality() == Cardinality::Repeated && !ty.is_map();
    Ok(ResolvedField {
        name: field.name().to_string(),
        number: field.number(),
        optional: !repeated && !ty.is_map() && field.supports_presence(),
        repeated,
        ty,
    })
}

fn resolve_map_entry(
    field: &FieldDescriptor,
    entry: &MessageDescriptor,
    detection: MapDetection,
    origins: &mut TypeOrigins,
) -> Result<ResolvedType, ResolveError> {
    let malformed = |reason: &str| ResolveError::MalformedMapEntry {
        field: field.full_name().to_string(),
        entry: entry.full_name().to_string(),
        reason: reason.to_string(),
    };

    let key_field = entry
        .get_field_by_name("key")
        .ok_or_else(|| malformed("missing `key` field"))?;
    let value_field = entry
        .get_field_by_name("value")
        .ok_or_else(|| malformed("missing `value` field"))?;

    let key = match resolve(&key_field, detection, origins)? {
        ResolvedType::Scalar { scalar } => scalar,
        other => return Err(malformed(&format!("key must be a scalar, found {}", other))),
    };
    let value = resolve(&value_field, detection, origins)?;

    Ok(ResolvedType::Map {
        key,
        value: Box::new(value),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SchemaRegistry;
    use prost_types::field_descriptor_proto::Label;
    use prost_types::{
        DescriptorProto, EnumDescriptorProto, EnumValueDescriptorProto, FieldDescriptorProto,
        FileDescriptorProto, MessageOptions,
    };

    fn field(name: &str, number: i32, ty: Type) -> FieldDescriptorProto {
        FieldDescriptorProto {
            name: Some(name.to_string()),
            number: Some(number),
            r#type: Some(ty.into()),
            label: Some(Label::Optional.into()),
            ..Default::default()
        }
    }

    fn typed(name: &str, number: i32, ty: Type, type_name: &str, label: Label) -> FieldDescriptorProto {
        FieldDescriptorProto {
            type_name: Some(type_name.to_string()),
            label: Some(label.into()),
            ..field(name, number, ty)
        }
    }

    fn entry(name: &str, key: Type, value: FieldDescriptorProto, map_entry: bool) -> DescriptorProto {
        DescriptorProto {
            name: Some(name.to_string()),
            field: vec![field("key", 1, key), value],
            options: Some(MessageOptions {
                map_entry: Some(map_entry),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn registry() -> SchemaRegistry {
        let file = FileDescriptorProto {
            name: Some("shop/item.proto".to_string()),
            package: Some("shop".to_string()),
            dependency: vec!["google/protobuf/timestamp.proto".to_string()],
            enum_type: vec![EnumDescriptorProto {
                name: Some("Kind".to_string()),
                value: vec![
                    EnumValueDescriptorProto {
                        name: Some("KIND_UNSPECIFIED".to_string()),
                        number: Some(0),
                        ..Default::default()
                    },
                    EnumValueDescriptorProto {
                        name: Some("KIND_BOOK".to_string()),
                        number: Some(1),
                        ..Default::default()
                    },
                ],
                ..Default::default()
            }],
            message_type: vec![
                DescriptorProto {
                    name: Some("Part".to_string()),
                    field: vec![field("label", 1, Type::String)],
                    ..Default::default()
                },
                DescriptorProto {
                    name: Some("Item".to_string()),
                    field: vec![
                        field("title", 1, Type::String),
                        field("count", 2, Type::Uint32),
                        field("weight", 3, Type::Double),
                        typed("kind", 4, Type::Enum, ".shop.Kind", Label::Optional),
                        typed(
                            "created_at",
                            5,
                            Type::Message,
                            ".google.protobuf.Timestamp",
                            Label::Optional,
                        ),
                        typed("tags", 6, Type::Message, ".shop.Item.TagsEntry", Label::Repeated),
                        typed("parts", 7, Type::Message, ".shop.Item.PartsEntry", Label::Repeated),
                        typed("entries", 8, Type::Message, ".shop.Item.FakeEntry", Label::Repeated),
                        typed("main", 9, Type::Message, ".shop.Part", Label::Optional),
                    ],
                    nested_type: vec![
                        entry("TagsEntry", Type::String, field("value", 2, Type::String), true),
                        entry(
                            "PartsEntry",
                            Type::Int64,
                            typed("value", 2, Type::Message, ".shop.Part", Label::Optional),
                            true,
                        ),
                        entry("FakeEntry", Type::String, field("value", 2, Type::String), false),
                    ],
                    ..Default::default()
                },
            ],
            syntax: Some("proto3".to_string()),
            ..Default::default()
        };

        let mut registry = SchemaRegistry::new().unwrap();
        registry.add_schema_file(file).unwrap();
        registry
    }

    /// Hand-built map entries protoc itself would never emit
    fn odd_registry() -> Result<SchemaRegistry, ResolveError> {
        let file = FileDescriptorProto {
            name: Some("shop/odd.proto".to_string()),
            package: Some("shop".to_string()),
            message_type: vec![DescriptorProto {
                name: Some("Odd".to_string()),
                field: vec![
                    typed("broken", 1, Type::Message, ".shop.Odd.BrokenEntry", Label::Repeated),
                    typed("lookup", 2, Type::Message, ".shop.Odd.Lookup", Label::Repeated),
                ],
                nested_type: vec![
                    entry("BrokenEntry", Type::String, field("other", 2, Type::String), true),
                    entry("Lookup", Type::String, field("value", 2, Type::String), true),
                ],
                ..Default::default()
            }],
            syntax: Some("proto3".to_string()),
            ..Default::default()
        };

        let mut registry = SchemaRegistry::new()?;
        registry.add_schema_file(file)?;
        Ok(registry)
    }

    fn resolve_named(
        registry: &SchemaRegistry,
        name: &str,
        detection: MapDetection,
    ) -> (Result<ResolvedField, ResolveError>, TypeOrigins) {
        let item = registry.find_message_type("shop.Item").unwrap();
        let fd = item.get_field_by_name(name).unwrap();
        let mut origins = TypeOrigins::new();
        let resolved = resolve_field(&fd, detection, &mut origins);
        (resolved, origins)
    }

    #[test]
    fn test_scalar_type_table() {
        assert_eq!(ScalarKind::from_type_tag(Type::Sfixed64 as i32), ScalarKind::Int);
        assert_eq!(ScalarKind::from_type_tag(Type::Fixed32 as i32), ScalarKind::UInt);
        assert_eq!(ScalarKind::from_type_tag(Type::Float as i32), ScalarKind::Float);
        assert_eq!(ScalarKind::from_type_tag(Type::Bytes as i32), ScalarKind::Bytes);
        assert_eq!(ScalarKind::from_type_tag(Type::Group as i32), ScalarKind::Any);
        assert_eq!(ScalarKind::from_type_tag(99), ScalarKind::Any);
    }

    #[test]
    fn test_resolve_scalars() {
        let registry = registry();
        let (title, origins) = resolve_named(&registry, "title", MapDetection::default());
        assert_eq!(title.unwrap().ty, ResolvedType::scalar(ScalarKind::String));
        assert!(origins.is_empty());

        let (count, _) = resolve_named(&registry, "count", MapDetection::default());
        assert_eq!(count.unwrap().ty, ResolvedType::scalar(ScalarKind::UInt));
    }

    #[test]
    fn test_resolve_enum_records_origin() {
        let registry = registry();
        let (kind, origins) = resolve_named(&registry, "kind", MapDetection::default());
        match kind.unwrap().ty {
            ResolvedType::Enum(e) => {
                assert_eq!(e.name, "Kind");
                assert_eq!(e.full_name, "shop.Kind");
                assert_eq!(e.default_member, "KIND_UNSPECIFIED");
            }
            other => panic!("expected enum, got {}", other),
        }
        assert_eq!(origins.get("Kind").map(String::as_str), Some("shop/item.proto"));
    }

    #[test]
    fn test_resolve_timestamp() {
        let registry = registry();
        let (created, origins) = resolve_named(&registry, "created_at", MapDetection::default());
        let created = created.unwrap();
        assert_eq!(created.ty, ResolvedType::Timestamp);
        assert!(created.optional);
        assert!(!origins.contains_key("Timestamp"));
    }

    #[test]
    fn test_resolve_string_map() {
        let registry = registry();
        let (tags, _) = resolve_named(&registry, "tags", MapDetection::default());
        let tags = tags.unwrap();
        assert!(!tags.repeated);
        assert!(tags.ty.is_string_map());
        assert_eq!(
            tags.ty,
            ResolvedType::Map {
                key: ScalarKind::String,
                value: Box::new(ResolvedType::scalar(ScalarKind::String)),
            }
        );
    }

    #[test]
    fn test_resolve_message_map() {
        let registry = registry();
        let (parts, origins) = resolve_named(&registry, "parts", MapDetection::default());
        match parts.unwrap().ty {
            ResolvedType::Map { key, value } => {
                assert_eq!(key, ScalarKind::Int);
                assert!(matches!(*value, ResolvedType::Message(ref m) if m.name == "Part"));
            }
            other => panic!("expected map, got {}", other),
        }
        assert!(origins.contains_key("Part"));
    }

    #[test]
    fn test_entry_without_flag_is_a_list() {
        let registry = registry();
        let (entries, _) = resolve_named(&registry, "entries", MapDetection::default());
        let entries = entries.unwrap();
        assert!(entries.repeated);
        assert!(matches!(entries.ty, ResolvedType::Message(ref m) if m.name == "FakeEntry"));
    }

    #[test]
    fn test_suffix_policy() {
        let registry = odd_registry().expect("odd entries should register");
        let odd = registry.find_message_type("shop.Odd").unwrap();
        let lookup = odd.get_field_by_name("lookup").unwrap();

        let mut origins = TypeOrigins::new();
        let flag_only = resolve_field(&lookup, MapDetection::EntryFlag, &mut origins).unwrap();
        assert!(flag_only.ty.is_map());

        let strict =
            resolve_field(&lookup, MapDetection::EntryFlagAndSuffix, &mut origins).unwrap();
        assert!(strict.repeated);
        assert!(matches!(strict.ty, ResolvedType::Message(_)));
    }

    #[test]
    fn test_malformed_map_entry_fails() {
        let registry = odd_registry().expect("odd entries should register");
        let odd = registry.find_message_type("shop.Odd").unwrap();
        let broken = odd.get_field_by_name("broken").unwrap();

        match resolve_field(&broken, MapDetection::default(), &mut TypeOrigins::new()) {
            Err(ResolveError::MalformedMapEntry { field, reason, .. }) => {
                assert_eq!(field, "shop.Odd.broken");
                assert!(reason.contains("value"));
            }
            other => panic!("expected malformed map entry, got {:?}", other),
        }
    }

    #[test]
    fn test_map_detection_param() {
        assert_eq!(MapDetection::from_param("flag"), Some(MapDetection::EntryFlag));
        assert_eq!(
            MapDetection::from_param("SUFFIX"),
            Some(MapDetection::EntryFlagAndSuffix)
        );
        assert_eq!(MapDetection::from_param("other"), None);
    }
}
