//! Records and record types
//!
//! A [`Record`] is a named attribute bag. Its type is described by a
//! [`RecordSchema`]: the attribute names, their declared types, and the wire
//! message the record type is bound to. Schemas are either declared by hand
//! (or through [`TypedRecord`]) or derived from a wire message with
//! [`RecordCatalog::derive_from_message`].
//!
//! When a schema is registered, the catalog unwraps every declared attribute
//! type down to the nested record type it refers to, so the converter never
//! has to inspect declared types while walking a message.

use crate::convert::ConvertError;
use crate::plan::{plan_message, record_name, SchemaError};
use crate::registry::SchemaRegistry;
use crate::types::{MapDetection, ResolvedField, ResolvedType, ScalarKind, TypeOrigins};
use crate::value::{EnumMember, EnumValue, MapKey, Value};
use prost_reflect::MessageDescriptor;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use tracing::{debug, trace, warn};

/// A named, typed collection of attributes
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    type_name: String,
    attributes: BTreeMap<String, Value>,
}

impl Record {
    /// Create an empty record of the given type
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Builder-style attribute setter
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    /// Set an attribute
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.attributes.insert(name.into(), value.into());
    }

    /// Read an attribute
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// Remove an attribute, yielding `Null` when it is absent
    pub fn take(&mut self, name: &str) -> Value {
        self.attributes.remove(name).unwrap_or_default()
    }

    /// Record type name
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Iterate over attributes in name order
    pub fn attributes(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.attributes.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Take the attribute map
    pub fn into_attributes(self) -> BTreeMap<String, Value> {
        self.attributes
    }
}

/// Anything attributes can be read from by name
///
/// Implemented by [`Record`] and by loosely typed string-keyed mappings.
pub trait AttributeSource {
    /// Read an attribute by field name
    fn attribute(&self, name: &str) -> Option<&Value>;
}

impl AttributeSource for Record {
    fn attribute(&self, name: &str) -> Option<&Value> {
        self.get(name)
    }
}

impl AttributeSource for BTreeMap<String, Value> {
    fn attribute(&self, name: &str) -> Option<&Value> {
        self.get(name)
    }
}

impl AttributeSource for HashMap<String, Value> {
    fn attribute(&self, name: &str) -> Option<&Value> {
        self.get(name)
    }
}

impl AttributeSource for BTreeMap<MapKey, Value> {
    fn attribute(&self, name: &str) -> Option<&Value> {
        self.get(&MapKey::String(name.to_string()))
    }
}

/// Declared type of a record attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeclaredType {
    /// The null type; only meaningful as a union branch
    Null,
    /// Scalar value
    Scalar(ScalarKind),
    /// Enum, by fully-qualified protobuf enum name
    Enum(String),
    /// Point in time
    Timestamp,
    /// Nested record, by record type name
    Record(String),
    /// Value or null
    Optional(Box<DeclaredType>),
    /// One of several types
    Union(Vec<DeclaredType>),
    /// Sequence
    List(Box<DeclaredType>),
    /// Keyed collection
    Map(ScalarKind, Box<DeclaredType>),
}

/// Nested record type an attribute refers to, after unwrapping
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NestedBinding {
    /// Exactly one record type
    Record(String),
    /// A union with more than one non-null branch
    Ambiguous(Vec<String>),
}

impl DeclaredType {
    /// Shorthand for `Optional`
    pub fn optional(inner: DeclaredType) -> Self {
        DeclaredType::Optional(Box::new(inner))
    }

    /// Shorthand for `List`
    pub fn list(inner: DeclaredType) -> Self {
        DeclaredType::List(Box::new(inner))
    }

    /// Shorthand for `Map`
    pub fn map(key: ScalarKind, value: DeclaredType) -> Self {
        DeclaredType::Map(key, Box::new(value))
    }

    /// Shorthand for `Record`
    pub fn record(name: impl Into<String>) -> Self {
        DeclaredType::Record(name.into())
    }

    /// Unwrap optional, union, list and map wrappers down to a nested
    /// record type
    ///
    /// Returns `None` when the leaf is not a record type.
    pub fn nested_binding(&self) -> Option<NestedBinding> {
        match self {
            DeclaredType::Record(name) => Some(NestedBinding::Record(name.clone())),
            DeclaredType::Optional(inner) | DeclaredType::List(inner) => inner.nested_binding(),
            DeclaredType::Map(_, value) => value.nested_binding(),
            DeclaredType::Union(branches) => {
                let non_null: Vec<&DeclaredType> = branches
                    .iter()
                    .filter(|b| **b != DeclaredType::Null)
                    .collect();
                match non_null.as_slice() {
                    [single] => single.nested_binding(),
                    [] => None,
                    many => Some(NestedBinding::Ambiguous(
                        many.iter().map(|b| b.to_string()).collect(),
                    )),
                }
            }
            DeclaredType::Null
            | DeclaredType::Scalar(_)
            | DeclaredType::Enum(_)
            | DeclaredType::Timestamp => None,
        }
    }

    /// Value an attribute of this type takes when nothing else is known
    pub fn zero_value(&self) -> Value {
        match self {
            DeclaredType::Scalar(kind) => crate::defaults::scalar_zero(*kind),
            DeclaredType::Enum(_) => Value::Enum(EnumValue::Number(0)),
            DeclaredType::List(_) => Value::List(Vec::new()),
            DeclaredType::Map(_, _) => Value::Map(BTreeMap::new()),
            DeclaredType::Null
            | DeclaredType::Timestamp
            | DeclaredType::Record(_)
            | DeclaredType::Optional(_)
            | DeclaredType::Union(_) => Value::Null,
        }
    }
}

impl fmt::Display for DeclaredType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeclaredType::Null => f.write_str("null"),
            DeclaredType::Scalar(kind) => write!(f, "{:?}", kind),
            DeclaredType::Enum(name) => write!(f, "enum {}", name),
            DeclaredType::Timestamp => f.write_str("Timestamp"),
            DeclaredType::Record(name) => f.write_str(name),
            DeclaredType::Optional(inner) => write!(f, "Option<{}>", inner),
            DeclaredType::Union(branches) => {
                let rendered: Vec<String> = branches.iter().map(|b| b.to_string()).collect();
                f.write_str(&rendered.join(" | "))
            }
            DeclaredType::List(inner) => write!(f, "Vec<{}>", inner),
            DeclaredType::Map(key, value) => write!(f, "Map<{:?}, {}>", key, value),
        }
    }
}

/// One declared attribute of a record type
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeDecl {
    /// Attribute name; matches the wire field name
    pub name: String,
    /// Declared type
    pub ty: DeclaredType,
    /// Value used when the attribute is absent
    pub default: Option<Value>,
}

/// Shape of a record type
#[derive(Debug, Clone, PartialEq)]
pub struct RecordSchema {
    /// Record type name
    pub name: String,
    /// Fully-qualified name of the wire message this record type maps to
    pub message: String,
    /// Declared attributes
    pub attributes: Vec<AttributeDecl>,
    nested: BTreeMap<String, NestedBinding>,
}

impl RecordSchema {
    /// Start a schema for a record type bound to a wire message
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into().trim_start_matches('.').to_string(),
            attributes: Vec::new(),
            nested: BTreeMap::new(),
        }
    }

    /// Declare an attribute
    pub fn attribute(self, name: impl Into<String>, ty: DeclaredType) -> Self {
        self.push(AttributeDecl {
            name: name.into(),
            ty,
            default: None,
        })
    }

    /// Declare an attribute with an explicit default
    pub fn attribute_with_default(
        self,
        name: impl Into<String>,
        ty: DeclaredType,
        default: impl Into<Value>,
    ) -> Self {
        self.push(AttributeDecl {
            name: name.into(),
            ty,
            default: Some(default.into()),
        })
    }

    fn push(mut self, decl: AttributeDecl) -> Self {
        self.attributes.push(decl);
        self
    }

    /// Look up a declared attribute
    pub fn get(&self, name: &str) -> Option<&AttributeDecl> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Declared attribute names, in declaration order
    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        self.attributes.iter().map(|a| a.name.as_str())
    }

    /// Declared type of an attribute
    pub fn declared_type(&self, name: &str) -> Option<&DeclaredType> {
        self.get(name).map(|a| &a.ty)
    }

    /// Nested record type bound to an attribute at registration
    pub fn nested_binding(&self, name: &str) -> Option<&NestedBinding> {
        self.nested.get(name)
    }

    fn bind_nested(&mut self) {
        self.nested = self
            .attributes
            .iter()
            .filter_map(|a| a.ty.nested_binding().map(|b| (a.name.clone(), b)))
            .collect();

        for (attribute, binding) in &self.nested {
            if let NestedBinding::Ambiguous(candidates) = binding {
                warn!(
                    record = %self.name,
                    attribute = %attribute,
                    ?candidates,
                    "attribute declares more than one nested record type"
                );
            }
        }
    }

    /// Build a record of this type from attribute values
    ///
    /// Declared attributes that are missing take their default. Names that
    /// are not declared are dropped. Enum values are coerced into members
    /// when the declared enum is known to the registry.
    pub fn construct(
        &self,
        mut values: BTreeMap<String, Value>,
        registry: &SchemaRegistry,
    ) -> Record {
        let mut record = Record::new(self.name.clone());
        for decl in &self.attributes {
            let value = values
                .remove(&decl.name)
                .or_else(|| decl.default.clone())
                .unwrap_or_else(|| decl.ty.zero_value());
            record.set(decl.name.clone(), coerce(&decl.ty, value, registry));
        }

        for name in values.keys() {
            trace!(record = %self.name, attribute = %name, "dropping undeclared attribute");
        }
        record
    }
}

fn coerce(ty: &DeclaredType, value: Value, registry: &SchemaRegistry) -> Value {
    match (ty, value) {
        (DeclaredType::Optional(inner), value) => coerce(inner, value, registry),
        (DeclaredType::Union(branches), value) => {
            let non_null: Vec<&DeclaredType> = branches
                .iter()
                .filter(|b| **b != DeclaredType::Null)
                .collect();
            match non_null.as_slice() {
                [single] => coerce(single, value, registry),
                _ => value,
            }
        }
        (DeclaredType::List(inner), Value::List(items)) => Value::List(
            items
                .into_iter()
                .map(|item| coerce(inner, item, registry))
                .collect(),
        ),
        (DeclaredType::Map(_, inner), Value::Map(entries)) => Value::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k, coerce(inner, v, registry)))
                .collect(),
        ),
        (DeclaredType::Enum(enum_name), Value::Enum(value)) => {
            Value::Enum(enum_member(enum_name, value, registry))
        }
        (_, value) => value,
    }
}

fn enum_member(enum_name: &str, value: EnumValue, registry: &SchemaRegistry) -> EnumValue {
    let Some(desc) = registry.find_enum_type(enum_name) else {
        return value;
    };
    let found = match &value {
        EnumValue::Number(n) => desc.get_value(*n),
        EnumValue::Name(name) => desc.get_value_by_name(name),
        EnumValue::Member(_) => None,
    };
    match found {
        Some(member) => EnumValue::Member(EnumMember {
            enum_name: desc.full_name().to_string(),
            name: member.name().to_string(),
            number: member.number(),
        }),
        None => value,
    }
}

/// A strongly typed Rust record
pub trait TypedRecord: Sized {
    /// Record type name
    const TYPE_NAME: &'static str;

    /// Schema of this record type
    fn schema() -> RecordSchema;

    /// Convert into a dynamic record
    fn to_record(&self) -> Record;

    /// Build from a dynamic record
    fn from_record(record: Record) -> Result<Self, ConvertError>;
}

/// Registry of record types
#[derive(Debug, Clone, Default)]
pub struct RecordCatalog {
    schemas: HashMap<String, RecordSchema>,
}

impl RecordCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a record type, replacing any previous one of the same name
    pub fn register(&mut self, mut schema: RecordSchema) {
        schema.bind_nested();
        debug!(record = %schema.name, message = %schema.message, "registered record type");
        self.schemas.insert(schema.name.clone(), schema);
    }

    /// Register a strongly typed record
    pub fn register_typed<T: TypedRecord>(&mut self) {
        self.register(T::schema());
    }

    /// Look up a record type
    pub fn get(&self, name: &str) -> Option<&RecordSchema> {
        self.schemas.get(name)
    }

    /// Record type bound to a wire message, if any
    pub fn bound_to(&self, message: &str) -> Option<&RecordSchema> {
        let message = message.trim_start_matches('.');
        self.schemas.values().find(|s| s.message == message)
    }

    /// Derive and register record types for a wire message and every
    /// message it references
    ///
    /// Returns the record type name of the requested message.
    pub fn derive_from_message(
        &mut self,
        registry: &SchemaRegistry,
        message: &str,
        detection: MapDetection,
    ) -> Result<String, SchemaError> {
        let desc = registry.require_message_type(message)?;
        self.derive(registry, &desc, detection, &mut HashSet::new())
    }

    fn derive(
        &mut self,
        registry: &SchemaRegistry,
        message: &MessageDescriptor,
        detection: MapDetection,
        visiting: &mut HashSet<String>,
    ) -> Result<String, SchemaError> {
        if let Some(existing) = self.bound_to(message.full_name()) {
            return Ok(existing.name.clone());
        }

        let name = record_name(registry, message);
        if !visiting.insert(message.full_name().to_string()) {
            // Self-referencing message; its schema is being built further up
            return Ok(name);
        }
        if let Some(existing) = self.get(&name) {
            return Err(SchemaError::DuplicateRecord {
                name,
                existing: existing.message.clone(),
                message: message.full_name().to_string(),
            });
        }

        let plan = plan_message(registry, message, detection, &mut TypeOrigins::new())?;
        let mut schema = RecordSchema::new(name.clone(), message.full_name());
        for field in plan.fields {
            let ty = self.declared_for(registry, &field.field, detection, visiting)?;
            schema = schema.push(AttributeDecl {
                name: field.field.name,
                ty,
                default: field.default,
            });
        }

        self.register(schema);
        Ok(name)
    }

    fn declared_for(
        &mut self,
        registry: &SchemaRegistry,
        field: &ResolvedField,
        detection: MapDetection,
        visiting: &mut HashSet<String>,
    ) -> Result<DeclaredType, SchemaError> {
        let inner = self.declared_for_type(registry, &field.ty, detection, visiting)?;
        Ok(if field.repeated {
            DeclaredType::list(inner)
        } else if field.optional {
            DeclaredType::optional(inner)
        } else {
            inner
        })
    }

    fn declared_for_type(
        &mut self,
        registry: &SchemaRegistry,
        ty: &ResolvedType,
        detection: MapDetection,
        visiting: &mut HashSet<String>,
    ) -> Result<DeclaredType, SchemaError> {
        Ok(match ty {
            ResolvedType::Scalar { scalar } => DeclaredType::Scalar(*scalar),
            ResolvedType::Enum(e) => DeclaredType::Enum(e.full_name.clone()),
            ResolvedType::Timestamp => DeclaredType::Timestamp,
            ResolvedType::Message(m) => {
                let desc = registry.require_message_type(&m.full_name)?;
                DeclaredType::Record(self.derive(registry, &desc, detection, visiting)?)
            }
            ResolvedType::Map { key, value } => DeclaredType::map(
                *key,
                self.declared_for_type(registry, value, detection, visiting)?,
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_binding_unwraps_wrappers() {
        let ty = DeclaredType::optional(DeclaredType::list(DeclaredType::record("Part")));
        assert_eq!(
            ty.nested_binding(),
            Some(NestedBinding::Record("Part".to_string()))
        );

        let ty = DeclaredType::map(ScalarKind::String, DeclaredType::record("Part"));
        assert_eq!(
            ty.nested_binding(),
            Some(NestedBinding::Record("Part".to_string()))
        );

        let ty = DeclaredType::Union(vec![DeclaredType::Null, DeclaredType::record("Part")]);
        assert_eq!(
            ty.nested_binding(),
            Some(NestedBinding::Record("Part".to_string()))
        );

        assert_eq!(DeclaredType::Scalar(ScalarKind::Int).nested_binding(), None);
    }

    #[test]
    fn test_ambiguous_union_is_reported() {
        let ty = DeclaredType::Union(vec![
            DeclaredType::record("Cat"),
            DeclaredType::Null,
            DeclaredType::record("Dog"),
        ]);
        assert_eq!(
            ty.nested_binding(),
            Some(NestedBinding::Ambiguous(vec![
                "Cat".to_string(),
                "Dog".to_string()
            ]))
        );
    }

    #[test]
    fn test_register_builds_nested_table() {
        let mut catalog = RecordCatalog::new();
        catalog.register(
            RecordSchema::new("Order", ".shop.Order")
                .attribute("id", DeclaredType::Scalar(ScalarKind::Int))
                .attribute("lines", DeclaredType::list(DeclaredType::record("Line"))),
        );

        let order = catalog.get("Order").unwrap();
        assert_eq!(order.message, "shop.Order");
        assert_eq!(
            order.nested_binding("lines"),
            Some(&NestedBinding::Record("Line".to_string()))
        );
        assert_eq!(order.nested_binding("id"), None);
        assert_eq!(catalog.bound_to("shop.Order").map(|s| s.name.as_str()), Some("Order"));
        assert_eq!(order.attribute_names().collect::<Vec<_>>(), vec!["id", "lines"]);
    }

    #[test]
    fn test_construct_fills_defaults_and_drops_unknown() {
        let registry = SchemaRegistry::new().unwrap();
        let schema = RecordSchema::new("Order", "shop.Order")
            .attribute("id", DeclaredType::Scalar(ScalarKind::Int))
            .attribute_with_default("note", DeclaredType::Scalar(ScalarKind::String), "n/a")
            .attribute("lines", DeclaredType::list(DeclaredType::record("Line")));

        let mut values = BTreeMap::new();
        values.insert("id".to_string(), Value::Int(7));
        values.insert("bogus".to_string(), Value::Bool(true));

        let record = schema.construct(values, &registry);
        assert_eq!(record.type_name(), "Order");
        assert_eq!(record.get("id"), Some(&Value::Int(7)));
        assert_eq!(record.get("note"), Some(&Value::from("n/a")));
        assert_eq!(record.get("lines"), Some(&Value::List(vec![])));
        assert_eq!(record.get("bogus"), None);
    }

    #[test]
    fn test_loose_mapping_is_an_attribute_source() {
        let mut loose: BTreeMap<MapKey, Value> = BTreeMap::new();
        loose.insert(MapKey::from("label"), Value::from("x"));
        assert_eq!(loose.attribute("label"), Some(&Value::from("x")));
        assert_eq!(loose.attribute("other"), None);
    }
}
