//! Schema registry
//!
//! Process-wide store of every protobuf schema file observed so far, backed
//! by a `prost-reflect` [`DescriptorPool`]. The registry only grows: files
//! are added once and never removed.
//!
//! Registration takes `&mut self` while lookups take `&self`, so adding a
//! file can never race a conversion that borrows the registry. Callers that
//! share one registry across threads wrap it in a `RwLock`.

use crate::options::{self, RecordFieldOptions, RecordMessageOptions, RecordOptionTable};
use crate::types::ResolveError;
use prost::Message;
use prost_reflect::{
    DescriptorPool, EnumDescriptor, ExtensionDescriptor, FieldDescriptor, MessageDescriptor,
};
use prost_types::{FileDescriptorProto, FileDescriptorSet};
use tracing::debug;

/// Registry of known protobuf schema files
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    pool: DescriptorPool,
    options: RecordOptionTable,
}

impl SchemaRegistry {
    /// Create a registry holding the well-known types and the record options
    pub fn new() -> Result<Self, ResolveError> {
        let mut registry = Self {
            pool: DescriptorPool::global(),
            options: RecordOptionTable::default(),
        };
        registry.add_schema_file(options::options_file_descriptor().clone())?;
        Ok(registry)
    }

    /// Register a schema file
    ///
    /// A file whose name is already registered is skipped, so requests that
    /// repeat shared dependencies can be fed in whole.
    pub fn add_schema_file(&mut self, mut file: FileDescriptorProto) -> Result<(), ResolveError> {
        let name = file.name().to_string();
        if self.pool.get_file_by_name(&name).is_some() {
            debug!(file = %name, "schema file already registered, skipping");
            return Ok(());
        }

        let table = options::take_record_options(&mut file);
        self.pool
            .add_file_descriptor_proto(file)
            .map_err(|e| ResolveError::Registration {
                file: name.clone(),
                reason: e.to_string(),
            })?;
        self.options.extend(table);

        debug!(file = %name, "registered schema file");
        Ok(())
    }

    /// Register several schema files in dependency order
    pub fn add_schema_files(
        &mut self,
        files: impl IntoIterator<Item = FileDescriptorProto>,
    ) -> Result<(), ResolveError> {
        for file in files {
            self.add_schema_file(file)?;
        }
        Ok(())
    }

    /// Register an encoded schema file
    ///
    /// Unlike [`add_schema_file`](Self::add_schema_file), option extensions
    /// protoc has already interpreted survive, since the options are never
    /// round-tripped through `prost-types`. A file that still carries
    /// uninterpreted record options is registered through
    /// [`add_schema_file`](Self::add_schema_file) instead.
    pub fn add_encoded_schema_file(&mut self, bytes: &[u8]) -> Result<(), ResolveError> {
        let file =
            FileDescriptorProto::decode(bytes).map_err(|e| ResolveError::Registration {
                file: "<encoded file>".to_string(),
                reason: e.to_string(),
            })?;
        let name = file.name().to_string();
        if self.contains_file(&name) {
            debug!(file = %name, "schema file already registered, skipping");
            return Ok(());
        }

        if !options::take_record_options(&mut file.clone()).is_empty() {
            return self.add_schema_file(file);
        }

        self.pool
            .decode_file_descriptor_proto(bytes)
            .map_err(|e| ResolveError::Registration {
                file: name.clone(),
                reason: e.to_string(),
            })?;

        debug!(file = %name, "registered schema file");
        Ok(())
    }

    /// Register every file of an encoded `FileDescriptorSet`
    pub fn add_file_descriptor_set(&mut self, bytes: &[u8]) -> Result<(), ResolveError> {
        let set = FileDescriptorSet::decode(bytes).map_err(|e| ResolveError::Registration {
            file: "<descriptor set>".to_string(),
            reason: e.to_string(),
        })?;
        self.add_schema_files(set.file)
    }

    /// Look up a message type by fully-qualified name
    pub fn find_message_type(&self, full_name: &str) -> Option<MessageDescriptor> {
        self.pool
            .get_message_by_name(full_name.trim_start_matches('.'))
    }

    /// Look up an enum type by fully-qualified name
    pub fn find_enum_type(&self, full_name: &str) -> Option<EnumDescriptor> {
        self.pool.get_enum_by_name(full_name.trim_start_matches('.'))
    }

    /// Look up a message type, failing with a resolution error when unknown
    pub fn require_message_type(&self, full_name: &str) -> Result<MessageDescriptor, ResolveError> {
        self.find_message_type(full_name)
            .ok_or_else(|| ResolveError::UnknownType(full_name.to_string()))
    }

    /// Look up an extension by fully-qualified name
    pub fn find_extension(&self, full_name: &str) -> Option<ExtensionDescriptor> {
        self.pool.get_extension_by_name(full_name)
    }

    /// Whether a schema file is registered
    pub fn contains_file(&self, name: &str) -> bool {
        self.pool.get_file_by_name(name).is_some()
    }

    /// `(record.field)` options of a field
    pub fn field_options(&self, field: &FieldDescriptor) -> Option<RecordFieldOptions> {
        options::parse_field_options(field, &self.options)
    }

    /// `(record.message)` options of a message
    pub fn message_options(&self, message: &MessageDescriptor) -> Option<RecordMessageOptions> {
        options::parse_message_options(message, &self.options)
    }

    /// The underlying descriptor pool
    pub fn pool(&self) -> &DescriptorPool {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost_types::{field_descriptor_proto::Type, DescriptorProto, FieldDescriptorProto};

    fn point_file() -> FileDescriptorProto {
        FileDescriptorProto {
            name: Some("geo/point.proto".to_string()),
            package: Some("geo".to_string()),
            message_type: vec![DescriptorProto {
                name: Some("Point".to_string()),
                field: vec![FieldDescriptorProto {
                    name: Some("x".to_string()),
                    number: Some(1),
                    r#type: Some(Type::Double.into()),
                    ..Default::default()
                }],
                ..Default::default()
            }],
            syntax: Some("proto3".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_well_known_types_available() {
        let registry = SchemaRegistry::new().unwrap();
        assert!(registry
            .find_message_type("google.protobuf.Timestamp")
            .is_some());
        assert!(registry.find_extension("record.field").is_some());
    }

    #[test]
    fn test_add_and_find_message() {
        let mut registry = SchemaRegistry::new().unwrap();
        registry.add_schema_file(point_file()).unwrap();

        let point = registry.find_message_type(".geo.Point").unwrap();
        assert_eq!(point.full_name(), "geo.Point");
        assert!(registry.find_message_type("geo.Missing").is_none());
        assert!(registry.find_enum_type("geo.Point").is_none());
    }

    #[test]
    fn test_re_adding_file_is_skipped() {
        let mut registry = SchemaRegistry::new().unwrap();
        registry.add_schema_file(point_file()).unwrap();
        registry.add_schema_file(point_file()).unwrap();
        assert!(registry.contains_file("geo/point.proto"));
    }

    #[test]
    fn test_encoded_file_keeps_uninterpreted_record_options() {
        use prost_types::uninterpreted_option::NamePart;
        use prost_types::{FieldOptions, UninterpretedOption};

        let mut file = point_file();
        file.message_type[0].field[0].options = Some(FieldOptions {
            uninterpreted_option: vec![UninterpretedOption {
                name: vec![NamePart {
                    name_part: "record.field".to_string(),
                    is_extension: true,
                }],
                aggregate_value: Some("required: true".to_string()),
                ..Default::default()
            }],
            ..Default::default()
        });

        let mut registry = SchemaRegistry::new().unwrap();
        registry
            .add_encoded_schema_file(&file.encode_to_vec())
            .unwrap();

        let point = registry.find_message_type("geo.Point").unwrap();
        let x = point.get_field_by_name("x").unwrap();
        assert!(registry.field_options(&x).unwrap().required);
        assert!(registry.message_options(&point).is_none());
    }

    #[test]
    fn test_missing_dependency_fails() {
        let mut registry = SchemaRegistry::new().unwrap();
        let file = FileDescriptorProto {
            name: Some("broken.proto".to_string()),
            package: Some("broken".to_string()),
            dependency: vec!["does/not/exist.proto".to_string()],
            ..Default::default()
        };
        let err = registry.add_schema_file(file).unwrap_err();
        assert!(matches!(err, ResolveError::Registration { .. }));
    }
}
