//! Generation manifests
//!
//! One manifest is emitted per schema file. It lists the record types the
//! file's messages resolve to (attribute types, shapes, synthesized defaults
//! and option metadata), the enums the file declares, and the record types
//! it imports from other files.

use crate::plan::{plan_message, FieldPlan, SchemaError};
use crate::registry::SchemaRegistry;
use crate::types::{MapDetection, ResolvedType, TypeOrigins};
use heck::ToSnakeCase;
use prost_reflect::{EnumDescriptor, FileDescriptor, MessageDescriptor};
use serde::Serialize;
use tracing::debug;

/// Manifest of one schema file
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileManifest {
    /// Schema file name
    pub file: String,
    /// Protobuf package
    pub package: String,
    /// Record types, in declaration order
    pub records: Vec<RecordManifest>,
    /// Enums declared by the file
    pub enums: Vec<EnumManifest>,
    /// Types referenced from other files
    pub imports: Vec<Import>,
}

/// One record type
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordManifest {
    /// Record type name
    pub name: String,
    /// Fully-qualified message name
    pub message: String,
    /// Attributes, in field declaration order
    pub attributes: Vec<AttributeManifest>,
}

/// One record attribute
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttributeManifest {
    /// Attribute and field name
    pub name: String,
    /// Wire tag
    pub number: u32,
    /// Resolved type; for repeated attributes, the element type
    #[serde(rename = "type")]
    pub ty: ResolvedType,
    /// Sequence of `type`
    pub repeated: bool,
    /// Tracks presence
    pub optional: bool,
    /// No default is synthesized
    pub required: bool,
    /// Default value; `null` for required attributes
    pub default: serde_json::Value,
    /// Description from field options
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Alias from field options
    #[serde(skip_serializing_if = "String::is_empty")]
    pub alias: String,
    /// Example from field options
    #[serde(skip_serializing_if = "String::is_empty")]
    pub example: String,
}

/// One enum
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnumManifest {
    /// Simple name
    pub name: String,
    /// Fully-qualified name
    pub full_name: String,
    /// Members in declaration order
    pub members: Vec<EnumMemberManifest>,
}

/// One enum member
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnumMemberManifest {
    /// Member name
    pub name: String,
    /// Member number
    pub number: i32,
}

/// A type the file references from another schema file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Import {
    /// Simple type name
    pub name: String,
    /// Defining schema file
    pub file: String,
    /// Manifest module of the defining file
    pub module: String,
}

/// Output name of the manifest for a schema file
///
/// `shop/item.proto` becomes `shop/item_record.json`.
pub fn manifest_file_name(proto: &str) -> String {
    let stem = proto.strip_suffix(".proto").unwrap_or(proto);
    format!("{}_record.json", stem)
}

fn module_name(proto: &str) -> String {
    let stem = proto.strip_suffix(".proto").unwrap_or(proto);
    let stem = stem.rsplit('/').next().unwrap_or(stem);
    format!("{}_record", stem.to_snake_case())
}

/// Build the manifest of a schema file
pub fn build_manifest(
    registry: &SchemaRegistry,
    file: &FileDescriptor,
    detection: MapDetection,
) -> Result<FileManifest, SchemaError> {
    let mut origins = TypeOrigins::new();
    let mut records = Vec::new();
    let mut enums = Vec::new();

    for message in file.messages() {
        collect_message(
            registry,
            &message,
            detection,
            &mut origins,
            &mut records,
            &mut enums,
        )?;
    }
    enums.extend(file.enums().map(|e| enum_manifest(&e)));

    let imports = origins
        .into_iter()
        .filter(|(_, origin)| origin != file.name())
        .map(|(name, origin)| Import {
            module: module_name(&origin),
            name,
            file: origin,
        })
        .collect();

    Ok(FileManifest {
        file: file.name().to_string(),
        package: file.package_name().to_string(),
        records,
        enums,
        imports,
    })
}

fn collect_message(
    registry: &SchemaRegistry,
    message: &MessageDescriptor,
    detection: MapDetection,
    origins: &mut TypeOrigins,
    records: &mut Vec<RecordManifest>,
    enums: &mut Vec<EnumManifest>,
) -> Result<(), SchemaError> {
    if message.is_map_entry() {
        return Ok(());
    }

    let plan = plan_message(registry, message, detection, origins)?;
    if plan.skip {
        debug!(message = %plan.message, "skipping message marked skip");
    } else {
        records.push(RecordManifest {
            name: plan.record_name,
            message: plan.message,
            attributes: plan.fields.into_iter().map(attribute_manifest).collect(),
        });
    }

    for child in message.child_messages() {
        collect_message(registry, &child, detection, origins, records, enums)?;
    }
    enums.extend(message.child_enums().map(|e| enum_manifest(&e)));
    Ok(())
}

fn attribute_manifest(plan: FieldPlan) -> AttributeManifest {
    AttributeManifest {
        name: plan.field.name,
        number: plan.field.number,
        ty: plan.field.ty,
        repeated: plan.field.repeated,
        optional: plan.field.optional,
        required: plan.options.required,
        default: plan
            .default
            .map(|value| value.to_json())
            .unwrap_or(serde_json::Value::Null),
        description: plan.options.description,
        alias: plan.options.alias,
        example: plan.options.example,
    }
}

fn enum_manifest(desc: &EnumDescriptor) -> EnumManifest {
    EnumManifest {
        name: desc.name().to_string(),
        full_name: desc.full_name().to_string(),
        members: desc
            .values()
            .map(|v| EnumMemberManifest {
                name: v.name().to_string(),
                number: v.number(),
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_file_name() {
        assert_eq!(manifest_file_name("shop/item.proto"), "shop/item_record.json");
        assert_eq!(manifest_file_name("plain"), "plain_record.json");
    }

    #[test]
    fn test_module_name() {
        assert_eq!(module_name("shop/OrderLines.proto"), "order_lines_record");
        assert_eq!(module_name("item.proto"), "item_record");
    }
}
