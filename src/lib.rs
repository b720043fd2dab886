//! protoc-gen-record library
//!
//! This crate bridges protobuf wire messages and typed application records.
//! It resolves the semantic shape of a record type from a protobuf schema
//! (field types, collection and map shape, default values) and converts
//! populated records into `prost-reflect` dynamic messages and back.
//!
//! The `protoc-gen-record` binary runs the same resolution as a protoc plugin
//! and emits one JSON manifest per schema file for downstream templating.

#![deny(missing_docs)]

pub mod convert;
pub mod defaults;
pub mod generator;
pub mod manifest;
pub mod options;
pub mod path;
pub mod plan;
pub mod record;
pub mod registry;
pub mod types;
pub mod value;

pub use convert::{ConvertError, ConvertErrorKind, Converter};
pub use defaults::{default_for, SynthesisError};
pub use generator::PluginConfig;
pub use path::FieldPath;
pub use plan::SchemaError;
pub use record::{
    AttributeDecl, AttributeSource, DeclaredType, NestedBinding, Record, RecordCatalog, RecordSchema,
    TypedRecord,
};
pub use registry::SchemaRegistry;
pub use types::{
    resolve, resolve_field, MapDetection, ResolveError, ResolvedField, ResolvedType, ScalarKind,
    TypeOrigins,
};
pub use value::{EnumMember, EnumValue, MapKey, RecordEnum, Value};

use prost_types::compiler::{CodeGeneratorRequest, CodeGeneratorResponse};
use thiserror::Error;

/// Errors that can occur while running as a protoc plugin
#[derive(Error, Debug)]
pub enum GeneratorError {
    /// Invalid plugin configuration or parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A schema file could not be registered or a field could not be classified
    #[error(transparent)]
    Resolution(#[from] ResolveError),

    /// A message could not be turned into a record type
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// Failed to render a manifest
    #[error("Manifest rendering failed: {0}")]
    ManifestError(#[from] serde_json::Error),

    /// Failed to decode protobuf message
    #[error("Decode error: {0}")]
    DecodeError(String),
}

/// Resolve record manifests from a protobuf CodeGeneratorRequest
///
/// This is the main entry point for the plugin.
pub fn generate(request: CodeGeneratorRequest) -> Result<CodeGeneratorResponse, GeneratorError> {
    generator::generate(request)
}

/// Resolve record manifests from raw CodeGeneratorRequest bytes
pub fn generate_from_bytes(bytes: &[u8]) -> Result<CodeGeneratorResponse, GeneratorError> {
    generator::generate_from_bytes(bytes)
}
