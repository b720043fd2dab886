//! Plugin driver
//!
//! Registers every schema file of a `CodeGeneratorRequest` and emits one
//! record manifest per file to generate.

use crate::manifest::{build_manifest, manifest_file_name};
use crate::options::OPTIONS_PACKAGE;
use crate::registry::SchemaRegistry;
use crate::types::MapDetection;
use crate::GeneratorError;
use prost::Message;
use prost_types::compiler::code_generator_response::{Feature, File};
use prost_types::compiler::{CodeGeneratorRequest, CodeGeneratorResponse};
use tracing::{debug, info};

/// Plugin configuration, parsed from the protoc parameter string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PluginConfig {
    /// How map fields are recognized
    pub map_detection: MapDetection,
    /// Pretty-print manifests
    pub pretty: bool,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            map_detection: MapDetection::default(),
            pretty: true,
        }
    }
}

impl PluginConfig {
    /// Parse a `key=value,key=value` parameter string
    pub fn parse(parameter: &str) -> Result<Self, GeneratorError> {
        let mut config = Self::default();

        for part in parameter.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = part.split_once('=').ok_or_else(|| {
                GeneratorError::InvalidConfig(format!("expected key=value, got {:?}", part))
            })?;

            match key.trim() {
                "map_detection" => {
                    config.map_detection = MapDetection::from_param(value.trim()).ok_or_else(|| {
                        GeneratorError::InvalidConfig(format!(
                            "map_detection must be flag or suffix, got {:?}",
                            value
                        ))
                    })?;
                }
                "pretty" => {
                    config.pretty = match value.trim() {
                        "true" => true,
                        "false" => false,
                        other => {
                            return Err(GeneratorError::InvalidConfig(format!(
                                "pretty must be true or false, got {:?}",
                                other
                            )))
                        }
                    };
                }
                other => {
                    return Err(GeneratorError::InvalidConfig(format!(
                        "unknown parameter {:?}",
                        other
                    )))
                }
            }
        }

        Ok(config)
    }
}

/// The `proto_file` entries of a request, still encoded
#[derive(Clone, PartialEq, Message)]
struct EncodedProtoFiles {
    #[prost(bytes = "vec", repeated, tag = "15")]
    proto_file: Vec<Vec<u8>>,
}

/// Generate manifests from a decoded request
///
/// Option extensions that protoc already interpreted were dropped when the
/// request was decoded with `prost-types`; use [`generate_from_bytes`] to
/// keep them.
pub fn generate(request: CodeGeneratorRequest) -> Result<CodeGeneratorResponse, GeneratorError> {
    let mut registry = SchemaRegistry::new()?;
    registry.add_schema_files(request.proto_file.iter().cloned())?;
    respond(&request, &registry)
}

/// Generate manifests from raw request bytes
pub fn generate_from_bytes(bytes: &[u8]) -> Result<CodeGeneratorResponse, GeneratorError> {
    let request = CodeGeneratorRequest::decode(bytes)
        .map_err(|e| GeneratorError::DecodeError(e.to_string()))?;
    let encoded = EncodedProtoFiles::decode(bytes)
        .map_err(|e| GeneratorError::DecodeError(e.to_string()))?;

    let mut registry = SchemaRegistry::new()?;
    for file in &encoded.proto_file {
        registry.add_encoded_schema_file(file)?;
    }
    respond(&request, &registry)
}

fn respond(
    request: &CodeGeneratorRequest,
    registry: &SchemaRegistry,
) -> Result<CodeGeneratorResponse, GeneratorError> {
    let config = PluginConfig::parse(request.parameter())?;
    debug!(?config, "plugin configuration");

    let mut files = Vec::new();
    for name in &request.file_to_generate {
        let file = registry.pool().get_file_by_name(name).ok_or_else(|| {
            GeneratorError::InvalidConfig(format!("file to generate {} was not supplied", name))
        })?;

        if file.package_name() == OPTIONS_PACKAGE || name.starts_with("google/protobuf/") {
            debug!(file = %name, "skipping support file");
            continue;
        }

        let manifest = build_manifest(registry, &file, config.map_detection)?;
        if manifest.records.is_empty() && manifest.enums.is_empty() {
            debug!(file = %name, "nothing to emit");
            continue;
        }

        let content = if config.pretty {
            serde_json::to_string_pretty(&manifest)?
        } else {
            serde_json::to_string(&manifest)?
        };
        files.push(File {
            name: Some(manifest_file_name(name)),
            content: Some(content),
            ..Default::default()
        });
    }

    info!(count = files.len(), "generated manifests");
    Ok(CodeGeneratorResponse {
        file: files,
        supported_features: Some(Feature::Proto3Optional as u64),
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        assert_eq!(PluginConfig::parse("").unwrap(), PluginConfig::default());

        let config = PluginConfig::parse("map_detection=suffix, pretty=false").unwrap();
        assert_eq!(config.map_detection, MapDetection::EntryFlagAndSuffix);
        assert!(!config.pretty);
    }

    #[test]
    fn test_parse_config_rejects_unknown() {
        assert!(matches!(
            PluginConfig::parse("flavor=mint"),
            Err(GeneratorError::InvalidConfig(_))
        ));
        assert!(matches!(
            PluginConfig::parse("pretty"),
            Err(GeneratorError::InvalidConfig(_))
        ));
        assert!(matches!(
            PluginConfig::parse("map_detection=guess"),
            Err(GeneratorError::InvalidConfig(_))
        ));
    }
}
