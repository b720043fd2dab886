//! Per-message field plans
//!
//! A plan is everything known about a message before it becomes a record
//! type or a manifest entry: the record name, each field's resolved type,
//! its `(record.field)` options, and the synthesized default.

use crate::defaults::{default_for, SynthesisError};
use crate::options::RecordFieldOptions;
use crate::path::FieldPath;
use crate::registry::SchemaRegistry;
use crate::types::{resolve_field, MapDetection, ResolveError, ResolvedField, TypeOrigins};
use crate::value::Value;
use heck::ToUpperCamelCase;
use prost_reflect::MessageDescriptor;
use thiserror::Error;

/// Errors raised while deriving a record type from a message
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    /// A field could not be classified
    #[error(transparent)]
    Resolution(#[from] ResolveError),

    /// A default override could not be decoded
    #[error(transparent)]
    Synthesis(#[from] SynthesisError),

    /// Two messages derive the same record type name
    #[error("record type {name} is already bound to {existing}, cannot bind it to {message}")]
    DuplicateRecord {
        /// Record type name
        name: String,
        /// Message the name is bound to
        existing: String,
        /// Message that tried to take it
        message: String,
    },
}

/// One field of a message plan
#[derive(Debug, Clone, PartialEq)]
pub struct FieldPlan {
    /// Resolved type and shape
    pub field: ResolvedField,
    /// `(record.field)` options, defaulted when absent
    pub options: RecordFieldOptions,
    /// Synthesized default; `None` for required fields
    pub default: Option<Value>,
}

/// Everything derived from one message
#[derive(Debug, Clone, PartialEq)]
pub struct MessagePlan {
    /// Record type name
    pub record_name: String,
    /// Fully-qualified message name
    pub message: String,
    /// Marked `(record.message).skip`
    pub skip: bool,
    /// Fields in declaration order
    pub fields: Vec<FieldPlan>,
}

/// Record type name for a message, honoring `(record.message).name`
pub fn record_name(registry: &SchemaRegistry, message: &MessageDescriptor) -> String {
    registry
        .message_options(message)
        .map(|opts| opts.name)
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| message.name().to_upper_camel_case())
}

/// Resolve every field of a message and synthesize its defaults
pub fn plan_message(
    registry: &SchemaRegistry,
    message: &MessageDescriptor,
    detection: MapDetection,
    origins: &mut TypeOrigins,
) -> Result<MessagePlan, SchemaError> {
    let skip = registry
        .message_options(message)
        .map(|opts| opts.skip)
        .unwrap_or(false);

    let mut fields = Vec::new();
    for field in message.fields() {
        let resolved = resolve_field(&field, detection, origins)?;
        let options = registry.field_options(&field).unwrap_or_default();

        let default = if options.required {
            None
        } else {
            let value = default_for(&resolved, options.default_value.as_deref()).map_err(
                |err| SynthesisError {
                    path: FieldPath::from(message.name()).field(&resolved.name),
                    ..err
                },
            )?;
            Some(value)
        };

        fields.push(FieldPlan {
            field: resolved,
            options,
            default,
        });
    }

    Ok(MessagePlan {
        record_name: record_name(registry, message),
        message: message.full_name().to_string(),
        skip,
        fields,
    })
}
