//! Options parsing for record protobuf extensions
//!
//! This module handles `(record.field)` and `(record.message)` options.
//! Schema authors use them to attach default overrides and documentation
//! metadata to fields, and to skip or rename record types.
//!
//! The extensions live in `record/options.proto`, which the registry always
//! carries. When protoc has interpreted the options, they arrive encoded as
//! real extension fields and are decoded with prost-reflect. Descriptors
//! built by hand carry them as `uninterpreted_option` entries instead; those
//! are lifted out of the file before it reaches the pool and kept in a
//! [`RecordOptionTable`].

use heck::ToLowerCamelCase;
use once_cell::sync::Lazy;
use prost_reflect::{FieldDescriptor, MessageDescriptor};
use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::{DescriptorProto, FieldDescriptorProto, FileDescriptorProto, UninterpretedOption};
use std::collections::HashMap;

/// Extension name for field options
pub const FIELD_EXTENSION_NAME: &str = "record.field";

/// Extension name for message options
pub const MESSAGE_EXTENSION_NAME: &str = "record.message";

/// Package holding the option definitions; schema files in it are not records
pub const OPTIONS_PACKAGE: &str = "record";

/// File name of the option definitions
pub const OPTIONS_FILE_NAME: &str = "record/options.proto";

const FIELD_EXTENSION_NUMBER: i32 = 50310;
const MESSAGE_EXTENSION_NUMBER: i32 = 50311;

/// Field-level options, `(record.field)`
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RecordFieldOptions {
    /// Default value override as text (JSON for collection-shaped fields)
    #[prost(string, optional, tag = "1")]
    pub default_value: Option<String>,
    /// Required fields get no synthesized default
    #[prost(bool, tag = "2")]
    pub required: bool,
    /// Human readable description
    #[prost(string, tag = "3")]
    pub description: String,
    /// Alternative attribute name
    #[prost(string, tag = "4")]
    pub alias: String,
    /// Example value
    #[prost(string, tag = "5")]
    pub example: String,
    /// The `default` spelling of the override, folded into `default_value`
    #[prost(string, optional, tag = "6")]
    pub default_literal: Option<String>,
}

impl RecordFieldOptions {
    fn normalized(mut self) -> Self {
        if self.default_value.is_none() {
            self.default_value = self.default_literal.take();
        }
        self
    }
}

/// Message-level options, `(record.message)`
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RecordMessageOptions {
    /// Do not derive a record type for this message
    #[prost(bool, tag = "1")]
    pub skip: bool,
    /// Record type name override
    #[prost(string, tag = "2")]
    pub name: String,
}

static OPTIONS_FILE: Lazy<FileDescriptorProto> = Lazy::new(build_options_file);

/// Descriptor of `record/options.proto`
pub fn options_file_descriptor() -> &'static FileDescriptorProto {
    &OPTIONS_FILE
}

fn optional_field(name: &str, number: i32, ty: Type) -> FieldDescriptorProto {
    FieldDescriptorProto {
        name: Some(name.to_string()),
        number: Some(number),
        label: Some(Label::Optional.into()),
        r#type: Some(ty.into()),
        json_name: Some(name.to_lower_camel_case()),
        ..Default::default()
    }
}

fn extension_field(name: &str, number: i32, extendee: &str, type_name: &str) -> FieldDescriptorProto {
    FieldDescriptorProto {
        extendee: Some(extendee.to_string()),
        type_name: Some(type_name.to_string()),
        ..optional_field(name, number, Type::Message)
    }
}

fn build_options_file() -> FileDescriptorProto {
    FileDescriptorProto {
        name: Some(OPTIONS_FILE_NAME.to_string()),
        package: Some(OPTIONS_PACKAGE.to_string()),
        dependency: vec!["google/protobuf/descriptor.proto".to_string()],
        message_type: vec![
            DescriptorProto {
                name: Some("FieldOptions".to_string()),
                field: vec![
                    optional_field("default_value", 1, Type::String),
                    optional_field("required", 2, Type::Bool),
                    optional_field("description", 3, Type::String),
                    optional_field("alias", 4, Type::String),
                    optional_field("example", 5, Type::String),
                    optional_field("default", 6, Type::String),
                ],
                ..Default::default()
            },
            DescriptorProto {
                name: Some("MessageOptions".to_string()),
                field: vec![
                    optional_field("skip", 1, Type::Bool),
                    optional_field("name", 2, Type::String),
                ],
                ..Default::default()
            },
        ],
        extension: vec![
            extension_field(
                "field",
                FIELD_EXTENSION_NUMBER,
                ".google.protobuf.FieldOptions",
                ".record.FieldOptions",
            ),
            extension_field(
                "message",
                MESSAGE_EXTENSION_NUMBER,
                ".google.protobuf.MessageOptions",
                ".record.MessageOptions",
            ),
        ],
        syntax: Some("proto2".to_string()),
        ..Default::default()
    }
}

/// Record options lifted out of `uninterpreted_option` entries
///
/// Keyed by the full name of the field or message they were attached to.
#[derive(Debug, Clone, Default)]
pub struct RecordOptionTable {
    fields: HashMap<String, RecordFieldOptions>,
    messages: HashMap<String, RecordMessageOptions>,
}

impl RecordOptionTable {
    /// Whether no options were collected
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.messages.is_empty()
    }

    /// Merge another table into this one
    pub fn extend(&mut self, other: RecordOptionTable) {
        self.fields.extend(other.fields);
        self.messages.extend(other.messages);
    }
}

/// Remove the `(record.field)` and `(record.message)` entries from the
/// uninterpreted options of a schema file and parse them
///
/// The descriptor pool never sees the removed entries, so a file carrying
/// them registers whether or not it imports `record/options.proto`.
pub fn take_record_options(file: &mut FileDescriptorProto) -> RecordOptionTable {
    let mut table = RecordOptionTable::default();
    let scope = file.package().to_string();
    for message in &mut file.message_type {
        take_message_options(message, &scope, &mut table);
    }
    table
}

fn take_message_options(message: &mut DescriptorProto, scope: &str, table: &mut RecordOptionTable) {
    let full_name = qualify(scope, message.name());

    if let Some(opts) = message.options.as_mut() {
        let ours = take_extension_options(&mut opts.uninterpreted_option, MESSAGE_EXTENSION_NAME);
        if let Some(parsed) = parse_message_options_from_uninterpreted(&ours) {
            table.messages.insert(full_name.clone(), parsed);
        }
    }

    for field in &mut message.field {
        let field_name = qualify(&full_name, field.name());
        if let Some(opts) = field.options.as_mut() {
            let ours = take_extension_options(&mut opts.uninterpreted_option, FIELD_EXTENSION_NAME);
            if let Some(parsed) = parse_field_options_from_uninterpreted(&ours) {
                table.fields.insert(field_name, parsed);
            }
        }
    }

    for nested in &mut message.nested_type {
        take_message_options(nested, &full_name, table);
    }
}

fn qualify(scope: &str, name: &str) -> String {
    if scope.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", scope, name)
    }
}

fn take_extension_options(
    options: &mut Vec<UninterpretedOption>,
    extension_name: &str,
) -> Vec<UninterpretedOption> {
    let (ours, rest): (Vec<_>, Vec<_>) = std::mem::take(options)
        .into_iter()
        .partition(|opt| is_extension_option(opt, extension_name));
    *options = rest;
    ours
}

/// Parse record field options of a field
///
/// Options lifted out at registration win; otherwise the `(record.field)`
/// extension protoc already interpreted is decoded with prost-reflect.
pub fn parse_field_options(
    field: &FieldDescriptor,
    table: &RecordOptionTable,
) -> Option<RecordFieldOptions> {
    if let Some(parsed) = table.fields.get(field.full_name()) {
        return Some(parsed.clone());
    }

    let ext = field.parent_pool().get_extension_by_name(FIELD_EXTENSION_NAME)?;
    let opts = field.options();
    if !opts.has_extension(&ext) {
        return None;
    }
    let parsed = opts
        .get_extension(&ext)
        .as_message()?
        .transcode_to::<RecordFieldOptions>()
        .ok()?;
    Some(parsed.normalized())
}

/// Parse record message options of a message
pub fn parse_message_options(
    message: &MessageDescriptor,
    table: &RecordOptionTable,
) -> Option<RecordMessageOptions> {
    if let Some(parsed) = table.messages.get(message.full_name()) {
        return Some(parsed.clone());
    }

    let ext = message
        .parent_pool()
        .get_extension_by_name(MESSAGE_EXTENSION_NAME)?;
    let opts = message.options();
    if !opts.has_extension(&ext) {
        return None;
    }
    let parsed = opts
        .get_extension(&ext)
        .as_message()?
        .transcode_to::<RecordMessageOptions>()
        .ok()?;
    Some(parsed)
}

// =============================================================================
// Fallback: Uninterpreted option parsing (for hand-built descriptors)
// =============================================================================

/// Parse RecordFieldOptions from uninterpreted options
fn parse_field_options_from_uninterpreted(
    uninterpreted: &[UninterpretedOption],
) -> Option<RecordFieldOptions> {
    let mut result = RecordFieldOptions::default();
    let mut found = false;

    for opt in uninterpreted {
        if is_extension_option(opt, FIELD_EXTENSION_NAME) {
            found = true;
            apply_field_option(&mut result, opt);
        }
    }

    found.then_some(result)
}

/// Parse RecordMessageOptions from uninterpreted options
fn parse_message_options_from_uninterpreted(
    uninterpreted: &[UninterpretedOption],
) -> Option<RecordMessageOptions> {
    let mut result = RecordMessageOptions::default();
    let mut found = false;

    for opt in uninterpreted {
        if is_extension_option(opt, MESSAGE_EXTENSION_NAME) {
            found = true;
            apply_message_option(&mut result, opt);
        }
    }

    found.then_some(result)
}

/// Check if an uninterpreted option matches our extension name
fn is_extension_option(opt: &UninterpretedOption, extension_name: &str) -> bool {
    // The name parts form a path like: (record.field).default_value
    // or just (record.field) for aggregate values
    match opt.name.first() {
        Some(first) => {
            first.is_extension && first.name_part.trim_start_matches('.') == extension_name
        }
        None => false,
    }
}

/// Get the sub-field name, e.g. "default_value" from "(record.field).default_value"
fn get_subfield_name(opt: &UninterpretedOption) -> Option<&str> {
    opt.name.get(1).map(|part| part.name_part.as_str())
}

/// Apply a single uninterpreted option to RecordFieldOptions
fn apply_field_option(result: &mut RecordFieldOptions, opt: &UninterpretedOption) {
    if let Some(aggregate) = opt.aggregate_value.as_ref() {
        // Aggregate value like: default_value: "30", required: false
        for (key, value) in split_aggregate_parts(aggregate) {
            set_field_option(result, key, AggregateValue(value));
        }
    } else if let Some(field_name) = get_subfield_name(opt) {
        // Individual setting like (record.field).default_value = "30"
        set_field_option(result, field_name, opt);
    }
}

/// Apply a single uninterpreted option to RecordMessageOptions
fn apply_message_option(result: &mut RecordMessageOptions, opt: &UninterpretedOption) {
    if let Some(aggregate) = opt.aggregate_value.as_ref() {
        for (key, value) in split_aggregate_parts(aggregate) {
            set_message_option(result, key, AggregateValue(value));
        }
    } else if let Some(field_name) = get_subfield_name(opt) {
        set_message_option(result, field_name, opt);
    }
}

/// A scalar option value, either from an aggregate or an individual option
trait OptionValue {
    fn as_bool(&self) -> bool;
    fn as_string(&self) -> String;
}

impl OptionValue for &UninterpretedOption {
    fn as_bool(&self) -> bool {
        if let Some(ref v) = self.identifier_value {
            return v == "true";
        }
        if let Some(v) = self.positive_int_value {
            return v != 0;
        }
        false
    }

    fn as_string(&self) -> String {
        if let Some(ref s) = self.string_value {
            return String::from_utf8_lossy(s).to_string();
        }
        if let Some(ref s) = self.identifier_value {
            return s.clone();
        }
        if let Some(v) = self.positive_int_value {
            return v.to_string();
        }
        if let Some(v) = self.negative_int_value {
            return v.to_string();
        }
        if let Some(v) = self.double_value {
            return v.to_string();
        }
        String::new()
    }
}

/// Raw value text taken from an aggregate option
struct AggregateValue<'a>(&'a str);

impl OptionValue for AggregateValue<'_> {
    fn as_bool(&self) -> bool {
        self.0.trim() == "true"
    }

    fn as_string(&self) -> String {
        parse_quoted_string(self.0)
    }
}

fn set_field_option(result: &mut RecordFieldOptions, key: &str, value: impl OptionValue) {
    match key {
        "default" | "default_value" => result.default_value = Some(value.as_string()),
        "required" => result.required = value.as_bool(),
        "description" => result.description = value.as_string(),
        "alias" => result.alias = value.as_string(),
        "example" => result.example = value.as_string(),
        _ => {}
    }
}

fn set_message_option(result: &mut RecordMessageOptions, key: &str, value: impl OptionValue) {
    match key {
        "skip" => result.skip = value.as_bool(),
        "name" => result.name = value.as_string(),
        _ => {}
    }
}

/// Split an aggregate value into `key: value` pairs
///
/// Commas inside quoted strings, braces and brackets do not split.
fn split_aggregate_parts(aggregate: &str) -> Vec<(&str, &str)> {
    let mut start = 0;
    let mut depth: i32 = 0;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    let mut raw_parts: Vec<&str> = Vec::new();
    for (i, c) in aggregate.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match (quote, c) {
            (Some(_), '\\') => escaped = true,
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"') | (None, '\'') => quote = Some(c),
            (None, '{') | (None, '[') => depth += 1,
            (None, '}') | (None, ']') => depth = (depth - 1).max(0),
            (None, ',') | (None, '\n') if depth == 0 => {
                raw_parts.push(&aggregate[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if start < aggregate.len() {
        raw_parts.push(&aggregate[start..]);
    }

    raw_parts
        .into_iter()
        .filter_map(|part| part.split_once(':'))
        .map(|(k, v)| (k.trim(), v.trim()))
        .collect()
}

/// Parse a quoted string value, removing quotes and resolving escapes
fn parse_quoted_string(s: &str) -> String {
    let s = s.trim();
    let quoted = s.len() >= 2
        && ((s.starts_with('"') && s.ends_with('"')) || (s.starts_with('\'') && s.ends_with('\'')));
    if !quoted {
        return s.to_string();
    }

    let inner = &s[1..s.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}
