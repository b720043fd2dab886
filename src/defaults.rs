//! Default value synthesis
//!
//! Computes the value a record attribute takes when its field is absent:
//! either the explicit override attached to the schema through
//! `(record.field).default_value`, or the canonical zero value of the
//! resolved type.

use crate::path::FieldPath;
use crate::types::{ResolvedField, ResolvedType, ScalarKind};
use crate::value::{parse_datetime, EnumValue, MapKey, Value};
use std::collections::BTreeMap;
use thiserror::Error;

/// A default override literal could not be decoded into the field's shape
#[derive(Error, Debug, Clone, PartialEq)]
#[error("invalid default for {path}: {reason} (literal: {literal:?})")]
pub struct SynthesisError {
    /// Field the default belongs to
    pub path: FieldPath,
    /// The offending literal
    pub literal: String,
    /// Why decoding failed
    pub reason: String,
}

/// Default value for a field
///
/// Without an override this never fails. Scalar overrides are read as plain
/// text; overrides for collection-shaped fields (maps, repeated fields,
/// nested messages) are JSON literals.
pub fn default_for(
    field: &ResolvedField,
    override_literal: Option<&str>,
) -> Result<Value, SynthesisError> {
    let Some(literal) = override_literal else {
        return Ok(zero_value(field));
    };

    let fail = |reason: String| SynthesisError {
        path: FieldPath::root().field(&field.name),
        literal: literal.to_string(),
        reason,
    };

    let structured = field.repeated
        || matches!(field.ty, ResolvedType::Map { .. } | ResolvedType::Message(_));
    if !structured {
        return parse_scalar_literal(&field.ty, literal).map_err(fail);
    }

    let json: serde_json::Value =
        serde_json::from_str(literal).map_err(|e| fail(format!("not a JSON literal: {}", e)))?;

    if field.repeated {
        let serde_json::Value::Array(items) = json else {
            return Err(fail("expected a JSON array".to_string()));
        };
        return items
            .iter()
            .map(|item| value_from_json(&field.ty, item))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List)
            .map_err(fail);
    }

    value_from_json(&field.ty, &json).map_err(fail)
}

/// Canonical zero value of a field
pub fn zero_value(field: &ResolvedField) -> Value {
    if field.repeated {
        return Value::List(Vec::new());
    }

    match &field.ty {
        ResolvedType::Scalar { scalar } => scalar_zero(*scalar),
        ResolvedType::Enum(e) => Value::Enum(EnumValue::Name(e.default_member.clone())),
        ResolvedType::Message(_) => Value::Null,
        ResolvedType::Map { .. } => Value::Map(BTreeMap::new()),
        ResolvedType::Timestamp => Value::Null,
    }
}

pub(crate) fn scalar_zero(kind: ScalarKind) -> Value {
    match kind {
        ScalarKind::Bool => Value::Bool(false),
        ScalarKind::Int => Value::Int(0),
        ScalarKind::UInt => Value::UInt(0),
        ScalarKind::Float => Value::Float(0.0),
        ScalarKind::Bytes => Value::Bytes(Vec::new()),
        ScalarKind::String => Value::String(String::new()),
        ScalarKind::Any => Value::Null,
    }
}

fn parse_scalar_literal(ty: &ResolvedType, literal: &str) -> Result<Value, String> {
    match ty {
        ResolvedType::Scalar { scalar } => match scalar {
            ScalarKind::String | ScalarKind::Any => Ok(Value::String(literal.to_string())),
            ScalarKind::Bytes => Ok(Value::Bytes(literal.as_bytes().to_vec())),
            ScalarKind::Bool => match literal.trim() {
                "true" | "True" => Ok(Value::Bool(true)),
                "false" | "False" => Ok(Value::Bool(false)),
                other => Err(format!("{:?} is not a boolean", other)),
            },
            ScalarKind::Int => literal
                .trim()
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|e| e.to_string()),
            ScalarKind::UInt => literal
                .trim()
                .parse::<u64>()
                .map(Value::UInt)
                .map_err(|e| e.to_string()),
            ScalarKind::Float => literal
                .trim()
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|e| e.to_string()),
        },
        ResolvedType::Enum(_) => Ok(Value::Enum(EnumValue::Name(literal.trim().to_string()))),
        ResolvedType::Timestamp => parse_datetime(literal)
            .map(Value::Timestamp)
            .ok_or_else(|| "not an ISO 8601 datetime".to_string()),
        ResolvedType::Message(_) | ResolvedType::Map { .. } => {
            Err("structured fields take a JSON literal".to_string())
        }
    }
}

/// Convert a JSON value into the shape of a resolved type
fn value_from_json(ty: &ResolvedType, json: &serde_json::Value) -> Result<Value, String> {
    use serde_json::Value as Json;

    if json.is_null() {
        return Ok(Value::Null);
    }

    let mismatch = || format!("expected {}, found {}", ty, json);

    match ty {
        ResolvedType::Scalar { scalar } => match (scalar, json) {
            (ScalarKind::Bool, Json::Bool(b)) => Ok(Value::Bool(*b)),
            (ScalarKind::Int, Json::Number(n)) => n.as_i64().map(Value::Int).ok_or_else(mismatch),
            (ScalarKind::UInt, Json::Number(n)) => {
                n.as_u64().map(Value::UInt).ok_or_else(mismatch)
            }
            (ScalarKind::Float, Json::Number(n)) => {
                n.as_f64().map(Value::Float).ok_or_else(mismatch)
            }
            (ScalarKind::String, Json::String(s)) => Ok(Value::String(s.clone())),
            (ScalarKind::Bytes, Json::String(s)) => Ok(Value::Bytes(s.as_bytes().to_vec())),
            (ScalarKind::Any, other) => Ok(untyped_from_json(other)),
            _ => Err(mismatch()),
        },
        ResolvedType::Enum(_) => match json {
            Json::String(s) => Ok(Value::Enum(EnumValue::Name(s.clone()))),
            Json::Number(n) => n
                .as_i64()
                .and_then(|n| i32::try_from(n).ok())
                .map(|n| Value::Enum(EnumValue::Number(n)))
                .ok_or_else(mismatch),
            _ => Err(mismatch()),
        },
        ResolvedType::Timestamp => match json {
            Json::String(s) => parse_datetime(s).map(Value::Timestamp).ok_or_else(mismatch),
            _ => Err(mismatch()),
        },
        ResolvedType::Message(_) => match json {
            Json::Object(_) => Ok(untyped_from_json(json)),
            _ => Err(mismatch()),
        },
        ResolvedType::Map { key, value } => {
            let Json::Object(entries) = json else {
                return Err(mismatch());
            };
            let mut map = BTreeMap::new();
            for (k, v) in entries {
                map.insert(map_key_from_text(*key, k)?, value_from_json(value, v)?);
            }
            Ok(Value::Map(map))
        }
    }
}

/// JSON object keys are always text; read them as the map's key kind
pub(crate) fn map_key_from_text(kind: ScalarKind, text: &str) -> Result<MapKey, String> {
    match kind {
        ScalarKind::Bool => match text {
            "true" => Ok(MapKey::Bool(true)),
            "false" => Ok(MapKey::Bool(false)),
            _ => Err(format!("map key {:?} is not a boolean", text)),
        },
        ScalarKind::Int => text
            .parse::<i64>()
            .map(MapKey::Int)
            .map_err(|_| format!("map key {:?} is not an integer", text)),
        ScalarKind::UInt => text
            .parse::<u64>()
            .map(MapKey::UInt)
            .map_err(|_| format!("map key {:?} is not an unsigned integer", text)),
        _ => Ok(MapKey::String(text.to_string())),
    }
}

fn untyped_from_json(json: &serde_json::Value) -> Value {
    use serde_json::Value as Json;
    match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => n
            .as_i64()
            .map(Value::Int)
            .or_else(|| n.as_u64().map(Value::UInt))
            .unwrap_or_else(|| Value::Float(n.as_f64().unwrap_or_default())),
        Json::String(s) => Value::String(s.clone()),
        Json::Array(items) => Value::List(items.iter().map(untyped_from_json).collect()),
        Json::Object(entries) => Value::Map(
            entries
                .iter()
                .map(|(k, v)| (MapKey::String(k.clone()), untyped_from_json(v)))
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EnumType, MessageType};

    fn field(ty: ResolvedType, repeated: bool) -> ResolvedField {
        ResolvedField {
            name: "f".to_string(),
            number: 1,
            ty,
            repeated,
            optional: false,
        }
    }

    fn all_types() -> Vec<ResolvedType> {
        let mut types: Vec<ResolvedType> = [
            ScalarKind::Bool,
            ScalarKind::Int,
            ScalarKind::UInt,
            ScalarKind::Float,
            ScalarKind::Bytes,
            ScalarKind::String,
            ScalarKind::Any,
        ]
        .into_iter()
        .map(ResolvedType::scalar)
        .collect();
        types.push(ResolvedType::Enum(EnumType {
            name: "Status".to_string(),
            full_name: "x.Status".to_string(),
            default_member: "STATUS_UNKNOWN".to_string(),
        }));
        types.push(ResolvedType::Message(MessageType {
            name: "Part".to_string(),
            full_name: "x.Part".to_string(),
        }));
        types.push(ResolvedType::Map {
            key: ScalarKind::String,
            value: Box::new(ResolvedType::scalar(ScalarKind::Int)),
        });
        types.push(ResolvedType::Timestamp);
        types
    }

    #[test]
    fn test_defaults_are_total_without_override() {
        for ty in all_types() {
            for repeated in [false, true] {
                assert!(default_for(&field(ty.clone(), repeated), None).is_ok());
            }
        }
    }

    #[test]
    fn test_canonical_zero_values() {
        let zero = |ty| default_for(&field(ty, false), None).unwrap();
        assert_eq!(zero(ResolvedType::scalar(ScalarKind::String)), Value::from(""));
        assert_eq!(zero(ResolvedType::scalar(ScalarKind::Int)), Value::Int(0));
        assert_eq!(zero(ResolvedType::scalar(ScalarKind::Float)), Value::Float(0.0));
        assert_eq!(zero(ResolvedType::scalar(ScalarKind::Bool)), Value::Bool(false));
        assert_eq!(zero(ResolvedType::scalar(ScalarKind::Bytes)), Value::Bytes(vec![]));
        assert_eq!(zero(ResolvedType::Timestamp), Value::Null);
        assert_eq!(
            zero(all_types()[7].clone()),
            Value::Enum(EnumValue::Name("STATUS_UNKNOWN".to_string()))
        );
        assert_eq!(
            default_for(&field(ResolvedType::scalar(ScalarKind::Int), true), None).unwrap(),
            Value::List(vec![])
        );
    }

    #[test]
    fn test_scalar_overrides() {
        let string = field(ResolvedType::scalar(ScalarKind::String), false);
        assert_eq!(
            default_for(&string, Some("John Doe")).unwrap(),
            Value::from("John Doe")
        );

        let int = field(ResolvedType::scalar(ScalarKind::Int), false);
        assert_eq!(default_for(&int, Some("30")).unwrap(), Value::Int(30));

        let err = default_for(&int, Some("thirty")).unwrap_err();
        assert_eq!(err.path.as_str(), "f");
        assert_eq!(err.literal, "thirty");
    }

    #[test]
    fn test_structured_overrides() {
        let list = field(ResolvedType::scalar(ScalarKind::String), true);
        assert_eq!(
            default_for(&list, Some(r#"["a", "b"]"#)).unwrap(),
            Value::List(vec![Value::from("a"), Value::from("b")])
        );

        let map = field(
            ResolvedType::Map {
                key: ScalarKind::Int,
                value: Box::new(ResolvedType::scalar(ScalarKind::String)),
            },
            false,
        );
        let mut expected = BTreeMap::new();
        expected.insert(MapKey::Int(1), Value::from("one"));
        assert_eq!(
            default_for(&map, Some(r#"{"1": "one"}"#)).unwrap(),
            Value::Map(expected)
        );
    }

    #[test]
    fn test_structured_override_decode_failure() {
        let list = field(ResolvedType::scalar(ScalarKind::Int), true);
        assert!(default_for(&list, Some("[1, 2")).is_err());
        assert!(default_for(&list, Some(r#"{"a": 1}"#)).is_err());
        assert!(default_for(&list, Some(r#"["x"]"#)).is_err());
    }
}
