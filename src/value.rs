//! Record attribute values
//!
//! `Value` is the in-memory representation of a record attribute. It is
//! deliberately independent of the wire format: enums may be held by name,
//! by ordinal or as a typed member, timestamps are `chrono` datetimes, and
//! nested messages are nested [`Record`]s (or loosely typed string-keyed
//! maps).

use crate::record::Record;
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use std::collections::BTreeMap;
use std::fmt;

/// A record attribute value
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// Absent / unset
    #[default]
    Null,
    /// Boolean
    Bool(bool),
    /// Signed integer
    Int(i64),
    /// Unsigned integer
    UInt(u64),
    /// Floating point number
    Float(f64),
    /// UTF-8 string
    String(String),
    /// Byte sequence
    Bytes(Vec<u8>),
    /// Enum value in any of its accepted forms
    Enum(EnumValue),
    /// Point in time
    Timestamp(DateTime<Utc>),
    /// Sequence of values
    List(Vec<Value>),
    /// Keyed collection of values
    Map(BTreeMap<MapKey, Value>),
    /// Nested record
    Record(Record),
}

/// Key of a map-valued attribute
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MapKey {
    /// Boolean key
    Bool(bool),
    /// Signed integer key
    Int(i64),
    /// Unsigned integer key
    UInt(u64),
    /// String key
    String(String),
}

/// An enum value as supplied by application code
///
/// Records may carry an enum as its symbolic name, as its integer ordinal,
/// or as a typed member of a Rust enum. The converter normalizes all three
/// against the wire enum descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnumValue {
    /// Symbolic member name, e.g. `STATUS_ACTIVE`
    Name(String),
    /// Integer ordinal
    Number(i32),
    /// Member of a typed Rust enum
    Member(EnumMember),
}

/// A fully described enum member
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumMember {
    /// Fully-qualified name of the enum type
    pub enum_name: String,
    /// Symbolic member name
    pub name: String,
    /// Integer ordinal
    pub number: i32,
}

/// A Rust enum that mirrors a protobuf enum
pub trait RecordEnum: Sized {
    /// Fully-qualified protobuf enum name
    fn enum_name() -> &'static str;

    /// Symbolic name of this member
    fn member_name(&self) -> &'static str;

    /// Ordinal of this member
    fn number(&self) -> i32;

    /// Member for an ordinal, if any
    fn from_number(number: i32) -> Option<Self>;

    /// Member for a symbolic name, if any
    fn from_name(name: &str) -> Option<Self>;

    /// This member as a record value
    fn to_enum_value(&self) -> EnumValue {
        EnumValue::Member(EnumMember {
            enum_name: Self::enum_name().to_string(),
            name: self.member_name().to_string(),
            number: self.number(),
        })
    }

    /// Recover a member from any accepted enum form
    fn from_enum_value(value: &EnumValue) -> Option<Self> {
        match value {
            EnumValue::Name(name) => Self::from_name(name),
            EnumValue::Number(n) => Self::from_number(*n),
            EnumValue::Member(member) => Self::from_number(member.number),
        }
    }
}

impl fmt::Display for MapKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapKey::Bool(b) => write!(f, "{}", b),
            MapKey::Int(i) => write!(f, "{}", i),
            MapKey::UInt(u) => write!(f, "{}", u),
            MapKey::String(s) => f.write_str(s),
        }
    }
}

impl From<&str> for MapKey {
    fn from(s: &str) -> Self {
        MapKey::String(s.to_string())
    }
}

impl From<String> for MapKey {
    fn from(s: String) -> Self {
        MapKey::String(s)
    }
}

impl From<i64> for MapKey {
    fn from(i: i64) -> Self {
        MapKey::Int(i)
    }
}

impl Value {
    /// Whether the value is `Null`
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Whether the value counts as "not supplied" for optional message fields
    pub fn is_falsy(&self) -> bool {
        match self {
            Value::Null => true,
            Value::String(s) => s.is_empty(),
            _ => false,
        }
    }

    /// Borrow as a boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Read as a signed integer, accepting unsigned values that fit
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::UInt(u) => i64::try_from(*u).ok(),
            _ => None,
        }
    }

    /// Read as an unsigned integer, accepting non-negative signed values
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::UInt(u) => Some(*u),
            Value::Int(i) => u64::try_from(*i).ok(),
            _ => None,
        }
    }

    /// Read as a float, widening integers
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            Value::UInt(u) => Some(*u as f64),
            _ => None,
        }
    }

    /// Borrow as a string slice
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Borrow as bytes
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Borrow as an enum value
    pub fn as_enum(&self) -> Option<&EnumValue> {
        match self {
            Value::Enum(e) => Some(e),
            _ => None,
        }
    }

    /// Read as a timestamp
    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }

    /// Borrow as a list
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Borrow as a map
    pub fn as_map(&self) -> Option<&BTreeMap<MapKey, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Borrow as a nested record
    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Value::Record(record) => Some(record),
            _ => None,
        }
    }

    /// Take the nested record out of this value
    pub fn into_record(self) -> Option<Record> {
        match self {
            Value::Record(record) => Some(record),
            _ => None,
        }
    }

    /// Take the list out of this value
    pub fn into_list(self) -> Option<Vec<Value>> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Short name of the variant, used in error messages
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::UInt(_) => "uint",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Enum(_) => "enum",
            Value::Timestamp(_) => "timestamp",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Record(_) => "record",
        }
    }

    /// Render as JSON, as used for default literals in manifests
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(i) => Json::from(*i),
            Value::UInt(u) => Json::from(*u),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Value::String(s) => Json::String(s.clone()),
            Value::Bytes(b) => Json::Array(b.iter().map(|byte| Json::from(*byte)).collect()),
            Value::Enum(EnumValue::Name(name)) => Json::String(name.clone()),
            Value::Enum(EnumValue::Number(n)) => Json::from(*n),
            Value::Enum(EnumValue::Member(member)) => Json::String(member.name.clone()),
            Value::Timestamp(ts) => Json::String(ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            Value::List(items) => Json::Array(items.iter().map(Value::to_json).collect()),
            Value::Map(map) => Json::Object(
                map.iter()
                    .map(|(k, v)| (k.to_string(), v.to_json()))
                    .collect(),
            ),
            Value::Record(record) => Json::Object(
                record
                    .attributes()
                    .map(|(k, v)| (k.to_string(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

/// Parse an ISO 8601 datetime string
///
/// Supports:
/// - RFC 3339: "2024-01-01T12:00:00Z", "2024-01-01T12:00:00.5+08:00"
/// - Naive datetimes, read as UTC: "2024-01-01T12:00:00", "2024-01-01 12:00:00.123"
/// - Dates, read as UTC midnight: "2024-01-01"
pub fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Some(dt.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<u32> for Value {
    fn from(u: u32) -> Self {
        Value::UInt(u64::from(u))
    }
}

impl From<u64> for Value {
    fn from(u: u64) -> Self {
        Value::UInt(u)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(ts: DateTime<Utc>) -> Self {
        Value::Timestamp(ts)
    }
}

impl From<EnumValue> for Value {
    fn from(e: EnumValue) -> Self {
        Value::Enum(e)
    }
}

impl From<Record> for Value {
    fn from(record: Record) -> Self {
        Value::Record(record)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<BTreeMap<MapKey, Value>> for Value {
    fn from(map: BTreeMap<MapKey, Value>) -> Self {
        Value::Map(map)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map(Into::into).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    enum Color {
        Unspecified,
        Red,
    }

    impl RecordEnum for Color {
        fn enum_name() -> &'static str {
            "test.Color"
        }

        fn member_name(&self) -> &'static str {
            match self {
                Color::Unspecified => "COLOR_UNSPECIFIED",
                Color::Red => "COLOR_RED",
            }
        }

        fn number(&self) -> i32 {
            match self {
                Color::Unspecified => 0,
                Color::Red => 1,
            }
        }

        fn from_number(number: i32) -> Option<Self> {
            match number {
                0 => Some(Color::Unspecified),
                1 => Some(Color::Red),
                _ => None,
            }
        }

        fn from_name(name: &str) -> Option<Self> {
            match name {
                "COLOR_UNSPECIFIED" => Some(Color::Unspecified),
                "COLOR_RED" => Some(Color::Red),
                _ => None,
            }
        }
    }

    #[test]
    fn test_record_enum_accepts_every_form() {
        assert_eq!(
            Color::from_enum_value(&EnumValue::Name("COLOR_RED".to_string())),
            Some(Color::Red)
        );
        assert_eq!(Color::from_enum_value(&EnumValue::Number(1)), Some(Color::Red));
        assert_eq!(
            Color::from_enum_value(&Color::Red.to_enum_value()),
            Some(Color::Red)
        );
        assert_eq!(Color::from_enum_value(&EnumValue::Number(7)), None);
    }

    #[test]
    fn test_integer_widening() {
        assert_eq!(Value::UInt(5).as_i64(), Some(5));
        assert_eq!(Value::Int(-1).as_u64(), None);
        assert_eq!(Value::Int(3).as_f64(), Some(3.0));
        assert_eq!(Value::UInt(u64::MAX).as_i64(), None);
    }

    #[test]
    fn test_falsy_values() {
        assert!(Value::Null.is_falsy());
        assert!(Value::from("").is_falsy());
        assert!(!Value::from("2024-01-01T00:00:00Z").is_falsy());
        assert!(!Value::Int(0).is_falsy());
    }

    #[test]
    fn test_parse_datetime_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        assert_eq!(parse_datetime("2024-01-01T12:00:00Z"), Some(expected));
        assert_eq!(parse_datetime("2024-01-01T20:00:00+08:00"), Some(expected));
        assert_eq!(parse_datetime("2024-01-01T12:00:00"), Some(expected));
        assert_eq!(parse_datetime("2024-01-01 12:00:00"), Some(expected));
        assert_eq!(
            parse_datetime("2024-01-01"),
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(parse_datetime("yesterday"), None);
    }

    #[test]
    fn test_json_rendering() {
        let mut map = BTreeMap::new();
        map.insert(MapKey::from("a"), Value::from(1i64));
        assert_eq!(Value::Map(map).to_json(), serde_json::json!({"a": 1}));
        assert_eq!(
            Value::Enum(EnumValue::Name("X".to_string())).to_json(),
            serde_json::json!("X")
        );
        assert_eq!(Value::from(None::<i64>), Value::Null);
    }
}
