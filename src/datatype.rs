// used when parsing timestamps given as text
use chrono::{NaiveDate, NaiveDateTime};
// used to deserialize a declared type from settings
use serde::Deserialize;
// used for the wire form of queries
use serde_json::Value as JsonValue;

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::MetaQueryError;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const TIMESTAMP_INPUT_FORMATS: [&str; 3] = [TIMESTAMP_FORMAT, "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];

/// The declared type of a metadata field.
///
/// Names are read case-insensitively and accept the SQL-ish spellings used
/// by catalog administrators (`INT`, `VARCHAR(128)`, `DATETIME`, `MetaSet`, ...).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub enum ValueType {
    Int,
    Float,
    String,
    Timestamp,
    FieldSet,
}

impl ValueType {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Int => "Int",
            Self::Float => "Float",
            Self::String => "String",
            Self::Timestamp => "Timestamp",
            Self::FieldSet => "FieldSet",
        }
    }
    /// Whether values of this type have a meaningful order for `<`/`>`.
    pub const fn is_ordered(self) -> bool {
        !matches!(self, Self::FieldSet)
    }
}

impl FromStr for ValueType {
    type Err = MetaQueryError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        let known = [
            ("int", Self::Int),
            ("bigint", Self::Int),
            ("float", Self::Float),
            ("double", Self::Float),
            ("real", Self::Float),
            ("varchar", Self::String),
            ("string", Self::String),
            ("text", Self::String),
            ("char", Self::String),
            ("datetime", Self::Timestamp),
            ("timestamp", Self::Timestamp),
            ("date", Self::Timestamp),
            ("metaset", Self::FieldSet),
            ("fieldset", Self::FieldSet),
        ];
        known
            .iter()
            .find(|(prefix, _)| lowered.starts_with(prefix))
            .map(|(_, value_type)| *value_type)
            .ok_or_else(|| MetaQueryError::FieldDefinition(format!("Unknown value type '{s}'")))
    }
}

impl TryFrom<String> for ValueType {
    type Error = MetaQueryError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Reserved query values: `Missing` (field absent) and `Any` (field present).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sentinel {
    Missing,
    Any,
}

impl Sentinel {
    pub fn recognize(text: &str) -> Option<Self> {
        if text.eq_ignore_ascii_case("missing") {
            Some(Self::Missing)
        } else if text.eq_ignore_ascii_case("any") {
            Some(Self::Any)
        } else {
            None
        }
    }
}

pub fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    TIMESTAMP_INPUT_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// A single typed metadata value.
///
/// Integers and floats compare numerically with each other; other variants
/// only compare meaningfully within their own kind (see [`Scalar::comparable`]).
#[derive(Clone, Debug)]
pub enum Scalar {
    Int(i64),
    Float(f64),
    Str(String),
    Timestamp(NaiveDateTime),
}

impl Scalar {
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::Int(_) => ValueType::Int,
            Self::Float(_) => ValueType::Float,
            Self::Str(_) => ValueType::String,
            Self::Timestamp(_) => ValueType::Timestamp,
        }
    }

    /// Parse raw text into a value of the given declared type.
    pub fn parse_as(text: &str, value_type: ValueType) -> Option<Self> {
        Self::Str(text.to_string()).coerce(value_type)
    }

    /// Convert into the given declared type, `None` when not representable.
    pub fn coerce(&self, value_type: ValueType) -> Option<Self> {
        match (value_type, self) {
            (ValueType::Int, Self::Int(i)) => Some(Self::Int(*i)),
            (ValueType::Int, Self::Float(x)) if x.fract() == 0.0 && x.is_finite() => {
                Some(Self::Int(*x as i64))
            }
            (ValueType::Int, Self::Str(s)) => s.trim().parse().ok().map(Self::Int),
            (ValueType::Float, Self::Int(i)) => Some(Self::Float(*i as f64)),
            (ValueType::Float, Self::Float(x)) => Some(Self::Float(*x)),
            (ValueType::Float, Self::Str(s)) => s.trim().parse().ok().map(Self::Float),
            (ValueType::Timestamp, Self::Timestamp(t)) => Some(Self::Timestamp(*t)),
            (ValueType::Timestamp, Self::Str(s)) => parse_timestamp(s).map(Self::Timestamp),
            (ValueType::String | ValueType::FieldSet, Self::Str(s)) => Some(Self::Str(s.clone())),
            (ValueType::String | ValueType::FieldSet, other) => Some(Self::Str(other.to_string())),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Int(_) | Self::Float(_) => 0,
            Self::Str(_) => 1,
            Self::Timestamp(_) => 2,
        }
    }

    /// Whether an ordering between the two values carries meaning.
    pub fn comparable(&self, other: &Self) -> bool {
        self.rank() == other.rank()
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::Int(i) => JsonValue::from(*i),
            Self::Float(x) => serde_json::Number::from_f64(*x)
                .map(JsonValue::Number)
                .unwrap_or_else(|| JsonValue::String(x.to_string())),
            Self::Str(s) => JsonValue::String(s.clone()),
            Self::Timestamp(_) => JsonValue::String(self.to_string()),
        }
    }

    pub fn from_json(value: &JsonValue) -> Option<Self> {
        match value {
            JsonValue::Number(n) => n
                .as_i64()
                .map(Self::Int)
                .or_else(|| n.as_f64().map(Self::Float)),
            JsonValue::String(s) => Some(Self::Str(s.clone())),
            _ => None,
        }
    }
}

impl Ord for Scalar {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Float(a), Self::Float(b)) => a.total_cmp(b),
            (Self::Int(a), Self::Float(b)) => (*a as f64).total_cmp(b),
            (Self::Float(a), Self::Int(b)) => a.total_cmp(&(*b as f64)),
            (Self::Str(a), Self::Str(b)) => a.cmp(b),
            (Self::Timestamp(a), Self::Timestamp(b)) => a.cmp(b),
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }
}
impl PartialOrd for Scalar {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl PartialEq for Scalar {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl Eq for Scalar {}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Str(s) => write!(f, "{s}"),
            Self::Timestamp(t) => write!(f, "{}", t.format(TIMESTAMP_FORMAT)),
        }
    }
}

impl From<i64> for Scalar {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}
impl From<f64> for Scalar {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}
impl From<&str> for Scalar {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}
impl From<String> for Scalar {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}
impl From<NaiveDateTime> for Scalar {
    fn from(t: NaiveDateTime) -> Self {
        Self::Timestamp(t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_names_accept_sql_spellings() {
        assert_eq!("INTEGER".parse::<ValueType>().unwrap(), ValueType::Int);
        assert_eq!("VARCHAR(128)".parse::<ValueType>().unwrap(), ValueType::String);
        assert_eq!("DateTime".parse::<ValueType>().unwrap(), ValueType::Timestamp);
        assert_eq!("MetaSet".parse::<ValueType>().unwrap(), ValueType::FieldSet);
        assert!("blob".parse::<ValueType>().is_err());
    }

    #[test]
    fn coercion_follows_declared_type() {
        assert_eq!(Scalar::parse_as("42", ValueType::Int), Some(Scalar::Int(42)));
        assert_eq!(Scalar::parse_as("4.5", ValueType::Int), None);
        assert_eq!(Scalar::Int(3).coerce(ValueType::Float), Some(Scalar::Float(3.0)));
        assert_eq!(Scalar::Int(3).coerce(ValueType::String), Some(Scalar::from("3")));
        let day = Scalar::parse_as("2024-05-01", ValueType::Timestamp).unwrap();
        let noon = Scalar::parse_as("2024-05-01 12:00:00", ValueType::Timestamp).unwrap();
        assert!(day < noon);
    }

    #[test]
    fn sentinels_are_case_insensitive() {
        assert_eq!(Sentinel::recognize("MISSING"), Some(Sentinel::Missing));
        assert_eq!(Sentinel::recognize("any"), Some(Sentinel::Any));
        assert_eq!(Sentinel::recognize("anything"), None);
    }
}
