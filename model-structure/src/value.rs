use bigdecimal::{BigDecimal, FromPrimitive};
use chrono::prelude::*;
use serde::ser::Serializer;
use serde::Serialize;
use std::fmt;

use crate::error::DomainError;

pub type ValueList = Vec<Value>;

/// A scalar value as it flows between the storage collaborator, entities and
/// mutation inputs. Floats are carried as `BigDecimal` so that values are
/// `Eq + Hash` and can be used as match keys.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, PartialOrd, Ord)]
#[serde(untagged)]
pub enum Value {
    String(String),
    Boolean(bool),
    Enum(String),
    Int(i64),
    List(ValueList),
    Json(String),

    #[serde(serialize_with = "serialize_null")]
    Null,

    #[serde(serialize_with = "serialize_date")]
    DateTime(DateTime<FixedOffset>),

    #[serde(serialize_with = "serialize_decimal")]
    Float(BigDecimal),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_string(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::Enum(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn into_list(self) -> Option<ValueList> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }
}

/// Stringify a date to the following format: 1999-05-01T00:00:00.000Z
pub fn stringify_datetime(datetime: &DateTime<FixedOffset>) -> String {
    datetime.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parses an RFC 3339 date and time string such as 1996-12-19T16:39:57-08:00.
pub fn parse_datetime(datetime: &str) -> chrono::ParseResult<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(datetime)
}

fn serialize_date<S>(date: &DateTime<FixedOffset>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    stringify_datetime(date).serialize(serializer)
}

fn serialize_null<S>(serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    Option::<u8>::None.serialize(serializer)
}

fn serialize_decimal<S>(decimal: &BigDecimal, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    decimal.to_string().serialize(serializer)
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "\"{s}\""),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Enum(e) => write!(f, "{e}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(d) => write!(f, "{d}"),
            Value::DateTime(d) => write!(f, "{}", stringify_datetime(d)),
            Value::Null => write!(f, "null"),
            Value::Json(j) => write!(f, "{j}"),
            Value::List(vals) => {
                let as_string = vals.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(", ");
                write!(f, "[{as_string}]")
            }
        }
    }
}

impl TryFrom<serde_json::Value> for Value {
    type Error = DomainError;

    fn try_from(v: serde_json::Value) -> Result<Self, DomainError> {
        match v {
            serde_json::Value::Null => Ok(Value::Null),
            serde_json::Value::Bool(b) => Ok(Value::Boolean(b)),
            serde_json::Value::String(s) => Ok(Value::String(s)),
            serde_json::Value::Number(num) => {
                if let Some(i) = num.as_i64() {
                    Ok(Value::Int(i))
                } else {
                    let fl = num.as_f64().expect("JSON number is either i64 or f64");
                    let dec = BigDecimal::from_f64(fl)
                        .ok_or_else(|| DomainError::ConversionFailure("JSON number", "Value::Float"))?;

                    Ok(Value::Float(dec.normalized()))
                }
            }
            serde_json::Value::Array(vals) => {
                let vals: Result<Vec<_>, _> = vals.into_iter().map(Value::try_from).collect();
                Ok(Value::List(vals?))
            }
            obj @ serde_json::Value::Object(_) => Ok(Value::Json(obj.to_string())),
        }
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

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<BigDecimal> for Value {
    fn from(d: BigDecimal) -> Self {
        Value::Float(d)
    }
}

impl<T> From<Option<T>> for Value
where
    T: Into<Value>,
{
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_numbers_normalize_to_int_or_float() {
        let int: Value = serde_json::json!(42).try_into().unwrap();
        assert_eq!(int, Value::Int(42));

        let float: Value = serde_json::json!(1.5).try_into().unwrap();
        assert!(matches!(float, Value::Float(_)));
    }

    #[test]
    fn floats_serialize_as_decimal_strings() {
        let value = Value::Float(BigDecimal::from_f64(1.5).unwrap().normalized());

        assert_eq!(serde_json::to_string(&value).unwrap(), "\"1.5\"");
    }

    #[test]
    fn values_are_usable_as_match_keys() {
        use std::collections::HashMap;

        let mut map = HashMap::new();
        map.insert(Value::from("a"), 1);
        map.insert(Value::Int(1), 2);

        assert_eq!(map.get(&Value::from("a")), Some(&1));
        assert_eq!(map.get(&Value::Int(1)), Some(&2));
    }
}
