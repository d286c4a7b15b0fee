//! Dynamic values used for bindings, model attributes and result rows.

use crate::error::{OrmError, OrmResult};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Serialize, Serializer};
use std::fmt;
use uuid::Uuid;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A dynamically typed SQL value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Json(serde_json::Value),
    Timestamp(NaiveDateTime),
    Uuid(Uuid),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Short type name, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
            Value::Json(_) => "json",
            Value::Timestamp(_) => "timestamp",
            Value::Uuid(_) => "uuid",
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(i64::from(*b)),
            Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Loose truthiness: `0`, `""`, `"0"`, `false` and `NULL` are false.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Text(s) => !(s.is_empty() || s == "0"),
            Value::Bytes(b) => !b.is_empty(),
            Value::Json(j) => !j.is_null(),
            Value::Timestamp(_) | Value::Uuid(_) => true,
        }
    }

    /// Convert into a JSON value for serialization.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as J;
        match self {
            Value::Null => J::Null,
            Value::Bool(b) => J::Bool(*b),
            Value::Int(i) => J::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f).map_or(J::Null, J::Number),
            Value::Text(s) => J::String(s.clone()),
            Value::Bytes(b) => J::Array(b.iter().map(|x| J::from(*x)).collect()),
            Value::Json(j) => j.clone(),
            Value::Timestamp(t) => J::String(t.format(TIMESTAMP_FORMAT).to_string()),
            Value::Uuid(u) => J::String(u.to_string()),
        }
    }

    /// Map a JSON scalar onto the closest value; objects and arrays stay JSON.
    pub fn from_json(json: serde_json::Value) -> Self {
        use serde_json::Value as J;
        match json {
            J::Null => Value::Null,
            J::Bool(b) => Value::Bool(b),
            J::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or_default()),
            },
            J::String(s) => Value::Text(s),
            other => Value::Json(other),
        }
    }

    /// Parse a timestamp from its textual forms (`Y-m-d H:M:S`, RFC 3339 or a bare date).
    pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
        NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
            .ok()
            .or_else(|| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f").ok())
            .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|d| d.naive_utc()))
            .or_else(|| {
                NaiveDate::parse_from_str(s, "%Y-%m-%d")
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
            })
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(b) => write!(f, "{}", i32::from(*b)),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Text(s) => f.write_str(s),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::Json(j) => write!(f, "{j}"),
            Value::Timestamp(t) => write!(f, "{}", t.format(TIMESTAMP_FORMAT)),
            Value::Uuid(u) => write!(f, "{u}"),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

/// Render a binding list for error messages: `[1, "a", NULL]`.
pub fn render_bindings(bindings: &[Value]) -> String {
    let parts: Vec<String> = bindings
        .iter()
        .map(|v| match v {
            Value::Text(s) => format!("{s:?}"),
            other => other.to_string(),
        })
        .collect();
    format!("[{}]", parts.join(", "))
}

macro_rules! impl_from_int {
    ($($t:ty),*) => {
        $(impl From<$t> for Value {
            fn from(v: $t) -> Self {
                Value::Int(i64::from(v))
            }
        })*
    };
}

impl_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        i64::try_from(v).map_or(Value::Float(v as f64), Value::Int)
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::from(v as u64)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(f64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&String> for Value {
    fn from(v: &String) -> Self {
        Value::Text(v.clone())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::Json(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::Timestamp(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Timestamp(v.naive_utc())
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Value::Uuid(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl From<&Value> for Value {
    fn from(v: &Value) -> Self {
        v.clone()
    }
}

/// Conversion from a [`Value`] into a concrete Rust type.
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> OrmResult<Self>;
}

fn mismatch<T>(expected: &str, value: &Value) -> OrmResult<T> {
    Err(OrmError::decode(
        "<value>",
        format!("expected {expected}, found {}", value.type_name()),
    ))
}

impl FromValue for Value {
    fn from_value(value: &Value) -> OrmResult<Self> {
        Ok(value.clone())
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> OrmResult<Self> {
        value.as_i64().map_or_else(|| mismatch("int", value), Ok)
    }
}

impl FromValue for i32 {
    fn from_value(value: &Value) -> OrmResult<Self> {
        let v = i64::from_value(value)?;
        i32::try_from(v).map_err(|e| OrmError::decode("<value>", e.to_string()))
    }
}

impl FromValue for u64 {
    fn from_value(value: &Value) -> OrmResult<Self> {
        let v = i64::from_value(value)?;
        u64::try_from(v).map_err(|e| OrmError::decode("<value>", e.to_string()))
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> OrmResult<Self> {
        value.as_f64().map_or_else(|| mismatch("float", value), Ok)
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> OrmResult<Self> {
        match value {
            Value::Bool(b) => Ok(*b),
            Value::Int(i) => Ok(*i != 0),
            Value::Text(s) if s == "true" || s == "1" => Ok(true),
            Value::Text(s) if s == "false" || s == "0" => Ok(false),
            other => mismatch("bool", other),
        }
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> OrmResult<Self> {
        match value {
            Value::Null => mismatch("text", value),
            Value::Text(s) => Ok(s.clone()),
            other => Ok(other.to_string()),
        }
    }
}

impl FromValue for Uuid {
    fn from_value(value: &Value) -> OrmResult<Self> {
        match value {
            Value::Uuid(u) => Ok(*u),
            Value::Text(s) => {
                Uuid::parse_str(s).map_err(|e| OrmError::decode("<value>", e.to_string()))
            }
            other => mismatch("uuid", other),
        }
    }
}

impl FromValue for NaiveDateTime {
    fn from_value(value: &Value) -> OrmResult<Self> {
        match value {
            Value::Timestamp(t) => Ok(*t),
            Value::Text(s) => Value::parse_timestamp(s).map_or_else(|| mismatch("timestamp", value), Ok),
            other => mismatch("timestamp", other),
        }
    }
}

impl FromValue for serde_json::Value {
    fn from_value(value: &Value) -> OrmResult<Self> {
        match value {
            Value::Json(j) => Ok(j.clone()),
            Value::Text(s) => Ok(serde_json::from_str(s)?),
            other => Ok(other.to_json()),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> OrmResult<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

/// A primitive equality key used to bucket related rows by key value.
///
/// `1`, `1.0` and `"1"` normalise to the same key so that integer parent keys
/// match textual foreign keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DictKey(String);

impl DictKey {
    /// Normalise a value into a dictionary key. `NULL` yields `None`.
    pub fn from_value(value: &Value) -> OrmResult<Option<Self>> {
        let key = match value {
            Value::Null => return Ok(None),
            Value::Bool(b) => i32::from(*b).to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => float_key(*f),
            Value::Text(s) => s.clone(),
            Value::Timestamp(t) => t.format(TIMESTAMP_FORMAT).to_string(),
            Value::Uuid(u) => u.to_string(),
            Value::Json(serde_json::Value::String(s)) => s.clone(),
            Value::Json(serde_json::Value::Number(n)) => match (n.as_i64(), n.as_u64(), n.as_f64()) {
                (Some(i), _, _) => i.to_string(),
                (None, Some(u), _) => u.to_string(),
                (None, None, Some(f)) => float_key(f),
                _ => n.to_string(),
            },
            Value::Json(serde_json::Value::Bool(b)) => i32::from(*b).to_string(),
            Value::Json(serde_json::Value::Null) => return Ok(None),
            other => {
                return Err(OrmError::InvalidKey(format!(
                    "{} value cannot be used as a dictionary key",
                    other.type_name()
                )));
            }
        };
        Ok(Some(Self(key)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Integral floats inside the `i64` range share the integer's key; every other float
/// is keyed by its bit pattern.
fn float_key(f: f64) -> String {
    // -2^63 and 2^63 are exact as f64; the upper bound is exclusive.
    if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        (f as i64).to_string()
    } else {
        format!("f64:{:016x}", f.to_bits())
    }
}

impl fmt::Display for DictKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dict_key_normalises_numbers_and_text() {
        let a = DictKey::from_value(&Value::Int(7)).unwrap();
        let b = DictKey::from_value(&Value::Text("7".into())).unwrap();
        let c = DictKey::from_value(&Value::Float(7.0)).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn dict_key_keeps_large_and_fractional_floats_apart() {
        let key = |v: Value| DictKey::from_value(&v).unwrap().unwrap();

        assert_ne!(key(Value::Float(1e19)), key(Value::Float(2e19)));
        assert_ne!(key(Value::Float(1e19)), key(Value::Int(i64::MAX)));
        assert_ne!(key(Value::Float(f64::NAN)), key(Value::Int(0)));
        assert_ne!(key(Value::Float(f64::INFINITY)), key(Value::Float(f64::NEG_INFINITY)));
        assert_ne!(key(Value::Float(1.5)), key(Value::Int(1)));
        assert_eq!(key(Value::Float(-3.0)), key(Value::Int(-3)));
        assert_eq!(key(Value::Float(-0.0)), key(Value::Int(0)));
        assert_eq!(key(Value::Json(serde_json::json!(4.0))), key(Value::Int(4)));
    }

    #[test]
    fn dict_key_skips_null_and_rejects_objects() {
        assert_eq!(DictKey::from_value(&Value::Null).unwrap(), None);
        let err = DictKey::from_value(&Value::Json(serde_json::json!({"a": 1}))).unwrap_err();
        assert!(matches!(err, OrmError::InvalidKey(_)));
        assert!(DictKey::from_value(&Value::Bytes(vec![1])).is_err());
    }

    #[test]
    fn from_value_conversions() {
        assert_eq!(i64::from_value(&Value::Text("42".into())).unwrap(), 42);
        assert!(bool::from_value(&Value::Int(1)).unwrap());
        assert_eq!(Option::<i64>::from_value(&Value::Null).unwrap(), None);
        assert!(i64::from_value(&Value::Bytes(vec![])).is_err());
    }

    #[test]
    fn json_scalars_map_to_values() {
        assert_eq!(Value::from_json(serde_json::json!(3)), Value::Int(3));
        assert_eq!(Value::from_json(serde_json::json!("x")), Value::Text("x".into()));
        assert_eq!(
            Value::from_json(serde_json::json!([1])),
            Value::Json(serde_json::json!([1]))
        );
    }

    #[test]
    fn render_bindings_quotes_text() {
        let rendered = render_bindings(&[Value::Int(1), "a".into(), Value::Null]);
        assert_eq!(rendered, r#"[1, "a", NULL]"#);
    }
}
