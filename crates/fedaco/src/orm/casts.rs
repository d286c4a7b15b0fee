//! Attribute casts applied on read (`get_attribute`) and write (`set_attribute`).
//!
//! Stored attributes keep the storage representation (JSON as text, booleans as the
//! driver returned them); casts produce the semantic value on the way out.

use crate::error::{OrmError, OrmResult};
use crate::value::Value;

/// Semantic type of a cast column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastType {
    Int,
    Float,
    Bool,
    String,
    Json,
    DateTime,
}

impl CastType {
    /// Convert a stored value into its semantic form. `NULL` stays `NULL`.
    pub fn get(self, value: &Value) -> OrmResult<Value> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        let out = match self {
            CastType::Int => match value.as_i64() {
                Some(i) => Value::Int(i),
                None => match value.as_f64() {
                    Some(f) => Value::Int(f.trunc() as i64),
                    None => return Err(cast_error("int", value)),
                },
            },
            CastType::Float => value
                .as_f64()
                .map(Value::Float)
                .ok_or_else(|| cast_error("float", value))?,
            CastType::Bool => Value::Bool(value.is_truthy()),
            CastType::String => Value::Text(value.to_string()),
            CastType::Json => match value {
                Value::Json(j) => Value::Json(j.clone()),
                Value::Text(s) => Value::Json(
                    serde_json::from_str(s).map_err(|e| OrmError::decode("<json>", e.to_string()))?,
                ),
                other => Value::Json(other.to_json()),
            },
            CastType::DateTime => match value {
                Value::Timestamp(t) => Value::Timestamp(*t),
                Value::Text(s) => Value::parse_timestamp(s)
                    .map(Value::Timestamp)
                    .ok_or_else(|| cast_error("datetime", value))?,
                Value::Int(secs) => chrono::DateTime::<chrono::Utc>::from_timestamp(*secs, 0)
                    .map(|d| Value::Timestamp(d.naive_utc()))
                    .ok_or_else(|| cast_error("datetime", value))?,
                other => return Err(cast_error("datetime", other)),
            },
        };
        Ok(out)
    }

    /// Convert a semantic value into what gets stored and bound.
    pub fn set(self, value: Value) -> OrmResult<Value> {
        match (self, value) {
            (_, Value::Null) => Ok(Value::Null),
            (CastType::Json, Value::Json(j)) => Ok(Value::Text(j.to_string())),
            (CastType::Json, Value::Text(s)) => {
                // Already-encoded JSON passes through; bare strings get quoted.
                match serde_json::from_str::<serde_json::Value>(&s) {
                    Ok(_) => Ok(Value::Text(s)),
                    Err(_) => Ok(Value::Text(serde_json::Value::String(s).to_string())),
                }
            }
            (CastType::Json, other) => Ok(Value::Text(other.to_json().to_string())),
            (CastType::DateTime, Value::Text(s)) => Value::parse_timestamp(&s)
                .map(Value::Timestamp)
                .ok_or_else(|| cast_error("datetime", &Value::Text(s))),
            (CastType::Bool, v) => Ok(Value::Bool(v.is_truthy())),
            (ty, v) => ty.get(&v),
        }
    }
}

fn cast_error(expected: &str, value: &Value) -> OrmError {
    OrmError::decode(
        "<cast>",
        format!("cannot cast {} value '{value}' to {expected}", value.type_name()),
    )
}
