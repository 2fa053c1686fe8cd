use std::cmp::Ordering;

use crate::error::{Error, Result};
use crate::types::datatype::DataType;
use chrono::{NaiveDate, NaiveDateTime};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    BigInt(i128),
    VarChar(String),
    Text(String),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    Uuid(Uuid),
    Blob(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    fn as_integer(&self) -> Option<i128> {
        match self {
            Value::Int(n) => Some(*n as i128),
            Value::BigInt(n) => Some(*n),
            _ => None,
        }
    }

    fn as_str(&self) -> Option<&str> {
        match self {
            Value::VarChar(s) | Value::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

pub fn parse_value(dtype: &DataType, token: &str) -> Result<Value> {
    if token.eq_ignore_ascii_case("null") {
        return Ok(Value::Null);
    }
    match dtype {
        DataType::Bool => parse_bool(token).map(Value::Bool),
        DataType::Int => {
            let n: i64 = token
                .parse()
                .map_err(|_| Error::Value(format!("Expected int but got '{token}'")))?;
            Ok(Value::Int(n))
        }
        DataType::BigInt => {
            let n: i128 = token
                .parse()
                .map_err(|_| Error::Value(format!("Expected bigint but got '{token}'")))?;
            Ok(Value::BigInt(n))
        }
        DataType::VarChar(max) => {
            let len = token.chars().count();
            if len > *max {
                return Err(Error::Value(format!(
                    "Expected varchar({max}) but got length {len}"
                )));
            }
            Ok(Value::VarChar(token.to_string()))
        }
        DataType::Text => Ok(Value::Text(token.to_string())),
        DataType::Date => {
            let d = NaiveDate::parse_from_str(token, "%Y-%m-%d").map_err(|_| {
                Error::Value(format!("Expected date YYYY-MM-DD but got '{token}'"))
            })?;
            Ok(Value::Date(d))
        }
        DataType::Timestamp => parse_timestamp(token).map(Value::Timestamp),
        DataType::Uuid => {
            let u = Uuid::parse_str(token)
                .map_err(|_| Error::Value(format!("Expected uuid but got '{token}'")))?;
            Ok(Value::Uuid(u))
        }
        DataType::Blob => {
            let raw = token.strip_prefix("0x").unwrap_or(token);
            let bytes = hex::decode(raw).map_err(|_| {
                Error::Value(format!(
                    "Expected hex blob (e.g. 0xDEADBEEF) but got '{token}'"
                ))
            })?;
            Ok(Value::Blob(bytes))
        }
    }
}

pub fn value_to_string(v: &Value) -> String {
    match v {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Int(n) => n.to_string(),
        Value::BigInt(n) => n.to_string(),
        Value::VarChar(s) => s.clone(),
        Value::Text(s) => s.clone(),
        Value::Date(d) => d.format("%Y-%m-%d").to_string(),
        Value::Timestamp(ts) => ts.format("%Y-%m-%d %H:%M:%S").to_string(),
        Value::Uuid(u) => u.to_string(),
        Value::Blob(b) => format!("0x{}", hex::encode_upper(b)),
    }
}

/// Whether `v` can be stored in a column of type `dtype`. NULL fits every type.
pub fn value_fits(v: &Value, dtype: &DataType) -> bool {
    match (v, dtype) {
        (Value::Null, _) => true,
        (Value::Bool(_), DataType::Bool) => true,
        (Value::Int(_), DataType::Int | DataType::BigInt) => true,
        (Value::BigInt(n), DataType::Int) => i64::try_from(*n).is_ok(),
        (Value::BigInt(_), DataType::BigInt) => true,
        (Value::VarChar(s) | Value::Text(s), DataType::VarChar(max)) => s.chars().count() <= *max,
        (Value::VarChar(_) | Value::Text(_), DataType::Text) => true,
        (Value::Date(_), DataType::Date) => true,
        (Value::Timestamp(_), DataType::Timestamp) => true,
        (Value::Uuid(_), DataType::Uuid) => true,
        (Value::Blob(_), DataType::Blob) => true,
        _ => false,
    }
}

/// Comparator used for self-reference detection and change detection.
/// Integer widths and the two string flavours compare across each other;
/// NULL never compares equal to anything, including NULL.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    if a.is_null() || b.is_null() {
        return None;
    }
    if let (Some(x), Some(y)) = (a.as_integer(), b.as_integer()) {
        return Some(x.cmp(&y));
    }
    if let (Some(x), Some(y)) = (a.as_str(), b.as_str()) {
        return Some(x.cmp(y));
    }
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Date(x), Value::Date(y)) => Some(x.cmp(y)),
        (Value::Timestamp(x), Value::Timestamp(y)) => Some(x.cmp(y)),
        (Value::Uuid(x), Value::Uuid(y)) => Some(x.cmp(y)),
        (Value::Blob(x), Value::Blob(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Storage-level equality: two NULLs are the same stored value.
pub fn values_identical(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        _ => compare_values(a, b) == Some(Ordering::Equal),
    }
}

fn parse_bool(token: &str) -> Result<bool> {
    match token.to_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(Error::Value(format!("Expected bool but got '{token}'"))),
    }
}

fn parse_timestamp(token: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(token, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(token, "%Y-%m-%dT%H:%M:%S"))
        .map_err(|_| {
            Error::Value(format!(
                "Expected timestamp 'YYYY-MM-DD HH:MM:SS' but got '{token}'"
            ))
        })
}
