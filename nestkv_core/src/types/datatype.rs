use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataType {
    Bool,
    Int,
    BigInt,
    VarChar(usize),
    Text,
    Date,
    Timestamp,
    Uuid,
    Blob,
}

impl DataType {
    /// Integer-typed columns are the ones whose keys tend to grow monotonically.
    pub fn is_integer(&self) -> bool {
        matches!(self, DataType::Int | DataType::BigInt)
    }
}

pub fn parse_datatype(s: &str) -> Result<DataType> {
    let lower = s.trim().to_lowercase();
    if let Some(inner) = lower
        .strip_prefix("varchar(")
        .and_then(|rest| rest.strip_suffix(')'))
    {
        let n: usize = inner
            .trim()
            .parse()
            .map_err(|_| Error::Value(format!("Invalid varchar length in '{s}'")))?;
        return Ok(DataType::VarChar(n));
    }
    match lower.as_str() {
        "bool" | "boolean" => Ok(DataType::Bool),
        "int" | "integer" => Ok(DataType::Int),
        "bigint" => Ok(DataType::BigInt),
        "text" => Ok(DataType::Text),
        "date" => Ok(DataType::Date),
        "timestamp" => Ok(DataType::Timestamp),
        "uuid" => Ok(DataType::Uuid),
        "blob" => Ok(DataType::Blob),
        other => Err(Error::Value(format!(
            "Unknown type '{other}'. Use bool|int|bigint|varchar(n)|text|date|timestamp|uuid|blob"
        ))),
    }
}

pub fn datatype_to_string(dtype: &DataType) -> String {
    match dtype {
        DataType::Bool => "bool".to_string(),
        DataType::Int => "int".to_string(),
        DataType::BigInt => "bigint".to_string(),
        DataType::VarChar(n) => format!("varchar({n})"),
        DataType::Text => "text".to_string(),
        DataType::Date => "date".to_string(),
        DataType::Timestamp => "timestamp".to_string(),
        DataType::Uuid => "uuid".to_string(),
        DataType::Blob => "blob".to_string(),
    }
}
