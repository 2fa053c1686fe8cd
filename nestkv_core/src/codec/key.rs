//! Order-preserving key encoding.
//!
//! Every value starts with a tag byte so that encoded tuples compare with a
//! plain byte comparison. NULL sorts before every other value, and no value
//! ever starts with [`tag::AFTER`], which lets `key ‖ AFTER` act as the
//! exclusive end of "everything that extends `key`".
//!
//! ```text
//! 0x01       NULL
//! 0x02-0x03  FALSE, TRUE
//! 0x15       integer (i128, sign bit flipped, big-endian)
//! 0x20-0x21  text, blob (0x00 escaped as 0x00 0xFF, terminated by 0x00 0x00)
//! 0x30       date (days from CE, sign bit flipped)
//! 0x32       timestamp (microseconds since epoch, sign bit flipped)
//! 0x40       uuid (16 raw bytes)
//! 0xFF       AFTER
//! ```

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::datatype::DataType;
use crate::types::value::{value_to_string, Value};

pub mod tag {
    pub const NULL: u8 = 0x01;
    pub const FALSE: u8 = 0x02;
    pub const TRUE: u8 = 0x03;
    pub const INT: u8 = 0x15;
    pub const TEXT: u8 = 0x20;
    pub const BLOB: u8 = 0x21;
    pub const DATE: u8 = 0x30;
    pub const TIMESTAMP: u8 = 0x32;
    pub const UUID: u8 = 0x40;
    pub const AFTER: u8 = 0xFF;
}

const INT_SIGN: u128 = 1 << 127;
const DATE_SIGN: u32 = 1 << 31;
const TS_SIGN: u64 = 1 << 63;

fn epoch() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1970, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default()
}

pub fn encode_value(buf: &mut Vec<u8>, v: &Value) -> Result<()> {
    match v {
        Value::Null => buf.push(tag::NULL),
        Value::Bool(false) => buf.push(tag::FALSE),
        Value::Bool(true) => buf.push(tag::TRUE),
        Value::Int(n) => encode_int(buf, *n as i128),
        Value::BigInt(n) => encode_int(buf, *n),
        Value::VarChar(s) | Value::Text(s) => {
            buf.push(tag::TEXT);
            encode_escaped(buf, s.as_bytes());
        }
        Value::Blob(b) => {
            buf.push(tag::BLOB);
            encode_escaped(buf, b);
        }
        Value::Date(d) => {
            buf.push(tag::DATE);
            let days = d.num_days_from_ce() as u32 ^ DATE_SIGN;
            buf.extend_from_slice(&days.to_be_bytes());
        }
        Value::Timestamp(ts) => {
            let micros = (*ts - epoch()).num_microseconds().ok_or_else(|| {
                Error::Codec(format!("timestamp {} out of encodable range", value_to_string(v)))
            })?;
            buf.push(tag::TIMESTAMP);
            buf.extend_from_slice(&((micros as u64) ^ TS_SIGN).to_be_bytes());
        }
        Value::Uuid(u) => {
            buf.push(tag::UUID);
            buf.extend_from_slice(u.as_bytes());
        }
    }
    Ok(())
}

/// Encodes `values` back to back into one ordered key.
pub fn encode_values<'a>(values: impl IntoIterator<Item = &'a Value>) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    for v in values {
        encode_value(&mut buf, v)?;
    }
    Ok(buf)
}

fn encode_int(buf: &mut Vec<u8>, n: i128) {
    buf.push(tag::INT);
    buf.extend_from_slice(&((n as u128) ^ INT_SIGN).to_be_bytes());
}

fn encode_escaped(buf: &mut Vec<u8>, bytes: &[u8]) {
    for b in bytes {
        buf.push(*b);
        if *b == 0x00 {
            buf.push(0xFF);
        }
    }
    buf.push(0x00);
    buf.push(0x00);
}

/// Decodes one value at `*pos` as column type `dtype`, advancing `pos`.
pub fn decode_value(bytes: &[u8], pos: &mut usize, dtype: &DataType) -> Result<Value> {
    let t = *bytes
        .get(*pos)
        .ok_or_else(|| Error::Codec("unexpected end of key".to_string()))?;
    *pos += 1;
    let value = match (t, dtype) {
        (tag::NULL, _) => Value::Null,
        (tag::FALSE, DataType::Bool) => Value::Bool(false),
        (tag::TRUE, DataType::Bool) => Value::Bool(true),
        (tag::INT, DataType::Int) => {
            let n = decode_int(bytes, pos)?;
            Value::Int(
                i64::try_from(n).map_err(|_| Error::Codec(format!("int {n} out of range")))?,
            )
        }
        (tag::INT, DataType::BigInt) => Value::BigInt(decode_int(bytes, pos)?),
        (tag::TEXT, DataType::Text) => Value::Text(decode_text(bytes, pos)?),
        (tag::TEXT, DataType::VarChar(_)) => Value::VarChar(decode_text(bytes, pos)?),
        (tag::BLOB, DataType::Blob) => Value::Blob(decode_escaped(bytes, pos)?),
        (tag::DATE, DataType::Date) => {
            let raw = u32::from_be_bytes(take::<4>(bytes, pos)?) ^ DATE_SIGN;
            let d = NaiveDate::from_num_days_from_ce_opt(raw as i32)
                .ok_or_else(|| Error::Codec(format!("invalid date ordinal {}", raw as i32)))?;
            Value::Date(d)
        }
        (tag::TIMESTAMP, DataType::Timestamp) => {
            let micros = (u64::from_be_bytes(take::<8>(bytes, pos)?) ^ TS_SIGN) as i64;
            let ts = epoch()
                .checked_add_signed(Duration::microseconds(micros))
                .ok_or_else(|| Error::Codec(format!("invalid timestamp {micros}")))?;
            Value::Timestamp(ts)
        }
        (tag::UUID, DataType::Uuid) => Value::Uuid(Uuid::from_bytes(take::<16>(bytes, pos)?)),
        (other, dtype) => {
            return Err(Error::Codec(format!(
                "tag 0x{other:02X} cannot be decoded as {dtype:?}"
            )));
        }
    };
    Ok(value)
}

/// Decodes one value per entry of `types`, returning the values and the
/// number of bytes consumed.
pub fn decode_values(bytes: &[u8], types: &[DataType]) -> Result<(Vec<Value>, usize)> {
    let mut pos = 0;
    let mut out = Vec::with_capacity(types.len());
    for dtype in types {
        out.push(decode_value(bytes, &mut pos, dtype)?);
    }
    Ok((out, pos))
}

/// Skips `count` encoded values without knowing their column types.
pub fn skip_values(bytes: &[u8], count: usize) -> Result<usize> {
    let mut pos = 0;
    for _ in 0..count {
        let t = *bytes
            .get(pos)
            .ok_or_else(|| Error::Codec("unexpected end of key".to_string()))?;
        pos += 1;
        match t {
            tag::NULL | tag::FALSE | tag::TRUE => {}
            tag::INT | tag::UUID => pos += 16,
            tag::DATE => pos += 4,
            tag::TIMESTAMP => pos += 8,
            tag::TEXT | tag::BLOB => {
                decode_escaped(bytes, &mut pos)?;
            }
            other => return Err(Error::Codec(format!("unknown tag 0x{other:02X}"))),
        }
        if pos > bytes.len() {
            return Err(Error::Codec("unexpected end of key".to_string()));
        }
    }
    Ok(pos)
}

/// True when any of the first `count` encoded values is NULL.
pub fn has_null_segment(bytes: &[u8], count: usize) -> Result<bool> {
    let mut pos = 0;
    for _ in 0..count {
        if bytes.get(pos) == Some(&tag::NULL) {
            return Ok(true);
        }
        pos += skip_values(&bytes[pos..], 1)?;
    }
    Ok(false)
}

fn decode_int(bytes: &[u8], pos: &mut usize) -> Result<i128> {
    Ok((u128::from_be_bytes(take::<16>(bytes, pos)?) ^ INT_SIGN) as i128)
}

fn decode_text(bytes: &[u8], pos: &mut usize) -> Result<String> {
    String::from_utf8(decode_escaped(bytes, pos)?)
        .map_err(|e| Error::Codec(format!("invalid utf-8 in text key: {e}")))
}

fn decode_escaped(bytes: &[u8], pos: &mut usize) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    loop {
        let b = *bytes
            .get(*pos)
            .ok_or_else(|| Error::Codec("unterminated string in key".to_string()))?;
        *pos += 1;
        if b != 0x00 {
            out.push(b);
            continue;
        }
        match bytes.get(*pos) {
            Some(0x00) => {
                *pos += 1;
                return Ok(out);
            }
            Some(0xFF) => {
                *pos += 1;
                out.push(0x00);
            }
            _ => return Err(Error::Codec("bad escape in string key".to_string())),
        }
    }
}

fn take<const N: usize>(bytes: &[u8], pos: &mut usize) -> Result<[u8; N]> {
    let end = *pos + N;
    let slice = bytes
        .get(*pos..end)
        .ok_or_else(|| Error::Codec("unexpected end of key".to_string()))?;
    *pos = end;
    let mut out = [0u8; N];
    out.copy_from_slice(slice);
    Ok(out)
}

/// Exclusive end of the half-open range of keys that extend `key`.
pub fn after(key: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(key.len() + 1);
    out.extend_from_slice(key);
    out.push(tag::AFTER);
    out
}

/// First key greater than every key starting with `prefix`.
pub fn strinc(prefix: &[u8]) -> Result<Vec<u8>> {
    let mut out = prefix.to_vec();
    while let Some(last) = out.pop() {
        if last != 0xFF {
            out.push(last + 1);
            return Ok(out);
        }
    }
    Err(Error::Codec("cannot increment an all-0xFF key".to_string()))
}

/// Formats values as `(v1,v2)` for duplicate-key messages.
pub fn format_tuple(values: &[Value]) -> String {
    let parts: Vec<String> = values.iter().map(value_to_string).collect();
    format!("({})", parts.join(","))
}
