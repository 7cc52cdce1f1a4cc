//! A self-contained msgpack value type that understands Tarantool's `MP_EXT`
//! dialect (decimal, uuid, datetime, interval, error) in addition to the
//! plain msgpack types, plus the recursive encoder/decoder pair that moves
//! between it and raw bytes.
//!
//! Tarantool's servers frequently tag what is logically a UTF-8 string with
//! the `MP_BIN` marker instead of `MP_STR` (most notably tuple field values
//! coming back from `box.space` when the schema doesn't pin a string type).
//! [`Value::Binary`] is kept distinct from [`Value::String`] for exactly
//! this reason: callers that know a field is textual should convert
//! explicitly rather than have the codec silently guess.

pub mod ext;

use crate::error::{Error, ErrorDescriptor, Result};
use bigdecimal::BigDecimal;
use ext::datetime::Datetime;
use ext::interval::Interval;
use std::io::{Read, Write};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    String(String),
    Binary(Vec<u8>),
    Array(Vec<Value>),
    Map(Vec<(Value, Value)>),
    Decimal(BigDecimal),
    Uuid(Uuid),
    Datetime(Datetime),
    Interval(Interval),
    Error(ErrorDescriptor),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::UInt(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::UInt(v) => Some(*v),
            Value::Int(v) => u64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&[(Value, Value)]> {
        match self {
            Value::Map(entries) => Some(entries),
            _ => None,
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::UInt(v)
    }
}

pub fn encode_value(out: &mut impl Write, value: &Value) -> Result<()> {
    match value {
        Value::Nil => rmp::encode::write_nil(out).map_err(|_| Error::Protocol("failed to write nil"))?,
        Value::Bool(b) => rmp::encode::write_bool(out, *b).map_err(|_| Error::Protocol("failed to write bool"))?,
        Value::Int(v) => {
            rmp::encode::write_sint(out, *v)?;
        }
        Value::UInt(v) => {
            rmp::encode::write_uint(out, *v)?;
        }
        Value::Float(v) => {
            rmp::encode::write_f64(out, *v)?;
        }
        Value::String(s) => {
            rmp::encode::write_str(out, s)?;
        }
        Value::Binary(bytes) => {
            rmp::encode::write_bin(out, bytes)?;
        }
        Value::Array(items) => {
            rmp::encode::write_array_len(out, items.len() as u32)?;
            for item in items {
                encode_value(out, item)?;
            }
        }
        Value::Map(entries) => {
            rmp::encode::write_map_len(out, entries.len() as u32)?;
            for (k, v) in entries {
                encode_value(out, k)?;
                encode_value(out, v)?;
            }
        }
        Value::Decimal(d) => ext::decimal::encode(out, d)?,
        Value::Uuid(u) => ext::uuid_ext::encode(out, u)?,
        Value::Datetime(dt) => ext::datetime::encode(out, dt)?,
        Value::Interval(iv) => ext::interval::encode(out, iv)?,
        Value::Error(descriptor) => ext::error_ext::encode(out, descriptor)?,
    }
    Ok(())
}

pub fn decode_value(reader: &mut &[u8]) -> Result<Value> {
    let marker = peek_marker(*reader)?;
    Ok(match marker {
        rmp::Marker::Null => {
            rmp::decode::read_nil(reader).map_err(|_| Error::Protocol("failed to read nil"))?;
            Value::Nil
        }
        rmp::Marker::True | rmp::Marker::False => {
            Value::Bool(rmp::decode::read_bool(reader).map_err(|_| Error::Protocol("failed to read bool"))?)
        }
        rmp::Marker::U64 => Value::UInt(rmp::decode::read_int::<u64, _>(reader)?),
        rmp::Marker::FixPos(_)
        | rmp::Marker::U8
        | rmp::Marker::U16
        | rmp::Marker::U32
        | rmp::Marker::FixNeg(_)
        | rmp::Marker::I8
        | rmp::Marker::I16
        | rmp::Marker::I32
        | rmp::Marker::I64 => Value::Int(rmp::decode::read_int::<i64, _>(reader)?),
        rmp::Marker::F32 => Value::Float(rmp::decode::read_f32(reader)? as f64),
        rmp::Marker::F64 => Value::Float(rmp::decode::read_f64(reader)?),
        rmp::Marker::FixStr(_) | rmp::Marker::Str8 | rmp::Marker::Str16 | rmp::Marker::Str32 => {
            let len = rmp::decode::read_str_len(reader)? as usize;
            let mut buf = vec![0u8; len];
            reader.read_exact(&mut buf)?;
            Value::String(String::from_utf8(buf).map_err(|_| Error::Protocol("string payload was not utf-8"))?)
        }
        rmp::Marker::Bin8 | rmp::Marker::Bin16 | rmp::Marker::Bin32 => {
            let len = rmp::decode::read_bin_len(reader)? as usize;
            let mut buf = vec![0u8; len];
            reader.read_exact(&mut buf)?;
            Value::Binary(buf)
        }
        rmp::Marker::FixArray(_) | rmp::Marker::Array16 | rmp::Marker::Array32 => {
            let len = rmp::decode::read_array_len(reader)? as usize;
            let mut items = Vec::with_capacity(len);
            for _ in 0..len {
                items.push(decode_value(reader)?);
            }
            Value::Array(items)
        }
        rmp::Marker::FixMap(_) | rmp::Marker::Map16 | rmp::Marker::Map32 => {
            let len = rmp::decode::read_map_len(reader)? as usize;
            let mut entries = Vec::with_capacity(len);
            for _ in 0..len {
                let key = decode_value(reader)?;
                let value = decode_value(reader)?;
                entries.push((key, value));
            }
            Value::Map(entries)
        }
        rmp::Marker::FixExt1
        | rmp::Marker::FixExt2
        | rmp::Marker::FixExt4
        | rmp::Marker::FixExt8
        | rmp::Marker::FixExt16
        | rmp::Marker::Ext8
        | rmp::Marker::Ext16
        | rmp::Marker::Ext32 => {
            let meta = rmp::decode::read_ext_meta(reader)
                .map_err(|_| Error::Protocol("failed to read ext header"))?;
            let mut payload = vec![0u8; meta.size as usize];
            reader.read_exact(&mut payload)?;
            match meta.typ {
                ext::EXT_DECIMAL => Value::Decimal(ext::decimal::decode(&payload)?),
                ext::EXT_UUID => Value::Uuid(ext::uuid_ext::decode(&payload)?),
                ext::EXT_DATETIME => Value::Datetime(ext::datetime::decode(&payload)?),
                ext::EXT_INTERVAL => Value::Interval(ext::interval::decode(&payload)?),
                ext::EXT_ERROR => Value::Error(ext::error_ext::decode(&payload)?),
                _ => Value::Binary(payload),
            }
        }
        rmp::Marker::Reserved => return Err(Error::Protocol("reserved msgpack marker")),
    })
}

/// Reads the leading marker byte without consuming it, so the matching
/// high-level `rmp::decode` function can read the marker itself.
fn peek_marker(input: &[u8]) -> Result<rmp::Marker> {
    let byte = *input
        .first()
        .ok_or(Error::Protocol("unexpected end of msgpack stream"))?;
    Ok(rmp::Marker::from_u8(byte))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(value: Value) {
        let mut buf = Vec::new();
        encode_value(&mut buf, &value).unwrap();
        let mut cursor = &buf[..];
        let decoded = decode_value(&mut cursor).unwrap();
        assert_eq!(decoded, value);
        assert!(cursor.is_empty());
    }

    #[test]
    fn scalars_round_trip() {
        roundtrip(Value::Nil);
        roundtrip(Value::Bool(true));
        roundtrip(Value::Int(-42));
        roundtrip(Value::UInt(42));
        roundtrip(Value::Float(3.5));
        roundtrip(Value::String("hello".into()));
        roundtrip(Value::Binary(vec![1, 2, 3]));
    }

    #[test]
    fn nested_collections_round_trip() {
        roundtrip(Value::Array(vec![Value::Int(1), Value::String("x".into())]));
        roundtrip(Value::Map(vec![(Value::String("k".into()), Value::Int(7))]));
    }

    #[test]
    fn ext_types_round_trip_through_value() {
        roundtrip(Value::Uuid(Uuid::new_v4()));
        roundtrip(Value::Datetime(Datetime::from_seconds(100)));
        roundtrip(Value::Interval(Interval::default()));
    }
}
