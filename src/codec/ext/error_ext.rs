//! ERROR extension type: a map with a single `MP_ERROR_STACK` (0x00) key
//! holding an array of frame maps (innermost cause last), each keyed by
//! `MP_ERROR_TYPE` (0x00), `MP_ERROR_FILE` (0x01), `MP_ERROR_LINE` (0x02),
//! `MP_ERROR_MESSAGE` (0x03), `MP_ERROR_ERRNO` (0x04), `MP_ERROR_ERRCODE`
//! (0x05), and an optional `MP_ERROR_FIELDS` (0x06) map of extra key/values.

use crate::error::{Error, ErrorDescriptor, ErrorFrame, Result};
use rmpv::Value;
use std::collections::BTreeMap;
use std::io::Write;

const MP_ERROR_STACK: u64 = 0x00;

const MP_ERROR_TYPE: u64 = 0x00;
const MP_ERROR_FILE: u64 = 0x01;
const MP_ERROR_LINE: u64 = 0x02;
const MP_ERROR_MESSAGE: u64 = 0x03;
const MP_ERROR_ERRNO: u64 = 0x04;
const MP_ERROR_ERRCODE: u64 = 0x05;
const MP_ERROR_FIELDS: u64 = 0x06;

pub fn encode(out: &mut impl Write, value: &ErrorDescriptor) -> Result<()> {
    let frames: Vec<Value> = value.stack.iter().map(frame_to_value).collect();
    let map = Value::Map(vec![(
        Value::from(MP_ERROR_STACK),
        Value::Array(frames),
    )]);

    let mut body = Vec::new();
    rmpv::encode::write_value(&mut body, &map)
        .map_err(|_| Error::Protocol("failed to encode error descriptor"))?;

    rmp::encode::write_ext_meta(out, body.len() as u32, super::EXT_ERROR)
        .map_err(|_| Error::Protocol("failed to write error ext header"))?;
    out.write_all(&body)?;
    Ok(())
}

fn frame_to_value(frame: &ErrorFrame) -> Value {
    let mut entries = vec![
        (Value::from(MP_ERROR_TYPE), Value::from(frame.error_type.clone())),
        (Value::from(MP_ERROR_FILE), Value::from(frame.file.clone())),
        (Value::from(MP_ERROR_LINE), Value::from(frame.line)),
        (Value::from(MP_ERROR_MESSAGE), Value::from(frame.message.clone())),
        (Value::from(MP_ERROR_ERRNO), Value::from(frame.errno)),
        (Value::from(MP_ERROR_ERRCODE), Value::from(frame.code)),
    ];
    if !frame.fields.is_empty() {
        let fields = frame
            .fields
            .iter()
            .map(|(k, v)| (Value::from(k.clone()), v.clone()))
            .collect();
        entries.push((Value::from(MP_ERROR_FIELDS), Value::Map(fields)));
    }
    Value::Map(entries)
}

pub fn decode(payload: &[u8]) -> Result<ErrorDescriptor> {
    let mut cursor = payload;
    let value = rmpv::decode::read_value(&mut cursor)
        .map_err(|_| Error::Protocol("failed to decode error descriptor"))?;

    let map = value
        .as_map()
        .ok_or(Error::Protocol("error descriptor was not a map"))?;
    let stack_value = map
        .iter()
        .find(|(k, _)| k.as_u64() == Some(MP_ERROR_STACK))
        .map(|(_, v)| v)
        .ok_or(Error::Protocol("error descriptor missing stack"))?;
    let frames = stack_value
        .as_array()
        .ok_or(Error::Protocol("error descriptor stack was not an array"))?;

    Ok(ErrorDescriptor {
        stack: decode_stack(frames)?,
    })
}

/// Decodes a bare array of frame maps, as seen in the `IPROTO_ERROR` (0x52)
/// response body key, which carries the stack directly without the
/// single-key wrapper map the `MP_ERROR` extension type uses.
pub fn decode_stack(frames: &[Value]) -> Result<Vec<ErrorFrame>> {
    frames.iter().map(value_to_frame).collect()
}

fn value_to_frame(value: &Value) -> Result<ErrorFrame> {
    let map = value
        .as_map()
        .ok_or(Error::Protocol("error frame was not a map"))?;

    let mut frame = ErrorFrame::default();
    for (key, val) in map {
        match key.as_u64() {
            Some(MP_ERROR_TYPE) => frame.error_type = val.as_str().unwrap_or_default().to_owned(),
            Some(MP_ERROR_FILE) => frame.file = val.as_str().unwrap_or_default().to_owned(),
            Some(MP_ERROR_LINE) => frame.line = val.as_u64().unwrap_or_default(),
            Some(MP_ERROR_MESSAGE) => frame.message = val.as_str().unwrap_or_default().to_owned(),
            Some(MP_ERROR_ERRNO) => frame.errno = val.as_u64().unwrap_or_default(),
            Some(MP_ERROR_ERRCODE) => frame.code = val.as_u64().unwrap_or_default(),
            Some(MP_ERROR_FIELDS) => {
                let mut fields = BTreeMap::new();
                if let Some(entries) = val.as_map() {
                    for (k, v) in entries {
                        if let Some(name) = k.as_str() {
                            fields.insert(name.to_owned(), v.clone());
                        }
                    }
                }
                frame.fields = fields;
            }
            _ => {}
        }
    }
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_descriptor_round_trip() {
        let value = ErrorDescriptor {
            stack: vec![ErrorFrame {
                error_type: "ClientError".into(),
                file: "box/box.cc".into(),
                line: 42,
                message: "no such space".into(),
                errno: 0,
                code: 36,
                fields: BTreeMap::new(),
            }],
        };
        let mut buf = Vec::new();
        encode(&mut buf, &value).unwrap();
        let mut cursor = std::io::Cursor::new(&buf[..]);
        let meta = rmp::decode::read_ext_meta(&mut cursor).unwrap();
        let payload = &buf[buf.len() - meta.size as usize..];
        assert_eq!(decode(payload).unwrap(), value);
    }
}
