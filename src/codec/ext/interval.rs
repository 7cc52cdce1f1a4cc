//! INTERVAL extension type: a leading field-count byte followed by
//! (field-id, zigzag-varint value) pairs. Unset fields are simply absent.

use crate::error::{Error, Result};
use std::io::Write;

const FIELD_YEAR: u8 = 0;
const FIELD_MONTH: u8 = 1;
const FIELD_WEEK: u8 = 2;
const FIELD_DAY: u8 = 3;
const FIELD_HOUR: u8 = 4;
const FIELD_MINUTE: u8 = 5;
const FIELD_SECOND: u8 = 6;
const FIELD_NANOSECOND: u8 = 7;
const FIELD_ADJUST: u8 = 8;

/// A decoded `INTERVAL` value: a calendar/clock offset broken into
/// independent components, matching Tarantool's own representation rather
/// than collapsing to a single duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Interval {
    pub year: i64,
    pub month: i64,
    pub week: i64,
    pub day: i64,
    pub hour: i64,
    pub minute: i64,
    pub second: i64,
    pub nanosecond: i64,
    /// Day-of-month adjustment rule applied when year/month arithmetic spills
    /// over a shorter month (0 = none, 1 = excess, 2 = last day of month).
    pub adjust: i64,
}

impl Interval {
    fn fields(&self) -> Vec<(u8, i64)> {
        let mut fields = Vec::with_capacity(9);
        let mut push = |id, value: i64| {
            if value != 0 {
                fields.push((id, value));
            }
        };
        push(FIELD_YEAR, self.year);
        push(FIELD_MONTH, self.month);
        push(FIELD_WEEK, self.week);
        push(FIELD_DAY, self.day);
        push(FIELD_HOUR, self.hour);
        push(FIELD_MINUTE, self.minute);
        push(FIELD_SECOND, self.second);
        push(FIELD_NANOSECOND, self.nanosecond);
        push(FIELD_ADJUST, self.adjust);
        fields
    }
}

fn zigzag_encode(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

fn zigzag_decode(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if value == 0 {
            break;
        }
    }
}

fn read_varint(bytes: &[u8], pos: &mut usize) -> Result<u64> {
    let mut value = 0u64;
    let mut shift = 0;
    loop {
        let byte = *bytes
            .get(*pos)
            .ok_or(Error::Protocol("truncated interval varint"))?;
        *pos += 1;
        value |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }
    Ok(value)
}

pub fn encode(out: &mut impl Write, value: &Interval) -> Result<()> {
    let fields = value.fields();
    let mut body = Vec::new();
    write_varint(&mut body, fields.len() as u64);
    for (id, v) in fields {
        body.push(id);
        write_varint(&mut body, zigzag_encode(v));
    }
    rmp::encode::write_ext_meta(out, body.len() as u32, super::EXT_INTERVAL)
        .map_err(|_| Error::Protocol("failed to write interval ext header"))?;
    out.write_all(&body)?;
    Ok(())
}

pub fn decode(payload: &[u8]) -> Result<Interval> {
    let mut pos = 0;
    let count = read_varint(payload, &mut pos)?;
    let mut value = Interval::default();
    for _ in 0..count {
        let id = *payload
            .get(pos)
            .ok_or(Error::Protocol("truncated interval field id"))?;
        pos += 1;
        let raw = read_varint(payload, &mut pos)?;
        let field = zigzag_decode(raw);
        match id {
            FIELD_YEAR => value.year = field,
            FIELD_MONTH => value.month = field,
            FIELD_WEEK => value.week = field,
            FIELD_DAY => value.day = field,
            FIELD_HOUR => value.hour = field,
            FIELD_MINUTE => value.minute = field,
            FIELD_SECOND => value.second = field,
            FIELD_NANOSECOND => value.nanosecond = field,
            FIELD_ADJUST => value.adjust = field,
            _ => return Err(Error::Protocol("unknown interval field id")),
        }
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_round_trip() {
        let value = Interval {
            day: 3,
            hour: -2,
            second: 30,
            ..Default::default()
        };
        let mut buf = Vec::new();
        encode(&mut buf, &value).unwrap();
        let mut cursor = std::io::Cursor::new(&buf[..]);
        let meta = rmp::decode::read_ext_meta(&mut cursor).unwrap();
        let payload = &buf[buf.len() - meta.size as usize..];
        assert_eq!(decode(payload).unwrap(), value);
    }

    #[test]
    fn interval_empty_round_trip() {
        let value = Interval::default();
        let mut buf = Vec::new();
        encode(&mut buf, &value).unwrap();
        let mut cursor = std::io::Cursor::new(&buf[..]);
        let meta = rmp::decode::read_ext_meta(&mut cursor).unwrap();
        let payload = &buf[buf.len() - meta.size as usize..];
        assert_eq!(decode(payload).unwrap(), value);
    }
}
