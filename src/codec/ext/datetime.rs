//! DATETIME extension type.
//!
//! 8 bytes of little-endian signed seconds since the Unix epoch, optionally
//! followed by an 8-byte trailer: nanoseconds (i32 LE), timezone offset in
//! minutes (i16 LE), and a Tarantool timezone index (i16 LE). The trailer is
//! only written when nanoseconds or timezone information is non-zero; a
//! reader must accept both the 8-byte and 16-byte forms.

use crate::error::{Error, Result};
use std::io::Write;

/// A decoded Tarantool datetime value.
///
/// `tz_index` maps to Tarantool's internal IANA timezone table; this driver
/// only recognizes a small, commonly-used subset (see [`tz_index_for_name`])
/// and otherwise falls back to encoding a fixed `tz_offset_minutes` with
/// `tz_index` left at zero, which Tarantool accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Datetime {
    pub seconds: i64,
    pub nanoseconds: i32,
    pub tz_offset_minutes: i16,
    pub tz_index: i16,
}

impl Datetime {
    pub fn from_seconds(seconds: i64) -> Self {
        Self {
            seconds,
            ..Default::default()
        }
    }

    pub fn with_tz_name(mut self, name: &str) -> Self {
        if let Some(index) = tz_index_for_name(name) {
            self.tz_index = index;
        }
        self
    }

    fn has_trailer(&self) -> bool {
        self.nanoseconds != 0 || self.tz_offset_minutes != 0 || self.tz_index != 0
    }
}

pub fn encode(out: &mut impl Write, value: &Datetime) -> Result<()> {
    let len = if value.has_trailer() { 16 } else { 8 };
    rmp::encode::write_ext_meta(out, len, super::EXT_DATETIME)
        .map_err(|_| Error::Protocol("failed to write datetime ext header"))?;
    out.write_all(&value.seconds.to_le_bytes())?;
    if len == 16 {
        out.write_all(&value.nanoseconds.to_le_bytes())?;
        out.write_all(&value.tz_offset_minutes.to_le_bytes())?;
        out.write_all(&value.tz_index.to_le_bytes())?;
    }
    Ok(())
}

pub fn decode(payload: &[u8]) -> Result<Datetime> {
    if payload.len() != 8 && payload.len() != 16 {
        return Err(Error::Protocol("datetime payload must be 8 or 16 bytes"));
    }
    let seconds = i64::from_le_bytes(payload[0..8].try_into().unwrap());
    let (nanoseconds, tz_offset_minutes, tz_index) = if payload.len() == 16 {
        (
            i32::from_le_bytes(payload[8..12].try_into().unwrap()),
            i16::from_le_bytes(payload[12..14].try_into().unwrap()),
            i16::from_le_bytes(payload[14..16].try_into().unwrap()),
        )
    } else {
        (0, 0, 0)
    };
    Ok(Datetime {
        seconds,
        nanoseconds,
        tz_offset_minutes,
        tz_index,
    })
}

/// A small table of IANA zone name to Tarantool timezone index, covering the
/// zones commonly seen in tests and examples. Names outside this table should
/// be encoded as a fixed `tz_offset_minutes` instead.
pub fn tz_index_for_name(name: &str) -> Option<i16> {
    Some(match name {
        "UTC" => 0,
        "Europe/Moscow" => 232,
        "Europe/London" => 179,
        "America/New_York" => 348,
        "America/Los_Angeles" => 313,
        "Asia/Tokyo" => 529,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn datetime_round_trip_seconds_only() {
        let value = Datetime::from_seconds(1_700_000_000);
        let mut buf = Vec::new();
        encode(&mut buf, &value).unwrap();
        let payload = &buf[buf.len() - 8..];
        assert_eq!(decode(payload).unwrap(), value);
    }

    #[test]
    fn datetime_round_trip_with_trailer() {
        let value = Datetime {
            seconds: -12345,
            nanoseconds: 500_000_000,
            tz_offset_minutes: -300,
            tz_index: 0,
        };
        let mut buf = Vec::new();
        encode(&mut buf, &value).unwrap();
        let payload = &buf[buf.len() - 16..];
        assert_eq!(decode(payload).unwrap(), value);
    }
}
