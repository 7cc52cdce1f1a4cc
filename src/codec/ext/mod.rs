//! `MP_EXT` extension-type payloads used by Tarantool's msgpack dialect.

pub mod datetime;
pub mod decimal;
pub mod error_ext;
pub mod interval;
pub mod uuid_ext;

/// Tarantool's `MP_EXT` type tags.
pub const EXT_DECIMAL: i8 = 1;
pub const EXT_UUID: i8 = 2;
pub const EXT_ERROR: i8 = 3;
pub const EXT_DATETIME: i8 = 4;
pub const EXT_INTERVAL: i8 = 6;
