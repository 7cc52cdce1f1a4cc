//! IPROTO wire constants: header/body map keys and request-type codes.
//!
//! Values match the Tarantool IPROTO wire format exactly; see
//! `docs.tarantool.io` for the canonical key/value table. Grounded in the
//! reference corpus's own Tarantool `net_box` bindings (the
//! `picodata-tarantool-module`/`bitrise-io-tarantool-module` protocol
//! files), which define the same constants under the same names.

// Header keys.
pub const REQUEST_TYPE: u8 = 0x00;
pub const SYNC: u8 = 0x01;
pub const SCHEMA_VERSION: u8 = 0x05;
pub const STREAM_ID: u8 = 0x0a;

// Body keys.
pub const SPACE_ID: u8 = 0x10;
pub const INDEX_ID: u8 = 0x11;
pub const LIMIT: u8 = 0x12;
pub const OFFSET: u8 = 0x13;
pub const ITERATOR: u8 = 0x14;
pub const INDEX_BASE: u8 = 0x15;

pub const KEY: u8 = 0x20;
pub const TUPLE: u8 = 0x21;
pub const FUNCTION_NAME: u8 = 0x22;
pub const USER_NAME: u8 = 0x23;
pub const EXPR: u8 = 0x27;
pub const OPS: u8 = 0x28;

pub const DATA: u8 = 0x30;
pub const ERROR_24: u8 = 0x31;
pub const METADATA: u8 = 0x32;
pub const BIND_METADATA: u8 = 0x33;
pub const BIND_COUNT: u8 = 0x34;

pub const SQL_TEXT: u8 = 0x40;
pub const SQL_BIND: u8 = 0x41;
pub const SQL_INFO: u8 = 0x42;
pub const STMT_ID: u8 = 0x43;

pub const TXN_ISOLATION: u8 = 0x59;
pub const TIMEOUT: u8 = 0x56;

/// `IPROTO_ERROR`: the extended `MP_ERROR` descriptor, as opposed to the
/// plain-string `ERROR_24` key kept for protocol-version compatibility.
pub const ERROR: u32 = 0x52;

/// Bit set on a response's status code to indicate an error.
pub const RESPONSE_ERROR_BIT: u32 = 0x8000;

/// Request-type code reserved for server push messages sharing a request's sync.
pub const RESPONSE_TYPE_CHUNK: u32 = 0x80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum RequestType {
    Select = 1,
    Insert = 2,
    Replace = 3,
    Update = 4,
    Delete = 5,
    Auth = 7,
    Eval = 8,
    Upsert = 9,
    Call = 10,
    Execute = 11,
    Prepare = 13,
    Begin = 14,
    Commit = 15,
    Rollback = 16,
    Watch = 74,
    Unwatch = 75,
    Event = 76,
    WatchOnce = 79,
    Ping = 64,
}

/// Canonical iterator types for `select`, matching Tarantool's `box.index.*` constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum IteratorType {
    Eq = 0,
    Req = 1,
    All = 2,
    Lt = 3,
    Le = 4,
    Ge = 5,
    Gt = 6,
    BitsAllSet = 7,
    BitsAnySet = 8,
    BitsAllNotSet = 9,
    Overlaps = 10,
    Neighbor = 11,
}

impl IteratorType {
    /// Resolve an iterator argument given as a canonical name string.
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name.to_ascii_uppercase().as_str() {
            "EQ" => IteratorType::Eq,
            "REQ" => IteratorType::Req,
            "ALL" => IteratorType::All,
            "LT" => IteratorType::Lt,
            "LE" => IteratorType::Le,
            "GE" => IteratorType::Ge,
            "GT" => IteratorType::Gt,
            "BITS_ALL_SET" => IteratorType::BitsAllSet,
            "BITS_ANY_SET" => IteratorType::BitsAnySet,
            "BITS_ALL_NOT_SET" => IteratorType::BitsAllNotSet,
            "OVERLAPS" => IteratorType::Overlaps,
            "NEIGHBOR" => IteratorType::Neighbor,
            _ => return None,
        })
    }

    pub fn from_u32(value: u32) -> Option<Self> {
        Some(match value {
            0 => IteratorType::Eq,
            1 => IteratorType::Req,
            2 => IteratorType::All,
            3 => IteratorType::Lt,
            4 => IteratorType::Le,
            5 => IteratorType::Ge,
            6 => IteratorType::Gt,
            7 => IteratorType::BitsAllSet,
            8 => IteratorType::BitsAnySet,
            9 => IteratorType::BitsAllNotSet,
            10 => IteratorType::Overlaps,
            11 => IteratorType::Neighbor,
            _ => return None,
        })
    }
}

/// Isolation level accepted by `IPROTO_BEGIN`'s `TXN_ISOLATION` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum IsolationLevel {
    #[default]
    Default = 0,
    ReadCommitted = 1,
    ReadConfirmed = 2,
    BestEffort = 3,
}
