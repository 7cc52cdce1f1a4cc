//! An asynchronous IPROTO client driver for Tarantool.
//!
//! [`Connection`](connection::Connection) owns one socket and multiplexes
//! requests over it by sync-id ([`multiplexer`]); [`request`]/[`response`]
//! implement the wire-level request bodies and result shapes; [`codec`]
//! implements the msgpack dialect (including Tarantool's decimal/uuid/
//! datetime/interval/error extension types); [`schema`] keeps an atomically
//! replaceable snapshot of `_vspace`/`_vindex` for resolving space/index/
//! field names; [`stream`] and [`prepared`] layer interactive transactions
//! and prepared SQL statements on top of the core request path.

pub mod codec;
pub mod connection;
pub mod error;
pub mod iproto;
pub mod multiplexer;
pub mod prepared;
pub mod push;
pub mod request;
pub mod response;
pub mod schema;
pub mod stream;
pub mod tuple;

pub use codec::Value;
pub use connection::{Config, Connection, EndpointConfig, Executor, State};
pub use error::{Error, ErrorDescriptor, ErrorFrame, Result, TarantoolErrorCode};
pub use iproto::{IsolationLevel, IteratorType};
pub use prepared::PreparedStatement;
pub use push::PushIterator;
pub use request::{IndexRef, IteratorArg, SpaceRef, TupleArg};
pub use schema::Schema;
pub use stream::{Stream, StreamTransaction};
pub use tuple::TarantoolTuple;
