//! Parses IPROTO response frames into a [`Response`], dispatching on the
//! status code and the body's key set.

use crate::codec::ext::error_ext;
use crate::codec::{decode_value, Value};
use crate::error::{Error, ErrorDescriptor, Result};
use crate::iproto::*;
use crate::tuple::{FieldIndex, TarantoolTuple};
use std::sync::Arc;

/// The body payload of a successful response, distinguishing plain tuple
/// data from SQL-specific result shapes.
#[derive(Debug, Clone)]
pub enum Body {
    Tuples(Vec<TarantoolTuple>),
    /// A scalar result, e.g. `call`/`eval` returning a non-tuple value or an
    /// empty body.
    Scalar(Value),
    Sql {
        rows: Vec<TarantoolTuple>,
        row_count: Option<u64>,
        autoincrement_ids: Vec<i64>,
        metadata: Vec<String>,
    },
    Prepared {
        statement_id: u64,
        param_count: Option<u32>,
        metadata: Vec<String>,
    },
}

#[derive(Debug, Clone)]
pub struct Response {
    pub sync: u64,
    pub schema_version: u64,
    pub is_push: bool,
    pub body: Body,
}

/// The routing-relevant part of a response header, valid whether the body
/// turned out to carry a value or a `DatabaseError`.
#[derive(Debug, Clone, Copy)]
pub struct ResponseMeta {
    pub sync: u64,
    pub schema_version: u64,
    pub is_push: bool,
}

/// Parses one complete frame's header+body bytes (the size prefix must
/// already have been consumed by the caller's framing reader). The outer
/// `Result` fails only on a malformed/unroutable header; the inner `Result`
/// carries a `DatabaseError` for server-reported failures, which the
/// multiplexer still routes to the correct waiter by sync-id.
///
/// The header (and therefore the sync-id) must be parsed before the body
/// can be decoded, so the field index to resolve named tuples against is
/// supplied as a callback rather than a fixed value — `resolve_fields` is
/// invoked with the sync-id once it's known, typically looking it up from
/// whatever was recorded when the request was registered.
pub fn parse_frame(
    bytes: &[u8],
    resolve_fields: impl FnOnce(u64) -> Option<Arc<FieldIndex>>,
) -> Result<(ResponseMeta, Result<Body>)> {
    let mut reader = bytes;
    let (status, sync, schema_version) = parse_header(&mut reader)?;
    let is_push = status == RESPONSE_TYPE_CHUNK;
    let meta = ResponseMeta {
        sync,
        schema_version,
        is_push,
    };

    if status & RESPONSE_ERROR_BIT != 0 {
        let code = Error::code_from_status(status);
        let (message, descriptor) = parse_error_body(&mut reader)?;
        return Ok((
            meta,
            Err(Error::Database {
                code,
                message,
                descriptor,
            }),
        ));
    }

    let fields = resolve_fields(sync);
    Ok((meta, parse_ok_body(&mut reader, fields.as_ref())))
}

fn parse_header(reader: &mut &[u8]) -> Result<(u32, u64, u64)> {
    let len = rmp::decode::read_map_len(reader)?;
    let mut status = None;
    let mut sync = None;
    let mut schema_version = 0u64;

    for _ in 0..len {
        let key = rmp::decode::read_int::<u64, _>(reader)?;
        match key as u8 {
            REQUEST_TYPE => status = Some(rmp::decode::read_int::<u32, _>(reader)?),
            SYNC => sync = Some(rmp::decode::read_int::<u64, _>(reader)?),
            SCHEMA_VERSION => schema_version = rmp::decode::read_int::<u64, _>(reader)?,
            _ => {
                decode_value(reader)?;
            }
        }
    }

    Ok((
        status.ok_or(Error::Protocol("response header missing status"))?,
        sync.ok_or(Error::Protocol("response header missing sync"))?,
        schema_version,
    ))
}

fn parse_error_body(reader: &mut &[u8]) -> Result<(String, Option<ErrorDescriptor>)> {
    let len = rmp::decode::read_map_len(reader)?;
    let mut message = String::new();
    let mut descriptor = None;

    for _ in 0..len {
        let key = rmp::decode::read_int::<u64, _>(reader)?;
        match key as u8 {
            ERROR_24 => {
                if let Value::String(s) = decode_value(reader)? {
                    message = s;
                }
            }
            _ if key as u32 == ERROR => {
                if let Value::Array(frames) = decode_value(reader)? {
                    descriptor = Some(ErrorDescriptor {
                        stack: error_ext::decode_stack(&frames)?,
                    });
                }
            }
            _ => {
                decode_value(reader)?;
            }
        }
    }

    if message.is_empty() {
        if let Some(d) = &descriptor {
            message = d.to_string();
        }
    }

    Ok((message, descriptor))
}

fn parse_ok_body(reader: &mut &[u8], fields: Option<&Arc<FieldIndex>>) -> Result<Body> {
    if reader.is_empty() {
        return Ok(Body::Scalar(Value::Nil));
    }

    let len = rmp::decode::read_map_len(reader)?;
    let mut data: Option<Vec<Value>> = None;
    let mut sql_info_row_count = None;
    let mut sql_info_autoincrement_ids = Vec::new();
    let mut metadata_names = Vec::new();
    let mut statement_id = None;
    let mut bind_count = None;

    for _ in 0..len {
        let key = rmp::decode::read_int::<u64, _>(reader)?;
        match key as u8 {
            DATA => {
                if let Value::Array(items) = decode_value(reader)? {
                    data = Some(items);
                }
            }
            METADATA | BIND_METADATA => {
                if let Value::Array(items) = decode_value(reader)? {
                    metadata_names = items
                        .iter()
                        .filter_map(|item| {
                            item.as_map().and_then(|m| {
                                m.iter()
                                    .find(|(k, _)| k.as_str() == Some("name"))
                                    .and_then(|(_, v)| v.as_str().map(str::to_owned))
                            })
                        })
                        .collect();
                }
            }
            SQL_INFO => {
                if let Value::Map(entries) = decode_value(reader)? {
                    for (k, v) in entries {
                        match k.as_u64() {
                            Some(0) => sql_info_row_count = v.as_u64(),
                            Some(1) => {
                                if let Value::Array(ids) = v {
                                    sql_info_autoincrement_ids =
                                        ids.iter().filter_map(Value::as_i64).collect();
                                }
                            }
                            _ => {}
                        }
                    }
                }
            }
            STMT_ID => statement_id = decode_value(reader)?.as_u64(),
            BIND_COUNT => bind_count = decode_value(reader)?.as_u64().map(|v| v as u32),
            _ => {
                decode_value(reader)?;
            }
        }
    }

    if let Some(statement_id) = statement_id {
        return Ok(Body::Prepared {
            statement_id,
            param_count: bind_count,
            metadata: metadata_names,
        });
    }

    let rows = data.unwrap_or_default();
    if !metadata_names.is_empty() || sql_info_row_count.is_some() {
        let rows = rows.into_iter().map(row_to_tuple(fields)).collect();
        return Ok(Body::Sql {
            rows,
            row_count: sql_info_row_count,
            autoincrement_ids: sql_info_autoincrement_ids,
            metadata: metadata_names,
        });
    }

    if rows.len() == 1 && !matches!(rows[0], Value::Array(_)) {
        return Ok(Body::Scalar(rows.into_iter().next().unwrap()));
    }

    let tuples = rows.into_iter().map(row_to_tuple(fields)).collect();
    Ok(Body::Tuples(tuples))
}

fn row_to_tuple(fields: Option<&Arc<FieldIndex>>) -> impl Fn(Value) -> TarantoolTuple + '_ {
    move |row| {
        let values = match row {
            Value::Array(items) => items,
            other => vec![other],
        };
        match fields {
            Some(fields) => TarantoolTuple::with_fields(values, fields.clone()),
            None => TarantoolTuple::new(values),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode_value;

    fn encode_test_frame(status: u32, sync: u64, entries: Vec<(u8, Value)>) -> Vec<u8> {
        let mut buf = Vec::new();
        rmp::encode::write_map_len(&mut buf, 3).unwrap();
        rmp::encode::write_pfix(&mut buf, REQUEST_TYPE).unwrap();
        rmp::encode::write_uint(&mut buf, status as u64).unwrap();
        rmp::encode::write_pfix(&mut buf, SYNC).unwrap();
        rmp::encode::write_uint(&mut buf, sync).unwrap();
        rmp::encode::write_pfix(&mut buf, SCHEMA_VERSION).unwrap();
        rmp::encode::write_uint(&mut buf, 5).unwrap();

        rmp::encode::write_map_len(&mut buf, entries.len() as u32).unwrap();
        for (k, v) in entries {
            rmp::encode::write_pfix(&mut buf, k).unwrap();
            encode_value(&mut buf, &v).unwrap();
        }
        buf
    }

    #[test]
    fn parses_ok_tuple_response() {
        let frame = encode_test_frame(
            0,
            7,
            vec![(DATA, Value::Array(vec![Value::Array(vec![Value::Int(1), Value::from("hello")])]))],
        );
        let (meta, body) = parse_frame(&frame, |_| None).unwrap();
        assert_eq!(meta.sync, 7);
        assert!(!meta.is_push);
        match body.unwrap() {
            Body::Tuples(rows) => {
                assert_eq!(rows.len(), 1);
                assert_eq!(rows[0][0], Value::Int(1));
            }
            _ => panic!("expected tuples"),
        }
    }

    #[test]
    fn parses_push_response() {
        let frame = encode_test_frame(RESPONSE_TYPE_CHUNK, 3, vec![(DATA, Value::Array(vec![Value::from("hi")]))]);
        let (meta, _) = parse_frame(&frame, |_| None).unwrap();
        assert!(meta.is_push);
    }

    #[test]
    fn parses_error_response() {
        let frame = encode_test_frame(
            RESPONSE_ERROR_BIT | 36,
            1,
            vec![(ERROR_24, Value::from("no such space"))],
        );
        let (meta, body) = parse_frame(&frame, |_| None).unwrap();
        assert_eq!(meta.sync, 1);
        match body.unwrap_err() {
            Error::Database { code, message, .. } => {
                assert_eq!(code, 36);
                assert_eq!(message, "no such space");
            }
            _ => panic!("expected database error"),
        }
    }
}
