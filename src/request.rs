//! Translates logical operations into IPROTO request frames: a 5-byte
//! fixed-width size prefix, a header map, and a body map.

use crate::codec::{encode_value, Value};
use crate::error::{Error, Result};
use crate::iproto::*;
use crate::schema::{IndexDef, Schema, SpaceDef};
use std::sync::Arc;

/// A space argument: either already resolved to an id, or a name to look up
/// against the current [`Schema`] at encode time.
#[derive(Debug, Clone)]
pub enum SpaceRef {
    Id(u32),
    Name(String),
}

#[derive(Debug, Clone)]
pub enum IndexRef {
    Id(u32),
    Name(String),
}

impl Default for IndexRef {
    fn default() -> Self {
        IndexRef::Id(0)
    }
}

/// A tuple argument: a positional array, or a field-name-keyed mapping that
/// must be positionalized against a space's format.
#[derive(Debug, Clone)]
pub enum TupleArg {
    Positional(Vec<Value>),
    Named(Vec<(Value, Value)>),
}

impl TupleArg {
    fn resolve(&self, space: &SpaceDef) -> Result<Vec<Value>> {
        match self {
            TupleArg::Positional(values) => Ok(values.clone()),
            TupleArg::Named(mapping) => space.positionalize(mapping),
        }
    }
}

#[derive(Debug, Clone)]
pub enum IteratorArg {
    Type(IteratorType),
    Name(String),
    Code(u32),
}

impl IteratorArg {
    fn resolve(&self) -> Result<u32> {
        match self {
            IteratorArg::Type(t) => Ok(*t as u32),
            IteratorArg::Code(c) => Ok(*c),
            IteratorArg::Name(name) => IteratorType::from_name(name)
                .map(|t| t as u32)
                .ok_or_else(|| Error::Type(format!("unknown iterator name: {name}"))),
        }
    }
}

fn resolve_space<'s>(schema: &'s Schema, space: &SpaceRef) -> Result<&'s Arc<SpaceDef>> {
    match space {
        SpaceRef::Id(id) => schema
            .space_by_id(*id)
            .ok_or_else(|| Error::Schema(format!("no such space id: {id}"))),
        SpaceRef::Name(name) => schema.require_space_by_name(name),
    }
}

fn resolve_index<'s>(space: &'s SpaceDef, index: &IndexRef) -> Result<&'s Arc<IndexDef>> {
    match index {
        IndexRef::Id(id) => space
            .index_by_id(*id)
            .ok_or_else(|| Error::Schema(format!("space '{}' has no index id {}", space.name, id))),
        IndexRef::Name(name) => space
            .index_by_name(name)
            .ok_or_else(|| Error::Schema(format!("space '{}' has no index '{}'", space.name, name))),
    }
}

const UPDATE_OPCODES: &[&str] = &["=", "+", "-", "&", "|", "^", ":", "!", "#"];

/// Resolves string field specifiers in an update/upsert ops list to integer
/// positions against the space format, and validates the splice operation's
/// fixed five-element shape.
fn resolve_ops(space: &SpaceDef, ops: &[Value]) -> Result<Vec<Value>> {
    ops.iter()
        .map(|op| {
            let elements = op
                .as_array()
                .ok_or_else(|| Error::Value("update op must be an array".into()))?;
            let opcode = elements
                .first()
                .and_then(Value::as_str)
                .ok_or_else(|| Error::Value("update op missing opcode".into()))?;
            if !UPDATE_OPCODES.contains(&opcode) {
                return Err(Error::Value(format!("unknown update opcode: {opcode}")));
            }
            if opcode == ":" && elements.len() != 5 {
                return Err(Error::Value(
                    "splice op must have exactly five elements: [\":\", field, offset, length, replacement]".into(),
                ));
            }

            let field = elements
                .get(1)
                .ok_or_else(|| Error::Value("update op missing field specifier".into()))?;
            let position = match field {
                Value::String(name) => space
                    .field_positions
                    .position_of(name)
                    .ok_or_else(|| Error::Schema(format!("space '{}' has no field '{}'", space.name, name)))?
                    as i64,
                other => other
                    .as_i64()
                    .ok_or_else(|| Error::Value("update field specifier must be an int or string".into()))?,
            };

            let mut resolved = Vec::with_capacity(elements.len());
            resolved.push(Value::String(opcode.to_owned()));
            resolved.push(Value::Int(position));
            resolved.extend(elements[2..].iter().cloned());
            Ok(Value::Array(resolved))
        })
        .collect()
}

/// A fully-resolved request body, ready to be wrapped in an IPROTO frame by
/// the multiplexer once it has assigned a sync-id.
pub struct Body {
    pub request_type: RequestType,
    pub entries: Vec<(u8, Value)>,
}

fn body(request_type: RequestType, entries: Vec<(u8, Value)>) -> Body {
    Body { request_type, entries }
}

pub fn ping() -> Body {
    body(RequestType::Ping, vec![])
}

pub fn select(
    schema: &Schema,
    space: &SpaceRef,
    index: &IndexRef,
    key: TupleArg,
    limit: Option<u32>,
    offset: Option<u32>,
    iterator: IteratorArg,
) -> Result<Body> {
    let space_def = resolve_space(schema, space)?;
    let index_def = resolve_index(space_def, index)?;
    let key = key.resolve(space_def)?;
    let iterator_code = iterator.resolve()?;

    Ok(body(
        RequestType::Select,
        vec![
            (SPACE_ID, Value::UInt(space_def.id as u64)),
            (INDEX_ID, Value::UInt(index_def.id as u64)),
            (LIMIT, Value::UInt(limit.unwrap_or(u32::MAX) as u64)),
            (OFFSET, Value::UInt(offset.unwrap_or(0) as u64)),
            (ITERATOR, Value::UInt(iterator_code as u64)),
            (KEY, Value::Array(key)),
        ],
    ))
}

pub fn insert(schema: &Schema, space: &SpaceRef, tuple: TupleArg) -> Result<Body> {
    let space_def = resolve_space(schema, space)?;
    let tuple = tuple.resolve(space_def)?;
    Ok(body(
        RequestType::Insert,
        vec![
            (SPACE_ID, Value::UInt(space_def.id as u64)),
            (TUPLE, Value::Array(tuple)),
        ],
    ))
}

pub fn replace(schema: &Schema, space: &SpaceRef, tuple: TupleArg) -> Result<Body> {
    let space_def = resolve_space(schema, space)?;
    let tuple = tuple.resolve(space_def)?;
    Ok(body(
        RequestType::Replace,
        vec![
            (SPACE_ID, Value::UInt(space_def.id as u64)),
            (TUPLE, Value::Array(tuple)),
        ],
    ))
}

pub fn update(
    schema: &Schema,
    space: &SpaceRef,
    index: &IndexRef,
    key: TupleArg,
    ops: Vec<Value>,
) -> Result<Body> {
    let space_def = resolve_space(schema, space)?;
    let index_def = resolve_index(space_def, index)?;
    let key = key.resolve(space_def)?;
    let ops = resolve_ops(space_def, &ops)?;

    Ok(body(
        RequestType::Update,
        vec![
            (SPACE_ID, Value::UInt(space_def.id as u64)),
            (INDEX_ID, Value::UInt(index_def.id as u64)),
            (KEY, Value::Array(key)),
            (OPS, Value::Array(ops)),
        ],
    ))
}

pub fn upsert(schema: &Schema, space: &SpaceRef, tuple: TupleArg, ops: Vec<Value>) -> Result<Body> {
    let space_def = resolve_space(schema, space)?;
    let tuple = tuple.resolve(space_def)?;
    let ops = resolve_ops(space_def, &ops)?;

    Ok(body(
        RequestType::Upsert,
        vec![
            (SPACE_ID, Value::UInt(space_def.id as u64)),
            (TUPLE, Value::Array(tuple)),
            (OPS, Value::Array(ops)),
        ],
    ))
}

pub fn delete(schema: &Schema, space: &SpaceRef, index: &IndexRef, key: TupleArg) -> Result<Body> {
    let space_def = resolve_space(schema, space)?;
    let index_def = resolve_index(space_def, index)?;
    let key = key.resolve(space_def)?;

    Ok(body(
        RequestType::Delete,
        vec![
            (SPACE_ID, Value::UInt(space_def.id as u64)),
            (INDEX_ID, Value::UInt(index_def.id as u64)),
            (KEY, Value::Array(key)),
        ],
    ))
}

pub fn call(function_name: &str, args: Vec<Value>) -> Body {
    body(
        RequestType::Call,
        vec![
            (FUNCTION_NAME, Value::String(function_name.to_owned())),
            (TUPLE, Value::Array(args)),
        ],
    )
}

pub fn eval(expr: &str, args: Vec<Value>) -> Body {
    body(
        RequestType::Eval,
        vec![
            (EXPR, Value::String(expr.to_owned())),
            (TUPLE, Value::Array(args)),
        ],
    )
}

pub fn execute_sql(sql_text: &str, bind: Vec<Value>) -> Body {
    body(
        RequestType::Execute,
        vec![
            (SQL_TEXT, Value::String(sql_text.to_owned())),
            (SQL_BIND, Value::Array(bind)),
        ],
    )
}

pub fn execute_prepared(statement_id: u64, bind: Vec<Value>) -> Body {
    body(
        RequestType::Execute,
        vec![
            (STMT_ID, Value::UInt(statement_id)),
            (SQL_BIND, Value::Array(bind)),
        ],
    )
}

pub fn prepare(sql_text: &str) -> Body {
    body(RequestType::Prepare, vec![(SQL_TEXT, Value::String(sql_text.to_owned()))])
}

pub fn auth(username: &str, scramble: [u8; 20]) -> Body {
    body(
        RequestType::Auth,
        vec![
            (USER_NAME, Value::String(username.to_owned())),
            (
                TUPLE,
                Value::Array(vec![
                    Value::String("chap-sha1".to_owned()),
                    Value::Binary(scramble.to_vec()),
                ]),
            ),
        ],
    )
}

pub fn begin(isolation: IsolationLevel, timeout: Option<f64>) -> Body {
    let mut entries = vec![(TXN_ISOLATION, Value::UInt(isolation as u64))];
    if let Some(timeout) = timeout {
        entries.push((TIMEOUT, Value::Float(timeout)));
    }
    body(RequestType::Begin, entries)
}

pub fn commit() -> Body {
    body(RequestType::Commit, vec![])
}

pub fn rollback() -> Body {
    body(RequestType::Rollback, vec![])
}

/// Encodes a full IPROTO frame: size prefix, header map, body map.
pub fn encode_frame(
    body: &Body,
    sync: u64,
    schema_version: u64,
    stream_id: Option<u64>,
) -> Result<Vec<u8>> {
    let mut header_and_body = Vec::new();

    let header_len = if stream_id.is_some() { 4 } else { 3 };
    rmp::encode::write_map_len(&mut header_and_body, header_len)?;
    rmp::encode::write_pfix(&mut header_and_body, REQUEST_TYPE)?;
    rmp::encode::write_uint(&mut header_and_body, body.request_type as u64)?;
    rmp::encode::write_pfix(&mut header_and_body, SYNC)?;
    rmp::encode::write_uint(&mut header_and_body, sync)?;
    rmp::encode::write_pfix(&mut header_and_body, SCHEMA_VERSION)?;
    rmp::encode::write_uint(&mut header_and_body, schema_version)?;
    if let Some(stream_id) = stream_id {
        rmp::encode::write_pfix(&mut header_and_body, STREAM_ID)?;
        rmp::encode::write_uint(&mut header_and_body, stream_id)?;
    }

    rmp::encode::write_map_len(&mut header_and_body, body.entries.len() as u32)?;
    for (key, value) in &body.entries {
        rmp::encode::write_pfix(&mut header_and_body, *key)?;
        encode_value(&mut header_and_body, value)?;
    }

    let mut frame = Vec::with_capacity(5 + header_and_body.len());
    rmp::encode::write_u32(&mut frame, header_and_body.len() as u32)?;
    frame.extend_from_slice(&header_and_body);
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Value;

    fn schema_with_tester() -> Schema {
        let space_row = vec![
            Value::UInt(512),
            Value::UInt(1),
            Value::from("tester"),
            Value::from("memtx"),
            Value::UInt(2),
            Value::Map(vec![]),
            Value::Array(vec![
                Value::Map(vec![
                    (Value::from("name"), Value::from("id")),
                    (Value::from("type"), Value::from("unsigned")),
                ]),
                Value::Map(vec![
                    (Value::from("name"), Value::from("name")),
                    (Value::from("type"), Value::from("string")),
                ]),
            ]),
        ];
        let index_row = vec![
            Value::UInt(512),
            Value::UInt(0),
            Value::from("primary"),
            Value::from("tree"),
            Value::Map(vec![]),
            Value::Array(vec![Value::Map(vec![(Value::from("field"), Value::UInt(0))])]),
        ];
        Schema::from_rows(1, &[space_row], &[index_row]).unwrap()
    }

    #[test]
    fn select_resolves_names_and_encodes() {
        let schema = schema_with_tester();
        let b = select(
            &schema,
            &SpaceRef::Name("tester".into()),
            &IndexRef::Name("primary".into()),
            TupleArg::Positional(vec![Value::Int(1)]),
            None,
            None,
            IteratorArg::Name("EQ".into()),
        )
        .unwrap();
        let frame = encode_frame(&b, 1, 1, None).unwrap();
        assert!(!frame.is_empty());
    }

    #[test]
    fn insert_positionalizes_named_tuple() {
        let schema = schema_with_tester();
        let space_def = schema.require_space_by_name("tester").unwrap();
        let tuple = TupleArg::Named(vec![(Value::from("name"), Value::from("hi"))]).resolve(space_def).unwrap();
        assert_eq!(tuple, vec![Value::Nil, Value::String("hi".into())]);
    }

    #[test]
    fn update_splice_requires_five_elements() {
        let schema = schema_with_tester();
        let space_def = schema.require_space_by_name("tester").unwrap();
        let bad = vec![Value::Array(vec![Value::from(":"), Value::from("name")])];
        assert!(resolve_ops(space_def, &bad).is_err());
    }

    #[test]
    fn update_resolves_field_name_to_position() {
        let schema = schema_with_tester();
        let space_def = schema.require_space_by_name("tester").unwrap();
        let ops = vec![Value::Array(vec![
            Value::from("="),
            Value::from("name"),
            Value::from("hi!"),
        ])];
        let resolved = resolve_ops(space_def, &ops).unwrap();
        match &resolved[0] {
            Value::Array(elements) => assert_eq!(elements[1], Value::Int(1)),
            _ => panic!("expected array"),
        }
    }
}
