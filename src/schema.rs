//! Parses `_vspace`/`_vindex`/`_vcollation` rows into a queryable, atomically
//! replaceable schema snapshot.
//!
//! This module is deliberately I/O-free: it turns already-decoded
//! [`Value`] rows into [`Schema`], so it can be exercised with plain data in
//! unit tests. Issuing the selects that produce those rows is the
//! connection engine's job.

use crate::codec::Value;
use crate::error::{Error, Result};
use crate::tuple::FieldIndex;
use std::collections::HashMap;
use std::sync::Arc;

/// `_vspace` system space id.
pub const VSPACE_ID: u32 = 281;
/// `_vindex` system space id.
pub const VINDEX_ID: u32 = 289;
/// `_vcollation` system space id.
pub const VCOLLATION_ID: u32 = 276;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    pub name: String,
    pub field_type: String,
    pub is_nullable: Option<bool>,
    pub is_autoincrement: Option<bool>,
    pub collation: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    Tree,
    Hash,
    Rtree,
    Bitset,
    Other,
}

impl IndexKind {
    fn from_str(s: &str) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "TREE" => IndexKind::Tree,
            "HASH" => IndexKind::Hash,
            "RTREE" => IndexKind::Rtree,
            "BITSET" => IndexKind::Bitset,
            _ => IndexKind::Other,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IndexDef {
    pub id: u32,
    pub name: String,
    pub kind: IndexKind,
    pub parts: Vec<FieldDef>,
    /// Position within the *key*, not the space, for each named part.
    pub key_field_positions: Arc<FieldIndex>,
}

#[derive(Debug, Clone)]
pub struct SpaceDef {
    pub id: u32,
    pub name: String,
    pub engine: String,
    pub fields: Vec<FieldDef>,
    pub field_positions: Arc<FieldIndex>,
    pub indexes_by_id: HashMap<u32, Arc<IndexDef>>,
    pub indexes_by_name: HashMap<String, Arc<IndexDef>>,
}

impl SpaceDef {
    pub fn index_by_id(&self, id: u32) -> Option<&Arc<IndexDef>> {
        self.indexes_by_id.get(&id)
    }

    pub fn index_by_name(&self, name: &str) -> Option<&Arc<IndexDef>> {
        self.indexes_by_name.get(name)
    }

    /// Converts a field-name-keyed mapping into a positional tuple, filling
    /// unspecified positions with `nil` and trimming trailing nils.
    pub fn positionalize(&self, mapping: &[(Value, Value)]) -> Result<Vec<Value>> {
        let mut slots: Vec<Value> = Vec::new();
        for (key, value) in mapping {
            let position = match key {
                Value::String(name) => self
                    .field_positions
                    .position_of(name)
                    .ok_or_else(|| Error::Schema(format!("space '{}' has no field '{}'", self.name, name)))?,
                Value::Int(i) => usize::try_from(*i)
                    .map_err(|_| Error::Value("negative field position".into()))?,
                Value::UInt(u) => usize::try_from(*u).map_err(|_| Error::Value("field position out of range".into()))?,
                _ => return Err(Error::Value("tuple mapping keys must be field names or positions".into())),
            };
            if slots.len() <= position {
                slots.resize(position + 1, Value::Nil);
            }
            slots[position] = value.clone();
        }
        while matches!(slots.last(), Some(Value::Nil)) {
            slots.pop();
        }
        Ok(slots)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Schema {
    pub version: u64,
    by_id: HashMap<u32, Arc<SpaceDef>>,
    by_name: HashMap<String, Arc<SpaceDef>>,
}

impl Schema {
    pub fn space_by_id(&self, id: u32) -> Option<&Arc<SpaceDef>> {
        self.by_id.get(&id)
    }

    pub fn space_by_name(&self, name: &str) -> Option<&Arc<SpaceDef>> {
        self.by_name.get(name)
    }

    pub fn require_space_by_name(&self, name: &str) -> Result<&Arc<SpaceDef>> {
        self.space_by_name(name)
            .ok_or_else(|| Error::Schema(format!("no such space: {name}")))
    }

    /// Builds a new snapshot from decoded `_vspace`/`_vindex` rows. Field
    /// metadata absent from a row (older Tarantool versions omit
    /// `is_nullable`/`collation`) is left as `None`.
    pub fn from_rows(version: u64, space_rows: &[Vec<Value>], index_rows: &[Vec<Value>]) -> Result<Schema> {
        let mut spaces: HashMap<u32, SpaceDef> = HashMap::new();
        let mut space_names: HashMap<u32, String> = HashMap::new();

        for row in space_rows {
            let space = parse_space_row(row)?;
            space_names.insert(space.id, space.name.clone());
            spaces.insert(space.id, space);
        }

        let mut indexes_by_space: HashMap<u32, Vec<IndexDef>> = HashMap::new();
        for row in index_rows {
            let (space_id, index) = parse_index_row(row)?;
            indexes_by_space.entry(space_id).or_default().push(index);
        }

        let mut by_id = HashMap::with_capacity(spaces.len());
        let mut by_name = HashMap::with_capacity(spaces.len());
        for (space_id, mut space) in spaces {
            if let Some(indexes) = indexes_by_space.remove(&space_id) {
                for index in indexes {
                    let index = Arc::new(index);
                    space.indexes_by_id.insert(index.id, index.clone());
                    space.indexes_by_name.insert(index.name.clone(), index);
                }
            }
            let space = Arc::new(space);
            by_id.insert(space_id, space.clone());
            by_name.insert(space.name.clone(), space);
        }

        Ok(Schema {
            version,
            by_id,
            by_name,
        })
    }
}

fn value_as_u32(value: &Value, what: &'static str) -> Result<u32> {
    value
        .as_u64()
        .and_then(|v| u32::try_from(v).ok())
        .ok_or(Error::Protocol(what))
}

fn value_as_str<'a>(value: &'a Value, what: &'static str) -> Result<&'a str> {
    value.as_str().ok_or(Error::Protocol(what))
}

fn parse_field_def(value: &Value) -> Result<FieldDef> {
    let entries = value
        .as_map()
        .ok_or(Error::Protocol("space format entry was not a map"))?;
    let mut name = None;
    let mut field_type = None;
    let mut is_nullable = None;
    let mut is_autoincrement = None;
    let mut collation = None;

    for (key, val) in entries {
        match key.as_str() {
            Some("name") => name = val.as_str().map(str::to_owned),
            Some("type") => field_type = val.as_str().map(str::to_owned),
            Some("is_nullable") => is_nullable = Some(matches!(val, Value::Bool(true))),
            Some("is_autoincrement") => is_autoincrement = Some(matches!(val, Value::Bool(true))),
            Some("collation") => collation = val.as_str().map(str::to_owned),
            _ => {}
        }
    }

    Ok(FieldDef {
        name: name.ok_or(Error::Protocol("space format entry missing name"))?,
        field_type: field_type.unwrap_or_else(|| "any".to_owned()),
        is_nullable,
        is_autoincrement,
        collation,
    })
}

fn field_index_from(fields: &[FieldDef]) -> Arc<FieldIndex> {
    let mut positions = HashMap::with_capacity(fields.len());
    for (pos, field) in fields.iter().enumerate() {
        positions.insert(field.name.clone(), pos);
    }
    Arc::new(FieldIndex::new(positions))
}

/// `_vspace` row: `[id, owner, name, engine, field_count, flags, format]`.
fn parse_space_row(row: &[Value]) -> Result<SpaceDef> {
    let id = row
        .get(0)
        .ok_or(Error::Protocol("_vspace row missing id"))
        .and_then(|v| value_as_u32(v, "_vspace id was not an integer"))?;
    let name = row
        .get(2)
        .ok_or(Error::Protocol("_vspace row missing name"))
        .and_then(|v| value_as_str(v, "_vspace name was not a string"))?
        .to_owned();
    let engine = row
        .get(3)
        .and_then(Value::as_str)
        .unwrap_or("memtx")
        .to_owned();

    let fields = match row.get(6) {
        Some(Value::Array(items)) => items.iter().map(parse_field_def).collect::<Result<Vec<_>>>()?,
        _ => Vec::new(),
    };
    let field_positions = field_index_from(&fields);

    Ok(SpaceDef {
        id,
        name,
        engine,
        fields,
        field_positions,
        indexes_by_id: HashMap::new(),
        indexes_by_name: HashMap::new(),
    })
}

/// `_vindex` row: `[space_id, index_id, name, type, opts, parts]`, where
/// `parts` is either the modern array-of-maps form or the legacy
/// array-of-[field, type] pairs form.
fn parse_index_row(row: &[Value]) -> Result<(u32, IndexDef)> {
    let space_id = row
        .get(0)
        .ok_or(Error::Protocol("_vindex row missing space_id"))
        .and_then(|v| value_as_u32(v, "_vindex space_id was not an integer"))?;
    let id = row
        .get(1)
        .ok_or(Error::Protocol("_vindex row missing index_id"))
        .and_then(|v| value_as_u32(v, "_vindex index_id was not an integer"))?;
    let name = row
        .get(2)
        .ok_or(Error::Protocol("_vindex row missing name"))
        .and_then(|v| value_as_str(v, "_vindex name was not a string"))?
        .to_owned();
    let kind = row
        .get(3)
        .and_then(Value::as_str)
        .map(IndexKind::from_str)
        .unwrap_or(IndexKind::Other);

    let parts = match row.get(5) {
        Some(Value::Array(items)) => parse_index_parts(items)?,
        _ => Vec::new(),
    };
    let key_field_positions = field_index_from(&parts);

    Ok((
        space_id,
        IndexDef {
            id,
            name,
            kind,
            parts,
            key_field_positions,
        },
    ))
}

fn parse_index_parts(items: &[Value]) -> Result<Vec<FieldDef>> {
    items
        .iter()
        .map(|item| match item {
            Value::Map(_) => parse_index_part_map(item),
            Value::Array(pair) => {
                let field_type = pair.get(1).and_then(Value::as_str).unwrap_or("any").to_owned();
                Ok(FieldDef {
                    name: pair
                        .get(0)
                        .and_then(Value::as_i64)
                        .map(|pos| pos.to_string())
                        .unwrap_or_default(),
                    field_type,
                    is_nullable: None,
                    is_autoincrement: None,
                    collation: None,
                })
            }
            _ => Err(Error::Protocol("index part was neither a map nor a pair")),
        })
        .collect()
}

/// Modern-form index part: `{"field": <position>, "type": <str>, ...}`.
/// Unlike `_vspace`'s field format, these are keyed by integer position
/// rather than by name, so this does not go through `parse_field_def`.
fn parse_index_part_map(value: &Value) -> Result<FieldDef> {
    let entries = value
        .as_map()
        .ok_or(Error::Protocol("index part entry was not a map"))?;
    let mut field_pos = None;
    let mut name = None;
    let mut field_type = None;
    let mut is_nullable = None;
    let mut collation = None;

    for (key, val) in entries {
        match key.as_str() {
            Some("field") => field_pos = val.as_i64(),
            Some("name") => name = val.as_str().map(str::to_owned),
            Some("type") => field_type = val.as_str().map(str::to_owned),
            Some("is_nullable") => is_nullable = Some(matches!(val, Value::Bool(true))),
            Some("collation") => collation = val.as_str().map(str::to_owned),
            _ => {}
        }
    }

    let name = name
        .or_else(|| field_pos.map(|pos| pos.to_string()))
        .ok_or(Error::Protocol("index part entry missing field position"))?;

    Ok(FieldDef {
        name,
        field_type: field_type.unwrap_or_else(|| "any".to_owned()),
        is_nullable,
        is_autoincrement: None,
        collation,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_space_row() -> Vec<Value> {
        vec![
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
        ]
    }

    fn sample_index_row() -> Vec<Value> {
        vec![
            Value::UInt(512),
            Value::UInt(0),
            Value::from("primary"),
            Value::from("tree"),
            Value::Map(vec![]),
            Value::Array(vec![Value::Map(vec![
                (Value::from("field"), Value::UInt(0)),
                (Value::from("type"), Value::from("unsigned")),
            ])]),
        ]
    }

    #[test]
    fn parses_space_and_index_rows() {
        let schema = Schema::from_rows(7, &[sample_space_row()], &[sample_index_row()]).unwrap();
        assert_eq!(schema.version, 7);
        let space = schema.require_space_by_name("tester").unwrap();
        assert_eq!(space.id, 512);
        assert_eq!(space.field_positions.position_of("name"), Some(1));
        assert!(space.index_by_name("primary").is_some());
    }

    #[test]
    fn positionalizes_named_mapping() {
        let schema = Schema::from_rows(1, &[sample_space_row()], &[]).unwrap();
        let space = schema.require_space_by_name("tester").unwrap();
        let mapping = vec![(Value::from("name"), Value::from("hello"))];
        let positional = space.positionalize(&mapping).unwrap();
        assert_eq!(positional, vec![Value::Nil, Value::String("hello".into())]);
    }
}
