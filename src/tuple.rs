//! The dynamic, schema-aware row type returned by select/insert/update/etc.

use crate::codec::Value;
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// Shared field-name-to-position map, referenced by every tuple decoded
/// against the same space so cloning a tuple never copies the map itself.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct FieldIndex {
    positions: HashMap<String, usize>,
}

impl FieldIndex {
    pub fn new(positions: HashMap<String, usize>) -> Self {
        Self { positions }
    }

    pub fn position_of(&self, name: &str) -> Option<usize> {
        self.positions.get(name).copied()
    }
}

/// An ordered row of decoded values, optionally paired with field metadata
/// that enables lookup by name. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct TarantoolTuple {
    values: Vec<Value>,
    fields: Option<Arc<FieldIndex>>,
}

impl TarantoolTuple {
    pub fn new(values: Vec<Value>) -> Self {
        Self {
            values,
            fields: None,
        }
    }

    pub fn with_fields(values: Vec<Value>, fields: Arc<FieldIndex>) -> Self {
        Self {
            values,
            fields: Some(fields),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Looks up a field by name; errs if this tuple carries no field
    /// metadata (it was decoded without a known space format).
    pub fn get_named(&self, name: &str) -> Result<Option<&Value>> {
        let fields = self
            .fields
            .as_ref()
            .ok_or_else(|| Error::Schema(format!("tuple has no field metadata, cannot resolve '{name}'")))?;
        Ok(fields.position_of(name).and_then(|pos| self.values.get(pos)))
    }

    pub fn as_slice(&self) -> &[Value] {
        &self.values
    }

    pub fn into_vec(self) -> Vec<Value> {
        self.values
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.values.iter()
    }
}

impl std::ops::Index<usize> for TarantoolTuple {
    type Output = Value;

    fn index(&self, index: usize) -> &Value {
        &self.values[index]
    }
}

impl<'a> IntoIterator for &'a TarantoolTuple {
    type Item = &'a Value;
    type IntoIter = std::slice::Iter<'a, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.iter()
    }
}

impl PartialEq for TarantoolTuple {
    fn eq(&self, other: &Self) -> bool {
        self.values == other.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positional_access() {
        let tuple = TarantoolTuple::new(vec![Value::Int(1), Value::String("hello".into())]);
        assert_eq!(tuple[0], Value::Int(1));
        assert_eq!(tuple.get(1), Some(&Value::String("hello".into())));
        assert_eq!(tuple.get(2), None);
    }

    #[test]
    fn named_access() {
        let mut positions = HashMap::new();
        positions.insert("id".to_owned(), 0);
        positions.insert("name".to_owned(), 1);
        let fields = Arc::new(FieldIndex::new(positions));

        let tuple = TarantoolTuple::with_fields(
            vec![Value::Int(1), Value::String("hello".into())],
            fields,
        );
        assert_eq!(tuple.get_named("name").unwrap(), Some(&Value::String("hello".into())));
        assert_eq!(tuple.get_named("missing").unwrap(), None);
    }

    #[test]
    fn named_access_without_metadata_errors() {
        let tuple = TarantoolTuple::new(vec![Value::Int(1)]);
        assert!(tuple.get_named("id").is_err());
    }
}
