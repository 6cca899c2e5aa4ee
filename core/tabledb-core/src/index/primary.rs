//! Content-addressed primary-key map.
//!
//! Unlike the positional column indexes, entries here are keyed by the row's
//! primary-key tuple, so uniqueness checks never depend on row positions.

use super::key::RowKey;
use crate::storage::document::{Row, row_key_for};
use ahash::AHashMap;

/// Primary-key tuple → row position.
#[derive(Debug, Clone, Default)]
pub struct PrimaryKeyMap {
    key_columns: Vec<String>,
    positions: AHashMap<RowKey, usize>,
}

impl PrimaryKeyMap {
    pub fn new(key_columns: &[String]) -> Self {
        Self {
            key_columns: key_columns.to_vec(),
            positions: AHashMap::new(),
        }
    }

    /// Build from a row sequence. Returns the first duplicated key on conflict.
    pub fn build(rows: &[Row], key_columns: &[String]) -> Result<Self, RowKey> {
        let mut map = Self {
            key_columns: key_columns.to_vec(),
            positions: AHashMap::with_capacity(rows.len()),
        };
        for (pos, row) in rows.iter().enumerate() {
            let key = map.key_of(row);
            if map.positions.insert(key.clone(), pos).is_some() {
                return Err(key);
            }
        }
        Ok(map)
    }

    pub fn key_of(&self, row: &Row) -> RowKey {
        row_key_for(row, &self.key_columns)
    }

    pub fn contains(&self, key: &RowKey) -> bool {
        self.positions.contains_key(key)
    }

    pub fn position(&self, key: &RowKey) -> Option<usize> {
        self.positions.get(key).copied()
    }

    /// Register a key. Returns `false` (and leaves the map untouched) if taken.
    pub fn insert(&mut self, key: RowKey, pos: usize) -> bool {
        if self.positions.contains_key(&key) {
            return false;
        }
        self.positions.insert(key, pos);
        true
    }

    pub fn remove(&mut self, key: &RowKey) -> Option<usize> {
        self.positions.remove(key)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn row(id: i64) -> Row {
        let mut r = Row::new();
        r.insert("id".to_string(), Value::Int(id));
        r
    }

    #[test]
    fn build_detects_duplicates() {
        let cols = vec!["id".to_string()];
        assert!(PrimaryKeyMap::build(&[row(1), row(2)], &cols).is_ok());
        let dup = PrimaryKeyMap::build(&[row(1), row(1)], &cols).unwrap_err();
        assert_eq!(dup.to_string(), "(1)");
    }

    #[test]
    fn insert_refuses_taken_key() {
        let cols = vec!["id".to_string()];
        let mut map = PrimaryKeyMap::build(&[row(1)], &cols).unwrap();
        let key = map.key_of(&row(1));
        assert!(!map.insert(key.clone(), 5));
        assert_eq!(map.position(&key), Some(0));
        let fresh = map.key_of(&row(2));
        assert!(map.insert(fresh, 1));
        assert_eq!(map.len(), 2);
    }
}
