//! Index Manager: value → row-position indexes over a loaded table.
//!
//! Indexes are rebuilt from `rows` by a single scan on load and patched
//! incrementally by INSERT/UPDATE. Because entries are row *positions*, every
//! mutation of the row sequence must renumber: a deletion decrements entries
//! past the removed slot, an insertion at a non-tail position increments
//! entries at or after it. The scan-based DELETE path rebuilds instead.
//!
//! Structure: column → (IndexKey → {row positions})

pub mod key;
pub mod persisted;
pub mod primary;

pub use key::{FloatKey, IndexKey, RowKey};
pub use persisted::{PersistedEntry, PersistedIndex, default_index_name};
pub use primary::PrimaryKeyMap;

use crate::storage::document::Row;
use crate::value::Value;
use ahash::AHashMap;
use std::collections::{BTreeMap, BTreeSet};

/// Ordered value → positions map for one column.
pub type ColumnIndex = BTreeMap<IndexKey, BTreeSet<usize>>;

/// Scan-built positional indexes for one loaded table.
#[derive(Debug, Clone, Default)]
pub struct IndexManager {
    indexes: AHashMap<String, ColumnIndex>,
}

impl IndexManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild indexes for `columns` with a single scan over `rows`.
    pub fn load(rows: &[Row], columns: &[String]) -> Self {
        let mut manager = Self {
            indexes: columns
                .iter()
                .map(|c| (c.clone(), ColumnIndex::new()))
                .collect(),
        };
        for (pos, row) in rows.iter().enumerate() {
            for (column, index) in manager.indexes.iter_mut() {
                let value = row.get(column).unwrap_or(&Value::Null);
                index.entry(IndexKey::from(value)).or_default().insert(pos);
            }
        }
        manager
    }

    /// Seed one column from an already-built map (e.g. a persisted snapshot).
    pub fn install(&mut self, column: impl Into<String>, index: ColumnIndex) {
        self.indexes.insert(column.into(), index);
    }

    pub fn has_index(&self, column: &str) -> bool {
        self.indexes.contains_key(column)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.indexes.keys().map(String::as_str)
    }

    pub fn column_index(&self, column: &str) -> Option<&ColumnIndex> {
        self.indexes.get(column)
    }

    /// Positions whose value maps to the same key as `value`.
    ///
    /// `None` when the column is not indexed.
    pub fn lookup(&self, column: &str, value: &Value) -> Option<BTreeSet<usize>> {
        self.indexes
            .get(column)
            .map(|index| index.get(&IndexKey::from(value)).cloned().unwrap_or_default())
    }

    /// Record `value` at `pos` for `column`.
    pub fn update(&mut self, column: &str, value: &Value, pos: usize) {
        if let Some(index) = self.indexes.get_mut(column) {
            index.entry(IndexKey::from(value)).or_default().insert(pos);
        }
    }

    /// Forget `value` at `pos` for `column`.
    pub fn remove(&mut self, column: &str, value: &Value, pos: usize) {
        if let Some(index) = self.indexes.get_mut(column) {
            let key = IndexKey::from(value);
            if let Some(positions) = index.get_mut(&key) {
                positions.remove(&pos);
                if positions.is_empty() {
                    index.remove(&key);
                }
            }
        }
    }

    /// Make room for a row inserted at `pos`: entries at or after it move up.
    pub fn shift_for_insert(&mut self, pos: usize) {
        self.renumber(|p| if p >= pos { p + 1 } else { p });
    }

    /// Close the gap left by a row removed from `pos`: entries past it move down.
    ///
    /// Entries for the removed row itself must already be gone.
    pub fn shift_for_delete(&mut self, pos: usize) {
        self.renumber(|p| if p > pos { p - 1 } else { p });
    }

    fn renumber(&mut self, f: impl Fn(usize) -> usize) {
        for index in self.indexes.values_mut() {
            for positions in index.values_mut() {
                *positions = positions.iter().map(|&p| f(p)).collect();
            }
        }
    }

    /// Index a whole row inserted at `pos`.
    pub fn insert_row(&mut self, row: &Row, pos: usize, row_count_before: usize) {
        if pos < row_count_before {
            self.shift_for_insert(pos);
        }
        let columns: Vec<String> = self.indexes.keys().cloned().collect();
        for column in columns {
            let value = row.get(&column).unwrap_or(&Value::Null);
            self.update(&column, value, pos);
        }
    }

    /// Drop a whole row removed from `pos`.
    pub fn delete_row(&mut self, row: &Row, pos: usize) {
        let columns: Vec<String> = self.indexes.keys().cloned().collect();
        for column in columns {
            let value = row.get(&column).unwrap_or(&Value::Null);
            self.remove(&column, value, pos);
        }
        self.shift_for_delete(pos);
    }

    /// Patch the indexes after the row at `pos` changed from `before` to `after`.
    pub fn update_row(&mut self, before: &Row, after: &Row, pos: usize) {
        let columns: Vec<String> = self.indexes.keys().cloned().collect();
        for column in columns {
            let old = before.get(&column).unwrap_or(&Value::Null);
            let new = after.get(&column).unwrap_or(&Value::Null);
            if IndexKey::from(old) != IndexKey::from(new) {
                self.remove(&column, old, pos);
                self.update(&column, new, pos);
            }
        }
    }

    /// Wholesale rebuild over the current columns.
    pub fn rebuild(&mut self, rows: &[Row]) {
        let columns: Vec<String> = self.indexes.keys().cloned().collect();
        *self = Self::load(rows, &columns);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: i64, name: &str) -> Row {
        let mut r = Row::new();
        r.insert("id".to_string(), Value::Int(id));
        r.insert("name".to_string(), Value::from(name));
        r
    }

    fn positions(v: &[usize]) -> BTreeSet<usize> {
        v.iter().copied().collect()
    }

    #[test]
    fn load_and_lookup() {
        let rows = vec![row(1, "a"), row(2, "b"), row(3, "a")];
        let index = IndexManager::load(&rows, &["name".to_string()]);
        assert_eq!(index.lookup("name", &Value::from("a")), Some(positions(&[0, 2])));
        assert_eq!(index.lookup("name", &Value::from("z")), Some(BTreeSet::new()));
        assert_eq!(index.lookup("id", &Value::Int(1)), None);
    }

    #[test]
    fn delete_renumbers_later_rows() {
        let mut rows = vec![row(1, "a"), row(2, "b"), row(3, "c")];
        let mut index = IndexManager::load(&rows, &["id".to_string()]);
        let removed = rows.remove(0);
        index.delete_row(&removed, 0);
        assert_eq!(index.lookup("id", &Value::Int(1)), Some(BTreeSet::new()));
        assert_eq!(index.lookup("id", &Value::Int(2)), Some(positions(&[0])));
        assert_eq!(index.lookup("id", &Value::Int(3)), Some(positions(&[1])));
    }

    #[test]
    fn insert_in_the_middle_renumbers() {
        let mut rows = vec![row(1, "a"), row(3, "c")];
        let mut index = IndexManager::load(&rows, &["id".to_string()]);
        let new = row(2, "b");
        index.insert_row(&new, 1, rows.len());
        rows.insert(1, new);
        assert_eq!(index.lookup("id", &Value::Int(2)), Some(positions(&[1])));
        assert_eq!(index.lookup("id", &Value::Int(3)), Some(positions(&[2])));
    }

    #[test]
    fn update_moves_entry() {
        let before = row(1, "a");
        let after = row(1, "z");
        let mut index = IndexManager::load(std::slice::from_ref(&before), &["name".to_string()]);
        index.update_row(&before, &after, 0);
        assert_eq!(index.lookup("name", &Value::from("a")), Some(BTreeSet::new()));
        assert_eq!(index.lookup("name", &Value::from("z")), Some(positions(&[0])));
    }
}
