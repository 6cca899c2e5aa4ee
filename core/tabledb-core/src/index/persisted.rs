//! Persisted named index: stored in the table document's `indexes` section.
//!
//! Supports the same operations as the scan-built cache (build, lookup,
//! update, remove) for one named index keyed by a column. A snapshot records
//! the `last_modified` stamp and row count it was built against; a snapshot
//! that no longer matches the document is ignored on load.

use super::{ColumnIndex, IndexKey};
use crate::storage::document::{Row, TableDocument};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Name used for the index of a column declared through `INDEX(col)`.
pub fn default_index_name(column: &str) -> String {
    format!("idx_{}", column)
}

/// One indexed value and the rows holding it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedEntry {
    pub value: Value,
    pub positions: BTreeSet<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedIndex {
    pub column: String,
    /// `metadata.last_modified` of the document this snapshot matches.
    pub built_at: String,
    pub row_count: usize,
    /// Canonical key → entry.
    #[serde(default)]
    pub entries: BTreeMap<String, PersistedEntry>,
}

impl PersistedIndex {
    /// Build by scanning the document's rows.
    pub fn build(doc: &TableDocument, column: &str) -> Self {
        let mut index = Self::empty(doc, column);
        for (pos, row) in doc.rows.iter().enumerate() {
            let value = row.get(column).unwrap_or(&Value::Null);
            index.update(value, pos);
        }
        index
    }

    /// Snapshot a scan-built column index.
    pub fn from_column_index(doc: &TableDocument, column: &str, source: &ColumnIndex) -> Self {
        let mut index = Self::empty(doc, column);
        for (key, positions) in source {
            // Any row in the set carries a value with this key.
            let value = positions
                .iter()
                .next()
                .and_then(|&p| doc.rows.get(p))
                .and_then(|row: &Row| row.get(column).cloned())
                .unwrap_or(Value::Null);
            index.entries.insert(
                key.canonical(),
                PersistedEntry {
                    value,
                    positions: positions.clone(),
                },
            );
        }
        index
    }

    fn empty(doc: &TableDocument, column: &str) -> Self {
        Self {
            column: column.to_string(),
            built_at: doc.metadata.last_modified.clone(),
            row_count: doc.rows.len(),
            entries: BTreeMap::new(),
        }
    }

    /// Whether this snapshot still describes `doc`.
    pub fn is_fresh(&self, doc: &TableDocument) -> bool {
        self.built_at == doc.metadata.last_modified && self.row_count == doc.rows.len()
    }

    pub fn lookup(&self, value: &Value) -> BTreeSet<usize> {
        self.entries
            .get(&IndexKey::from(value).canonical())
            .map(|e| e.positions.clone())
            .unwrap_or_default()
    }

    pub fn update(&mut self, value: &Value, pos: usize) {
        self.entries
            .entry(IndexKey::from(value).canonical())
            .or_insert_with(|| PersistedEntry {
                value: value.clone(),
                positions: BTreeSet::new(),
            })
            .positions
            .insert(pos);
    }

    pub fn remove(&mut self, value: &Value, pos: usize) {
        let key = IndexKey::from(value).canonical();
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.positions.remove(&pos);
            if entry.positions.is_empty() {
                self.entries.remove(&key);
            }
        }
    }

    /// Convert back into the in-memory column index.
    pub fn to_column_index(&self) -> ColumnIndex {
        self.entries
            .values()
            .map(|e| (IndexKey::from(&e.value), e.positions.clone()))
            .collect()
    }

    /// Re-stamp after the owning document changed through patched operations.
    pub fn restamp(&mut self, doc: &TableDocument) {
        self.built_at = doc.metadata.last_modified.clone();
        self.row_count = doc.rows.len();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::document::Schema;
    use crate::value::ColumnType;

    fn doc() -> TableDocument {
        let schema = Schema::from_columns(vec![
            ("id".to_string(), ColumnType::Int),
            ("city".to_string(), ColumnType::Text),
        ]);
        let mut doc = TableDocument::new("people", schema);
        for (id, city) in [(1, "Oslo"), (2, "Rome"), (3, "Oslo")] {
            let mut row = Row::new();
            row.insert("id".to_string(), Value::Int(id));
            row.insert("city".to_string(), Value::from(city));
            doc.rows.push(row);
        }
        doc
    }

    #[test]
    fn build_lookup_update_remove() {
        let doc = doc();
        let mut index = PersistedIndex::build(&doc, "city");
        assert_eq!(index.lookup(&Value::from("Oslo")), [0, 2].into_iter().collect());
        index.remove(&Value::from("Oslo"), 0);
        index.update(&Value::from("Lima"), 0);
        assert_eq!(index.lookup(&Value::from("Oslo")), [2].into_iter().collect());
        assert_eq!(index.lookup(&Value::from("Lima")), [0].into_iter().collect());
        index.remove(&Value::from("Rome"), 1);
        assert!(!index.entries.contains_key("s:Rome"));
    }

    #[test]
    fn staleness_tracks_document() {
        let mut doc = doc();
        let index = PersistedIndex::build(&doc, "city");
        assert!(index.is_fresh(&doc));
        doc.rows.pop();
        assert!(!index.is_fresh(&doc));
    }

    #[test]
    fn snapshot_matches_scan() {
        let doc = doc();
        let scanned = crate::index::IndexManager::load(&doc.rows, &["city".to_string()]);
        let column = scanned.column_index("city").unwrap();
        let snapshot = PersistedIndex::from_column_index(&doc, "city", column);
        assert_eq!(snapshot, PersistedIndex::build(&doc, "city"));
        assert_eq!(&snapshot.to_column_index(), column);
    }
}
