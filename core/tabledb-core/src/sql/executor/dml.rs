//! INSERT / UPDATE / DELETE.

use super::{QueryExecutor, QueryResult, bind_table_filter, matching_positions, schema_names};
use crate::error::{TdbError, TdbResult};
use crate::index::{IndexManager, PersistedIndex, PrimaryKeyMap, RowKey};
use crate::sql::ast::{Delete, Insert, Update};
use crate::storage::{Row, TableDocument};
use crate::value::{ColumnType, Value, now_timestamp};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Column stamped with the insertion time when left unspecified.
pub(crate) const CREATED_AT: &str = "created_at";

pub(crate) fn duplicate_key(doc: &TableDocument, key: &RowKey) -> TdbError {
    TdbError::DuplicateKey {
        table: doc.name().to_string(),
        key: key.to_string(),
    }
}

/// Rows with no value in any key column carry no identity to enforce.
pub(crate) fn has_key_values(row: &Row, key_columns: &[String]) -> bool {
    key_columns
        .iter()
        .any(|c| row.get(c).is_some_and(|v| !v.is_null()))
}

/// Key map over existing rows. Duplicates already on disk are tolerated.
pub(crate) fn existing_keys(doc: &TableDocument, key_columns: &[String]) -> PrimaryKeyMap {
    let mut keys = PrimaryKeyMap::new(key_columns);
    for (pos, row) in doc.rows.iter().enumerate() {
        if has_key_values(row, key_columns) {
            keys.insert(keys.key_of(row), pos);
        }
    }
    keys
}

/// Next autoincrement value: one past the largest integer in the column.
fn next_autoincrement(rows: &[Row], column: &str) -> i64 {
    rows.iter()
        .filter_map(|r| r.get(column).and_then(Value::as_i64))
        .max()
        .map_or(1, |m| m.saturating_add(1))
}

impl QueryExecutor {
    pub(super) fn insert(&self, database: &str, insert: &Insert) -> TdbResult<QueryResult> {
        let count = self.write_table(database, &insert.table, |doc, indexes| {
            let new_rows = build_insert_rows(doc, insert)?;

            if doc.has_identity() {
                let key_columns = doc.primary_key_columns();
                let mut keys = existing_keys(doc, &key_columns);
                for (offset, row) in new_rows.iter().enumerate() {
                    if !has_key_values(row, &key_columns) {
                        continue;
                    }
                    let key = keys.key_of(row);
                    if !keys.insert(key.clone(), doc.rows.len() + offset) {
                        return Err(duplicate_key(doc, &key));
                    }
                }
            }

            let count = new_rows.len();
            for row in new_rows {
                let pos = doc.rows.len();
                indexes.insert_row(&row, pos, pos);
                for snapshot in doc.indexes.values_mut() {
                    snapshot.update(row.get(&snapshot.column).unwrap_or(&Value::Null), pos);
                }
                doc.rows.push(row);
            }
            Ok(count)
        })?;
        debug!("Inserted {} row(s) into {}.{}", count, database, insert.table);
        Ok(QueryResult::affected(count, format!("{} row(s) inserted", count)))
    }

    pub(super) fn update(&self, database: &str, update: &Update) -> TdbResult<QueryResult> {
        let count = self.write_table(database, &update.table, |doc, indexes| {
            let names = schema_names(doc);
            let filter = bind_table_filter(doc, &names, update.filter.as_ref())?;

            let mut assignments = Vec::with_capacity(update.assignments.len());
            for (column, value) in &update.assignments {
                let ty = doc
                    .schema
                    .get(column)
                    .ok_or_else(|| TdbError::unknown_column(doc.name(), column.clone()))?;
                assignments.push((column.clone(), value.clone().coerce_to(ty)));
            }

            let positions = matching_positions(doc, &names, indexes, filter.as_ref());
            let mut changed: BTreeMap<usize, Row> = BTreeMap::new();
            for &pos in &positions {
                if let Some(row) = doc.rows.get(pos) {
                    let mut after = row.clone();
                    for (column, value) in &assignments {
                        after.insert(column.clone(), value.clone());
                    }
                    changed.insert(pos, after);
                }
            }

            let key_columns = doc.primary_key_columns();
            let touches_key = assignments.iter().any(|(c, _)| key_columns.contains(c));
            if doc.has_identity() && touches_key {
                check_unique_after(doc, &key_columns, &changed)?;
            }

            for (pos, after) in changed {
                let Some(slot) = doc.rows.get_mut(pos) else {
                    continue;
                };
                let before = std::mem::replace(slot, after);
                let after = &doc.rows[pos];
                indexes.update_row(&before, after, pos);
                for snapshot in doc.indexes.values_mut() {
                    let old = before.get(&snapshot.column).unwrap_or(&Value::Null);
                    let new = after.get(&snapshot.column).unwrap_or(&Value::Null);
                    if old != new {
                        snapshot.remove(old, pos);
                        snapshot.update(new, pos);
                    }
                }
            }
            Ok(positions.len())
        })?;
        debug!("Updated {} row(s) in {}.{}", count, database, update.table);
        Ok(QueryResult::affected(count, format!("{} row(s) updated", count)))
    }

    pub(super) fn delete(&self, database: &str, delete: &Delete) -> TdbResult<QueryResult> {
        let count = self.write_table(database, &delete.table, |doc, indexes| {
            let names = schema_names(doc);
            let filter = bind_table_filter(doc, &names, delete.filter.as_ref())?;
            let doomed: BTreeSet<usize> = matching_positions(doc, &names, indexes, filter.as_ref())
                .into_iter()
                .collect();
            if doomed.is_empty() {
                return Ok(0);
            }

            let mut pos = 0;
            doc.rows.retain(|_| {
                let keep = !doomed.contains(&pos);
                pos += 1;
                keep
            });
            rebuild_all(doc, indexes);
            Ok(doomed.len())
        })?;
        debug!("Deleted {} row(s) from {}.{}", count, database, delete.table);
        Ok(QueryResult::affected(count, format!("{} row(s) deleted", count)))
    }
}

/// Materialize the tuples of an INSERT against the table schema.
pub(crate) fn build_insert_rows(doc: &TableDocument, insert: &Insert) -> TdbResult<Vec<Row>> {
    let columns: Vec<String> = match &insert.columns {
        Some(columns) => {
            let mut seen = BTreeSet::new();
            for column in columns {
                if !doc.schema.contains(column) {
                    return Err(TdbError::unknown_column(doc.name(), column.clone()));
                }
                if !seen.insert(column) {
                    return Err(TdbError::invalid_query(format!(
                        "column '{}' listed twice",
                        column
                    )));
                }
            }
            columns.clone()
        }
        None => schema_names(doc),
    };

    let mut next_auto: Vec<(String, i64)> = doc
        .metadata
        .autoincrement
        .iter()
        .map(|c| (c.clone(), next_autoincrement(&doc.rows, c)))
        .collect();
    let stamp_created_at = doc.schema.get(CREATED_AT) == Some(&ColumnType::Datetime)
        && !columns.iter().any(|c| c == CREATED_AT);

    let mut rows = Vec::with_capacity(insert.rows.len());
    for (n, values) in insert.rows.iter().enumerate() {
        if values.len() != columns.len() {
            return Err(TdbError::invalid_query(format!(
                "tuple {} has {} value(s), expected {}",
                n + 1,
                values.len(),
                columns.len()
            )));
        }

        let mut row: Row = doc
            .schema
            .names()
            .map(|name| (name.to_string(), Value::Null))
            .collect();
        for (column, value) in columns.iter().zip(values) {
            let value = match doc.schema.get(column) {
                Some(ty) => value.clone().coerce_to(ty),
                None => value.clone(),
            };
            row.insert(column.clone(), value);
        }

        for (column, next) in next_auto.iter_mut() {
            match row.get(column.as_str()).and_then(Value::as_i64) {
                Some(given) => *next = (*next).max(given.saturating_add(1)),
                None if row.get(column.as_str()).is_none_or(Value::is_null) => {
                    row.insert(column.clone(), Value::Int(*next));
                    *next = next.saturating_add(1);
                }
                None => {}
            }
        }
        if stamp_created_at {
            row.insert(CREATED_AT.to_string(), Value::from(now_timestamp()));
        }
        rows.push(row);
    }
    Ok(rows)
}

/// Uniqueness of the key over every row once `changed` is applied.
///
/// Only collisions involving a changed row are reported.
pub(crate) fn check_unique_after(
    doc: &TableDocument,
    key_columns: &[String],
    changed: &BTreeMap<usize, Row>,
) -> TdbResult<()> {
    let mut keys = PrimaryKeyMap::new(key_columns);
    for (pos, original) in doc.rows.iter().enumerate() {
        let row = changed.get(&pos).unwrap_or(original);
        if !has_key_values(row, key_columns) {
            continue;
        }
        let key = keys.key_of(row);
        match keys.position(&key) {
            Some(first) if changed.contains_key(&pos) || changed.contains_key(&first) => {
                return Err(duplicate_key(doc, &key));
            }
            Some(_) => {}
            None => {
                keys.insert(key, pos);
            }
        }
    }
    Ok(())
}

/// Positional indexes after a bulk removal: rebuild from scratch.
fn rebuild_all(doc: &mut TableDocument, indexes: &mut IndexManager) {
    indexes.rebuild(&doc.rows);
    let mut persisted = std::mem::take(&mut doc.indexes);
    for snapshot in persisted.values_mut() {
        *snapshot = match indexes.column_index(&snapshot.column) {
            Some(index) => PersistedIndex::from_column_index(doc, &snapshot.column, index),
            None => PersistedIndex::build(doc, &snapshot.column),
        };
    }
    doc.indexes = persisted;
}
