//! Row-level table diff, keyed by primary key.
//!
//! `diff_tables(server, client)` describes how to turn the server's rows into
//! the client's; `apply_diff(server, diff)` replays it.

use super::commit::{ModifiedRow, TableDiff};
use crate::index::{PersistedIndex, RowKey};
use crate::storage::document::{DEFAULT_PRIMARY_KEY, row_key_for};
use crate::storage::{Row, TableDocument};
use ahash::{AHashMap, AHashSet};
use tracing::debug;

/// Columns the two versions of a table are matched on: the client's
/// declared key, else the server's, else `id`.
pub fn diff_key_columns(
    server: Option<&TableDocument>,
    client: Option<&TableDocument>,
) -> Vec<String> {
    [client, server]
        .into_iter()
        .flatten()
        .map(|doc| &doc.metadata.primary_key)
        .find(|pk| !pk.is_empty())
        .cloned()
        .unwrap_or_else(|| vec![DEFAULT_PRIMARY_KEY.to_string()])
}

fn fingerprint(row: &Row) -> String {
    serde_json::to_string(row).unwrap_or_default()
}

fn key_row(row: &Row, key_columns: &[String]) -> Row {
    key_columns
        .iter()
        .filter_map(|c| row.get(c).map(|v| (c.clone(), v.clone())))
        .collect()
}

pub fn diff_tables(server: Option<&TableDocument>, client: Option<&TableDocument>) -> TableDiff {
    let key_columns = diff_key_columns(server, client);
    let server_rows: &[Row] = server.map(|d| d.rows.as_slice()).unwrap_or_default();
    let client_rows: &[Row] = client.map(|d| d.rows.as_slice()).unwrap_or_default();

    let mut by_key: AHashMap<RowKey, &Row> = AHashMap::with_capacity(server_rows.len());
    for row in server_rows {
        by_key.entry(row_key_for(row, &key_columns)).or_insert(row);
    }

    let mut diff = TableDiff {
        key_columns: key_columns.clone(),
        ..TableDiff::default()
    };
    let mut seen: AHashSet<RowKey> = AHashSet::with_capacity(client_rows.len());
    for row in client_rows {
        let key = row_key_for(row, &key_columns);
        match by_key.get(&key) {
            Some(before) if fingerprint(before) != fingerprint(row) => {
                diff.modified.push(ModifiedRow {
                    key: key_row(row, &key_columns),
                    before: (*before).clone(),
                    after: row.clone(),
                });
            }
            Some(_) => {}
            None => diff.added.push(row.clone()),
        }
        seen.insert(key);
    }
    for row in server_rows {
        if !seen.contains(&row_key_for(row, &key_columns)) {
            diff.deleted.push(row.clone());
        }
    }

    if let (Some(server), Some(client)) = (server, client) {
        diff.added_columns = client
            .schema
            .columns()
            .iter()
            .filter(|(name, _)| !server.schema.contains(name))
            .cloned()
            .collect();
    }

    debug!(
        "Diffed {:?}: +{} ~{} -{}",
        client.or(server).map(TableDocument::name),
        diff.added.len(),
        diff.modified.len(),
        diff.deleted.len()
    );
    diff
}

fn position_of(doc: &TableDocument, key: &RowKey, key_columns: &[String]) -> Option<usize> {
    doc.rows
        .iter()
        .position(|r| &row_key_for(r, key_columns) == key)
}

/// Replay `diff` against `doc`: deletions, then modifications, then
/// additions. Persisted index snapshots are rebuilt and `last_modified`
/// refreshed.
pub fn apply_diff(doc: &mut TableDocument, diff: &TableDiff) {
    let key_columns = if diff.key_columns.is_empty() {
        doc.primary_key_columns()
    } else {
        diff.key_columns.clone()
    };

    for (name, ty) in &diff.added_columns {
        doc.schema.push(name.clone(), ty.clone());
    }

    for row in &diff.deleted {
        let key = row_key_for(row, &key_columns);
        if let Some(pos) = position_of(doc, &key, &key_columns) {
            doc.rows.remove(pos);
        }
    }
    for change in &diff.modified {
        let key = row_key_for(&change.after, &key_columns);
        match position_of(doc, &key, &key_columns) {
            Some(pos) => doc.rows[pos] = change.after.clone(),
            None => doc.rows.push(change.after.clone()),
        }
    }
    for row in &diff.added {
        let key = row_key_for(row, &key_columns);
        match position_of(doc, &key, &key_columns) {
            Some(pos) => doc.rows[pos] = row.clone(),
            None => doc.rows.push(row.clone()),
        }
    }

    doc.normalize();
    doc.touch();
    let mut snapshots = std::mem::take(&mut doc.indexes);
    for snapshot in snapshots.values_mut() {
        *snapshot = PersistedIndex::build(doc, &snapshot.column);
    }
    doc.indexes = snapshots;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Schema;
    use crate::value::{ColumnType, Value};

    fn table(rows: &[(i64, &str)]) -> TableDocument {
        let schema = Schema::from_columns(vec![
            ("id".to_string(), ColumnType::Int),
            ("v".to_string(), ColumnType::Text),
        ]);
        let mut doc = TableDocument::new("t", schema);
        doc.metadata.primary_key = vec!["id".to_string()];
        for (id, v) in rows {
            let mut row = Row::new();
            row.insert("id".to_string(), Value::Int(*id));
            row.insert("v".to_string(), Value::from(*v));
            doc.rows.push(row);
        }
        doc
    }

    #[test]
    fn modified_and_deleted_rows() {
        let server = table(&[(1, "y"), (2, "z")]);
        let client = table(&[(1, "x")]);
        let diff = diff_tables(Some(&server), Some(&client));

        assert!(diff.added.is_empty());
        assert_eq!(diff.modified.len(), 1);
        assert_eq!(diff.modified[0].key.get("id"), Some(&Value::Int(1)));
        assert_eq!(diff.modified[0].before.get("v"), Some(&Value::from("y")));
        assert_eq!(diff.modified[0].after.get("v"), Some(&Value::from("x")));
        assert_eq!(diff.deleted.len(), 1);
        assert_eq!(diff.deleted[0].get("id"), Some(&Value::Int(2)));

        let mut applied = server.clone();
        apply_diff(&mut applied, &diff);
        assert_eq!(applied.rows, client.rows);
    }

    #[test]
    fn missing_sides() {
        let doc = table(&[(1, "a"), (2, "b")]);
        let created = diff_tables(None, Some(&doc));
        assert_eq!(created.added.len(), 2);
        let dropped = diff_tables(Some(&doc), None);
        assert_eq!(dropped.deleted.len(), 2);
        assert!(diff_tables(Some(&doc), Some(&doc)).is_empty());
    }

    #[test]
    fn key_precedence() {
        let mut server = table(&[]);
        server.metadata.primary_key = vec!["v".to_string()];
        let mut client = table(&[]);
        client.metadata.primary_key = vec!["id".to_string(), "v".to_string()];
        assert_eq!(diff_key_columns(Some(&server), Some(&client)), vec!["id", "v"]);
        client.metadata.primary_key.clear();
        assert_eq!(diff_key_columns(Some(&server), Some(&client)), vec!["v"]);
        server.metadata.primary_key.clear();
        assert_eq!(diff_key_columns(Some(&server), Some(&client)), vec!["id"]);
    }

    #[test]
    fn keyless_rows_match_by_content() {
        let schema = Schema::from_columns(vec![("note".to_string(), ColumnType::Text)]);
        let mut server = TableDocument::new("notes", schema.clone());
        let mut client = TableDocument::new("notes", schema);
        let row = |s: &str| {
            let mut r = Row::new();
            r.insert("note".to_string(), Value::from(s));
            r
        };
        server.rows = vec![row("a"), row("b")];
        client.rows = vec![row("a"), row("c")];

        let diff = diff_tables(Some(&server), Some(&client));
        assert_eq!(diff.added, vec![row("c")]);
        assert_eq!(diff.deleted, vec![row("b")]);
        assert!(diff.modified.is_empty());
    }

    #[test]
    fn added_columns_extend_server_schema() {
        let server = table(&[(1, "a")]);
        let mut client = table(&[(1, "a")]);
        client.schema.push("score", ColumnType::Float);
        client.rows[0].insert("score".to_string(), Value::Float(1.5));

        let diff = diff_tables(Some(&server), Some(&client));
        assert_eq!(diff.added_columns, vec![("score".to_string(), ColumnType::Float)]);
        assert_eq!(diff.modified.len(), 1);

        let mut applied = server.clone();
        apply_diff(&mut applied, &diff);
        assert!(applied.schema.contains("score"));
        assert_eq!(applied.rows, client.rows);
    }

    #[test]
    fn apply_rebuilds_snapshots() {
        let mut server = table(&[(1, "a"), (2, "b")]);
        server
            .indexes
            .insert("idx_v".to_string(), PersistedIndex::build(&server, "v"));
        let client = table(&[(2, "b"), (3, "a")]);

        let diff = diff_tables(Some(&server), Some(&client));
        apply_diff(&mut server, &diff);
        let snapshot = &server.indexes["idx_v"];
        assert!(snapshot.is_fresh(&server));
        assert_eq!(
            snapshot.lookup(&Value::from("a")).into_iter().collect::<Vec<_>>(),
            vec![1]
        );
    }
}
