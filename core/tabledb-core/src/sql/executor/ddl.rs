//! Schema statements: CREATE/ALTER/DROP TABLE, CREATE INDEX, DESCRIBE and
//! the database-level statements.

use super::{QueryExecutor, QueryResult};
use crate::engine::storage_engine::TableKey;
use crate::error::{TdbError, TdbResult};
use crate::index::{IndexManager, PersistedIndex};
use crate::sql::ast::{CreateTable, DefaultValue};
use crate::storage::{Schema, TableDocument};
use crate::value::{ColumnType, Value};
use tracing::info;

/// Recorded default for `DEFAULT CURRENT_TIMESTAMP`.
const CURRENT_TIMESTAMP: &str = "CURRENT_TIMESTAMP";

impl QueryExecutor {
    pub(super) fn create_table(&self, database: &str, create: &CreateTable) -> TdbResult<QueryResult> {
        if create.columns.is_empty() {
            return Err(TdbError::invalid_query(format!(
                "table '{}' declares no columns",
                create.name
            )));
        }

        let mut schema = Schema::new();
        for column in &create.columns {
            if !schema.push(column.name.clone(), column.ty.clone()) {
                return Err(TdbError::invalid_query(format!(
                    "duplicate column '{}' in table '{}'",
                    column.name, create.name
                )));
            }
        }

        let mut doc = TableDocument::new(create.name.clone(), schema);
        let meta = &mut doc.metadata;
        for column in &create.columns {
            if column.primary_key {
                meta.primary_key.push(column.name.clone());
            }
            if column.autoincrement {
                if column.ty != ColumnType::Int {
                    return Err(TdbError::invalid_query(format!(
                        "AUTOINCREMENT column '{}' must be int, not {}",
                        column.name, column.ty
                    )));
                }
                meta.autoincrement.push(column.name.clone());
            }
            if column.not_null {
                meta.not_null.push(column.name.clone());
            }
            match &column.default {
                Some(DefaultValue::CurrentTimestamp) => {
                    if column.ty != ColumnType::Datetime {
                        return Err(TdbError::invalid_query(format!(
                            "DEFAULT CURRENT_TIMESTAMP needs a datetime column, '{}' is {}",
                            column.name, column.ty
                        )));
                    }
                    meta.defaults
                        .insert(column.name.clone(), Value::from(CURRENT_TIMESTAMP));
                }
                Some(DefaultValue::Literal(v)) => {
                    meta.defaults
                        .insert(column.name.clone(), v.clone().coerce_to(&column.ty));
                }
                None => {}
            }
        }
        for column in &create.primary_key {
            if !meta.primary_key.contains(column) {
                meta.primary_key.push(column.clone());
            }
        }
        for column in &create.indexes {
            if !meta.indexes.contains(column) {
                meta.indexes.push(column.clone());
            }
        }

        for column in meta.primary_key.iter().chain(&meta.indexes) {
            if !doc.schema.contains(column) {
                return Err(TdbError::unknown_column(create.name.clone(), column.clone()));
            }
        }

        for fk in &create.foreign_keys {
            if !doc.schema.contains(&fk.column) {
                return Err(TdbError::unknown_column(create.name.clone(), fk.column.clone()));
            }
            let target_has_column = if fk.references_table == create.name {
                doc.schema.contains(&fk.references_column)
            } else {
                let target = self
                    .engine
                    .load_table(database, &fk.references_table)
                    .map_err(|e| match e {
                        TdbError::NotFound { .. } => {
                            TdbError::not_found("table", fk.references_table.clone())
                        }
                        other => other,
                    })?;
                target.schema.contains(&fk.references_column)
            };
            if !target_has_column {
                return Err(TdbError::unknown_column(
                    fk.references_table.clone(),
                    fk.references_column.clone(),
                ));
            }
        }
        doc.metadata.foreign_keys = create.foreign_keys.clone();

        let key = TableKey::new(database, &create.name);
        let created = self.engine.with_table(&key, || {
            if self.engine.table_exists(database, &create.name) {
                if create.if_not_exists {
                    return Ok(false);
                }
                return Err(TdbError::already_exists("table", create.name.clone()));
            }
            self.engine.store().create_table(database, &doc)?;
            self.engine.invalidate_indexes(&key);
            Ok(true)
        })?;

        Ok(if created {
            QueryResult::message(format!("Table '{}' created", create.name))
        } else {
            QueryResult::message(format!("Table '{}' already exists, skipped", create.name))
        })
    }

    pub(super) fn alter_table_add(
        &self,
        database: &str,
        table: &str,
        column: &str,
        ty: &ColumnType,
    ) -> TdbResult<QueryResult> {
        self.write_table(database, table, |doc, _| {
            if !doc.schema.push(column, ty.clone()) {
                return Err(TdbError::already_exists("column", column));
            }
            Ok(())
        })?;
        info!("Added column {}.{}.{} {}", database, table, column, ty);
        Ok(QueryResult::message(format!(
            "Column '{}' added to table '{}'",
            column, table
        )))
    }

    pub(super) fn drop_table(&self, database: &str, table: &str, if_exists: bool) -> TdbResult<QueryResult> {
        if !self.engine.table_exists(database, table) {
            if if_exists {
                return Ok(QueryResult::message(format!(
                    "Table '{}' does not exist, skipped",
                    table
                )));
            }
            return Err(TdbError::not_found("table", table));
        }
        self.engine.drop_table(database, table)?;
        Ok(QueryResult::message(format!("Table '{}' dropped", table)))
    }

    pub(super) fn create_index(
        &self,
        database: &str,
        name: &str,
        table: &str,
        column: &str,
    ) -> TdbResult<QueryResult> {
        self.write_table(database, table, |doc, indexes| {
            if doc.indexes.contains_key(name) {
                return Err(TdbError::already_exists("index", name));
            }
            if !doc.schema.contains(column) {
                return Err(TdbError::unknown_column(table, column));
            }
            if !doc.is_indexed(column) {
                doc.metadata.indexes.push(column.to_string());
            }
            if !indexes.has_index(column) {
                let scanned = IndexManager::load(&doc.rows, &[column.to_string()]);
                if let Some(index) = scanned.column_index(column) {
                    indexes.install(column, index.clone());
                }
            }
            let snapshot = PersistedIndex::build(doc, column);
            doc.indexes.insert(name.to_string(), snapshot);
            Ok(())
        })?;
        info!("Created index {} on {}.{}({})", name, database, table, column);
        Ok(QueryResult::message(format!(
            "Index '{}' created on {}({})",
            name, table, column
        )))
    }

    pub(super) fn describe(&self, database: &str, table: &str) -> TdbResult<QueryResult> {
        let doc = self.engine.load_table(database, table)?;
        let columns = [
            "column",
            "type",
            "primary_key",
            "autoincrement",
            "indexed",
            "not_null",
            "default",
        ]
        .map(String::from)
        .to_vec();

        let meta = &doc.metadata;
        let data = doc
            .schema
            .columns()
            .iter()
            .map(|(name, ty)| {
                vec![
                    Value::from(name.as_str()),
                    Value::from(ty.to_string()),
                    Value::Bool(meta.primary_key.contains(name)),
                    Value::Bool(meta.autoincrement.contains(name)),
                    Value::Bool(doc.is_indexed(name)),
                    Value::Bool(meta.not_null.contains(name)),
                    meta.defaults.get(name).cloned().unwrap_or_default(),
                ]
            })
            .collect();
        Ok(QueryResult::rows(columns, data))
    }

    pub(super) fn show_tables(&self, database: &str) -> TdbResult<QueryResult> {
        let data = self
            .engine
            .store()
            .list_tables(database)?
            .into_iter()
            .map(|t| vec![Value::from(t)])
            .collect();
        Ok(QueryResult::rows(vec!["table".to_string()], data))
    }

    pub(super) fn create_database(&self, name: &str) -> TdbResult<QueryResult> {
        self.engine.store().create_database(name)?;
        Ok(QueryResult::message(format!("Database '{}' created", name)))
    }

    pub(super) fn drop_database(&self, name: &str) -> TdbResult<QueryResult> {
        self.engine.drop_database(name)?;
        Ok(QueryResult::message(format!("Database '{}' dropped", name)))
    }

    pub(super) fn show_databases(&self) -> TdbResult<QueryResult> {
        let data = self
            .engine
            .store()
            .list_databases()?
            .into_iter()
            .map(|d| vec![Value::from(d)])
            .collect();
        Ok(QueryResult::rows(vec!["database".to_string()], data))
    }

    pub(super) fn use_database(&self, name: &str) -> TdbResult<QueryResult> {
        self.engine.store().require_database(name)?;
        Ok(QueryResult::message(format!("Using database '{}'", name)))
    }
}

#[cfg(test)]
mod tests {
    use crate::auth::AllowAll;
    use crate::config::WriteMode;
    use crate::engine::storage_engine::StorageEngine;
    use crate::error::TdbError;
    use crate::sql::executor::QueryExecutor;
    use crate::storage::{DocumentStore, ReadLocking};
    use crate::value::Value;
    use std::sync::Arc;
    use tempfile::{TempDir, tempdir};

    fn executor() -> (TempDir, QueryExecutor) {
        let dir = tempdir().unwrap();
        let store = DocumentStore::open(dir.path(), ReadLocking::Optimistic).unwrap();
        store.create_database("app").unwrap();
        let engine = Arc::new(StorageEngine::new(store, WriteMode::WriteThrough));
        (dir, QueryExecutor::new(engine, Arc::new(AllowAll)))
    }

    fn run(ex: &QueryExecutor, sql: &str) -> Result<super::QueryResult, TdbError> {
        ex.try_execute("root", "app", sql)
    }

    #[test]
    fn create_table_records_metadata() {
        let (_dir, ex) = executor();
        run(
            &ex,
            "CREATE TABLE users (id INT PRIMARY KEY AUTOINCREMENT, name VARCHAR(50) NOT NULL, \
             created_at DATETIME DEFAULT CURRENT_TIMESTAMP, INDEX(name))",
        )
        .unwrap();
        let doc = ex.engine().load_table("app", "users").unwrap();
        assert_eq!(doc.metadata.primary_key, vec!["id"]);
        assert_eq!(doc.metadata.autoincrement, vec!["id"]);
        assert_eq!(doc.metadata.indexes, vec!["name"]);
        assert_eq!(doc.metadata.not_null, vec!["name"]);
        assert_eq!(
            doc.metadata.defaults.get("created_at"),
            Some(&Value::from("CURRENT_TIMESTAMP"))
        );
    }

    #[test]
    fn create_table_validations() {
        let (_dir, ex) = executor();
        assert!(matches!(
            run(&ex, "CREATE TABLE t (id TEXT AUTOINCREMENT)"),
            Err(TdbError::InvalidQuery { .. })
        ));
        assert!(matches!(
            run(&ex, "CREATE TABLE t (d INT DEFAULT CURRENT_TIMESTAMP)"),
            Err(TdbError::InvalidQuery { .. })
        ));
        assert!(matches!(
            run(&ex, "CREATE TABLE t (id INT, INDEX(nope))"),
            Err(TdbError::UnknownColumn { .. })
        ));
        assert!(matches!(
            run(&ex, "CREATE TABLE t (id INT, FOREIGN KEY(id) REFERENCES missing(id))"),
            Err(TdbError::NotFound { .. })
        ));
        run(&ex, "CREATE TABLE parent (id INT)").unwrap();
        assert!(matches!(
            run(&ex, "CREATE TABLE t (pid INT, FOREIGN KEY(pid) REFERENCES parent(nope))"),
            Err(TdbError::UnknownColumn { .. })
        ));
        run(&ex, "CREATE TABLE t (pid INT, FOREIGN KEY(pid) REFERENCES parent(id))").unwrap();
    }

    #[test]
    fn duplicate_table_and_if_not_exists() {
        let (_dir, ex) = executor();
        run(&ex, "CREATE TABLE t (id INT)").unwrap();
        assert!(matches!(
            run(&ex, "CREATE TABLE t (id INT)"),
            Err(TdbError::AlreadyExists { .. })
        ));
        assert!(run(&ex, "CREATE TABLE IF NOT EXISTS t (id INT)").unwrap().is_success());
    }

    #[test]
    fn alter_adds_column_without_backfill() {
        let (dir, ex) = executor();
        run(&ex, "CREATE TABLE t (id INT)").unwrap();
        run(&ex, "INSERT INTO t VALUES (1)").unwrap();
        run(&ex, "ALTER TABLE t ADD COLUMN note TEXT").unwrap();
        let raw = std::fs::read_to_string(dir.path().join("app").join("t.json")).unwrap();
        assert!(raw.contains("\"note\": \"text\""));
        assert!(!raw.contains("\"note\": null"));
        assert!(matches!(
            run(&ex, "ALTER TABLE t ADD note TEXT"),
            Err(TdbError::AlreadyExists { .. })
        ));
    }

    #[test]
    fn create_index_persists_named_snapshot() {
        let (_dir, ex) = executor();
        run(&ex, "CREATE TABLE t (id INT, city TEXT)").unwrap();
        run(&ex, "INSERT INTO t VALUES (1, 'Oslo'), (2, 'Rome')").unwrap();
        run(&ex, "CREATE INDEX by_city ON t (city)").unwrap();
        let doc = ex.engine().store().load_table("app", "t").unwrap();
        let snapshot = &doc.indexes["by_city"];
        assert!(snapshot.is_fresh(&doc));
        assert_eq!(snapshot.lookup(&Value::from("Rome")), [1].into_iter().collect());
        assert!(matches!(
            run(&ex, "CREATE INDEX by_city ON t (id)"),
            Err(TdbError::AlreadyExists { .. })
        ));
    }

    #[test]
    fn describe_and_show() {
        let (_dir, ex) = executor();
        run(&ex, "CREATE TABLE t (id INT PRIMARY KEY, name TEXT)").unwrap();
        let described = run(&ex, "DESCRIBE t").unwrap();
        assert_eq!(described.row_count(), 2);
        assert_eq!(described.get(0, "primary_key"), Some(&Value::Bool(true)));
        assert_eq!(described.get(1, "type"), Some(&Value::from("text")));

        let tables = run(&ex, "SHOW TABLES").unwrap();
        assert_eq!(tables.column_values("table"), vec![Value::from("t")]);
        let dbs = ex.try_execute("root", "", "SHOW DATABASES").unwrap();
        assert_eq!(dbs.column_values("database"), vec![Value::from("app")]);
    }

    #[test]
    fn drop_table_if_exists() {
        let (_dir, ex) = executor();
        assert!(matches!(
            run(&ex, "DROP TABLE ghost"),
            Err(TdbError::NotFound { .. })
        ));
        assert!(run(&ex, "DROP TABLE IF EXISTS ghost").unwrap().is_success());
        run(&ex, "CREATE TABLE t (id INT)").unwrap();
        run(&ex, "DROP TABLE t").unwrap();
        assert!(!ex.engine().table_exists("app", "t"));
    }
}
