//! Query Executor: runs parsed statements against table documents.
//!
//! Every statement is authorized through the injected [`Authority`], then
//! dispatched to the DDL, DML or SELECT path. A statement either completes
//! or leaves the table untouched; a script runs each statement on its own.

mod ddl;
pub(crate) mod dml;
pub mod predicate;
pub mod result;
mod select;

pub use predicate::{BoundPredicate, NamedRow, RowAccess, compare};
pub use result::{QueryResult, QueryStatus};

use crate::auth::Authority;
use crate::engine::storage_engine::{StorageEngine, TableKey};
use crate::error::{TdbError, TdbResult};
use crate::index::{IndexManager, PersistedIndex};
use crate::sql::ast::{ColumnRef, Predicate, Statement};
use crate::sql::lexer::split_statements;
use crate::sql::parser::parse_statement;
use crate::storage::TableDocument;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

pub struct QueryExecutor {
    engine: Arc<StorageEngine>,
    authority: Arc<dyn Authority>,
}

impl QueryExecutor {
    pub fn new(engine: Arc<StorageEngine>, authority: Arc<dyn Authority>) -> Self {
        Self { engine, authority }
    }

    pub fn engine(&self) -> &Arc<StorageEngine> {
        &self.engine
    }

    /// Run one statement. Failures come back as an error result.
    pub fn execute(&self, username: &str, database: &str, sql: &str) -> QueryResult {
        match self.try_execute(username, database, sql) {
            Ok(result) => result,
            Err(e) => {
                debug!("Statement by {} failed: {}", username, e);
                QueryResult::error(&e)
            }
        }
    }

    pub fn try_execute(&self, username: &str, database: &str, sql: &str) -> TdbResult<QueryResult> {
        let statement = parse_statement(sql)?;
        self.execute_statement(username, database, &statement)
    }

    /// Run a `;`-separated script. Each statement succeeds or fails on its own;
    /// `USE` switches the database for the statements after it.
    pub fn execute_script(&self, username: &str, database: &str, script: &str) -> Vec<QueryResult> {
        let mut current = database.to_string();
        split_statements(script)
            .iter()
            .map(|sql| {
                let statement = match parse_statement(sql) {
                    Ok(s) => s,
                    Err(e) => return QueryResult::error(&e),
                };
                match self.execute_statement(username, &current, &statement) {
                    Ok(result) => {
                        if let Statement::Use { database } = &statement {
                            current = database.clone();
                        }
                        result
                    }
                    Err(e) => QueryResult::error(&e),
                }
            })
            .collect()
    }

    pub fn execute_statement(
        &self,
        username: &str,
        database: &str,
        statement: &Statement,
    ) -> TdbResult<QueryResult> {
        let permission = statement.permission();
        if !self.authority.is_authorized(username, permission) {
            return Err(TdbError::PermissionDenied(format!(
                "user '{}' lacks {} permission",
                username, permission
            )));
        }
        if !statement.is_database_level() {
            self.engine.store().require_database(database)?;
        }

        match statement {
            Statement::CreateTable(create) => self.create_table(database, create),
            Statement::AlterTableAdd { table, column, ty } => {
                self.alter_table_add(database, table, column, ty)
            }
            Statement::DropTable { table, if_exists } => {
                self.drop_table(database, table, *if_exists)
            }
            Statement::CreateIndex {
                name,
                table,
                column,
            } => self.create_index(database, name, table, column),
            Statement::Insert(insert) => self.insert(database, insert),
            Statement::Select(select) => self.select(database, select),
            Statement::Update(update) => self.update(database, update),
            Statement::Delete(delete) => self.delete(database, delete),
            Statement::ShowTables => self.show_tables(database),
            Statement::Describe { table } => self.describe(database, table),
            Statement::CreateDatabase { name } => self.create_database(name),
            Statement::DropDatabase { name } => self.drop_database(name),
            Statement::ShowDatabases => self.show_databases(),
            Statement::Use { database } => self.use_database(database),
        }
    }

    /// Read-modify-write of one table inside its critical section.
    ///
    /// `f` works on a private copy of the document and the checked-out
    /// indexes. On error nothing is committed and the indexes are dropped
    /// from the cache, so the next statement rebuilds them. An outcome that
    /// reports no change leaves the stored document as it was.
    ///
    /// Persisted snapshots that matched the document before `f` ran were
    /// patched alongside the rows and are restamped; snapshots that were
    /// already stale are rebuilt from the rows.
    pub(crate) fn write_table<T: WriteOutcome>(
        &self,
        database: &str,
        table: &str,
        f: impl FnOnce(&mut TableDocument, &mut IndexManager) -> TdbResult<T>,
    ) -> TdbResult<T> {
        let key = TableKey::new(database, table);
        let engine = &self.engine;
        engine.with_table(&key, || {
            let mut doc = engine.load_table(database, table)?;
            let mut indexes = engine.take_indexes(&key, &doc);
            let stale: BTreeSet<String> = doc
                .indexes
                .iter()
                .filter(|(_, snapshot)| !snapshot.is_fresh(&doc))
                .map(|(name, _)| name.clone())
                .collect();
            let out = f(&mut doc, &mut indexes.manager)?;
            if !out.changed() {
                engine.put_indexes(&key, &doc, indexes);
                return Ok(out);
            }

            doc.touch();
            let mut persisted = std::mem::take(&mut doc.indexes);
            for (name, snapshot) in persisted.iter_mut() {
                if stale.contains(name) {
                    debug!("Rebuilding stale index {} on {}", name, key);
                    *snapshot = match indexes.manager.column_index(&snapshot.column) {
                        Some(index) => PersistedIndex::from_column_index(&doc, &snapshot.column, index),
                        None => PersistedIndex::build(&doc, &snapshot.column),
                    };
                } else {
                    snapshot.restamp(&doc);
                }
            }
            doc.indexes = persisted;

            indexes.mark_dirty();
            engine.put_indexes(&key, &doc, indexes);
            engine.commit_table(database, doc)?;
            Ok(out)
        })
    }

    /// Run `f` against the current document and its indexes under the table lock.
    pub(crate) fn read_table<T>(
        &self,
        database: &str,
        table: &str,
        f: impl FnOnce(&TableDocument, &IndexManager) -> TdbResult<T>,
    ) -> TdbResult<T> {
        let key = TableKey::new(database, table);
        let engine = &self.engine;
        engine.with_table(&key, || {
            let doc = engine.load_table(database, table)?;
            let indexes = engine.take_indexes(&key, &doc);
            let out = f(&doc, &indexes.manager);
            engine.put_indexes(&key, &doc, indexes);
            out
        })
    }
}

/// Whether a write statement changed its table.
pub(crate) trait WriteOutcome {
    fn changed(&self) -> bool;
}

impl WriteOutcome for () {
    fn changed(&self) -> bool {
        true
    }
}

/// Affected row count.
impl WriteOutcome for usize {
    fn changed(&self) -> bool {
        *self > 0
    }
}

/// Resolve a column of a single table.
pub fn resolve_table_column(table: &str, names: &[String], column: &ColumnRef) -> TdbResult<usize> {
    if let Some(q) = &column.qualifier
        && q != table
    {
        return Err(TdbError::unknown_column(q.clone(), column.name.clone()));
    }
    names
        .iter()
        .position(|n| n == &column.name)
        .ok_or_else(|| TdbError::unknown_column(table, column.name.clone()))
}

/// Bind an optional WHERE clause against one table's schema columns.
pub fn bind_table_filter(
    doc: &TableDocument,
    names: &[String],
    filter: Option<&Predicate>,
) -> TdbResult<Option<BoundPredicate>> {
    filter
        .map(|p| {
            BoundPredicate::bind(p, &|c: &ColumnRef| resolve_table_column(doc.name(), names, c))
        })
        .transpose()
}

pub fn schema_names(doc: &TableDocument) -> Vec<String> {
    doc.schema.names().map(str::to_string).collect()
}

/// Row positions of `doc` matching `filter`, ascending.
///
/// Equality terms on indexed columns narrow the candidates; the full
/// predicate is still evaluated on each candidate.
pub fn matching_positions(
    doc: &TableDocument,
    names: &[String],
    indexes: &IndexManager,
    filter: Option<&BoundPredicate>,
) -> Vec<usize> {
    let Some(filter) = filter else {
        return (0..doc.rows.len()).collect();
    };

    let mut candidates: Option<BTreeSet<usize>> = None;
    for (slot, value) in filter.equality_terms() {
        if let Some(hits) = names.get(slot).and_then(|c| indexes.lookup(c, value)) {
            candidates = Some(match candidates {
                Some(prev) => prev.intersection(&hits).copied().collect(),
                None => hits,
            });
        }
    }

    let matches = |pos: &usize| {
        doc.rows
            .get(*pos)
            .is_some_and(|row| filter.eval(&NamedRow { row, names }))
    };
    match candidates {
        Some(c) => c.into_iter().filter(matches).collect(),
        None => (0..doc.rows.len()).filter(matches).collect(),
    }
}
