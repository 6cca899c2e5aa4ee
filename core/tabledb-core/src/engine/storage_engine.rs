//! Write/Concurrency Layer: per-table critical sections, dirty tracking, index cache.
//!
//! One `StorageEngine` is built at process start and shared through `Arc` by
//! the executor, the realtime mirror, the sync service and the scheduler.
//!
//! # 쓰기 흐름
//!
//! - **WriteThrough**: a statement saves its table before returning.
//! - **Deferred**: the statement parks the document in the dirty map; reads see
//!   it, `flush_all` (scheduled) persists it.
//! - A failed flush is logged and the entry re-queued for the next cycle.

use crate::config::WriteMode;
use crate::error::{TdbError, TdbResult};
use crate::index::{IndexManager, PersistedIndex, default_index_name};
use crate::storage::{DocumentStore, TableDocument};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// `database.table`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableKey {
    pub database: String,
    pub table: String,
}

impl TableKey {
    pub fn new(database: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            table: table.into(),
        }
    }
}

impl fmt::Display for TableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.table)
    }
}

/// Index manager checked out of the cache for one statement.
#[derive(Debug)]
pub struct TableIndexes {
    pub manager: IndexManager,
    dirty: bool,
}

impl TableIndexes {
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}

#[derive(Debug)]
struct CachedIndexes {
    indexes: TableIndexes,
    built_at: String,
    row_count: usize,
}

impl CachedIndexes {
    fn matches(&self, doc: &TableDocument) -> bool {
        self.built_at == doc.metadata.last_modified && self.row_count == doc.rows.len()
    }
}

/// Scan-build the indexes of `doc`, reusing fresh persisted snapshots.
pub fn build_indexes(doc: &TableDocument) -> IndexManager {
    let mut columns: Vec<String> = Vec::new();
    for column in doc
        .metadata
        .indexes
        .iter()
        .chain(doc.indexes.values().map(|p| &p.column))
    {
        if !columns.contains(column) {
            columns.push(column.clone());
        }
    }

    let (persisted, scan): (Vec<String>, Vec<String>) = columns.into_iter().partition(|c| {
        doc.indexes
            .values()
            .any(|p| &p.column == c && p.is_fresh(doc))
    });

    let mut manager = IndexManager::load(&doc.rows, &scan);
    for column in persisted {
        if let Some(snapshot) = doc
            .indexes
            .values()
            .find(|p| p.column == column && p.is_fresh(doc))
        {
            manager.install(column, snapshot.to_column_index());
        }
    }
    manager
}

pub struct StorageEngine {
    store: DocumentStore,
    write_mode: WriteMode,
    table_locks: DashMap<TableKey, Arc<Mutex<()>>>,
    dirty: DashMap<TableKey, TableDocument>,
    index_cache: DashMap<TableKey, CachedIndexes>,
}

impl StorageEngine {
    pub fn new(store: DocumentStore, write_mode: WriteMode) -> Self {
        Self {
            store,
            write_mode,
            table_locks: DashMap::new(),
            dirty: DashMap::new(),
            index_cache: DashMap::new(),
        }
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    pub fn write_mode(&self) -> WriteMode {
        self.write_mode
    }

    /// Run `f` inside the critical section of one table.
    ///
    /// Not re-entrant: `f` must not call back into a method that locks the
    /// same table (`flush_table`, `persist_table`, `drop_table`).
    pub fn with_table<T>(&self, key: &TableKey, f: impl FnOnce() -> T) -> T {
        let lock = self
            .table_locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();
        let _guard = lock.lock();
        f()
    }

    // ===== Documents =====

    /// Current version of a table: the pending dirty document if any, else disk.
    pub fn load_table(&self, database: &str, table: &str) -> TdbResult<TableDocument> {
        let key = TableKey::new(database, table);
        if let Some(doc) = self.dirty.get(&key) {
            return Ok(doc.clone());
        }
        self.store.load_table(database, table)
    }

    pub fn table_exists(&self, database: &str, table: &str) -> bool {
        self.dirty.contains_key(&TableKey::new(database, table))
            || self.store.table_exists(database, table)
    }

    /// Hand a mutated document to the write layer according to the write mode.
    /// Call with the table's critical section held.
    pub fn commit_table(&self, database: &str, doc: TableDocument) -> TdbResult<()> {
        match self.write_mode {
            WriteMode::WriteThrough => {
                self.store.save_table(database, &doc)?;
                self.dirty.remove(&TableKey::new(database, doc.name()));
                Ok(())
            }
            WriteMode::Deferred => {
                self.mark_dirty(database, doc);
                Ok(())
            }
        }
    }

    pub fn mark_dirty(&self, database: &str, doc: TableDocument) {
        let key = TableKey::new(database, doc.name());
        debug!("Marked {} dirty", key);
        self.dirty.insert(key, doc);
    }

    pub fn is_dirty(&self, database: &str, table: &str) -> bool {
        self.dirty.contains_key(&TableKey::new(database, table))
    }

    pub fn dirty_count(&self) -> usize {
        self.dirty.len()
    }

    /// Save a document now, bypassing the write mode.
    pub fn persist_table(&self, database: &str, doc: TableDocument) -> TdbResult<()> {
        let key = TableKey::new(database, doc.name());
        self.with_table(&key, || {
            self.store.save_table(database, &doc)?;
            self.dirty.remove(&key);
            Ok(())
        })
    }

    // ===== Flush =====

    /// Persist every dirty table. Returns the number written.
    ///
    /// A failing table is logged and re-queued; the others still flush.
    pub fn flush_all(&self) -> TdbResult<usize> {
        let keys: Vec<TableKey> = self.dirty.iter().map(|e| e.key().clone()).collect();
        Ok(self.flush_keys(keys))
    }

    /// Persist one table if it is dirty. Returns whether anything was written.
    pub fn flush_table(&self, database: &str, table: &str) -> TdbResult<bool> {
        let key = TableKey::new(database, table);
        self.with_table(&key, || self.flush_locked(&key))
    }

    pub fn flush_database(&self, database: &str) -> TdbResult<usize> {
        let keys: Vec<TableKey> = self
            .dirty
            .iter()
            .filter(|e| e.key().database == database)
            .map(|e| e.key().clone())
            .collect();
        Ok(self.flush_keys(keys))
    }

    fn flush_keys(&self, keys: Vec<TableKey>) -> usize {
        let mut written = 0;
        for key in keys {
            match self.with_table(&key, || self.flush_locked(&key)) {
                Ok(true) => written += 1,
                Ok(false) => {}
                Err(e) => warn!("Flush of {} failed, re-queued: {}", key, e),
            }
        }
        if written > 0 {
            info!("Flushed {} dirty table(s)", written);
        }
        written
    }

    fn flush_locked(&self, key: &TableKey) -> TdbResult<bool> {
        let Some((key, doc)) = self.dirty.remove(key) else {
            return Ok(false);
        };
        match self.store.save_table(&key.database, &doc) {
            Ok(()) => Ok(true),
            Err(e) => {
                self.dirty.insert(key, doc);
                Err(e)
            }
        }
    }

    // ===== Index cache =====

    /// Check out the indexes of `doc` for one statement.
    /// Call with the table's critical section held.
    pub fn take_indexes(&self, key: &TableKey, doc: &TableDocument) -> TableIndexes {
        if let Some((_, cached)) = self.index_cache.remove(key)
            && cached.matches(doc)
        {
            return cached.indexes;
        }
        TableIndexes {
            manager: build_indexes(doc),
            dirty: false,
        }
    }

    /// Return indexes checked out with [`take_indexes`](Self::take_indexes),
    /// stamped against the document version they now describe.
    pub fn put_indexes(&self, key: &TableKey, doc: &TableDocument, indexes: TableIndexes) {
        self.index_cache.insert(
            key.clone(),
            CachedIndexes {
                indexes,
                built_at: doc.metadata.last_modified.clone(),
                row_count: doc.rows.len(),
            },
        );
    }

    pub fn invalidate_indexes(&self, key: &TableKey) {
        self.index_cache.remove(key);
    }

    /// Write every modified cached index into its table document's `indexes`
    /// section. Returns the number of tables written.
    pub fn flush_indexes(&self) -> TdbResult<usize> {
        let keys: Vec<TableKey> = self
            .index_cache
            .iter()
            .filter(|e| e.value().indexes.dirty)
            .map(|e| e.key().clone())
            .collect();

        let mut written = 0;
        for key in keys {
            match self.with_table(&key, || self.flush_indexes_locked(&key)) {
                Ok(true) => written += 1,
                Ok(false) => {}
                Err(e) => warn!("Index flush of {} failed: {}", key, e),
            }
        }
        if written > 0 {
            info!("Flushed indexes of {} table(s)", written);
        }
        Ok(written)
    }

    fn flush_indexes_locked(&self, key: &TableKey) -> TdbResult<bool> {
        let mut doc = match self.load_table(&key.database, &key.table) {
            Ok(doc) => doc,
            Err(TdbError::NotFound { .. } | TdbError::DatabaseNotFound(_)) => {
                self.index_cache.remove(key);
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        let snapshots: Vec<(String, PersistedIndex)> = {
            let Some(cached) = self.index_cache.get(key) else {
                return Ok(false);
            };
            if !cached.matches(&doc) {
                // Table changed behind the cache; the next statement rebuilds.
                drop(cached);
                self.index_cache.remove(key);
                return Ok(false);
            }
            let manager = &cached.indexes.manager;
            manager
                .columns()
                .filter_map(|column| {
                    let index = manager.column_index(column)?;
                    let name = doc
                        .indexes
                        .iter()
                        .find(|(_, p)| p.column == column)
                        .map(|(name, _)| name.clone())
                        .unwrap_or_else(|| default_index_name(column));
                    Some((name, PersistedIndex::from_column_index(&doc, column, index)))
                })
                .collect()
        };

        doc.indexes.extend(snapshots);
        if self.dirty.contains_key(key) {
            self.dirty.insert(key.clone(), doc);
        } else {
            self.store.save_table(&key.database, &doc)?;
        }
        if let Some(mut cached) = self.index_cache.get_mut(key) {
            cached.indexes.dirty = false;
        }
        Ok(true)
    }

    // ===== DDL hooks =====

    pub fn drop_table(&self, database: &str, table: &str) -> TdbResult<()> {
        let key = TableKey::new(database, table);
        self.with_table(&key, || {
            self.dirty.remove(&key);
            self.index_cache.remove(&key);
            self.store.drop_table(database, table)
        })?;
        self.table_locks.remove(&key);
        Ok(())
    }

    pub fn drop_database(&self, database: &str) -> TdbResult<()> {
        self.dirty.retain(|k, _| k.database != database);
        self.index_cache.retain(|k, _| k.database != database);
        self.store.drop_database(database)
    }
}
