//! Realtime mirror: fully materialized in-memory copies of selected tables.
//!
//! Reads and writes against a mirrored table touch memory only; the mirror is
//! written back according to its [`FlushPolicy`]. Every mutation is published
//! to the registered listeners as a [`ChangeEvent`].
//!
//! While a table is mirrored the mirror is its authoritative copy: SQL writes
//! to the same table are overwritten by the next mirror flush.

use super::storage_engine::{StorageEngine, TableKey};
use crate::error::{TdbError, TdbResult};
use crate::index::PersistedIndex;
use crate::sql::ast::{Insert, Predicate};
use crate::sql::executor::dml::{build_insert_rows, check_unique_after, duplicate_key, existing_keys, has_key_values};
use crate::sql::executor::{NamedRow, bind_table_filter, schema_names};
use crate::storage::{Row, TableDocument};
use crate::value::{Value, now_timestamp};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// When a mirrored table is written back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushPolicy {
    /// After every mutation
    Immediate,
    /// By the scheduled lazy-flush job
    #[default]
    Lazy,
    /// Only on explicit flush or session end
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Insert,
    Update,
    Delete,
}

/// One mutation of a mirrored table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeEvent {
    pub database: String,
    pub table: String,
    pub action: ChangeAction,
    /// Rows as they are after the change (removed rows for deletes).
    pub rows: Vec<Row>,
    pub timestamp: String,
}

pub type ListenerId = u64;

type Listener = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

#[derive(Debug)]
struct MirroredTable {
    doc: TableDocument,
    policy: FlushPolicy,
    dirty: bool,
}

pub struct RealtimeMirror {
    engine: Arc<StorageEngine>,
    tables: DashMap<TableKey, Arc<Mutex<MirroredTable>>>,
    listeners: RwLock<Vec<(ListenerId, Listener)>>,
    next_listener: AtomicU64,
}

impl RealtimeMirror {
    pub fn new(engine: Arc<StorageEngine>) -> Self {
        Self {
            engine,
            tables: DashMap::new(),
            listeners: RwLock::new(Vec::new()),
            next_listener: AtomicU64::new(1),
        }
    }

    /// Mirror a table. Enabling an already mirrored table only changes its policy.
    pub fn enable(&self, database: &str, table: &str, policy: FlushPolicy) -> TdbResult<()> {
        let key = TableKey::new(database, table);
        if let Some(entry) = self.tables.get(&key) {
            entry.lock().policy = policy;
            return Ok(());
        }
        let doc = self
            .engine
            .with_table(&key, || self.engine.load_table(database, table))?;
        info!("Realtime mirror enabled for {} ({:?}, {} rows)", key, policy, doc.rows.len());
        self.tables.entry(key).or_insert_with(|| {
            Arc::new(Mutex::new(MirroredTable {
                doc,
                policy,
                dirty: false,
            }))
        });
        Ok(())
    }

    /// Stop mirroring, writing back pending changes first.
    pub fn disable(&self, database: &str, table: &str) -> TdbResult<()> {
        self.flush(database, table)?;
        self.tables.remove(&TableKey::new(database, table));
        Ok(())
    }

    pub fn is_enabled(&self, database: &str, table: &str) -> bool {
        self.tables.contains_key(&TableKey::new(database, table))
    }

    pub fn policy(&self, database: &str, table: &str) -> Option<FlushPolicy> {
        self.tables
            .get(&TableKey::new(database, table))
            .map(|e| e.lock().policy)
    }

    fn entry(&self, database: &str, table: &str) -> TdbResult<Arc<Mutex<MirroredTable>>> {
        let key = TableKey::new(database, table);
        self.tables
            .get(&key)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| TdbError::not_found("realtime table", key.to_string()))
    }

    pub fn select(&self, database: &str, table: &str, filter: Option<&Predicate>) -> TdbResult<Vec<Row>> {
        let entry = self.entry(database, table)?;
        let mirrored = entry.lock();
        let doc = &mirrored.doc;
        let names = schema_names(doc);
        let Some(filter) = bind_table_filter(doc, &names, filter)? else {
            return Ok(doc.rows.clone());
        };
        Ok(doc
            .rows
            .iter()
            .filter(|row| filter.eval(&NamedRow { row, names: &names }))
            .cloned()
            .collect())
    }

    /// Insert one row. Returns the stored row, with generated values filled in.
    pub fn insert(&self, database: &str, table: &str, row: Row) -> TdbResult<Row> {
        let entry = self.entry(database, table)?;
        let (stored, policy) = {
            let mut mirrored = entry.lock();
            let doc = &mut mirrored.doc;
            let (columns, values): (Vec<String>, Vec<Value>) = row.into_iter().unzip();
            let insert = Insert {
                table: table.to_string(),
                columns: Some(columns),
                rows: vec![values],
            };
            let mut rows = build_insert_rows(doc, &insert)?;
            let Some(stored) = rows.pop() else {
                return Err(TdbError::invalid_query("empty insert"));
            };

            if doc.has_identity() {
                let key_columns = doc.primary_key_columns();
                let keys = existing_keys(doc, &key_columns);
                if has_key_values(&stored, &key_columns) {
                    let key = keys.key_of(&stored);
                    if keys.contains(&key) {
                        return Err(duplicate_key(doc, &key));
                    }
                }
            }
            doc.rows.push(stored.clone());
            mirrored.dirty = true;
            (stored, mirrored.policy)
        };

        self.after_write(database, table, policy)?;
        self.notify(database, table, ChangeAction::Insert, vec![stored.clone()]);
        Ok(stored)
    }

    /// Apply `assignments` to matching rows. Returns the number changed.
    pub fn update(
        &self,
        database: &str,
        table: &str,
        filter: Option<&Predicate>,
        assignments: &[(String, Value)],
    ) -> TdbResult<usize> {
        let entry = self.entry(database, table)?;
        let (changed_rows, policy) = {
            let mut mirrored = entry.lock();
            let doc = &mut mirrored.doc;
            let names = schema_names(doc);
            let filter = bind_table_filter(doc, &names, filter)?;

            let mut coerced = Vec::with_capacity(assignments.len());
            for (column, value) in assignments {
                let ty = doc
                    .schema
                    .get(column)
                    .ok_or_else(|| TdbError::unknown_column(doc.name(), column.clone()))?;
                coerced.push((column.clone(), value.clone().coerce_to(ty)));
            }

            let mut changed: BTreeMap<usize, Row> = BTreeMap::new();
            for (pos, row) in doc.rows.iter().enumerate() {
                let hit = filter
                    .as_ref()
                    .is_none_or(|f| f.eval(&NamedRow { row, names: &names }));
                if hit {
                    let mut after = row.clone();
                    for (column, value) in &coerced {
                        after.insert(column.clone(), value.clone());
                    }
                    changed.insert(pos, after);
                }
            }

            let key_columns = doc.primary_key_columns();
            if doc.has_identity() && coerced.iter().any(|(c, _)| key_columns.contains(c)) {
                check_unique_after(doc, &key_columns, &changed)?;
            }

            let mut changed_rows = Vec::with_capacity(changed.len());
            for (pos, after) in changed {
                if let Some(slot) = doc.rows.get_mut(pos) {
                    *slot = after.clone();
                    changed_rows.push(after);
                }
            }
            if !changed_rows.is_empty() {
                mirrored.dirty = true;
            }
            (changed_rows, mirrored.policy)
        };

        let count = changed_rows.len();
        if count > 0 {
            self.after_write(database, table, policy)?;
            self.notify(database, table, ChangeAction::Update, changed_rows);
        }
        Ok(count)
    }

    /// Remove matching rows. Returns the number removed.
    pub fn delete(&self, database: &str, table: &str, filter: Option<&Predicate>) -> TdbResult<usize> {
        let entry = self.entry(database, table)?;
        let (removed, policy) = {
            let mut mirrored = entry.lock();
            let doc = &mut mirrored.doc;
            let names = schema_names(doc);
            let filter = bind_table_filter(doc, &names, filter)?;
            let (removed, kept): (Vec<Row>, Vec<Row>) =
                std::mem::take(&mut doc.rows).into_iter().partition(|row| {
                    filter
                        .as_ref()
                        .is_none_or(|f| f.eval(&NamedRow { row, names: &names }))
                });
            doc.rows = kept;
            if !removed.is_empty() {
                mirrored.dirty = true;
            }
            (removed, mirrored.policy)
        };

        let count = removed.len();
        if count > 0 {
            self.after_write(database, table, policy)?;
            self.notify(database, table, ChangeAction::Delete, removed);
        }
        Ok(count)
    }

    fn after_write(&self, database: &str, table: &str, policy: FlushPolicy) -> TdbResult<()> {
        if policy == FlushPolicy::Immediate {
            self.flush(database, table)?;
        }
        Ok(())
    }

    // ===== Listeners =====

    pub fn subscribe(&self, listener: impl Fn(&ChangeEvent) + Send + Sync + 'static) -> ListenerId {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        self.listeners.write().push((id, Arc::new(listener)));
        id
    }

    /// Returns whether the listener was registered.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(i, _)| *i != id);
        listeners.len() != before
    }

    fn notify(&self, database: &str, table: &str, action: ChangeAction, rows: Vec<Row>) {
        // Listeners run without any lock held, so they may call back in.
        let listeners: Vec<Listener> = self.listeners.read().iter().map(|(_, l)| l.clone()).collect();
        if listeners.is_empty() {
            return;
        }
        let event = ChangeEvent {
            database: database.to_string(),
            table: table.to_string(),
            action,
            rows,
            timestamp: now_timestamp(),
        };
        for listener in listeners {
            listener(&event);
        }
    }

    // ===== Flush =====

    /// Write one mirrored table back if it has pending changes.
    pub fn flush(&self, database: &str, table: &str) -> TdbResult<bool> {
        let entry = self.entry(database, table)?;
        let mut mirrored = entry.lock();
        if !mirrored.dirty {
            return Ok(false);
        }
        let doc = &mut mirrored.doc;
        doc.touch();
        let mut snapshots = std::mem::take(&mut doc.indexes);
        for snapshot in snapshots.values_mut() {
            *snapshot = PersistedIndex::build(doc, &snapshot.column);
        }
        doc.indexes = snapshots;
        self.engine.persist_table(database, mirrored.doc.clone())?;
        self.engine.invalidate_indexes(&TableKey::new(database, table));
        mirrored.dirty = false;
        debug!("Flushed realtime table {}.{}", database, table);
        Ok(true)
    }

    fn flush_where(&self, pick: impl Fn(FlushPolicy) -> bool) -> usize {
        let keys: Vec<TableKey> = self
            .tables
            .iter()
            .filter(|e| {
                let t = e.value().lock();
                t.dirty && pick(t.policy)
            })
            .map(|e| e.key().clone())
            .collect();

        let mut written = 0;
        for key in keys {
            match self.flush(&key.database, &key.table) {
                Ok(true) => written += 1,
                Ok(false) => {}
                Err(e) => warn!("Realtime flush of {} failed: {}", key, e),
            }
        }
        written
    }

    /// Write back dirty tables under the `Lazy` policy.
    pub fn flush_lazy(&self) -> TdbResult<usize> {
        Ok(self.flush_where(|p| p == FlushPolicy::Lazy))
    }

    /// Write back every dirty mirrored table regardless of policy.
    pub fn end_session(&self) -> usize {
        let written = self.flush_where(|_| true);
        if written > 0 {
            info!("Session end flushed {} realtime table(s)", written);
        }
        written
    }

    pub fn dirty_tables(&self) -> Vec<TableKey> {
        let mut keys: Vec<TableKey> = self
            .tables
            .iter()
            .filter(|e| e.value().lock().dirty)
            .map(|e| e.key().clone())
            .collect();
        keys.sort();
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AllowAll;
    use crate::config::WriteMode;
    use crate::sql::executor::QueryExecutor;
    use crate::sql::parser::parse_predicate;
    use crate::storage::{DocumentStore, ReadLocking};
    use tempfile::{TempDir, tempdir};

    fn setup() -> (TempDir, Arc<StorageEngine>, RealtimeMirror) {
        let dir = tempdir().unwrap();
        let store = DocumentStore::open(dir.path(), ReadLocking::Optimistic).unwrap();
        store.create_database("live").unwrap();
        let engine = Arc::new(StorageEngine::new(store, WriteMode::WriteThrough));
        QueryExecutor::new(engine.clone(), Arc::new(AllowAll))
            .try_execute(
                "root",
                "live",
                "CREATE TABLE scores (id INT PRIMARY KEY AUTOINCREMENT, player TEXT, points INT)",
            )
            .unwrap();
        let mirror = RealtimeMirror::new(engine.clone());
        (dir, engine, mirror)
    }

    fn row(player: &str, points: i64) -> Row {
        let mut r = Row::new();
        r.insert("player".to_string(), Value::from(player));
        r.insert("points".to_string(), Value::Int(points));
        r
    }

    fn disk_rows(engine: &StorageEngine) -> usize {
        engine.store().load_table("live", "scores").unwrap().rows.len()
    }

    #[test]
    fn manual_policy_defers_until_flush() {
        let (_dir, engine, mirror) = setup();
        mirror.enable("live", "scores", FlushPolicy::Manual).unwrap();
        let stored = mirror.insert("live", "scores", row("ann", 10)).unwrap();
        assert_eq!(stored["id"], Value::Int(1));
        mirror.insert("live", "scores", row("bo", 5)).unwrap();

        assert_eq!(mirror.select("live", "scores", None).unwrap().len(), 2);
        assert_eq!(disk_rows(&engine), 0);
        assert_eq!(mirror.flush_lazy().unwrap(), 0);

        assert!(mirror.flush("live", "scores").unwrap());
        assert_eq!(disk_rows(&engine), 2);
        assert!(!mirror.flush("live", "scores").unwrap());
    }

    #[test]
    fn immediate_policy_writes_every_change() {
        let (_dir, engine, mirror) = setup();
        mirror.enable("live", "scores", FlushPolicy::Immediate).unwrap();
        mirror.insert("live", "scores", row("ann", 10)).unwrap();
        assert_eq!(disk_rows(&engine), 1);
        assert!(mirror.dirty_tables().is_empty());
    }

    #[test]
    fn update_delete_and_listeners() {
        let (_dir, _engine, mirror) = setup();
        mirror.enable("live", "scores", FlushPolicy::Lazy).unwrap();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let id = mirror.subscribe(move |e| sink.lock().push((e.action, e.rows.len())));

        mirror.insert("live", "scores", row("ann", 10)).unwrap();
        mirror.insert("live", "scores", row("bo", 5)).unwrap();
        let low = parse_predicate("points < 8").unwrap();
        let n = mirror
            .update("live", "scores", Some(&low), &[("points".to_string(), Value::from("9"))])
            .unwrap();
        assert_eq!(n, 1);
        let bo = mirror
            .select("live", "scores", Some(&parse_predicate("player = 'bo'").unwrap()))
            .unwrap();
        assert_eq!(bo[0]["points"], Value::Int(9));

        assert_eq!(mirror.delete("live", "scores", None).unwrap(), 2);
        assert!(mirror.unsubscribe(id));
        mirror.insert("live", "scores", row("cy", 1)).unwrap();

        let seen = events.lock().clone();
        assert_eq!(
            seen,
            vec![
                (ChangeAction::Insert, 1),
                (ChangeAction::Insert, 1),
                (ChangeAction::Update, 1),
                (ChangeAction::Delete, 2),
            ]
        );
        assert_eq!(mirror.flush_lazy().unwrap(), 1);
    }

    #[test]
    fn duplicate_key_is_rejected() {
        let (_dir, _engine, mirror) = setup();
        mirror.enable("live", "scores", FlushPolicy::Manual).unwrap();
        let mut first = row("ann", 1);
        first.insert("id".to_string(), Value::Int(7));
        mirror.insert("live", "scores", first.clone()).unwrap();
        assert!(matches!(
            mirror.insert("live", "scores", first),
            Err(TdbError::DuplicateKey { .. })
        ));
    }

    #[test]
    fn end_session_flushes_everything() {
        let (_dir, engine, mirror) = setup();
        mirror.enable("live", "scores", FlushPolicy::Manual).unwrap();
        mirror.insert("live", "scores", row("ann", 10)).unwrap();
        assert_eq!(mirror.end_session(), 1);
        assert_eq!(disk_rows(&engine), 1);
        assert!(matches!(
            mirror.select("live", "missing", None),
            Err(TdbError::NotFound { .. })
        ));
    }
}
