//! TableDb: the process-wide engine handle.

use super::realtime::RealtimeMirror;
use super::scheduler::{Schedule, ScheduledJob, Scheduler};
use super::session::Session;
use super::storage_engine::StorageEngine;
use crate::auth::Authority;
use crate::config::EngineConfig;
use crate::error::TdbResult;
use crate::logging;
use crate::sql::executor::{QueryExecutor, QueryResult};
use crate::storage::DocumentStore;
use crate::sync::SyncService;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

pub const JOB_FLUSH_DIRTY: &str = "flush-dirty-tables";
pub const JOB_FLUSH_INDEXES: &str = "flush-indexes";
pub const JOB_REALTIME_FLUSH: &str = "realtime-lazy-flush";

/// TableDB 엔진
///
/// One instance per process. Owns the storage engine, the executor, the
/// realtime mirror, the sync service and the background scheduler, and hands
/// out [`Session`]s.
///
/// # 쓰기 흐름
///
/// - **WriteThrough** (default): every statement saves its table.
/// - **Deferred**: statements park documents in the dirty map, the
///   `flush-dirty-tables` job persists them.
/// - `flush-indexes` writes cached indexes into the table documents.
/// - `realtime-lazy-flush` writes back lazily mirrored tables.
///
/// # 예제
///
/// ```rust
/// use std::sync::Arc;
/// use tabledb_core::{AllowAll, EngineConfig, TableDb};
///
/// # fn main() -> tabledb_core::TdbResult<()> {
/// let dir = tempfile::tempdir()?;
/// let config = EngineConfig::new(dir.path()).with_background_jobs(false);
/// let db = TableDb::open(config, Arc::new(AllowAll))?;
///
/// let mut session = db.session("root");
/// session.execute("CREATE DATABASE shop");
/// session.execute("USE shop");
/// session.execute("CREATE TABLE items (id INT PRIMARY KEY, name TEXT)");
/// session.execute("INSERT INTO items VALUES (1, 'pen')");
/// let result = session.execute("SELECT name FROM items WHERE id = 1");
/// assert_eq!(result.row_count(), 1);
/// # Ok(())
/// # }
/// ```
pub struct TableDb {
    config: EngineConfig,
    engine: Arc<StorageEngine>,
    executor: Arc<QueryExecutor>,
    mirror: Arc<RealtimeMirror>,
    sync: Arc<SyncService>,
    scheduler: Arc<Scheduler>,
    closed: AtomicBool,
}

impl TableDb {
    pub fn open(config: EngineConfig, authority: Arc<dyn Authority>) -> TdbResult<Self> {
        if let Some(level) = &config.log_level {
            logging::init_with_level(level);
        }
        info!("Opening TableDB at {:?} ({:?})", config.root, config.write_mode);
        let store = DocumentStore::open(&config.root, config.read_locking)?;
        let engine = Arc::new(StorageEngine::new(store, config.write_mode));
        let executor = Arc::new(QueryExecutor::new(engine.clone(), authority.clone()));
        let mirror = Arc::new(RealtimeMirror::new(engine.clone()));
        let sync = Arc::new(SyncService::new(engine.clone(), authority));
        let scheduler = Arc::new(Scheduler::new());

        let flush_engine = engine.clone();
        scheduler.register(ScheduledJob::new(
            JOB_FLUSH_DIRTY,
            Schedule::Interval(config.flush_interval()),
            move || flush_engine.flush_all().map(|_| ()),
        ))?;
        let index_engine = engine.clone();
        scheduler.register(ScheduledJob::new(
            JOB_FLUSH_INDEXES,
            Schedule::Interval(config.index_flush_interval()),
            move || index_engine.flush_indexes().map(|_| ()),
        ))?;
        let lazy_mirror = mirror.clone();
        scheduler.register(ScheduledJob::new(
            JOB_REALTIME_FLUSH,
            Schedule::Interval(config.realtime_flush_interval()),
            move || lazy_mirror.flush_lazy().map(|_| ()),
        ))?;
        if config.background_jobs {
            scheduler.start()?;
        }

        Ok(Self {
            config,
            engine,
            executor,
            mirror,
            sync,
            scheduler,
            closed: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn engine(&self) -> &Arc<StorageEngine> {
        &self.engine
    }

    pub fn executor(&self) -> &Arc<QueryExecutor> {
        &self.executor
    }

    pub fn mirror(&self) -> &Arc<RealtimeMirror> {
        &self.mirror
    }

    pub fn sync(&self) -> &Arc<SyncService> {
        &self.sync
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn session(&self, username: &str) -> Session {
        Session::new(username, self.executor.clone(), self.mirror.clone())
    }

    /// One-shot statement outside a session.
    pub fn execute(&self, username: &str, database: &str, sql: &str) -> QueryResult {
        self.executor.execute(username, database, sql)
    }

    /// Persist every dirty table and cached index now.
    pub fn flush(&self) -> TdbResult<usize> {
        let tables = self.engine.flush_all()?;
        self.engine.flush_indexes()?;
        Ok(tables)
    }

    /// Stop background jobs and write everything back. Idempotent.
    pub fn shutdown(&self) -> TdbResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.scheduler.shutdown();
        self.mirror.end_session();
        self.engine.flush_all()?;
        self.engine.flush_indexes()?;
        info!("TableDB at {:?} shut down", self.config.root);
        Ok(())
    }
}

impl Drop for TableDb {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("Final flush failed: {}", e);
        }
    }
}
