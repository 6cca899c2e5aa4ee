//! Database Engine Module

pub mod database;
pub mod realtime;
pub mod scheduler;
pub mod session;
pub mod storage_engine;

pub use database::TableDb;
pub use realtime::{ChangeAction, ChangeEvent, FlushPolicy, ListenerId, RealtimeMirror};
pub use scheduler::{Schedule, ScheduledJob, Scheduler};
pub use session::Session;
pub use storage_engine::{StorageEngine, TableIndexes, TableKey};
