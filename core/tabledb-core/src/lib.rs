//! # TableDB: Document-Table Database
//!
//! TableDB는 테이블 하나를 JSON 문서 하나로 저장하는 임베디드 데이터베이스입니다.
//! 제한된 SQL 방언을 실행하고, 보조 인덱스를 유지하며, 커밋/리뷰 방식으로
//! 소유자와 하위 사용자 간에 데이터베이스를 복제합니다.
//!
//! ## 주요 특징
//!
//! - **Table Documents**: schema, metadata, rows and index snapshots in one file
//! - **SQL 지원**: CREATE/ALTER/DROP, INSERT, UPDATE, DELETE, SELECT with
//!   WHERE, JOIN, GROUP BY, ORDER BY, LIMIT/OFFSET
//! - **Secondary Indexes**: position-based column indexes kept in step with
//!   every write
//! - **Write Layer**: write-through or deferred writes, background flush
//!   jobs, an in-memory realtime mirror with change listeners
//! - **Replication**: clone, push, approve/reject, notifications
//!
//! ## 빠른 시작
//!
//! ```rust
//! use std::sync::Arc;
//! use tabledb_core::{AllowAll, EngineConfig, TableDb, Value};
//!
//! # fn main() -> tabledb_core::TdbResult<()> {
//! let dir = tempfile::tempdir()?;
//! let db = TableDb::open(
//!     EngineConfig::new(dir.path()).with_background_jobs(false),
//!     Arc::new(AllowAll),
//! )?;
//!
//! let mut session = db.session("root");
//! for result in session.execute_script(
//!     "CREATE DATABASE app; USE app;
//!      CREATE TABLE users (id INT PRIMARY KEY AUTOINCREMENT, name TEXT, age INT);
//!      INSERT INTO users (name, age) VALUES ('Alice', 30), ('Bob', 25)",
//! ) {
//!     assert!(result.is_success(), "{}", result.message);
//! }
//!
//! let result = session.execute("SELECT name FROM users WHERE age > 26");
//! assert_eq!(result.get(0, "name"), Some(&Value::from("Alice")));
//! # Ok(())
//! # }
//! ```
//!
//! ## 모듈 구조
//!
//! - [`storage`]: table documents and the on-disk document store
//! - [`index`]: column indexes, persisted snapshots, primary-key maps
//! - [`sql`]: lexer, parser and executor
//! - [`engine`]: storage engine, scheduler, realtime mirror, sessions ([`TableDb`])
//! - [`sync`]: diff, staging, approve/reject, notifications
//! - [`auth`]: authorization predicates
//! - [`config`]: engine configuration

pub mod auth;
pub mod config;
pub mod engine;
pub mod error;
pub mod index;
pub mod logging;
pub mod sql;
pub mod storage;
pub mod sync;
pub mod value;

pub use auth::{AllowAll, Authority, Permission, StaticAuthority};
pub use config::{EngineConfig, WriteMode};
pub use engine::{
    ChangeAction, ChangeEvent, FlushPolicy, RealtimeMirror, Session, StorageEngine, TableDb,
};
pub use error::{TdbError, TdbResult};
pub use sql::{QueryExecutor, QueryResult, QueryStatus};
pub use storage::{DocumentStore, ReadLocking, Row, Schema, TableDocument};
pub use sync::{SyncClient, SyncService};
pub use value::{ColumnType, Value};
