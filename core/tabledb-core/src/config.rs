//! Engine configuration.
//!
//! ```rust
//! use tabledb_core::config::{EngineConfig, WriteMode};
//! use std::time::Duration;
//!
//! let config = EngineConfig::new("/var/lib/tabledb")
//!     .with_write_mode(WriteMode::Deferred)
//!     .with_flush_interval(Duration::from_millis(500));
//! assert_eq!(config.write_mode, WriteMode::Deferred);
//! ```

use crate::error::{TdbError, TdbResult};
use crate::storage::ReadLocking;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// When statement results reach the disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Every successful statement saves its table before returning.
    #[default]
    WriteThrough,
    /// Statements park the document in the dirty map; the flush job persists it.
    Deferred,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Store root holding one directory per database.
    pub root: PathBuf,
    pub write_mode: WriteMode,
    pub read_locking: ReadLocking,
    /// Dirty-table flush cycle.
    pub flush_interval_ms: u64,
    /// Persisted-index flush cycle (longer than the table flush).
    pub index_flush_interval_ms: u64,
    /// Realtime lazy-flush cycle.
    pub realtime_flush_interval_ms: u64,
    /// Whether `TableDb::open` starts the background scheduler.
    pub background_jobs: bool,
    /// Install a `tracing` subscriber at this level on open (feature
    /// `logging`). `RUST_LOG` overrides it.
    pub log_level: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("data"),
            write_mode: WriteMode::WriteThrough,
            read_locking: ReadLocking::Optimistic,
            flush_interval_ms: 1_000,
            index_flush_interval_ms: 10_000,
            realtime_flush_interval_ms: 2_000,
            background_jobs: true,
            log_level: None,
        }
    }
}

impl EngineConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Read a JSON config file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> TdbResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|e| TdbError::corrupt(path.display(), e.to_string()))
    }

    pub fn with_write_mode(mut self, mode: WriteMode) -> Self {
        self.write_mode = mode;
        self
    }

    pub fn with_read_locking(mut self, locking: ReadLocking) -> Self {
        self.read_locking = locking;
        self
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_index_flush_interval(mut self, interval: Duration) -> Self {
        self.index_flush_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_realtime_flush_interval(mut self, interval: Duration) -> Self {
        self.realtime_flush_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_background_jobs(mut self, enabled: bool) -> Self {
        self.background_jobs = enabled;
        self
    }

    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = Some(level.into());
        self
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms.max(1))
    }

    pub fn index_flush_interval(&self) -> Duration {
        Duration::from_millis(self.index_flush_interval_ms.max(1))
    }

    pub fn realtime_flush_interval(&self) -> Duration {
        Duration::from_millis(self.realtime_flush_interval_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_are_write_through() {
        let config = EngineConfig::default();
        assert_eq!(config.write_mode, WriteMode::WriteThrough);
        assert_eq!(config.read_locking, ReadLocking::Optimistic);
        assert!(config.index_flush_interval() > config.flush_interval());
    }

    #[test]
    fn partial_json_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("engine.json");
        std::fs::write(
            &path,
            r#"{"root": "/srv/db", "write_mode": "deferred", "read_locking": "shared"}"#,
        )
        .unwrap();
        let config = EngineConfig::from_json_file(&path).unwrap();
        assert_eq!(config.root, PathBuf::from("/srv/db"));
        assert_eq!(config.write_mode, WriteMode::Deferred);
        assert_eq!(config.read_locking, ReadLocking::Shared);
        assert_eq!(config.flush_interval_ms, 1_000);
    }

    #[test]
    fn zero_interval_is_clamped() {
        let config = EngineConfig::default().with_flush_interval(Duration::ZERO);
        assert_eq!(config.flush_interval(), Duration::from_millis(1));
    }
}
