//! Per-user notification queue, persisted at `<root>/.notifications/<user>.json`.

use crate::error::{TdbError, TdbResult};
use crate::storage::store::{validate_name, write_atomic};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::PathBuf;
use tracing::debug;

pub const NOTIFICATIONS_DIR: &str = ".notifications";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Approved,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub commit_id: String,
    pub database: String,
    pub outcome: Outcome,
    pub message: String,
    pub timestamp: String,
}

impl Notification {
    pub fn new(
        commit_id: impl Into<String>,
        database: impl Into<String>,
        outcome: Outcome,
        message: impl Into<String>,
    ) -> Self {
        let commit_id = commit_id.into();
        let timestamp = crate::storage::document::metadata_timestamp();
        let id = format!(
            "{}-{}",
            commit_id,
            match outcome {
                Outcome::Approved => "approved",
                Outcome::Rejected => "rejected",
            }
        );
        Self {
            id,
            commit_id,
            database: database.into(),
            outcome,
            message: message.into(),
            timestamp,
        }
    }
}

/// File-backed queues. One mutex serializes read-modify-write cycles.
pub struct NotificationQueue {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl NotificationQueue {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            dir: root.into().join(NOTIFICATIONS_DIR),
            lock: Mutex::new(()),
        }
    }

    fn path(&self, username: &str) -> TdbResult<PathBuf> {
        validate_name("user", username)?;
        Ok(self.dir.join(format!("{}.json", username)))
    }

    fn read(&self, username: &str) -> TdbResult<Vec<Notification>> {
        let path = self.path(username)?;
        match fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text)
                .map_err(|e| TdbError::corrupt(path.display(), e.to_string())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, username: &str, entries: &[Notification]) -> TdbResult<()> {
        let path = self.path(username)?;
        fs::create_dir_all(&self.dir)?;
        let bytes = serde_json::to_vec_pretty(entries)?;
        write_atomic(&path, |f| io::Write::write_all(f, &bytes))
    }

    /// Append to `username`'s queue.
    pub fn push(&self, username: &str, notification: Notification) -> TdbResult<()> {
        let _guard = self.lock.lock();
        let mut entries = self.read(username)?;
        debug!("Notify {}: {}", username, notification.message);
        entries.push(notification);
        self.write(username, &entries)
    }

    /// Return and clear every queued entry.
    pub fn drain(&self, username: &str) -> TdbResult<Vec<Notification>> {
        let _guard = self.lock.lock();
        let entries = self.read(username)?;
        if !entries.is_empty() {
            self.write(username, &[])?;
        }
        Ok(entries)
    }

    /// Queued entries, left in place.
    pub fn peek(&self, username: &str) -> TdbResult<Vec<Notification>> {
        let _guard = self.lock.lock();
        self.read(username)
    }
}
