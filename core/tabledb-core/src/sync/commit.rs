//! Commit: a staged, reviewable diff between a peer's tables and the owner's.

use crate::storage::{Row, TableDocument};
use crate::value::ColumnType;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Hex characters kept from the commit digest.
const COMMIT_ID_LEN: usize = 16;

static COMMIT_NONCE: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitStatus {
    #[default]
    Proposed,
    Approved,
    Rejected,
}

/// A row present on both sides whose serialized form differs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModifiedRow {
    /// Key column → value.
    pub key: Row,
    pub before: Row,
    pub after: Row,
}

/// Row-level changes turning the server table into the client table.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TableDiff {
    /// Columns the rows were matched on.
    pub key_columns: Vec<String>,
    #[serde(default)]
    pub added: Vec<Row>,
    #[serde(default)]
    pub modified: Vec<ModifiedRow>,
    #[serde(default)]
    pub deleted: Vec<Row>,
    /// Client columns missing from the server schema, appended on apply.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub added_columns: Vec<(String, ColumnType)>,
}

impl TableDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.modified.is_empty()
            && self.deleted.is_empty()
            && self.added_columns.is_empty()
    }

    pub fn change_count(&self) -> usize {
        self.added.len() + self.modified.len() + self.deleted.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    pub id: String,
    /// Pushing (child) user.
    pub username: String,
    /// Owner of the database the commit targets.
    pub owner: String,
    pub database: String,
    pub message: String,
    pub created_at: String,
    #[serde(default)]
    pub status: CommitStatus,
    /// Table name → diff.
    #[serde(default)]
    pub tables: BTreeMap<String, TableDiff>,
    /// Full client documents for tables the server does not have yet.
    #[serde(default)]
    pub created_tables: BTreeMap<String, TableDocument>,
}

impl Commit {
    pub fn new(
        username: impl Into<String>,
        owner: impl Into<String>,
        database: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let (username, database, message) = (username.into(), database.into(), message.into());
        let created_at = crate::storage::document::metadata_timestamp();
        Self {
            id: commit_id(&username, &database, &message, &created_at),
            username,
            owner: owner.into(),
            database,
            message,
            created_at,
            status: CommitStatus::Proposed,
            tables: BTreeMap::new(),
            created_tables: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.created_tables.is_empty() && self.tables.values().all(TableDiff::is_empty)
    }

    /// `"+a ~m -d across n table(s)"`
    pub fn summary(&self) -> String {
        let (mut added, mut modified, mut deleted) = (0, 0, 0);
        for diff in self.tables.values() {
            added += diff.added.len();
            modified += diff.modified.len();
            deleted += diff.deleted.len();
        }
        let touched = self.tables.len() + self.created_tables.len();
        format!(
            "+{} ~{} -{} across {} table(s)",
            added, modified, deleted, touched
        )
    }
}

/// SHA-256 of the commit's identifying fields, truncated to a short hex id.
pub fn commit_id(username: &str, database: &str, message: &str, created_at: &str) -> String {
    let nonce = COMMIT_NONCE.fetch_add(1, Ordering::Relaxed);
    let mut hasher = Sha256::new();
    for part in [username, database, message, created_at] {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    hasher.update(nonce.to_le_bytes());
    let digest = hasher.finalize();
    digest
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<String>()
        .chars()
        .take(COMMIT_ID_LEN)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_short_hex_and_unique() {
        let a = commit_id("bob", "shop", "m", "t");
        let b = commit_id("bob", "shop", "m", "t");
        assert_eq!(a.len(), COMMIT_ID_LEN);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn commit_serializes_lowercase_status() {
        let commit = Commit::new("bob", "alice", "shop", "first");
        let json = serde_json::to_value(&commit).unwrap();
        assert_eq!(json["status"], "proposed");
        assert!(commit.is_empty());
        assert_eq!(commit.summary(), "+0 ~0 -0 across 0 table(s)");
        let back: Commit = serde_json::from_value(json).unwrap();
        assert_eq!(back, commit);
    }
}
