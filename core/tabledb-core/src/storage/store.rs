//! Table Document Store: reads and writes whole table documents.
//!
//! Layout under the store root:
//!
//! ```text
//! <root>/<database>/<table>.json
//! <root>/<database>/.commits/<commit_id>.json
//! <root>/.notifications/<user>.json
//! ```
//!
//! `save` serializes the full document, writes it to a temporary file in the
//! same directory and renames it over the target while holding the path's
//! exclusive lock (see [`LockRegistry`]). A failure at any step leaves the
//! previous file untouched. Hidden `.<table>.json.lock` files next to each
//! table carry the cross-process lock.

use crate::error::{TdbError, TdbResult};
use crate::storage::document::TableDocument;
use crate::storage::lock::{LockRegistry, ReadLocking};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument};

/// File extension of table documents.
pub const TABLE_EXTENSION: &str = "json";

/// Reject names that would escape the store directory.
pub fn validate_name(kind: &'static str, name: &str) -> TdbResult<()> {
    let ok = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '-');
    if ok {
        Ok(())
    } else {
        Err(TdbError::invalid_query(format!("invalid {} name '{}'", kind, name)))
    }
}

/// Table name for a table file name (`users.json` → `users`).
pub fn table_name_from_file(file_name: &str) -> Option<&str> {
    file_name
        .strip_suffix(TABLE_EXTENSION)
        .and_then(|s| s.strip_suffix('.'))
        .filter(|s| !s.is_empty())
}

/// Write `path` through a temporary sibling file and an atomic rename.
pub(crate) fn write_atomic(
    path: &Path,
    write: impl FnOnce(&mut File) -> io::Result<()>,
) -> TdbResult<()> {
    let dir = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    write(tmp.as_file_mut())?;
    tmp.as_file_mut().flush()?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// On-disk document store.
pub struct DocumentStore {
    root: PathBuf,
    locks: LockRegistry,
    read_locking: ReadLocking,
}

impl DocumentStore {
    /// Open (creating if needed) a store rooted at `root`.
    #[instrument(skip(root))]
    pub fn open(root: impl AsRef<Path>, read_locking: ReadLocking) -> TdbResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        info!("Opened document store at {:?}", root);
        Ok(Self {
            root,
            locks: LockRegistry::new(),
            read_locking,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn locks(&self) -> &LockRegistry {
        &self.locks
    }

    /// Directory of `database`. Callers validate the name first; see
    /// [`require_database`](Self::require_database).
    pub fn database_path(&self, database: &str) -> PathBuf {
        self.root.join(database)
    }

    pub fn table_path(&self, database: &str, table: &str) -> PathBuf {
        self.database_path(database)
            .join(format!("{}.{}", table, TABLE_EXTENSION))
    }

    // ===== Documents =====

    /// Load and normalize a document.
    ///
    /// `NotFound` if the file is absent, `Corrupt` if it cannot be parsed or a
    /// required section is missing.
    pub fn load(&self, path: &Path) -> TdbResult<TableDocument> {
        let text = match self.read_locking {
            ReadLocking::Optimistic => fs::read_to_string(path),
            ReadLocking::Shared => self.locks.with_shared(path, || fs::read_to_string(path)),
        };
        let text = match text {
            Ok(t) => t,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(TdbError::not_found("table", path.display().to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        let mut doc = parse_document(path, &text)?;
        doc.normalize();
        Ok(doc)
    }

    /// Persist the whole document under the path's exclusive lock.
    #[instrument(skip(self, doc), fields(path = %path.display()))]
    pub fn save(&self, path: &Path, doc: &TableDocument) -> TdbResult<()> {
        // Serialize first: a serialization failure must not touch the disk.
        let bytes = serde_json::to_vec_pretty(doc)?;
        self.locks
            .with_exclusive(path, || write_atomic(path, |f| f.write_all(&bytes)))?;
        debug!(rows = doc.rows.len(), "Saved table document");
        Ok(())
    }

    pub fn load_table(&self, database: &str, table: &str) -> TdbResult<TableDocument> {
        self.require_database(database)?;
        validate_name("table", table)?;
        let path = self.table_path(database, table);
        self.load(&path).map_err(|e| match e {
            TdbError::NotFound { .. } => TdbError::not_found("table", table),
            other => other,
        })
    }

    pub fn save_table(&self, database: &str, doc: &TableDocument) -> TdbResult<()> {
        self.require_database(database)?;
        validate_name("table", doc.name())?;
        self.save(&self.table_path(database, doc.name()), doc)
    }

    pub fn table_exists(&self, database: &str, table: &str) -> bool {
        self.database_exists(database)
            && validate_name("table", table).is_ok()
            && self.table_path(database, table).is_file()
    }

    /// Create a new table document.
    pub fn create_table(&self, database: &str, doc: &TableDocument) -> TdbResult<()> {
        self.require_database(database)?;
        validate_name("table", doc.name())?;
        let path = self.table_path(database, doc.name());
        self.locks.with_exclusive(&path, || {
            if path.exists() {
                return Err(TdbError::already_exists("table", doc.name()));
            }
            let bytes = serde_json::to_vec_pretty(doc)?;
            write_atomic(&path, |f| f.write_all(&bytes))
        })?;
        info!("Created table {}.{}", database, doc.name());
        Ok(())
    }

    pub fn drop_table(&self, database: &str, table: &str) -> TdbResult<()> {
        self.require_database(database)?;
        validate_name("table", table)?;
        let path = self.table_path(database, table);
        self.locks.with_exclusive(&path, || match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(TdbError::not_found("table", table))
            }
            Err(e) => Err(e.into()),
        })?;
        self.locks.forget(&path);
        info!("Dropped table {}.{}", database, table);
        Ok(())
    }

    /// Table names of a database, sorted.
    pub fn list_tables(&self, database: &str) -> TdbResult<Vec<String>> {
        self.require_database(database)?;
        let mut tables = Vec::new();
        for entry in fs::read_dir(self.database_path(database))? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy().to_string();
            if let Some(name) = table_name_from_file(&file_name)
                && !name.starts_with('.')
            {
                tables.push(name.to_string());
            }
        }
        tables.sort();
        Ok(tables)
    }

    // ===== Databases =====

    /// `NoDatabaseSelected` for an empty name, `InvalidQuery` for a name
    /// that is not a plain directory name, `DatabaseNotFound` if absent.
    pub fn require_database(&self, database: &str) -> TdbResult<()> {
        if database.is_empty() {
            return Err(TdbError::NoDatabaseSelected);
        }
        validate_name("database", database)?;
        if !self.database_path(database).is_dir() {
            return Err(TdbError::DatabaseNotFound(database.to_string()));
        }
        Ok(())
    }

    pub fn database_exists(&self, database: &str) -> bool {
        validate_name("database", database).is_ok() && self.database_path(database).is_dir()
    }

    pub fn create_database(&self, database: &str) -> TdbResult<()> {
        validate_name("database", database)?;
        let path = self.database_path(database);
        if path.exists() {
            return Err(TdbError::already_exists("database", database));
        }
        fs::create_dir_all(&path)?;
        info!("Created database {}", database);
        Ok(())
    }

    pub fn drop_database(&self, database: &str) -> TdbResult<()> {
        self.require_database(database)?;
        let path = self.database_path(database);
        fs::remove_dir_all(&path)?;
        self.locks.forget_under(&path);
        info!("Dropped database {}", database);
        Ok(())
    }

    /// Database names, sorted. Hidden directories are skipped.
    pub fn list_databases(&self) -> TdbResult<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if entry.file_type()?.is_dir() && !name.starts_with('.') {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    // ===== Raw files (replication) =====

    /// `(file name, raw document text)` for every table of a database.
    pub fn read_table_files(&self, database: &str) -> TdbResult<Vec<(String, String)>> {
        let mut files = Vec::new();
        for table in self.list_tables(database)? {
            let path = self.table_path(database, &table);
            let text = match self.read_locking {
                ReadLocking::Optimistic => fs::read_to_string(&path)?,
                ReadLocking::Shared => self.locks.with_shared(&path, || fs::read_to_string(&path))?,
            };
            files.push((format!("{}.{}", table, TABLE_EXTENSION), text));
        }
        Ok(files)
    }

    /// Validate and write a raw table document received from a peer.
    pub fn write_table_file(&self, database: &str, file_name: &str, text: &str) -> TdbResult<()> {
        let table = table_name_from_file(file_name)
            .ok_or_else(|| TdbError::invalid_query(format!("not a table file '{}'", file_name)))?;
        self.require_database(database)?;
        validate_name("table", table)?;
        let path = self.table_path(database, table);
        parse_document(&path, text)?;
        self.locks
            .with_exclusive(&path, || write_atomic(&path, |f| f.write_all(text.as_bytes())))
    }
}

/// Parse raw document text, mapping failures to `Corrupt`.
pub fn parse_document(path: &Path, text: &str) -> TdbResult<TableDocument> {
    serde_json::from_str::<TableDocument>(text)
        .map_err(|e| TdbError::corrupt(path.display(), e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::document::{Row, Schema};
    use crate::value::{ColumnType, Value};
    use tempfile::tempdir;

    fn users() -> TableDocument {
        let schema = Schema::from_columns(vec![
            ("id".to_string(), ColumnType::Int),
            ("name".to_string(), ColumnType::Text),
        ]);
        let mut doc = TableDocument::new("users", schema);
        let mut row = Row::new();
        row.insert("id".to_string(), Value::Int(1));
        row.insert("name".to_string(), Value::from("Alice"));
        doc.rows.push(row);
        doc
    }

    #[test]
    fn create_requires_database() {
        let dir = tempdir().unwrap();
        let store = DocumentStore::open(dir.path(), ReadLocking::Optimistic).unwrap();
        assert!(matches!(
            store.create_table("", &users()),
            Err(TdbError::NoDatabaseSelected)
        ));
        assert!(matches!(
            store.create_table("shop", &users()),
            Err(TdbError::DatabaseNotFound(_))
        ));
    }

    #[test]
    fn create_load_and_duplicate() {
        let dir = tempdir().unwrap();
        let store = DocumentStore::open(dir.path(), ReadLocking::Optimistic).unwrap();
        store.create_database("shop").unwrap();
        store.create_table("shop", &users()).unwrap();
        assert!(matches!(
            store.create_table("shop", &users()),
            Err(TdbError::AlreadyExists { .. })
        ));
        let loaded = store.load_table("shop", "users").unwrap();
        assert_eq!(loaded.rows.len(), 1);
        assert_eq!(store.list_tables("shop").unwrap(), vec!["users".to_string()]);
    }

    #[test]
    fn missing_and_corrupt_documents() {
        let dir = tempdir().unwrap();
        let store = DocumentStore::open(dir.path(), ReadLocking::Shared).unwrap();
        store.create_database("shop").unwrap();
        assert!(matches!(
            store.load_table("shop", "nope"),
            Err(TdbError::NotFound { .. })
        ));

        let path = store.table_path("shop", "broken");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(store.load(&path), Err(TdbError::Corrupt { .. })));

        fs::write(&path, r#"{"schema":{},"rows":[]}"#).unwrap();
        assert!(matches!(store.load(&path), Err(TdbError::Corrupt { .. })));
    }

    #[test]
    fn failed_write_keeps_previous_content() {
        let dir = tempdir().unwrap();
        let store = DocumentStore::open(dir.path(), ReadLocking::Optimistic).unwrap();
        store.create_database("shop").unwrap();
        store.create_table("shop", &users()).unwrap();
        let path = store.table_path("shop", "users");
        let before = fs::read_to_string(&path).unwrap();

        // Half a document, then a disk-full error.
        let result = write_atomic(&path, |f| {
            f.write_all(b"{\"schema\": {\"id\"")?;
            Err(io::Error::other("disk full"))
        });
        assert!(matches!(result, Err(TdbError::Io { .. })));

        assert_eq!(fs::read_to_string(&path).unwrap(), before);
        assert_eq!(store.load(&path).unwrap().rows.len(), 1);
        // No temp file left behind.
        let names: Vec<String> = fs::read_dir(store.database_path("shop"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert!(names.iter().all(|n| !n.starts_with(".tmp")), "{:?}", names);
        assert_eq!(store.list_tables("shop").unwrap(), vec!["users".to_string()]);
    }

    #[test]
    fn raw_files_round_trip() {
        let dir = tempdir().unwrap();
        let store = DocumentStore::open(dir.path(), ReadLocking::Optimistic).unwrap();
        store.create_database("shop").unwrap();
        store.create_table("shop", &users()).unwrap();
        let files = store.read_table_files("shop").unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].0, "users.json");

        store.create_database("copy").unwrap();
        store.write_table_file("copy", &files[0].0, &files[0].1).unwrap();
        assert_eq!(store.load_table("copy", "users").unwrap().rows.len(), 1);
        assert!(matches!(
            store.write_table_file("copy", "bad.json", "garbage"),
            Err(TdbError::Corrupt { .. })
        ));
    }

    #[test]
    fn names_are_validated() {
        assert!(validate_name("table", "users_2").is_ok());
        assert!(validate_name("table", "../etc").is_err());
        assert!(validate_name("table", ".commits").is_err());
        assert!(validate_name("table", "").is_err());
        assert_eq!(table_name_from_file("users.json"), Some("users"));
        assert_eq!(table_name_from_file(".json"), None);
    }

    #[test]
    fn traversal_names_never_reach_the_disk() {
        let dir = tempdir().unwrap();
        let store = DocumentStore::open(dir.path().join("data"), ReadLocking::Optimistic).unwrap();
        store.create_database("a").unwrap();
        store.create_database("b").unwrap();
        store.create_table("b", &users()).unwrap();

        assert!(matches!(
            store.load_table("a", "../b/users"),
            Err(TdbError::InvalidQuery { .. })
        ));
        assert!(matches!(
            store.drop_table("a", "../b/users"),
            Err(TdbError::InvalidQuery { .. })
        ));
        assert!(!store.table_exists("a", "../b/users"));
        assert!(matches!(store.require_database(".."), Err(TdbError::InvalidQuery { .. })));
        assert!(!store.database_exists(".."));
        assert!(store.drop_database("../data").is_err());
        assert!(store.table_exists("b", "users"));
        assert!(dir.path().join("data").is_dir());
    }
}
