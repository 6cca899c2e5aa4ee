//! Pending-commit store.
//!
//! One JSON file per staged commit at `<root>/<database>/.commits/<id>.json`.

use super::commit::Commit;
use crate::error::{TdbError, TdbResult};
use crate::storage::store::write_atomic;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, warn};

pub const COMMITS_DIR: &str = ".commits";

pub struct CommitStore {
    root: PathBuf,
}

impl CommitStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn commits_dir(&self, database: &str) -> PathBuf {
        self.root.join(database).join(COMMITS_DIR)
    }

    pub fn commit_path(&self, database: &str, id: &str) -> PathBuf {
        self.commits_dir(database).join(format!("{}.json", id))
    }

    /// Persist a proposed commit. `AlreadyExists` if the id is taken.
    pub fn stage(&self, commit: &Commit) -> TdbResult<PathBuf> {
        let dir = self.commits_dir(&commit.database);
        fs::create_dir_all(&dir)?;
        let path = self.commit_path(&commit.database, &commit.id);
        if path.exists() {
            return Err(TdbError::already_exists("commit", &commit.id));
        }
        let bytes = serde_json::to_vec_pretty(commit)?;
        write_atomic(&path, |f| io::Write::write_all(f, &bytes))?;
        info!(
            "Staged commit {} from {} on {} ({})",
            commit.id,
            commit.username,
            commit.database,
            commit.summary()
        );
        Ok(path)
    }

    pub fn load(&self, database: &str, id: &str) -> TdbResult<Commit> {
        let path = self.commit_path(database, id);
        read_commit(&path)?.ok_or_else(|| TdbError::not_found("commit", id))
    }

    /// Every readable pending commit, oldest first.
    pub fn list_pending(&self) -> TdbResult<Vec<Commit>> {
        let mut commits: Vec<(SystemTime, Commit)> = self.scan()?;
        commits.sort_by(|a, b| order_key(a).cmp(&order_key(b)));
        Ok(commits.into_iter().map(|(_, c)| c).collect())
    }

    /// The actionable commit of `username`: the most recently modified
    /// pending file, ties broken by `created_at`. Older ones are shadowed.
    pub fn latest_for_user(&self, username: &str) -> TdbResult<Option<Commit>> {
        Ok(self
            .scan()?
            .into_iter()
            .filter(|(_, c)| c.username == username)
            .max_by(|a, b| order_key(a).cmp(&order_key(b)))
            .map(|(_, c)| c))
    }

    pub fn remove(&self, commit: &Commit) -> TdbResult<()> {
        let path = self.commit_path(&commit.database, &commit.id);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!("Removed commit file {:?}", path);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(TdbError::not_found("commit", &commit.id))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn scan(&self) -> TdbResult<Vec<(SystemTime, Commit)>> {
        let mut found = Vec::new();
        if !self.root.is_dir() {
            return Ok(found);
        }
        for db in fs::read_dir(&self.root)? {
            let db = db?;
            let name = db.file_name().to_string_lossy().to_string();
            if name.starts_with('.') || !db.file_type()?.is_dir() {
                continue;
            }
            let dir = db.path().join(COMMITS_DIR);
            if !dir.is_dir() {
                continue;
            }
            for entry in fs::read_dir(&dir)? {
                let path = entry?.path();
                if path.extension().is_none_or(|e| e != "json") {
                    continue;
                }
                let modified = fs::metadata(&path)?.modified()?;
                match read_commit(&path) {
                    Ok(Some(commit)) => found.push((modified, commit)),
                    Ok(None) => {}
                    Err(e) => warn!("Skipping unreadable commit {:?}: {}", path, e),
                }
            }
        }
        Ok(found)
    }
}

fn order_key(entry: &(SystemTime, Commit)) -> (SystemTime, &str) {
    (entry.0, entry.1.created_at.as_str())
}

fn read_commit(path: &Path) -> TdbResult<Option<Commit>> {
    match fs::read_to_string(path) {
        Ok(text) => serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| TdbError::corrupt(path.display(), e.to_string())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn stage_load_remove() {
        let dir = tempdir().unwrap();
        let store = CommitStore::new(dir.path());
        let commit = Commit::new("bob", "alice", "shop", "first");

        let path = store.stage(&commit).unwrap();
        assert!(path.ends_with(format!("shop/.commits/{}.json", commit.id)));
        assert!(matches!(
            store.stage(&commit),
            Err(TdbError::AlreadyExists { .. })
        ));
        assert_eq!(store.load("shop", &commit.id).unwrap(), commit);

        store.remove(&commit).unwrap();
        assert!(matches!(
            store.load("shop", &commit.id),
            Err(TdbError::NotFound { .. })
        ));
        assert!(store.remove(&commit).is_err());
    }

    #[test]
    fn latest_commit_shadows_older_ones() {
        let dir = tempdir().unwrap();
        let store = CommitStore::new(dir.path());
        let first = Commit::new("bob", "alice", "shop", "first");
        store.stage(&first).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        let second = Commit::new("bob", "alice", "shop", "second");
        store.stage(&second).unwrap();
        store
            .stage(&Commit::new("carol", "alice", "shop", "other"))
            .unwrap();

        let latest = store.latest_for_user("bob").unwrap().unwrap();
        assert_eq!(latest.id, second.id);
        assert!(store.latest_for_user("dave").unwrap().is_none());

        let pending = store.list_pending().unwrap();
        assert_eq!(pending.len(), 3);
        assert_eq!(pending[0].id, first.id);
    }

    #[test]
    fn unreadable_files_are_skipped() {
        let dir = tempdir().unwrap();
        let store = CommitStore::new(dir.path());
        fs::create_dir_all(store.commits_dir("shop")).unwrap();
        fs::write(store.commits_dir("shop").join("junk.json"), "{").unwrap();
        assert!(store.list_pending().unwrap().is_empty());
    }
}
