//! Per-path lock registry.
//!
//! Writers of the same document file are mutually exclusive for the duration
//! of one write, inside the process and across processes sharing the store
//! root. Readers take the shared side only when the store runs with
//! [`ReadLocking::Shared`].
//!
//! # 잠금 계층
//!
//! 1. `parking_lot::RwLock` per path: threads of this process.
//! 2. `fs2` advisory lock on a hidden sidecar file (`.<file>.lock`) next to
//!    the document: other processes. The document itself is replaced by
//!    rename on every write, so it cannot carry the lock.
//!
//! Readers only take layer 1; across processes they rely on the atomic
//! rename and see either the old or the new document.

use dashmap::DashMap;
use fs2::FileExt;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

/// Reader policy for document loads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadLocking {
    /// Readers take no lock; writes replace the file by atomic rename so a
    /// reader sees either the old or the new document.
    #[default]
    Optimistic,
    /// Readers take the shared side of the per-path lock.
    Shared,
}

/// Sidecar lock file of a document path.
pub fn lock_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.lock", name))
}

struct PathLock {
    local: RwLock<()>,
    /// Opened once; `None` when the sidecar cannot be created, in which case
    /// only in-process exclusion applies.
    file: Option<File>,
}

impl PathLock {
    fn open(path: &Path) -> Self {
        let sidecar = lock_path(path);
        let file = match OpenOptions::new().create(true).truncate(false).write(true).open(&sidecar) {
            Ok(file) => Some(file),
            Err(e) => {
                warn!("Cannot open lock file {:?}: {}", sidecar, e);
                None
            }
        };
        Self {
            local: RwLock::new(()),
            file,
        }
    }
}

/// path → lock
#[derive(Default)]
pub struct LockRegistry {
    locks: DashMap<PathBuf, Arc<PathLock>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, path: &Path) -> Arc<PathLock> {
        self.locks
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(PathLock::open(path)))
            .value()
            .clone()
    }

    /// Run `f` holding the exclusive lock for `path`, in this process and on
    /// the sidecar file.
    pub fn with_exclusive<T>(&self, path: &Path, f: impl FnOnce() -> T) -> T {
        let lock = self.lock_for(path);
        let _guard = lock.local.write();
        let file = lock.file.as_ref().filter(|file| match file.lock_exclusive() {
            Ok(()) => true,
            Err(e) => {
                warn!("Advisory lock on {:?} failed: {}", path, e);
                false
            }
        });
        let out = f();
        if let Some(file) = file {
            let _ = file.unlock();
        }
        out
    }

    /// Run `f` holding the shared lock for `path`.
    pub fn with_shared<T>(&self, path: &Path, f: impl FnOnce() -> T) -> T {
        let lock = self.lock_for(path);
        let _guard = lock.local.read();
        f()
    }

    /// Forget the lock of a removed file unless another caller still holds it.
    ///
    /// The check runs under the map shard lock, the same lock `lock_for`
    /// clones under, so no new holder can appear in between.
    pub fn forget(&self, path: &Path) {
        self.locks
            .remove_if(path, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// [`forget`](Self::forget) every path under `dir`.
    pub fn forget_under(&self, dir: &Path) {
        self.locks
            .retain(|path, lock| !path.starts_with(dir) || Arc::strong_count(lock) > 1);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn exclusive_sections_do_not_overlap() {
        let dir = tempdir().unwrap();
        let registry = Arc::new(LockRegistry::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let path = dir.path().join("table.json");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let inside = Arc::clone(&inside);
                let max_seen = Arc::clone(&max_seen);
                let path = path.clone();
                thread::spawn(move || {
                    registry.with_exclusive(&path, || {
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(2));
                        inside.fetch_sub(1, Ordering::SeqCst);
                    })
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn exclusive_section_holds_the_sidecar_lock() {
        let dir = tempdir().unwrap();
        let registry = LockRegistry::new();
        let path = dir.path().join("users.json");
        let sidecar = lock_path(&path);
        assert_eq!(sidecar, dir.path().join(".users.json.lock"));

        registry.with_exclusive(&path, || {
            // A separate open file description stands in for another process.
            let other = File::open(&sidecar).unwrap();
            assert!(other.try_lock_exclusive().is_err());
        });
        let other = File::open(&sidecar).unwrap();
        other.try_lock_exclusive().unwrap();
        other.unlock().unwrap();
    }

    #[test]
    fn forget_keeps_a_lock_still_in_use() {
        let dir = tempdir().unwrap();
        let registry = Arc::new(LockRegistry::new());
        let path = dir.path().join("t.json");

        let held = registry.lock_for(&path);
        registry.forget(&path);
        assert_eq!(registry.len(), 1);
        drop(held);
        registry.forget(&path);
        assert!(registry.is_empty());

        registry.with_exclusive(&path, || ());
        registry.forget_under(dir.path());
        assert!(registry.is_empty());
    }
}
