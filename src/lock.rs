//! Per-path write serialization.
//!
//! Files in a patch set are processed independently and may run in
//! parallel, but two writers must never race on the same path. Every
//! read-modify-write cycle holds the lock for its canonical path.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex, OnceLock, PoisonError};

/// Registry of paths currently being patched.
#[derive(Debug, Default)]
pub struct PathLocks {
    busy: Mutex<HashSet<PathBuf>>,
    released: Condvar,
}

/// Held for the duration of a file's read-modify-write cycle.
#[must_use = "the path is unlocked as soon as the guard is dropped"]
pub struct PathGuard<'a> {
    locks: &'a PathLocks,
    path: PathBuf,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry shared by every applicator.
    pub fn global() -> &'static PathLocks {
        static GLOBAL: OnceLock<PathLocks> = OnceLock::new();
        GLOBAL.get_or_init(PathLocks::new)
    }

    /// Block until no other guard holds `path`, then take it.
    ///
    /// `path` should be canonical so aliases of one file share a lock.
    pub fn lock(&self, path: &Path) -> PathGuard<'_> {
        let mut busy = self.busy.lock().unwrap_or_else(PoisonError::into_inner);
        while busy.contains(path) {
            busy = self
                .released
                .wait(busy)
                .unwrap_or_else(PoisonError::into_inner);
        }
        busy.insert(path.to_path_buf());

        PathGuard {
            locks: self,
            path: path.to_path_buf(),
        }
    }

    /// Number of paths currently held.
    pub fn held(&self) -> usize {
        self.busy
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl PathGuard<'_> {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PathGuard<'_> {
    fn drop(&mut self) {
        let mut busy = self
            .locks
            .busy
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        busy.remove(&self.path);
        self.locks.released.notify_all();
    }
}
