//! Process-wide registry of open storage paths.

use crate::error::{StorageError, StorageResult};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

fn open_paths() -> &'static Mutex<HashSet<PathBuf>> {
    static OPEN_PATHS: OnceLock<Mutex<HashSet<PathBuf>>> = OnceLock::new();
    OPEN_PATHS.get_or_init(|| Mutex::new(HashSet::new()))
}

/// Exclusive ownership of a storage path within this process.
///
/// The path is released when the guard is dropped. Paths are compared after
/// canonicalization, so two spellings of the same directory collide.
///
/// # Example
///
/// ```rust
/// use pagedb_storage::PathGuard;
///
/// let dir = std::env::temp_dir();
/// let guard = PathGuard::acquire(&dir).unwrap();
/// assert!(PathGuard::acquire(&dir).is_err());
/// drop(guard);
/// assert!(PathGuard::acquire(&dir).is_ok());
/// ```
#[derive(Debug)]
pub struct PathGuard {
    path: PathBuf,
}

impl PathGuard {
    /// Claims `path` for the lifetime of the returned guard.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::PathInUse`] if another live guard holds the path,
    /// or an I/O error if the path cannot be canonicalized.
    pub fn acquire(path: &Path) -> StorageResult<Self> {
        let path = path.canonicalize()?;
        let mut paths = open_paths().lock();
        if !paths.insert(path.clone()) {
            return Err(StorageError::PathInUse(path));
        }
        Ok(Self { path })
    }

    /// Returns true if some live guard holds `path`.
    #[must_use]
    pub fn is_held(path: &Path) -> bool {
        match path.canonicalize() {
            Ok(path) => open_paths().lock().contains(&path),
            Err(_) => false,
        }
    }

    /// Returns the canonical path held by this guard.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PathGuard {
    fn drop(&mut self) {
        open_paths().lock().remove(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn second_acquire_fails_until_release() {
        let dir = tempdir().unwrap();
        let guard = PathGuard::acquire(dir.path()).unwrap();
        assert!(PathGuard::is_held(dir.path()));

        let err = PathGuard::acquire(dir.path()).unwrap_err();
        assert!(matches!(err, StorageError::PathInUse(_)));

        drop(guard);
        assert!(!PathGuard::is_held(dir.path()));
        assert!(PathGuard::acquire(dir.path()).is_ok());
    }

    #[test]
    fn different_spellings_collide() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("nested");
        std::fs::create_dir_all(&nested).unwrap();

        let _guard = PathGuard::acquire(&nested).unwrap();
        let dotted = dir.path().join("nested").join(".");
        assert!(PathGuard::acquire(&dotted).is_err());
    }

    #[test]
    fn missing_path_is_io_error() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("missing");
        assert!(matches!(
            PathGuard::acquire(&missing),
            Err(StorageError::Io(_))
        ));
    }
}
