//! Per-namespace advisory file lock (spec §4.1 Concurrency, §5, §9 Design Notes).
//!
//! Grounded on the teacher crate's `config::user::acquire_config_lock`, which
//! uses `fs2::FileExt` over a dedicated `.lock` file. Here the lock additionally
//! supports a shared mode for readers, since the Store's contract distinguishes
//! shared-read from exclusive-write critical sections.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::error::CrewError;

/// RAII guard: the lock is released when this value is dropped, so a panic
/// mid-critical-section still unlocks (spec §5: "released even on panic/fatal
/// paths via scoped-acquisition semantics").
pub struct NamespaceLock {
    file: File,
}

impl NamespaceLock {
    fn open(path: &Path) -> Result<File, CrewError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CrewError::io("creating namespace directory", e))?;
        }
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| CrewError::io(format!("opening lock file {}", path.display()), e))
    }

    /// Acquire the shared (read) lock, blocking until available.
    pub fn shared(path: &Path) -> Result<Self, CrewError> {
        let file = Self::open(path)?;
        file.lock_shared()
            .map_err(|e| CrewError::io("acquiring shared lock", e))?;
        Ok(Self { file })
    }

    /// Acquire the exclusive (write) lock, blocking until available.
    pub fn exclusive(path: &Path) -> Result<Self, CrewError> {
        let file = Self::open(path)?;
        file.lock_exclusive()
            .map_err(|e| CrewError::io("acquiring exclusive lock", e))?;
        Ok(Self { file })
    }
}

impl Drop for NamespaceLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// The `.lock` file path for a namespace directory.
pub fn lock_path(namespace_dir: &Path) -> PathBuf {
    namespace_dir.join(".lock")
}

/// Atomically write `contents` to `path`: write-to-temp in the same
/// directory, then rename. The temp file is removed if the rename fails
/// (spec §4.1 "All writes are atomic").
pub fn write_atomic(path: &Path, contents: &str) -> Result<(), CrewError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).map_err(|e| CrewError::io("creating parent directory", e))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .map_err(|e| CrewError::io("creating temp file", e))?;
    use std::io::Write;
    tmp.write_all(contents.as_bytes())
        .map_err(|e| CrewError::io("writing temp file", e))?;
    tmp.flush().map_err(|e| CrewError::io("flushing temp file", e))?;
    match tmp.persist(path) {
        Ok(_) => Ok(()),
        Err(e) => {
            let _ = std::fs::remove_file(e.file.path());
            Err(CrewError::io("renaming temp file into place", e.error))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn exclusive_lock_roundtrips() {
        let dir = TempDir::new().unwrap();
        let path = lock_path(dir.path());
        let guard = NamespaceLock::exclusive(&path).unwrap();
        drop(guard);
        // Can re-acquire after drop.
        let _guard2 = NamespaceLock::exclusive(&path).unwrap();
    }

    #[test]
    fn write_atomic_creates_and_overwrites() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sub").join("file.txt");
        write_atomic(&path, "hello").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello");
        write_atomic(&path, "world").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "world");
    }
}
