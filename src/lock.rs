//! Advisory locking for on-disk key directories.
//!
//! Key generation by concurrent jobs of the same user must serialize, so
//! the whole generate session runs under an exclusive `flock` held on a
//! lock file next to the guarded directory. The lock releases on drop, on
//! every exit path.

use crate::error::{Error, Result};
use fs2::FileExt;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Exclusive advisory lock bound to a directory.
///
/// The lock file is `<dir>.lock`, a sibling of the directory, so the
/// guarded directory itself can be wiped and recreated while the lock is
/// held.
pub struct DirLock {
    // kept open to hold the flock
    _file: File,
    path: PathBuf,
}

impl DirLock {
    /// Acquires the lock, blocking until it is available.
    pub fn acquire(dir: &Path) -> Result<Self> {
        let path = lock_path(dir);
        let file = File::create(&path).map_err(|source| Error::Fs {
            op: "create lock file",
            path: path.clone(),
            source,
        })?;
        file.lock_exclusive().map_err(|source| Error::Fs {
            op: "lock",
            path: path.clone(),
            source,
        })?;
        debug!(path = %path.display(), "acquired directory lock");
        Ok(Self { _file: file, path })
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        // the flock releases when the file closes
        debug!(path = %self.path.display(), "released directory lock");
    }
}

fn lock_path(dir: &Path) -> PathBuf {
    let mut name = dir.file_name().unwrap_or_default().to_os_string();
    name.push(".lock");
    dir.with_file_name(name)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_file_is_a_sibling() {
        assert_eq!(
            lock_path(Path::new("/base/alice/keys")),
            PathBuf::from("/base/alice/keys.lock")
        );
    }

    #[test]
    fn test_lock_excludes_second_holder() {
        let dir = tempfile::tempdir().unwrap();
        let keys = dir.path().join("keys");

        let held = DirLock::acquire(&keys).unwrap();

        let probe = File::open(lock_path(&keys)).unwrap();
        assert!(probe.try_lock_exclusive().is_err());

        drop(held);
        assert!(probe.try_lock_exclusive().is_ok());
    }

    #[test]
    fn test_lock_survives_wiping_the_guarded_directory() {
        let dir = tempfile::tempdir().unwrap();
        let keys = dir.path().join("keys");
        std::fs::create_dir_all(&keys).unwrap();

        let _held = DirLock::acquire(&keys).unwrap();
        std::fs::remove_dir_all(&keys).unwrap();
        assert!(lock_path(&keys).exists());
    }
}
