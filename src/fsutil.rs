//! Filesystem helpers shared by the hooks.
//!
//! The staging steps create directories and copy files on behalf of the
//! container user while running as root, so creation and ownership travel
//! together here.

use crate::error::{Error, Result};
use std::ffi::CString;
use std::fs;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Creates `path` and any missing parents.
pub fn create_dirs(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|source| Error::Fs {
        op: "create directory",
        path: path.to_path_buf(),
        source,
    })
}

/// Creates `path` and any missing parents, chowning only the components
/// this call actually created.
pub fn create_dirs_as(path: &Path, uid: u32, gid: u32) -> Result<()> {
    let mut current = PathBuf::new();
    for component in path.components() {
        current.push(component);
        if matches!(component, Component::RootDir | Component::Prefix(_)) {
            continue;
        }
        match fs::create_dir(&current) {
            Ok(()) => set_owner(&current, uid, gid)?,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(source) => {
                return Err(Error::Fs {
                    op: "create directory",
                    path: current,
                    source,
                });
            }
        }
    }
    Ok(())
}

/// Changes the owner of `path`.
pub fn set_owner(path: &Path, uid: u32, gid: u32) -> Result<()> {
    let c_path = CString::new(path.as_os_str().as_bytes()).map_err(|_| Error::Fs {
        op: "chown",
        path: path.to_path_buf(),
        source: io::Error::new(io::ErrorKind::InvalidInput, "path contains a NUL byte"),
    })?;
    // SAFETY: c_path is a valid NUL-terminated path.
    if unsafe { libc::chown(c_path.as_ptr(), uid, gid) } != 0 {
        return Err(Error::Fs {
            op: "chown",
            path: path.to_path_buf(),
            source: io::Error::last_os_error(),
        });
    }
    Ok(())
}

/// Copies `src` to `dst`, creating missing parents. An existing destination
/// is replaced. Ownership is left to the calling process.
pub fn copy_file(src: &Path, dst: &Path) -> Result<()> {
    debug!(src = %src.display(), dst = %dst.display(), "copying file");
    if let Some(parent) = dst.parent() {
        create_dirs(parent)?;
    }
    remove_if_exists(dst)?;
    fs::copy(src, dst).map_err(|source| Error::Fs {
        op: "copy",
        path: src.to_path_buf(),
        source,
    })?;
    Ok(())
}

/// Copies `src` to `dst`, creating missing parents and handing ownership of
/// both the copy and any created parents to `uid`/`gid`. An existing
/// destination is replaced.
pub fn copy_file_as(src: &Path, dst: &Path, uid: u32, gid: u32) -> Result<()> {
    debug!(src = %src.display(), dst = %dst.display(), "copying file");
    if let Some(parent) = dst.parent() {
        create_dirs_as(parent, uid, gid)?;
    }
    remove_if_exists(dst)?;
    fs::copy(src, dst).map_err(|source| Error::Fs {
        op: "copy",
        path: src.to_path_buf(),
        source,
    })?;
    set_owner(dst, uid, gid)
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(Error::Fs {
            op: "remove",
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Writes `contents` to `path` (truncating) and sets the given mode.
pub fn write_file_with_mode(path: &Path, contents: &str, mode: u32) -> Result<()> {
    fs::write(path, contents).map_err(|source| Error::Fs {
        op: "write",
        path: path.to_path_buf(),
        source,
    })?;
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(|source| Error::Fs {
        op: "set permissions on",
        path: path.to_path_buf(),
        source,
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn own_ids() -> (u32, u32) {
        // SAFETY: getuid/getgid cannot fail.
        unsafe { (libc::getuid(), libc::getgid()) }
    }

    #[test]
    fn test_create_dirs_as_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let (uid, gid) = own_ids();
        let target = dir.path().join("a/b/c");
        create_dirs_as(&target, uid, gid).unwrap();
        create_dirs_as(&target, uid, gid).unwrap();
        assert!(target.is_dir());
    }

    #[test]
    fn test_copy_file_as_replaces_existing() {
        let dir = tempfile::tempdir().unwrap();
        let (uid, gid) = own_ids();
        let src = dir.path().join("src");
        let dst = dir.path().join("sub/dst");
        fs::write(&src, "new contents").unwrap();
        fs::create_dir_all(dst.parent().unwrap()).unwrap();
        fs::write(&dst, "old contents").unwrap();

        copy_file_as(&src, &dst, uid, gid).unwrap();
        assert_eq!(fs::read_to_string(&dst).unwrap(), "new contents");
    }

    #[test]
    fn test_write_file_with_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("script.sh");
        write_file_with_mode(&path, "#!/bin/sh\n", 0o744).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o744);
    }
}
