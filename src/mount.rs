//! Overlay filesystem mounting.

use crate::error::{Error, Result};
use std::ffi::CString;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use tracing::debug;

/// Mounts an overlay filesystem at `target`.
///
/// `lower` stays read-only, writes land in `upper`, and `work` must be an
/// empty directory on the same filesystem as `upper`.
pub fn mount_overlayfs(lower: &Path, upper: &Path, work: &Path, target: &Path) -> Result<()> {
    let options = format!(
        "lowerdir={},upperdir={},workdir={}",
        lower.display(),
        upper.display(),
        work.display()
    );
    debug!(target = %target.display(), %options, "mounting overlayfs");

    let mount_error = |source: io::Error| Error::OverlayMount {
        target: target.to_path_buf(),
        options: options.clone(),
        source,
    };

    let source = CString::new("overlay").expect("no interior NUL");
    let fstype = CString::new("overlay").expect("no interior NUL");
    let target_c = cstring_path(target).map_err(mount_error)?;
    let data = CString::new(options.as_bytes()).map_err(|_| {
        mount_error(io::Error::new(
            io::ErrorKind::InvalidInput,
            "mount options contain a NUL byte",
        ))
    })?;

    // SAFETY: all pointers reference live NUL-terminated strings; the data
    // argument is an option string, which is what the overlay driver
    // expects.
    let ret = unsafe {
        libc::mount(
            source.as_ptr(),
            target_c.as_ptr(),
            fstype.as_ptr(),
            0,
            data.as_ptr() as *const libc::c_void,
        )
    };
    if ret != 0 {
        return Err(mount_error(io::Error::last_os_error()));
    }

    Ok(())
}

fn cstring_path(path: &Path) -> io::Result<CString> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains a NUL byte"))
}

// =============================================================================
// Tests
// =============================================================================
