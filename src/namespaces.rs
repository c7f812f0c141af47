//! Namespace entry for hook processes.
//!
//! The activation path must observe the container's view of the filesystem
//! (`<rootfs>/etc/passwd`, overlay targets) and place the daemon it forks
//! inside the container's pid namespace. Joining therefore happens before
//! any rootfs-relative filesystem access.

use crate::error::{Error, Result};
use std::fs::{self, File};
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;
use tracing::debug;

/// Joins the mount, pid, and (when distinct from ours) user namespaces of
/// the target process.
///
/// All namespace fds are opened before the first `setns`, so a join cannot
/// invalidate the paths of the remaining ones. The user namespace goes
/// first since it gates the privilege checks of the others; joining one's
/// own user namespace fails with EINVAL, hence the sameness check. The pid
/// namespace only affects children, which is exactly what the daemon
/// launcher needs.
pub fn enter_namespaces_of_process(pid: i32) -> Result<()> {
    debug!(pid, "entering container namespaces");

    let user = if same_namespace_as_self(pid, "user") {
        None
    } else {
        Some(open_namespace(pid, "user")?)
    };
    let mnt = open_namespace(pid, "mnt")?;
    let pidns = open_namespace(pid, "pid")?;

    if let Some(user) = user {
        setns(&user, libc::CLONE_NEWUSER, "user")?;
    }
    setns(&mnt, libc::CLONE_NEWNS, "mnt")?;
    setns(&pidns, libc::CLONE_NEWPID, "pid")?;

    debug!(pid, "joined container namespaces");
    Ok(())
}

fn namespace_path(pid: i32, name: &str) -> PathBuf {
    PathBuf::from(format!("/proc/{pid}/ns/{name}"))
}

fn open_namespace(pid: i32, name: &str) -> Result<File> {
    let path = namespace_path(pid, name);
    File::open(&path).map_err(|source| Error::Fs {
        op: "open",
        path,
        source,
    })
}

/// Whether the target process shares the given namespace with us, judged by
/// the `ns` symlink targets.
fn same_namespace_as_self(pid: i32, name: &str) -> bool {
    let ours = fs::read_link(namespace_path(
        std::process::id() as i32,
        name,
    ));
    let theirs = fs::read_link(namespace_path(pid, name));
    match (ours, theirs) {
        (Ok(a), Ok(b)) => a == b,
        // unreadable links resolve during the actual join attempt
        _ => true,
    }
}

fn setns(fd: &File, nstype: libc::c_int, name: &str) -> Result<()> {
    // SAFETY: fd is an open namespace file descriptor and nstype names its
    // kind; setns does not touch memory we own.
    let ret = unsafe { libc::setns(fd.as_raw_fd(), nstype) };
    if ret != 0 {
        return Err(Error::Privilege {
            op: format!("setns into {name} namespace"),
            source: std::io::Error::last_os_error(),
        });
    }
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
