//! Identity transitions and privilege reduction.
//!
//! Two distinct mechanisms live here:
//!
//! - **Scoped effective-identity switches** used by the parent hook process
//!   while staging files. Only the effective uid/gid move; the saved ids
//!   keep root, so the switch is reversible. [`with_identity`] guarantees
//!   the restore on every exit path.
//! - **Irreversible privilege reduction** for the daemon child, run between
//!   fork and exec: chroot, bounding-set clearing, supplementary-group
//!   reset, setresgid/setresuid, NoNewPrivs. These helpers return
//!   `io::Result`, perform no allocation, and are safe to call from a
//!   pre-exec closure.

use crate::error::{Error, Result};
use std::ffi::CStr;
use std::io;
use tracing::debug;

// =============================================================================
// UserIdentity
// =============================================================================

/// A uid/gid pair with optional supplementary groups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub uid: libc::uid_t,
    pub gid: libc::gid_t,
    pub supplementary_gids: Vec<libc::gid_t>,
}

impl UserIdentity {
    /// The superuser identity with no supplementary groups.
    pub fn root() -> Self {
        Self {
            uid: 0,
            gid: 0,
            supplementary_gids: Vec::new(),
        }
    }

    /// An unprivileged identity with no supplementary groups.
    pub fn user(uid: libc::uid_t, gid: libc::gid_t) -> Self {
        Self {
            uid,
            gid,
            supplementary_gids: Vec::new(),
        }
    }

    /// The current effective identity of this process.
    pub fn current_effective() -> Self {
        // SAFETY: geteuid/getegid cannot fail.
        let (uid, gid) = unsafe { (libc::geteuid(), libc::getegid()) };
        Self {
            uid,
            gid,
            supplementary_gids: Vec::new(),
        }
    }
}

/// Switches the effective uid/gid (and, when still privileged, the
/// supplementary groups) to `identity`.
///
/// The saved ids are untouched, so a later switch can return to root. On a
/// failed `seteuid` the already-changed egid is rolled back.
pub fn switch_identity(identity: &UserIdentity) -> Result<()> {
    debug!(uid = identity.uid, gid = identity.gid, "switching effective identity");

    // SAFETY: geteuid/getegid cannot fail.
    let (euid, egid) = unsafe { (libc::geteuid(), libc::getegid()) };

    if euid == 0 {
        // unprivileged processes cannot call setgroups
        // SAFETY: the pointer/length pair comes from a live Vec; the kernel
        // only reads `len` elements.
        let ret = unsafe {
            libc::setgroups(
                identity.supplementary_gids.len(),
                identity.supplementary_gids.as_ptr(),
            )
        };
        if ret != 0 {
            return Err(privilege_error("setgroups"));
        }
    }

    // SAFETY: plain id syscalls, no memory involved.
    if unsafe { libc::setegid(identity.gid) } != 0 {
        return Err(privilege_error("setegid"));
    }
    if unsafe { libc::seteuid(identity.uid) } != 0 {
        let seteuid_error = privilege_error("seteuid");
        // SAFETY: as above.
        if unsafe { libc::setegid(egid) } != 0 {
            return Err(privilege_error("seteuid, and restore the previous egid"));
        }
        return Err(seteuid_error);
    }

    Ok(())
}

/// Runs `f` with the effective identity switched to `identity`, restoring
/// the identity held at entry on every exit path, including failure of `f`.
///
/// A failed restore outranks the closure's own result, since continuing
/// with the wrong identity is worse than the inner error.
pub fn with_identity<T>(identity: &UserIdentity, f: impl FnOnce() -> Result<T>) -> Result<T> {
    let previous = UserIdentity::current_effective();
    switch_identity(identity)?;
    let result = f();
    switch_identity(&previous)?;
    result
}

fn privilege_error(op: &str) -> Error {
    Error::Privilege {
        op: op.to_string(),
        source: io::Error::last_os_error(),
    }
}

// =============================================================================
// Pre-Exec Privilege Reduction
// =============================================================================
//
// Everything below runs in the forked child before exec. No allocation, no
// locks, only direct syscalls.

/// Changes the root directory of the calling process.
///
/// Takes a pre-built `CStr` so the child performs no allocation.
pub fn chroot_into(rootfs: &CStr) -> io::Result<()> {
    // SAFETY: rootfs is a valid NUL-terminated path owned by the caller.
    if unsafe { libc::chroot(rootfs.as_ptr()) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Drops every capability from the bounding set.
///
/// Walks capability numbers upward until the kernel answers EINVAL, which
/// marks the end of its capability range. Any other errno is fatal.
pub fn clear_bounding_set() -> io::Result<()> {
    let mut cap: libc::c_ulong = 0;
    loop {
        // SAFETY: PR_CAPBSET_DROP only shrinks this process's bounding set;
        // invalid capability numbers are reported, not acted on.
        if unsafe { libc::prctl(libc::PR_CAPBSET_DROP, cap, 0, 0, 0) } != 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINVAL) {
                // reached the end of the valid capability range
                return Ok(());
            }
            return Err(err);
        }
        cap += 1;
    }
}

/// Clears all supplementary groups.
pub fn clear_supplementary_groups() -> io::Result<()> {
    // SAFETY: a zero-length setgroups never reads the pointer.
    if unsafe { libc::setgroups(0, std::ptr::null()) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Sets real, effective, and saved ids to the target user.
///
/// The gid must change first: once the uid has left root, setresgid is no
/// longer permitted.
pub fn become_user(uid: libc::uid_t, gid: libc::gid_t) -> io::Result<()> {
    // SAFETY: plain id syscalls, no memory involved.
    if unsafe { libc::setresgid(gid, gid, gid) } != 0 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::setresuid(uid, uid, uid) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Sets the no-new-privileges flag, so exec can never regrant privileges.
pub fn set_no_new_privs() -> io::Result<()> {
    // SAFETY: PR_SET_NO_NEW_PRIVS with these arguments only flips a
    // process flag.
    if unsafe { libc::prctl(libc::PR_SET_NO_NEW_PRIVS, 1, 0, 0, 0) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
