//! Host-side SSH key management.
//!
//! Keys live under `<HOOK_BASE_DIR>/<username>/.oci-hooks/ssh/keys` and are
//! generated with the invoking user's own identity, never with privilege.
//! A populated directory holds exactly three artifacts: the server host
//! key, the user key, and the `authorized_keys` file derived from the user
//! key's public half.

use crate::constants::{AUTHORIZED_KEYS_FILE, HOST_KEY_FILE, KEYS_SUBDIR, KEY_FILES, USER_KEY_FILE};
use crate::error::{Error, Result};
use crate::lock::DirLock;
use crate::subprocess;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// What [`generate`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeygenOutcome {
    /// A complete key triple already existed and `overwrite` was false.
    AlreadyPresent { dir: PathBuf },
    /// A fresh key triple was written.
    Generated,
}

/// Per-user key directory on the host.
pub fn keys_dir_in_host(base: &Path, username: &str) -> PathBuf {
    base.join(username).join(KEYS_SUBDIR)
}

/// Whether `dir` holds the complete key triple.
pub fn user_has_keys(dir: &Path) -> bool {
    for file in KEY_FILES {
        let full = dir.join(file);
        if !full.exists() {
            debug!(path = %full.display(), "expected SSH key file not found");
            return false;
        }
    }
    debug!(dir = %dir.display(), "found SSH keys");
    true
}

/// Generates the key triple in `dir`, serialized against concurrent calls
/// by an advisory lock held for the whole session.
///
/// With `overwrite` false and a complete triple already present, nothing is
/// touched. Otherwise the directory is wiped and regenerated: an ECDSA host
/// key, an ECDSA user key, and `authorized_keys` extracted from the user
/// key's public dump.
pub fn generate(dir: &Path, dropbear_dir: &Path, overwrite: bool) -> Result<KeygenOutcome> {
    info!(dir = %dir.display(), "generating SSH keys");

    fs::create_dir_all(dir).map_err(|source| Error::Fs {
        op: "create directory",
        path: dir.to_path_buf(),
        source,
    })?;
    let _lock = DirLock::acquire(dir)?;

    if user_has_keys(dir) && !overwrite {
        return Ok(KeygenOutcome::AlreadyPresent {
            dir: dir.to_path_buf(),
        });
    }

    fs::remove_dir_all(dir).map_err(|source| Error::Fs {
        op: "remove directory",
        path: dir.to_path_buf(),
        source,
    })?;
    fs::create_dir_all(dir).map_err(|source| Error::Fs {
        op: "create directory",
        path: dir.to_path_buf(),
        source,
    })?;

    keygen(dropbear_dir, &dir.join(HOST_KEY_FILE))?;
    keygen(dropbear_dir, &dir.join(USER_KEY_FILE))?;
    write_authorized_keys(dropbear_dir, dir)?;

    info!(dir = %dir.display(), "successfully generated SSH keys");
    Ok(KeygenOutcome::Generated)
}

/// Generates one ECDSA key with `dropbearkey`.
fn keygen(dropbear_dir: &Path, output_file: &Path) -> Result<()> {
    info!(path = %output_file.display(), "generating key");
    let argv = vec![
        dropbear_dir.join("bin/dropbearkey").display().to_string(),
        "-t".to_string(),
        "ecdsa".to_string(),
        "-f".to_string(),
        output_file.display().to_string(),
    ];
    subprocess::output_of(&argv)?;
    Ok(())
}

/// Derives `authorized_keys` from the user key's public dump.
fn write_authorized_keys(dropbear_dir: &Path, dir: &Path) -> Result<()> {
    let user_key = dir.join(USER_KEY_FILE);
    info!(path = %dir.join(AUTHORIZED_KEYS_FILE).display(), "generating authorized_keys");

    let argv = vec![
        dropbear_dir.join("bin/dropbearkey").display().to_string(),
        "-y".to_string(),
        "-f".to_string(),
        user_key.display().to_string(),
    ];
    let output = subprocess::output_of(&argv)?;

    let public_key = extract_public_key(&output).ok_or(Error::KeyParse {
        path: user_key.clone(),
    })?;

    let authorized_keys = dir.join(AUTHORIZED_KEYS_FILE);
    fs::write(&authorized_keys, format!("{public_key}\n")).map_err(|source| Error::Fs {
        op: "write",
        path: authorized_keys,
        source,
    })
}

/// First line of a `dropbearkey -y` dump that is the public key itself.
pub fn extract_public_key(output: &str) -> Option<&str> {
    output.lines().find(|line| line.starts_with("ecdsa-"))
}

// =============================================================================
// Tests
// =============================================================================
