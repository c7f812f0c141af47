//! Constants for the hook layer.
//!
//! All environment variable keys, fixed in-container paths, and file modes
//! are defined here to ensure consistency and prevent magic values
//! throughout the codebase.

// =============================================================================
// Environment Variables
// =============================================================================

/// Host directory containing `bin/dropbear`, `bin/dbclient`, `bin/dropbearkey`.
pub const DROPBEAR_DIR_ENV: &str = "DROPBEAR_DIR";

/// TCP port the in-container dropbear daemon listens on.
pub const SERVER_PORT_ENV: &str = "SERVER_PORT";

/// Host passwd file used to map uid to username.
pub const PASSWD_FILE_ENV: &str = "PASSWD_FILE";

/// Root under which per-user key directories live.
pub const HOOK_BASE_DIR_ENV: &str = "HOOK_BASE_DIR";

/// Log filter override for the hook binaries (tracing `EnvFilter` syntax).
pub const LOG_FILTER_ENV: &str = "MAGIKHOOKS_LOG";

// =============================================================================
// Key Material
// =============================================================================

/// Per-user key directory below `<HOOK_BASE_DIR>/<username>`.
pub const KEYS_SUBDIR: &str = ".oci-hooks/ssh/keys";

/// Server host key filename.
pub const HOST_KEY_FILE: &str = "dropbear_ecdsa_host_key";

/// User (client) key filename.
pub const USER_KEY_FILE: &str = "id_dropbear";

/// Authorized-keys filename.
pub const AUTHORIZED_KEYS_FILE: &str = "authorized_keys";

/// The complete key triple a populated key directory must hold.
pub const KEY_FILES: [&str; 3] = [HOST_KEY_FILE, USER_KEY_FILE, AUTHORIZED_KEYS_FILE];

// =============================================================================
// Fixed In-Container Paths
// =============================================================================

/// Dropbear install tree inside the container, relative to the rootfs.
pub const DROPBEAR_DIR_IN_CONTAINER: &str = "opt/oci-hooks/dropbear";

/// Login-environment capture script below [`DROPBEAR_DIR_IN_CONTAINER`].
pub const ENVIRONMENT_FILE: &str = "environment";

/// Profile module sourced by login shells, relative to the rootfs.
pub const PROFILE_MODULE: &str = "etc/profile.d/ssh-hook.sh";

/// Client shim path, relative to the rootfs.
pub const SSH_SHIM: &str = "usr/bin/ssh";

/// Home directory value in `/etc/passwd` that marks "no usable home".
pub const INVALID_HOME: &str = "/nonexistent";

// =============================================================================
// File Modes
// =============================================================================

/// Mode of the login-environment capture script.
pub const ENVIRONMENT_FILE_MODE: u32 = 0o744;

/// Mode of the `/etc/profile.d` module.
pub const PROFILE_MODULE_MODE: u32 = 0o644;

/// Mode of the `/usr/bin/ssh` client shim.
pub const SSH_SHIM_MODE: u32 = 0o755;

// =============================================================================
// Annotations
// =============================================================================

/// OCI annotation carrying the log level requested for hooks.
pub const LOG_LEVEL_ANNOTATION: &str = "com.magik.hooks.logging.level";
