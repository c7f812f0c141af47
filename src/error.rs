//! Error types for the hook layer.

use std::path::PathBuf;

/// Result type alias for hook operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the hook layer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Required environment variable is not set.
    #[error("environment variable {key} is not set")]
    MissingEnvVar { key: &'static str },

    /// Environment variable holds a value we cannot use.
    #[error("environment variable {key} has invalid value '{value}': {reason}")]
    InvalidEnvVar {
        key: &'static str,
        value: String,
        reason: String,
    },

    /// Container state on standard input could not be parsed.
    #[error("failed to parse container state: {0}")]
    InvalidState(#[from] serde_json::Error),

    /// A JSON document on disk could not be read or parsed.
    #[error("failed to parse {path}: {reason}")]
    InvalidJson { path: PathBuf, reason: String },

    // =========================================================================
    // Filesystem Errors
    // =========================================================================
    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Filesystem operation failed on a known path.
    #[error("failed to {op} {path}: {source}")]
    Fs {
        op: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },

    // =========================================================================
    // Subprocess Errors
    // =========================================================================
    /// A command line with no executable was given.
    #[error("empty command line")]
    EmptyCommand,

    /// The child process could not be spawned.
    #[error("failed to spawn '{command}': {source}")]
    SpawnFailed {
        command: String,
        source: std::io::Error,
    },

    /// The child ran but did not exit with status zero.
    #[error("'{command}' {status}")]
    CommandFailed { command: String, status: String },

    // =========================================================================
    // Parse Errors
    // =========================================================================
    /// No public key line was found in the key-dump output.
    #[error("failed to parse public key from {path}")]
    KeyParse { path: PathBuf },

    /// A passwd line did not match the expected 7-field format.
    #[error("malformed passwd entry at {path} line {line}: {reason}")]
    PasswdParse {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    /// The path does not name a shared library.
    #[error("cannot parse ABI version of '{path}': not a shared library")]
    NotASharedLibrary { path: PathBuf },

    /// A version component after `.so.` was not numeric.
    #[error("invalid ABI component '{component}' in {path}")]
    AbiParse { path: PathBuf, component: String },

    // =========================================================================
    // Privilege Errors
    // =========================================================================
    /// A privilege transition failed (chroot, capability drop, setgroups,
    /// setresgid/uid, NoNewPrivs, setns).
    #[error("failed to {op}: {source}")]
    Privilege { op: String, source: std::io::Error },

    // =========================================================================
    // Mount Errors
    // =========================================================================
    /// The overlay filesystem could not be mounted.
    #[error("failed to mount overlay at {target} with options '{options}': {source}")]
    OverlayMount {
        target: PathBuf,
        options: String,
        source: std::io::Error,
    },

    // =========================================================================
    // Policy Errors
    // =========================================================================
    /// The library picker received an empty candidate list.
    #[error("no candidate libraries to pick a replacement for {reference}")]
    NoCandidates { reference: String },

    /// The container's passwd lists a home directory we refuse to use.
    #[error("invalid home directory \"{home}\" in container passwd for uid {uid}")]
    InvalidHomeDirectory { home: String, uid: u32 },

    /// No passwd entry exists for the given uid.
    #[error("no passwd entry for uid {uid} in {path}")]
    UnknownUid { uid: u32, path: PathBuf },
}
