//! # OCI Container State and Bundle Configuration
//!
//! Hooks receive the container state JSON on standard input at invocation
//! time, per the OCI runtime spec hook contract. From the state we take the
//! container's `pid` (for namespace entry) and `bundle` directory; from the
//! bundle's `config.json` we take the rootfs location, the container user,
//! and the process environment.
//!
//! The bundle JSON is parsed exactly once into owned structs; no raw buffer
//! is retained.

use crate::constants::LOG_LEVEL_ANNOTATION;
use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

// =============================================================================
// Container State (stdin)
// =============================================================================

/// OCI container state, as delivered on the hook's standard input.
///
/// Only the fields the hooks consume are modeled; the runtime may send more.
#[derive(Debug, Clone, Deserialize)]
pub struct ContainerState {
    /// Init process of the container.
    pub pid: i32,
    /// Bundle directory holding `config.json` and the rootfs.
    pub bundle: PathBuf,
    /// Runtime annotations, mirrored from the bundle config.
    #[serde(default)]
    pub annotations: HashMap<String, String>,
}

impl ContainerState {
    /// Parses the state JSON from a reader (normally standard input).
    pub fn from_reader(mut reader: impl Read) -> Result<Self> {
        let mut buffer = String::new();
        reader.read_to_string(&mut buffer).map_err(|source| Error::Fs {
            op: "read container state from",
            path: PathBuf::from("<stdin>"),
            source,
        })?;
        let state: ContainerState = serde_json::from_str(&buffer)?;
        debug!(
            pid = state.pid,
            bundle = %state.bundle.display(),
            "parsed container state"
        );
        Ok(state)
    }

    /// Log level requested via the hook logging annotation, if any.
    pub fn log_level_annotation(&self) -> Option<&str> {
        self.annotations.get(LOG_LEVEL_ANNOTATION).map(String::as_str)
    }
}

// =============================================================================
// Bundle config.json
// =============================================================================

/// OCI runtime spec configuration, reduced to the fields the hooks read.
#[derive(Debug, Clone, Deserialize)]
pub struct OciSpec {
    pub root: OciRoot,
    pub process: OciProcess,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
}

/// Root filesystem section of the spec.
#[derive(Debug, Clone, Deserialize)]
pub struct OciRoot {
    pub path: PathBuf,
}

/// Container process section of the spec.
#[derive(Debug, Clone, Deserialize)]
pub struct OciProcess {
    pub user: OciUser,
    #[serde(default)]
    pub env: Vec<String>,
}

/// Identity the container process runs as.
#[derive(Debug, Clone, Deserialize)]
pub struct OciUser {
    pub uid: u32,
    pub gid: u32,
}

/// Parsed bundle configuration with its originating directory.
///
/// The bundle directory is kept so a relative `root.path` can be resolved
/// the way the runtime resolves it.
#[derive(Debug, Clone)]
pub struct BundleConfig {
    bundle_dir: PathBuf,
    spec: OciSpec,
}

impl BundleConfig {
    /// Loads and parses `<bundle>/config.json`.
    pub fn load(bundle_dir: &Path) -> Result<Self> {
        let config_path = bundle_dir.join("config.json");
        debug!(path = %config_path.display(), "parsing bundle config");

        let content = fs::read_to_string(&config_path).map_err(|source| Error::Fs {
            op: "read",
            path: config_path.clone(),
            source,
        })?;
        let spec: OciSpec = serde_json::from_str(&content).map_err(|e| Error::InvalidJson {
            path: config_path,
            reason: e.to_string(),
        })?;

        Ok(Self {
            bundle_dir: bundle_dir.to_path_buf(),
            spec,
        })
    }

    /// Bundle directory this configuration was loaded from.
    pub fn bundle_dir(&self) -> &Path {
        &self.bundle_dir
    }

    /// Absolute rootfs directory.
    ///
    /// A relative `root.path` is resolved against the bundle directory.
    pub fn rootfs(&self) -> PathBuf {
        if self.spec.root.path.is_absolute() {
            self.spec.root.path.clone()
        } else {
            self.bundle_dir.join(&self.spec.root.path)
        }
    }

    /// Uid the container process runs as.
    pub fn uid(&self) -> u32 {
        self.spec.process.user.uid
    }

    /// Gid the container process runs as.
    pub fn gid(&self) -> u32 {
        self.spec.process.user.gid
    }

    /// Environment of the container process as key/value pairs.
    ///
    /// Entries without a `=` separator are skipped with a debug log; the
    /// value keeps any further `=` characters verbatim.
    pub fn env_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::with_capacity(self.spec.process.env.len());
        for entry in &self.spec.process.env {
            match entry.split_once('=') {
                Some((key, value)) => pairs.push((key.to_string(), value.to_string())),
                None => debug!(%entry, "skipping malformed environment entry"),
            }
        }
        pairs
    }

    /// Log level requested via the hook logging annotation, if any.
    pub fn log_level_annotation(&self) -> Option<&str> {
        self.spec
            .annotations
            .get(LOG_LEVEL_ANNOTATION)
            .map(String::as_str)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_from_reader() {
        let json = r#"{
            "ociVersion": "1.0.2",
            "id": "job-17",
            "status": "created",
            "pid": 4242,
            "bundle": "/run/bundles/job-17",
            "annotations": {"com.magik.hooks.logging.level": "debug"}
        }"#;
        let state = ContainerState::from_reader(json.as_bytes()).unwrap();
        assert_eq!(state.pid, 4242);
        assert_eq!(state.bundle, PathBuf::from("/run/bundles/job-17"));
        assert_eq!(state.log_level_annotation(), Some("debug"));
    }

    #[test]
    fn test_state_rejects_garbage() {
        assert!(ContainerState::from_reader("not json".as_bytes()).is_err());
    }

    #[test]
    fn test_state_without_annotations() {
        let json = r#"{"pid": 1, "bundle": "/b"}"#;
        let state = ContainerState::from_reader(json.as_bytes()).unwrap();
        assert!(state.log_level_annotation().is_none());
    }

    #[test]
    fn test_env_pairs_keep_embedded_equals() {
        let spec = OciSpec {
            root: OciRoot {
                path: PathBuf::from("rootfs"),
            },
            process: OciProcess {
                user: OciUser { uid: 0, gid: 0 },
                env: vec![
                    "PATH=/usr/bin:/bin".to_string(),
                    "OPTS=a=b=c".to_string(),
                    "broken-entry".to_string(),
                ],
            },
            annotations: HashMap::new(),
        };
        let config = BundleConfig {
            bundle_dir: PathBuf::from("/bundle"),
            spec,
        };
        assert_eq!(
            config.env_pairs(),
            vec![
                ("PATH".to_string(), "/usr/bin:/bin".to_string()),
                ("OPTS".to_string(), "a=b=c".to_string()),
            ]
        );
    }
}
