//! Tests for OCI state and bundle config parsing.

use magikhooks::bundle::{BundleConfig, ContainerState};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const STATE_JSON: &str = r#"{
    "ociVersion": "1.0.2",
    "id": "nid00042-job7",
    "status": "created",
    "pid": 31337,
    "bundle": "/run/oci/nid00042-job7",
    "annotations": {
        "com.magik.hooks.logging.level": "debug",
        "unrelated.annotation": "ignored"
    }
}"#;

fn write_config(bundle: &Path, root_path: &str) {
    let config = format!(
        r#"{{
            "ociVersion": "1.0.2",
            "root": {{ "path": "{root_path}" }},
            "process": {{
                "user": {{ "uid": 1000, "gid": 1000 }},
                "env": ["FOO=bar", "BAZ=x y", "PATH=/usr/bin:/bin"],
                "args": ["/bin/sh"]
            }},
            "annotations": {{ "com.magik.hooks.logging.level": "info" }}
        }}"#
    );
    fs::write(bundle.join("config.json"), config).unwrap();
}

// =============================================================================
// Container State Tests
// =============================================================================

#[test]
fn test_state_fields() {
    let state = ContainerState::from_reader(STATE_JSON.as_bytes()).unwrap();
    assert_eq!(state.pid, 31337);
    assert_eq!(state.bundle, PathBuf::from("/run/oci/nid00042-job7"));
    assert_eq!(state.log_level_annotation(), Some("debug"));
}

#[test]
fn test_state_ignores_unknown_fields() {
    let json = r#"{"pid": 1, "bundle": "/b", "status": "running", "extra": [1, 2]}"#;
    let state = ContainerState::from_reader(json.as_bytes()).unwrap();
    assert_eq!(state.pid, 1);
}

#[test]
fn test_state_requires_pid_and_bundle() {
    assert!(ContainerState::from_reader(r#"{"bundle": "/b"}"#.as_bytes()).is_err());
    assert!(ContainerState::from_reader(r#"{"pid": 7}"#.as_bytes()).is_err());
}

// =============================================================================
// Bundle Config Tests
// =============================================================================

#[test]
fn test_config_with_relative_rootfs() {
    let bundle = TempDir::new().unwrap();
    write_config(bundle.path(), "rootfs");

    let config = BundleConfig::load(bundle.path()).unwrap();
    assert_eq!(config.rootfs(), bundle.path().join("rootfs"));
    assert_eq!(config.uid(), 1000);
    assert_eq!(config.gid(), 1000);
}

#[test]
fn test_config_with_absolute_rootfs() {
    let bundle = TempDir::new().unwrap();
    write_config(bundle.path(), "/var/lib/rootfs-7");

    let config = BundleConfig::load(bundle.path()).unwrap();
    assert_eq!(config.rootfs(), PathBuf::from("/var/lib/rootfs-7"));
}

#[test]
fn test_config_env_pairs() {
    let bundle = TempDir::new().unwrap();
    write_config(bundle.path(), "rootfs");

    let config = BundleConfig::load(bundle.path()).unwrap();
    assert_eq!(
        config.env_pairs(),
        vec![
            ("FOO".to_string(), "bar".to_string()),
            ("BAZ".to_string(), "x y".to_string()),
            ("PATH".to_string(), "/usr/bin:/bin".to_string()),
        ]
    );
}

#[test]
fn test_config_log_level_annotation() {
    let bundle = TempDir::new().unwrap();
    write_config(bundle.path(), "rootfs");

    let config = BundleConfig::load(bundle.path()).unwrap();
    assert_eq!(config.log_level_annotation(), Some("info"));
}

#[test]
fn test_missing_config_is_an_error() {
    let bundle = TempDir::new().unwrap();
    assert!(BundleConfig::load(bundle.path()).is_err());
}

#[test]
fn test_malformed_config_is_an_error() {
    let bundle = TempDir::new().unwrap();
    fs::write(bundle.path().join("config.json"), "{]").unwrap();
    assert!(BundleConfig::load(bundle.path()).is_err());
}
