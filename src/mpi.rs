//! # Host/Container Library Reconciliation
//!
//! Support routines for injecting host MPI stacks into containers: the
//! candidate mapping between host and container libraries, the ABI
//! pre-checks run before any injection, and parsing of the dynamic-linker
//! cache listing used to enumerate a rootfs's libraries.
//!
//! The actual replacement choice per library is
//! [`SharedLibrary::pick_newest_abi_compatible`].

use crate::error::Result;
use crate::shlib::SharedLibrary;
use crate::subprocess;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Candidate container libraries per host library, keyed by linker name.
pub type HostToContainerLibs = HashMap<String, Vec<SharedLibrary>>;

/// Compatibility classification of one host library against its container
/// counterparts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbiCompatibility {
    /// At least one counterpart is fully compatible.
    Full,
    /// Counterparts exist but only share the major version.
    MajorOnly,
    /// No counterpart with this linker name exists in the container.
    None,
}

/// Maps each host library to the container libraries sharing its linker
/// name. Host libraries without any counterpart get an empty candidate
/// list, so callers can distinguish "nothing to replace" from "not mapped".
pub fn map_host_to_container_libs(
    host_libs: &[SharedLibrary],
    container_libs: &[SharedLibrary],
) -> HostToContainerLibs {
    let mut map = HostToContainerLibs::new();
    for host_lib in host_libs {
        let candidates: Vec<SharedLibrary> = container_libs
            .iter()
            .filter(|c| c.linker_name() == host_lib.linker_name())
            .cloned()
            .collect();
        debug!(
            lib = host_lib.real_name(),
            candidates = candidates.len(),
            "mapped host library to container candidates"
        );
        map.insert(host_lib.linker_name().to_string(), candidates);
    }
    map
}

/// Classifies one host library against its container candidates.
pub fn classify_compatibility(
    host_lib: &SharedLibrary,
    candidates: &[SharedLibrary],
) -> AbiCompatibility {
    if candidates.is_empty() {
        return AbiCompatibility::None;
    }
    // the container library is the consumer: it must tolerate the host
    // library that replaces its dependency
    if candidates.iter().any(|c| c.is_full_abi_compatible(host_lib)) {
        AbiCompatibility::Full
    } else if candidates.iter().any(|c| c.is_major_abi_compatible(host_lib)) {
        AbiCompatibility::MajorOnly
    } else {
        AbiCompatibility::None
    }
}

/// Pre-injection check: warns about every host library whose container
/// counterparts are not fully compatible. Pure inspection, mutates nothing.
pub fn check_abi_compatibility(
    host_libs: &[SharedLibrary],
    host_to_container: &HostToContainerLibs,
) {
    for host_lib in host_libs {
        let candidates = host_to_container
            .get(host_lib.linker_name())
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        match classify_compatibility(host_lib, candidates) {
            AbiCompatibility::Full => {}
            AbiCompatibility::MajorOnly => warn!(
                lib = host_lib.real_name(),
                "container library only shares the major ABI version with the host library"
            ),
            AbiCompatibility::None => info!(
                lib = host_lib.real_name(),
                "no counterpart in the container, library will be injected as new"
            ),
        }
    }
}

/// Libraries that actually carry an ABI major version.
pub fn libs_with_abi_version(libs: &[SharedLibrary]) -> Vec<&SharedLibrary> {
    libs.iter().filter(|l| l.has_major_version()).collect()
}

// =============================================================================
// Dynamic-Linker Cache Listing
// =============================================================================

/// Library paths known to the dynamic linker of a rootfs.
///
/// Runs `ldconfig -r <root> -p` and parses its listing.
pub fn shared_libs_from_dynamic_linker(ldconfig: &Path, root: &Path) -> Result<Vec<PathBuf>> {
    let argv = vec![
        ldconfig.display().to_string(),
        "-r".to_string(),
        root.display().to_string(),
        "-p".to_string(),
    ];
    let output = subprocess::output_of(&argv)?;
    Ok(parse_ldconfig_output(&output))
}

/// Parses `ldconfig -p` style output: a header line followed by
/// `\tname (flags) => path` entries.
pub fn parse_ldconfig_output(output: &str) -> Vec<PathBuf> {
    output
        .lines()
        .skip(1)
        .filter_map(|line| {
            line.rfind(" => ")
                .map(|pos| PathBuf::from(&line[pos + 4..]))
        })
        .collect()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn lib(name: &str) -> SharedLibrary {
        SharedLibrary::new(Path::new(&format!("/lib/{name}")), Path::new("/nowhere")).unwrap()
    }

    #[test]
    fn test_mapping_groups_by_linker_name() {
        let host = vec![lib("libmpi.so.12.1.8"), lib("libgfortran.so.5")];
        let container = vec![
            lib("libmpi.so.12.0.5"),
            lib("libmpi.so.12.1.0"),
            lib("libstdc++.so.6"),
        ];
        let map = map_host_to_container_libs(&host, &container);

        assert_eq!(map.len(), 2);
        assert_eq!(map["libmpi.so"].len(), 2);
        assert!(map["libgfortran.so"].is_empty());
    }

    #[test]
    fn test_classify_compatibility() {
        let host = lib("libmpi.so.12.1.8");
        assert_eq!(
            classify_compatibility(&host, &[lib("libmpi.so.12.0.5")]),
            AbiCompatibility::Full
        );
        assert_eq!(
            classify_compatibility(&host, &[lib("libmpi.so.12.5.0")]),
            AbiCompatibility::MajorOnly
        );
        assert_eq!(
            classify_compatibility(&host, &[lib("libmpi.so.20.0")]),
            AbiCompatibility::None
        );
        assert_eq!(classify_compatibility(&host, &[]), AbiCompatibility::None);
    }

    #[test]
    fn test_libs_with_abi_version_filters_bare_sonames() {
        let libs = vec![lib("libmpi.so.12"), lib("libdl.so")];
        let with_abi = libs_with_abi_version(&libs);
        assert_eq!(with_abi.len(), 1);
        assert_eq!(with_abi[0].real_name(), "libmpi.so.12");
    }

    #[test]
    fn test_parse_ldconfig_output() {
        let output = "\
291 libs found in cache `/etc/ld.so.cache'
\tlibz.so.1 (libc6,x86-64) => /lib/x86_64-linux-gnu/libz.so.1
\tlibmpi.so.12 (libc6,x86-64) => /usr/lib/libmpi.so.12.1.8
\tgarbage line without arrow
";
        let paths = parse_ldconfig_output(output);
        assert_eq!(
            paths,
            vec![
                PathBuf::from("/lib/x86_64-linux-gnu/libz.so.1"),
                PathBuf::from("/usr/lib/libmpi.so.12.1.8"),
            ]
        );
    }
}
