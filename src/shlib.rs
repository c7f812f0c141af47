//! # Shared-Library Descriptors
//!
//! Naming model, following the ELF soversion convention:
//!
//! | Term        | Example              | Meaning                             |
//! |-------------|----------------------|-------------------------------------|
//! | linker name | `libmpi.so`          | soname with all ABI digits stripped |
//! | real name   | `libmpi.so.12.1.8`   | linker name plus the ABI triple     |
//! | ABI triple  | `12.1.8`             | major.minor.patch, each optional    |
//!
//! Major is the hard compatibility break; minor is the forward-compatible
//! extension; patch carries no interface meaning. ABI versions are resolved
//! from filenames and symlink chains under a root directory, never from ELF
//! internals.

use crate::error::{Error, Result};
use std::cmp::Ordering;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Longest symlink chain we are willing to walk while resolving an ABI.
const MAX_SYMLINK_DEPTH: usize = 40;

// =============================================================================
// Soname Grammar
// =============================================================================

/// Whether `path` names a shared library.
///
/// True when the filename carries `.so` either at the end or followed by a
/// dot, and is not an `ld.so` configuration artifact (`*.conf`, `*.cache`).
pub fn is_shared_lib(path: &Path) -> bool {
    let Some(filename) = path.file_name().and_then(|f| f.to_str()) else {
        return false;
    };
    if filename.ends_with(".conf") || filename.ends_with(".cache") {
        return false;
    }
    match filename.rfind(".so") {
        Some(pos) => {
            let rest = &filename[pos + 3..];
            rest.is_empty() || rest.starts_with('.')
        }
        None => false,
    }
}

/// Linker name of a shared library: the filename with everything after the
/// last `.so` stripped.
pub fn linker_name(path: &Path) -> Result<String> {
    let filename = path
        .file_name()
        .and_then(|f| f.to_str())
        .ok_or_else(|| Error::NotASharedLibrary {
            path: path.to_path_buf(),
        })?;
    let pos = filename.rfind(".so").ok_or_else(|| Error::NotASharedLibrary {
        path: path.to_path_buf(),
    })?;
    let rest = &filename[pos + 3..];
    if !rest.is_empty() && !rest.starts_with('.') {
        return Err(Error::NotASharedLibrary {
            path: path.to_path_buf(),
        });
    }
    Ok(filename[..pos + 3].to_string())
}

/// ABI components encoded in the filename, as raw strings.
///
/// `libfoo.so` yields an empty vector; `libfoo.so.3.4.5` yields
/// `["3", "4", "5"]`. Components beyond the third are kept (they still
/// contribute to the real name) but carry no version meaning.
pub fn parse_abi(path: &Path) -> Result<Vec<String>> {
    if !is_shared_lib(path) {
        return Err(Error::NotASharedLibrary {
            path: path.to_path_buf(),
        });
    }
    let filename = path.file_name().and_then(|f| f.to_str()).unwrap_or_default();
    let pos = filename.rfind(".so").expect("checked by is_shared_lib");
    let rest = &filename[pos + 3..];
    if rest.is_empty() {
        return Ok(Vec::new());
    }
    Ok(rest[1..].split('.').map(str::to_string).collect())
}

/// Resolves the ABI of `lib` under `root` by walking its symlink chain.
///
/// Every element of the chain that is itself a library filename with the
/// same linker name contributes its encoded ABI; the longest one wins,
/// provided the shorter is a prefix of the longer. Two vendor quirks are
/// tolerated by trusting the symlink and skipping the target: chains that
/// hop to a different linker name, and chains whose ABI conflicts on the
/// common prefix.
pub fn resolve_abi(lib: &Path, root: &Path) -> Result<Vec<String>> {
    if !is_shared_lib(lib) {
        return Err(Error::NotASharedLibrary {
            path: lib.to_path_buf(),
        });
    }
    let reference = linker_name(lib)?;
    let mut longest: Vec<String> = Vec::new();

    for path in symlink_chain(lib, root) {
        if !is_shared_lib(&path) {
            // traversed symlinks need not be library filenames,
            // e.g. with /lib -> /lib64
            continue;
        }
        if linker_name(&path).ok().as_deref() != Some(reference.as_str()) {
            debug!(
                lib = %lib.display(),
                target = %path.display(),
                "symlink and target have incompatible linker names, trusting the symlink"
            );
            continue;
        }
        let abi = parse_abi(&path)?;
        let prefix_ok = if abi.len() < longest.len() {
            longest.starts_with(abi.as_slice())
        } else {
            abi.starts_with(longest.as_slice())
        };
        if !prefix_ok {
            // e.g. libvdpau_nvidia.so.1 -> libvdpau_nvidia.so.440.33.01
            debug!(
                lib = %lib.display(),
                target = %path.display(),
                "symlink and target have incompatible ABI versions, trusting the symlink"
            );
            continue;
        }
        if abi.len() > longest.len() {
            longest = abi;
        }
    }

    Ok(longest)
}

/// Collects `lib` and every symlink target it chains through, in traversal
/// order. Paths are absolute as seen inside `root`; traversal stops at the
/// first non-symlink, unreadable entry, cycle, or depth limit.
fn symlink_chain(lib: &Path, root: &Path) -> Vec<PathBuf> {
    let mut chain = vec![normalize(lib)];
    let mut current = chain[0].clone();

    for _ in 0..MAX_SYMLINK_DEPTH {
        let on_disk = join_under_root(root, &current);
        let is_symlink = fs::symlink_metadata(&on_disk)
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false);
        if !is_symlink {
            break;
        }
        let Ok(target) = fs::read_link(&on_disk) else {
            break;
        };
        let next = if target.is_absolute() {
            normalize(&target)
        } else {
            let parent = current.parent().unwrap_or(Path::new("/"));
            normalize(&parent.join(target))
        };
        if chain.contains(&next) {
            break;
        }
        chain.push(next.clone());
        current = next;
    }

    chain
}

fn join_under_root(root: &Path, path: &Path) -> PathBuf {
    root.join(path.strip_prefix("/").unwrap_or(path))
}

/// Lexical normalization: resolves `.` and `..` components without touching
/// the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

// =============================================================================
// SharedLibrary
// =============================================================================

/// Immutable descriptor of one shared library on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedLibrary {
    path: PathBuf,
    linker_name: String,
    real_name: String,
    major: Option<u32>,
    minor: Option<u32>,
    patch: Option<u32>,
}

impl SharedLibrary {
    /// Builds a descriptor for `path` as seen inside `root` (use `/` for
    /// host libraries). The ABI triple comes from [`resolve_abi`].
    pub fn new(path: &Path, root: &Path) -> Result<Self> {
        let linker_name = linker_name(path)?;
        let abi = resolve_abi(path, root)?;

        let mut components = [None, None, None];
        for (slot, component) in components.iter_mut().zip(abi.iter()) {
            *slot = Some(component.parse::<u32>().map_err(|_| Error::AbiParse {
                path: path.to_path_buf(),
                component: component.clone(),
            })?);
        }

        let real_name = if abi.is_empty() {
            linker_name.clone()
        } else {
            format!("{}.{}", linker_name, abi.join("."))
        };

        Ok(Self {
            path: path.to_path_buf(),
            linker_name,
            real_name,
            major: components[0],
            minor: components[1],
            patch: components[2],
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn linker_name(&self) -> &str {
        &self.linker_name
    }

    pub fn real_name(&self) -> &str {
        &self.real_name
    }

    pub fn major(&self) -> Option<u32> {
        self.major
    }

    pub fn minor(&self) -> Option<u32> {
        self.minor
    }

    pub fn patch(&self) -> Option<u32> {
        self.patch
    }

    /// Whether any ABI digits were discovered at all.
    pub fn has_major_version(&self) -> bool {
        self.real_name != self.linker_name
    }

    /// Full ABI compatibility, with `self` as the consumer: same linker
    /// name, same major, and `other` at least as new in minor.
    pub fn is_full_abi_compatible(&self, other: &SharedLibrary) -> bool {
        self.linker_name == other.linker_name
            && self.major_or_zero() == other.major_or_zero()
            && self.minor_or_zero() <= other.minor_or_zero()
    }

    /// Major-only ABI compatibility: same linker name and same major.
    pub fn is_major_abi_compatible(&self, other: &SharedLibrary) -> bool {
        self.linker_name == other.linker_name
            && self.major_or_zero() == other.major_or_zero()
    }

    // Missing version components compare as 0. The helpers keep that rule
    // at the comparison sites instead of baking zeros into the descriptor.

    fn major_or_zero(&self) -> u32 {
        self.major.unwrap_or(0)
    }

    fn minor_or_zero(&self) -> u32 {
        self.minor.unwrap_or(0)
    }

    fn patch_or_zero(&self) -> u32 {
        self.patch.unwrap_or(0)
    }

    fn version_key(&self) -> (u32, u32) {
        (self.major_or_zero(), self.minor_or_zero())
    }

    /// Picks the replacement for `self` out of `candidates`.
    ///
    /// Policy: return the newest candidate that is less than or equal to
    /// `self` in `(major, minor)`; failing that, the oldest candidate newer
    /// than `self`, preferring not to leave `self`'s major. An exact
    /// real-name match short-circuits everything.
    ///
    /// The climb is bounded componentwise by `(self.major, self.minor)`, so
    /// a same-major candidate with a higher minor is deliberately not
    /// selected even though full ABI compatibility would admit it. Ties on
    /// `(major, minor)` keep the first occurrence in input order and never
    /// downgrade patch.
    pub fn pick_newest_abi_compatible<'a>(
        &self,
        candidates: &'a [SharedLibrary],
    ) -> Result<&'a SharedLibrary> {
        let Some(first) = candidates.first() else {
            return Err(Error::NoCandidates {
                reference: self.real_name.clone(),
            });
        };
        if candidates.len() == 1 {
            return Ok(first);
        }
        if let Some(exact) = candidates.iter().find(|c| c.real_name == self.real_name) {
            return Ok(exact);
        }

        // Seed with the oldest candidate. Once the seed sits at our major,
        // refuse to descend to an older major.
        let mut oldest = first;
        for candidate in candidates {
            if candidate.version_key() < oldest.version_key() {
                if oldest.major_or_zero() == self.major_or_zero()
                    && candidate.major_or_zero() < self.major_or_zero()
                {
                    continue;
                }
                oldest = candidate;
            }
        }

        // Climb from the seed towards this library, never past it.
        let mut best = oldest;
        for candidate in candidates {
            if candidate.major_or_zero() > self.major_or_zero()
                || candidate.minor_or_zero() > self.minor_or_zero()
            {
                continue;
            }
            match candidate.version_key().cmp(&best.version_key()) {
                Ordering::Greater => best = candidate,
                Ordering::Equal if candidate.patch_or_zero() > best.patch_or_zero() => {
                    best = candidate;
                }
                _ => {}
            }
        }

        Ok(best)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn lib(name: &str) -> SharedLibrary {
        SharedLibrary::new(Path::new(&format!("/usr/lib/{name}")), Path::new("/nowhere"))
            .unwrap()
    }

    #[test]
    fn test_is_shared_lib() {
        assert!(is_shared_lib(Path::new("/lib/libc.so")));
        assert!(is_shared_lib(Path::new("/lib/libc.so.6")));
        assert!(is_shared_lib(Path::new("/lib/libmpi.so.12.1.8")));
        assert!(!is_shared_lib(Path::new("/etc/ld.so.conf")));
        assert!(!is_shared_lib(Path::new("/etc/ld.so.cache")));
        assert!(!is_shared_lib(Path::new("/usr/bin/gcc")));
        assert!(!is_shared_lib(Path::new("/srv/libawesome.sock")));
    }

    #[test]
    fn test_linker_name_strips_abi() {
        assert_eq!(linker_name(Path::new("libfoo.so.3.4.5")).unwrap(), "libfoo.so");
        assert_eq!(linker_name(Path::new("libfoo.so")).unwrap(), "libfoo.so");
        // the last .so wins for exotic but legal names
        assert_eq!(
            linker_name(Path::new("libawesome.software.so.1")).unwrap(),
            "libawesome.software.so"
        );
        assert!(linker_name(Path::new("libfoo.sofa")).is_err());
        assert!(linker_name(Path::new("libfoo")).is_err());
    }

    #[test]
    fn test_parse_abi_components() {
        assert!(parse_abi(Path::new("libfoo.so")).unwrap().is_empty());
        assert_eq!(parse_abi(Path::new("libfoo.so.3")).unwrap(), ["3"]);
        assert_eq!(
            parse_abi(Path::new("libfoo.so.3.4.5")).unwrap(),
            ["3", "4", "5"]
        );
    }

    #[test]
    fn test_descriptor_fields() {
        let l = lib("libfoo.so.3.4");
        assert_eq!(l.linker_name(), "libfoo.so");
        assert_eq!(l.real_name(), "libfoo.so.3.4");
        assert_eq!(l.major(), Some(3));
        assert_eq!(l.minor(), Some(4));
        assert_eq!(l.patch(), None);
        assert!(l.has_major_version());

        let bare = lib("libbar.so");
        assert_eq!(bare.real_name(), "libbar.so");
        assert!(!bare.has_major_version());
    }

    #[test]
    fn test_compat_predicates() {
        let consumer = lib("libm.so.3.4.5");
        assert!(consumer.is_full_abi_compatible(&lib("libm.so.3.4.5")));
        assert!(consumer.is_full_abi_compatible(&lib("libm.so.3.5")));
        assert!(!consumer.is_full_abi_compatible(&lib("libm.so.3.3")));
        assert!(!consumer.is_full_abi_compatible(&lib("libm.so.4.4")));
        assert!(consumer.is_major_abi_compatible(&lib("libm.so.3.0")));
        assert!(!consumer.is_major_abi_compatible(&lib("libother.so.3.4")));
    }

    #[test]
    fn test_resolve_abi_through_symlink_chain() {
        let root = tempfile::tempdir().unwrap();
        let libdir = root.path().join("usr/lib");
        fs::create_dir_all(&libdir).unwrap();
        fs::write(libdir.join("libfoo.so.3.4.5"), b"elf").unwrap();
        std::os::unix::fs::symlink("libfoo.so.3.4.5", libdir.join("libfoo.so.3")).unwrap();
        std::os::unix::fs::symlink("libfoo.so.3", libdir.join("libfoo.so")).unwrap();

        let abi = resolve_abi(Path::new("/usr/lib/libfoo.so.3"), root.path()).unwrap();
        assert_eq!(abi, ["3", "4", "5"]);

        let l = SharedLibrary::new(Path::new("/usr/lib/libfoo.so"), root.path()).unwrap();
        assert_eq!(l.real_name(), "libfoo.so.3.4.5");
        assert_eq!(l.major(), Some(3));
    }

    #[test]
    fn test_resolve_abi_trusts_symlink_on_conflicts() {
        let root = tempfile::tempdir().unwrap();
        let libdir = root.path().join("lib");
        fs::create_dir_all(&libdir).unwrap();

        // mismatched linker name target
        fs::write(libdir.join("libmpich_gnu_71.so.3.0.1"), b"elf").unwrap();
        std::os::unix::fs::symlink("libmpich_gnu_71.so.3.0.1", libdir.join("libmpi.so.12"))
            .unwrap();
        let abi = resolve_abi(Path::new("/lib/libmpi.so.12"), root.path()).unwrap();
        assert_eq!(abi, ["12"]);

        // conflicting version prefix
        fs::write(libdir.join("libvdpau_nvidia.so.440.33.01"), b"elf").unwrap();
        std::os::unix::fs::symlink(
            "libvdpau_nvidia.so.440.33.01",
            libdir.join("libvdpau_nvidia.so.1"),
        )
        .unwrap();
        let abi = resolve_abi(Path::new("/lib/libvdpau_nvidia.so.1"), root.path()).unwrap();
        assert_eq!(abi, ["1"]);
    }

    #[test]
    fn test_resolve_abi_without_symlinks_uses_filename() {
        let abi = resolve_abi(Path::new("/nope/libx.so.2.1"), Path::new("/nowhere")).unwrap();
        assert_eq!(abi, ["2", "1"]);
    }

    #[test]
    fn test_pick_exact_match_wins() {
        let reference = lib("libfoo.so.3.4.5");
        let candidates = vec![
            lib("libfoo.so.3.4.5"),
            lib("libfoo.so.3.4.6"),
            lib("libfoo.so.3.5.0"),
            lib("libfoo.so.4.0.0"),
        ];
        let picked = reference.pick_newest_abi_compatible(&candidates).unwrap();
        assert_eq!(picked.real_name(), "libfoo.so.3.4.5");
    }

    #[test]
    fn test_pick_patch_upgrade_within_minor() {
        let reference = lib("libfoo.so.3.4.5");
        let candidates = vec![
            lib("libfoo.so.3.4.6"),
            lib("libfoo.so.3.5.0"),
            lib("libfoo.so.4.0.0"),
        ];
        let picked = reference.pick_newest_abi_compatible(&candidates).unwrap();
        assert_eq!(picked.real_name(), "libfoo.so.3.4.6");
    }

    #[test]
    fn test_pick_falls_back_to_oldest_newer() {
        let reference = lib("libfoo.so.3.4.5");
        let candidates = vec![lib("libfoo.so.2.9.9"), lib("libfoo.so.4.0.0")];
        let picked = reference.pick_newest_abi_compatible(&candidates).unwrap();
        assert_eq!(picked.real_name(), "libfoo.so.2.9.9");
    }

    #[test]
    fn test_pick_single_candidate() {
        let reference = lib("libfoo.so.1");
        let candidates = vec![lib("libfoo.so.1")];
        let picked = reference.pick_newest_abi_compatible(&candidates).unwrap();
        assert_eq!(picked.real_name(), "libfoo.so.1");
    }

    #[test]
    fn test_pick_empty_candidates_is_policy_error() {
        let reference = lib("libfoo.so.1");
        let err = reference.pick_newest_abi_compatible(&[]).unwrap_err();
        assert!(matches!(err, Error::NoCandidates { .. }));
    }

    #[test]
    fn test_pick_never_downgrades_patch_at_matching_minor() {
        let reference = lib("libfoo.so.3.4.5");
        let candidates = vec![lib("libfoo.so.3.4.7"), lib("libfoo.so.3.4.6")];
        let picked = reference.pick_newest_abi_compatible(&candidates).unwrap();
        assert_eq!(picked.real_name(), "libfoo.so.3.4.7");
    }

    #[test]
    fn test_pick_duplicate_major_minor_keeps_first_occurrence() {
        let root = Path::new("/nowhere");
        let a = SharedLibrary::new(Path::new("/a/libfoo.so.3.4"), root).unwrap();
        let b = SharedLibrary::new(Path::new("/b/libfoo.so.3.4"), root).unwrap();
        let reference = lib("libfoo.so.3.9.9");
        let candidates = [a.clone(), b];
        let picked = reference.pick_newest_abi_compatible(&candidates).unwrap();
        assert_eq!(picked.path(), a.path());
    }
}
