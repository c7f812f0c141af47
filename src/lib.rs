//! # magikhooks
//!
//! **OCI lifecycle hooks for HPC container nodes**
//!
//! This crate provides the engineering cores of two OCI hooks used on
//! shared HPC nodes: SSH activation inside running containers, and the
//! ABI-aware shared-library reconciliation that lets an MPI hook swap
//! host-optimized libraries into a container's search path.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                          magikhooks                                 │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  magikhook-ssh (bin)                                                │
//! │  ┌──────────────┐  ┌─────────────────────┐  ┌────────────────────┐  │
//! │  │    keygen    │  │ check-user-has-keys │  │      activate      │  │
//! │  │  keys + lock │  │  presence, exit code│  │  stdin OCI state   │  │
//! │  └──────┬───────┘  └─────────┬───────────┘  └─────────┬──────────┘  │
//! │         │                    │                        │             │
//! │  ┌──────▼────────────────────▼──────┐   ┌─────────────▼──────────┐  │
//! │  │  keys │ lock │ passwd │ bundle   │   │ namespaces → staging → │  │
//! │  │  (host side, user identity)      │   │ overlay → daemon fork  │  │
//! │  └──────────────────────────────────┘   │ (privilege reduction)  │  │
//! │                                         └────────────────────────┘  │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  library core                                                       │
//! │  ┌──────────────────────────┐  ┌─────────────────────────────────┐  │
//! │  │ shlib: SharedLibrary,    │  │ mpi: host→container mapping,    │  │
//! │  │ soname grammar, ABI      │  │ ABI pre-checks, ldconfig cache  │  │
//! │  │ resolution, picker       │  │ listing                         │  │
//! │  └──────────────────────────┘  └─────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Hook Contract
//!
//! Each hook is a short-lived, single-threaded process invoked by the OCI
//! runtime at a lifecycle point, receiving the container state JSON on
//! standard input. There is no internal concurrency; the only
//! cross-invocation shared resource is the per-user key directory, guarded
//! by an advisory lock.
//!
//! # Security Model
//!
//! Activation runs as root inside the container's namespaces and reduces
//! privilege at two boundaries:
//!
//! - **Scoped**: directory creation in the user's home happens under the
//!   user's effective identity, restored on every exit path
//!   ([`privilege::with_identity`]).
//! - **Irreversible**: the forked daemon chroots into the rootfs, clears
//!   the capability bounding set and supplementary groups, sets
//!   resgid/resuid to the container user, and flips NoNewPrivs before exec.
//!
//! The user's host `~/.ssh` is shielded by an overlay mount, so activation
//! never writes through a bind-mounted home.
//!
//! # Example
//!
//! ```rust,ignore
//! use magikhooks::shlib::SharedLibrary;
//! use std::path::Path;
//!
//! // host libmpi to be injected, container candidates to replace
//! let host = SharedLibrary::new(Path::new("/opt/mpi/lib/libmpi.so.12.1.8"), Path::new("/"))?;
//! let candidates = vec![
//!     SharedLibrary::new(Path::new("/rootfs/usr/lib/libmpi.so.12.0.5"), Path::new("/rootfs"))?,
//!     SharedLibrary::new(Path::new("/rootfs/usr/lib/libmpi.so.12.1.0"), Path::new("/rootfs"))?,
//! ];
//! let replacement = host.pick_newest_abi_compatible(&candidates)?;
//! ```

// =============================================================================
// Modules
// =============================================================================

pub mod bundle;
pub mod constants;
pub mod error;
pub mod fsutil;
pub mod keys;
pub mod lock;
pub mod mount;
pub mod mpi;
pub mod namespaces;
pub mod passwd;
pub mod privilege;
pub mod shlib;
pub mod ssh;
pub mod subprocess;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{Error, Result};
