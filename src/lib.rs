//! rootbox: privileged isolation sessions for Linux
//!
//! A session records the invoking identity, builds a chroot populated with the
//! kernel's virtual filesystems, runs one command behind a capability boundary,
//! and then tears everything down again on every exit path.
//!
//! # Architecture
//!
//! ## Kernel Primitives ([`kernel`])
//! - [`kernel::credentials`]: identity capture and reversible UID/GID transitions
//! - [`kernel::capabilities`]: dumpable/no_new_privs flags and capability stripping
//! - [`kernel::mount`]: the fixed virtual filesystem plan and its mount/unmount set
//! - [`kernel::root`]: chdir + chroot root transition
//!
//! ## Execution Control ([`exec`])
//! - [`exec::session`]: the isolation session state machine
//! - [`exec::jail`]: the jail process that enters the root and execs the command
//! - [`exec::command`]: command lines (argument vector or explicit shell)
//!
//! ## Safety & Cleanup ([`safety`])
//! - [`safety::sandbox_root`]: authoritative ledger of mounts made under a root
//! - [`safety::report`]: aggregated teardown report
//!
//! ## Observability ([`observability`])
//! - [`observability::audit`]: structured security events
//!
//! ## Configuration ([`config`])
//! - [`config::types`]: error taxonomy and shared types
//! - [`config::session`]: JSON-loadable session configuration
//!
//! ## Testing Infrastructure ([`testing`])
//! - [`testing::mount_invariance`]: mountinfo snapshots scoped to a root
//! - [`testing::fakes`]: in-memory credential, mount and jail backends
//!
//! # Design Principles
//!
//! 1. **Order is security** - GID before groups before UID; mount before chroot;
//!    strip before exec
//! 2. **One ledger** - only the [`safety::sandbox_root::SandboxRoot`] that recorded
//!    a mount may release it
//! 3. **Teardown never throws** - failures are collected into a report
//! 4. **The owner stays outside** - the session owner never enters the root it built

#[cfg(not(target_os = "linux"))]
compile_error!("rootbox requires Linux mount, chroot and capability primitives");

// Kernel Primitives
pub mod kernel;

// Execution Control
pub mod exec;

// Safety & Cleanup
pub mod safety;

// Observability
pub mod observability;

// Configuration
pub mod config;

// Testing Infrastructure
pub mod testing;

// CLI entrypoint wiring for the rootbox binary.
pub mod cli;

pub use config::types::*;
pub use exec::command::CommandLine;
pub use exec::session::IsolationSession;
pub use kernel::credentials::{IdentityRecord, PrivilegeSession};
pub use kernel::mount::{MountEntry, MountSet};
