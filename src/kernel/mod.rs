//! Thin wrappers around Linux kernel primitives.
//!
//! The `unsafe` syscall wrappers live here with explicit SAFETY comments.
//! The only other `unsafe` code is the jail process in [`crate::exec::jail`]
//! (fork, prctl and signal dispositions).
//! Dependency direction: credentials -> mount -> root -> capabilities.
//! `fds` is used by the jail just before exec.

pub mod capabilities;
pub mod credentials;
pub mod fds;
pub mod mount;
pub mod root;
