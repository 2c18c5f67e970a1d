//! Testing infrastructure
//!
//! Mountinfo snapshots for proving mount invariance, and in-memory backends
//! for exercising sessions without root.

pub mod fakes;
pub mod mount_invariance;

pub use fakes::{CredentialCall, FakeCredentials, FakeJail, FakeMounts, JailCall, MountCall};
pub use mount_invariance::{
    capture_under, compare_under, mounts_under, parse_mountinfo, verify_mount_invariance,
    MountInfoEntry,
};
