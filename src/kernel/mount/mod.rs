//! Virtual filesystem mounts under the sandbox root
//!
//! A fixed plan is mounted in order and released in reverse from the list
//! of entries that actually succeeded.

pub mod ops;
pub mod plan;
pub mod set;

pub use ops::{MountOps, SystemMounts};
pub use plan::{MountEntry, MountFlags, MOUNT_PLAN};
pub use set::{target_path, MountSet};
