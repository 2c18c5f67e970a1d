//! Linux capability management and security-sensitive process flags.
//!
//! Everything here reads or changes the calling process only. The jail
//! process calls [`CapabilityStripper::restrict_process`] after entering the
//! root and before exec.

mod query;
mod strip;

pub use query::{
    check_no_new_privs, get_bounding_set, get_capability_status, is_dumpable, read_capabilities,
    CapabilitySets,
};
pub use strip::CapabilityStripper;

/// Highest capability number probed. The kernel answers EINVAL past its
/// own CAP_LAST_CAP, which ends every scan early.
pub(crate) const CAP_PROBE_LIMIT: u32 = 63;

pub(crate) const PR_GET_DUMPABLE: libc::c_int = 3;
pub(crate) const PR_SET_DUMPABLE: libc::c_int = 4;
pub(crate) const PR_CAPBSET_READ: libc::c_int = 23;
pub(crate) const PR_CAPBSET_DROP: libc::c_int = 24;
pub(crate) const PR_SET_NO_NEW_PRIVS: libc::c_int = 38;
pub(crate) const PR_GET_NO_NEW_PRIVS: libc::c_int = 39;
pub(crate) const PR_CAP_AMBIENT: libc::c_int = 47;
pub(crate) const PR_CAP_AMBIENT_CLEAR_ALL: libc::c_int = 4;
pub(crate) const LINUX_CAPABILITY_VERSION_3: u32 = 0x2008_0522;

#[repr(C)]
pub(crate) struct CapUserHeader {
    pub version: u32,
    pub pid: i32,
}

/// Version 3 uses two of these: caps 0-31 and caps 32-63.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct CapUserData {
    pub effective: u32,
    pub permitted: u32,
    pub inheritable: u32,
}
