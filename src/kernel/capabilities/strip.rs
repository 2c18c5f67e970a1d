//! Security boundary applied inside the root, before exec.
//!
//! Order: non-dumpable, no_new_privs, bounding set, ambient set, capset,
//! verify. The bounding drop needs CAP_SETPCAP, so it must precede capset.

use super::query::{check_no_new_privs, get_bounding_set, is_dumpable, read_capabilities};
use super::{
    CapUserData, CapUserHeader, CAP_PROBE_LIMIT, LINUX_CAPABILITY_VERSION_3, PR_CAPBSET_DROP,
    PR_CAP_AMBIENT, PR_CAP_AMBIENT_CLEAR_ALL, PR_SET_DUMPABLE, PR_SET_NO_NEW_PRIVS,
};
use crate::config::types::{BoundaryStep, SecurityError};
use std::io;

pub struct CapabilityStripper;

impl CapabilityStripper {
    /// Strip every capability and lock the process flags. Any failed step is
    /// fatal; the ambient clear is the only best-effort step.
    pub fn restrict_process() -> Result<(), SecurityError> {
        set_non_dumpable()?;
        set_no_new_privs()?;
        drop_bounding_set()?;
        clear_ambient_set();
        clear_process_sets()?;
        verify_boundary()?;

        log::info!("Security boundary established: capabilities stripped, no_new_privs set");
        Ok(())
    }
}

fn boundary_error(step: BoundaryStep, cause: impl ToString) -> SecurityError {
    SecurityError::BoundaryNotEstablished {
        step,
        cause: cause.to_string(),
    }
}

fn set_non_dumpable() -> Result<(), SecurityError> {
    // SAFETY: PR_SET_DUMPABLE with 0 only changes the calling process's flag.
    let result = unsafe { libc::prctl(PR_SET_DUMPABLE, 0, 0, 0, 0) };
    if result != 0 {
        return Err(boundary_error(
            BoundaryStep::NonDumpable,
            io::Error::last_os_error(),
        ));
    }
    Ok(())
}

fn set_no_new_privs() -> Result<(), SecurityError> {
    // SAFETY: PR_SET_NO_NEW_PRIVS is idempotent and cannot be unset.
    let result = unsafe { libc::prctl(PR_SET_NO_NEW_PRIVS, 1, 0, 0, 0) };
    if result != 0 {
        return Err(boundary_error(
            BoundaryStep::NoNewPrivileges,
            io::Error::last_os_error(),
        ));
    }
    Ok(())
}

/// The command runs as UID 0; without this execve would hand it a full
/// permitted set again.
fn drop_bounding_set() -> Result<(), SecurityError> {
    for cap in 0..=CAP_PROBE_LIMIT {
        // SAFETY: PR_CAPBSET_DROP takes a capability number; numbers past
        // CAP_LAST_CAP are rejected with EINVAL.
        let result = unsafe { libc::prctl(PR_CAPBSET_DROP, cap as libc::c_ulong, 0, 0, 0) };
        if result != 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINVAL) {
                break;
            }
            return Err(boundary_error(
                BoundaryStep::BoundingSet,
                format!("capability {}: {}", cap, err),
            ));
        }
    }
    Ok(())
}

fn clear_ambient_set() {
    // SAFETY: PR_CAP_AMBIENT_CLEAR_ALL only shrinks the ambient set. Kernels
    // older than 4.3 answer EINVAL.
    let result = unsafe { libc::prctl(PR_CAP_AMBIENT, PR_CAP_AMBIENT_CLEAR_ALL, 0, 0, 0) };
    if result != 0 {
        log::warn!(
            "Failed to clear ambient capabilities (may not be supported): {}",
            io::Error::last_os_error()
        );
    }
}

/// Zero effective, permitted and inheritable via raw capset(2).
fn clear_process_sets() -> Result<(), SecurityError> {
    let header = CapUserHeader {
        version: LINUX_CAPABILITY_VERSION_3,
        pid: 0,
    };
    let data = [CapUserData::default(); 2];

    // SAFETY: valid v3 header for the current thread and two zeroed data
    // entries, as capset(2) expects.
    let rc = unsafe {
        libc::syscall(
            libc::SYS_capset,
            &header as *const CapUserHeader,
            data.as_ptr(),
        )
    };
    if rc != 0 {
        return Err(boundary_error(
            BoundaryStep::ClearCapabilities,
            io::Error::last_os_error(),
        ));
    }
    Ok(())
}

/// Read everything back through prctl and capget; /proc may not exist
/// inside the root.
fn verify_boundary() -> Result<(), SecurityError> {
    let verify = |cause: String| boundary_error(BoundaryStep::Verify, cause);

    if !check_no_new_privs().map_err(|e| verify(e.to_string()))? {
        return Err(verify("no_new_privs is not set".to_string()));
    }
    if is_dumpable().map_err(|e| verify(e.to_string()))? {
        return Err(verify("process is still dumpable".to_string()));
    }

    let sets = read_capabilities().map_err(|e| verify(e.to_string()))?;
    if !sets.is_empty() {
        return Err(verify(format!(
            "capability sets not empty: eff={:#x} prm={:#x} inh={:#x}",
            sets.effective, sets.permitted, sets.inheritable
        )));
    }

    let bounding = get_bounding_set();
    if !bounding.is_empty() {
        return Err(verify(format!(
            "bounding set still holds {:?}",
            bounding
        )));
    }

    Ok(())
}
