use super::{
    CapUserData, CapUserHeader, CAP_PROBE_LIMIT, LINUX_CAPABILITY_VERSION_3, PR_CAPBSET_READ,
    PR_GET_DUMPABLE, PR_GET_NO_NEW_PRIVS,
};
use std::fs;
use std::io;

/// Effective, permitted and inheritable sets as 64-bit masks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CapabilitySets {
    pub effective: u64,
    pub permitted: u64,
    pub inheritable: u64,
}

impl CapabilitySets {
    pub fn is_empty(&self) -> bool {
        self.effective == 0 && self.permitted == 0 && self.inheritable == 0
    }
}

pub fn check_no_new_privs() -> io::Result<bool> {
    // SAFETY: PR_GET_NO_NEW_PRIVS only reads a flag of the calling thread.
    let result = unsafe { libc::prctl(PR_GET_NO_NEW_PRIVS, 0, 0, 0, 0) };
    if result < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(result == 1)
}

pub fn is_dumpable() -> io::Result<bool> {
    // SAFETY: PR_GET_DUMPABLE only reads a flag of the calling process.
    let result = unsafe { libc::prctl(PR_GET_DUMPABLE, 0, 0, 0, 0) };
    if result < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(result != 0)
}

/// Capability numbers still present in the bounding set.
pub fn get_bounding_set() -> Vec<u32> {
    let mut caps = Vec::new();
    for cap in 0..=CAP_PROBE_LIMIT {
        // SAFETY: PR_CAPBSET_READ is a read-only query; unknown caps give EINVAL.
        let result = unsafe { libc::prctl(PR_CAPBSET_READ, cap as libc::c_ulong, 0, 0, 0) };
        match result {
            1 => caps.push(cap),
            0 => {}
            _ => break,
        }
    }
    caps
}

/// Read the calling thread's capability sets with capget(2). Works without /proc.
pub fn read_capabilities() -> io::Result<CapabilitySets> {
    let mut header = CapUserHeader {
        version: LINUX_CAPABILITY_VERSION_3,
        pid: 0,
    };
    let mut data = [CapUserData::default(); 2];

    // SAFETY: header is a valid v3 header for the current thread and data has
    // room for the two entries v3 writes.
    let rc = unsafe {
        libc::syscall(
            libc::SYS_capget,
            &mut header as *mut CapUserHeader,
            data.as_mut_ptr(),
        )
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }

    let join = |lo: u32, hi: u32| (u64::from(hi) << 32) | u64::from(lo);
    Ok(CapabilitySets {
        effective: join(data[0].effective, data[1].effective),
        permitted: join(data[0].permitted, data[1].permitted),
        inheritable: join(data[0].inheritable, data[1].inheritable),
    })
}

/// The `Cap*` lines of /proc/self/status.
pub fn get_capability_status() -> io::Result<String> {
    let status = fs::read_to_string("/proc/self/status")?;
    let cap_lines: Vec<&str> = status
        .lines()
        .filter(|line| line.starts_with("Cap"))
        .collect();
    Ok(cap_lines.join("\n"))
}
