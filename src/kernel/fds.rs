//! Inherited file descriptor hygiene for the jail.
//!
//! Any descriptor that survives exec is a handle the command can use to
//! reach the host tree (`/proc/self/fd/N/...`), whatever its root. Before
//! exec every descriptor above stderr is marked close-on-exec. Marking
//! instead of closing keeps the jail's own reply pipe usable for reporting
//! an exec failure.

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use std::fs;
use std::io;
use std::os::fd::RawFd;

/// Flag for close_range(2), Linux 5.11+.
const CLOSE_RANGE_CLOEXEC: libc::c_uint = 1 << 2;

/// Mark every descriptor >= 3 close-on-exec. Uses close_range when the
/// kernel has it and falls back to walking /proc/self/fd.
pub fn mark_inherited_cloexec() -> io::Result<()> {
    if try_close_range() {
        log::debug!("Marked inherited descriptors close-on-exec via close_range");
        return Ok(());
    }
    let count = mark_via_proc()?;
    log::debug!("Marked {} inherited descriptors close-on-exec via /proc/self/fd", count);
    Ok(())
}

fn try_close_range() -> bool {
    // SAFETY: close_range with CLOSE_RANGE_CLOEXEC only sets descriptor
    // flags; nothing is closed. Old kernels answer ENOSYS or EINVAL.
    let rc = unsafe {
        libc::syscall(
            libc::SYS_close_range,
            3 as libc::c_uint,
            libc::c_uint::MAX,
            CLOSE_RANGE_CLOEXEC,
        )
    };
    rc == 0
}

fn mark_via_proc() -> io::Result<usize> {
    // Collect first: the directory handle itself shows up in the listing.
    let fds: Vec<RawFd> = fs::read_dir("/proc/self/fd")?
        .flatten()
        .filter_map(|entry| entry.file_name().to_str()?.parse().ok())
        .filter(|&fd| fd > 2)
        .collect();

    let mut marked = 0;
    for fd in fds {
        match fcntl(fd, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC)) {
            Ok(_) => marked += 1,
            // The read_dir handle, closed by now.
            Err(Errno::EBADF) => {}
            Err(e) => return Err(io::Error::from_raw_os_error(e as i32)),
        }
    }
    Ok(marked)
}
