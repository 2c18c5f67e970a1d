use super::plan::MountEntry;
use nix::mount::{mount, umount2, MntFlags};
use std::ffi::{CStr, CString, OsStr};
use std::fs::File;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::os::unix::ffi::OsStrExt;
use std::path::{Component, Path, PathBuf};

/// Directory creation and mount syscalls used by [`super::MountSet`].
pub trait MountOps {
    /// Create `path` (and parents) with mode 0755. An existing directory is
    /// success. Symlinks anywhere in `path` are refused with ELOOP.
    fn ensure_dir(&self, path: &Path) -> io::Result<()>;
    fn mount(&self, entry: &MountEntry, target: &Path) -> io::Result<()>;
    fn unmount(&self, target: &Path, lazy: bool) -> io::Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemMounts;

impl MountOps for SystemMounts {
    fn ensure_dir(&self, path: &Path) -> io::Result<()> {
        open_no_follow(path, true).map(drop)
    }

    /// Mounts onto `/proc/self/fd/N` of a descriptor opened without
    /// following symlinks, so the mount point cannot be swapped between
    /// the check and mount(2).
    fn mount(&self, entry: &MountEntry, target: &Path) -> io::Result<()> {
        let dir = open_no_follow(target, false)?;
        let pinned = PathBuf::from(format!("/proc/self/fd/{}", dir.as_raw_fd()));
        mount(
            Some(entry.source_type),
            &pinned,
            Some(entry.source_type),
            entry.flags.to_ms_flags(),
            entry.data,
        )
        .map_err(|e| io::Error::from_raw_os_error(e as i32))
    }

    fn unmount(&self, target: &Path, lazy: bool) -> io::Result<()> {
        let mut flags = MntFlags::UMOUNT_NOFOLLOW;
        if lazy {
            flags |= MntFlags::MNT_DETACH;
        }
        umount2(target, flags).map_err(|e| io::Error::from_raw_os_error(e as i32))
    }
}

/// Resolve `path` one component at a time with O_NOFOLLOW. Any symlink on
/// the way is ELOOP. With `create`, missing components are made with mode
/// 0755.
fn open_no_follow(path: &Path, create: bool) -> io::Result<OwnedFd> {
    let start = if path.is_absolute() { "/" } else { "." };
    let mut dir = open_at(None, &c_name(OsStr::new(start))?)?;

    for component in path.components() {
        let name = match component {
            Component::RootDir => continue,
            Component::Normal(name) => c_name(name)?,
            _ => return Err(io::Error::from_raw_os_error(libc::EINVAL)),
        };

        dir = match open_at(Some(&dir), &name) {
            Err(e) if create && e.raw_os_error() == Some(libc::ENOENT) => {
                // SAFETY: `dir` is a live descriptor and `name` a single
                // NUL-terminated component.
                let rc = unsafe { libc::mkdirat(dir.as_raw_fd(), name.as_ptr(), 0o755) };
                if rc != 0 {
                    let err = io::Error::last_os_error();
                    if err.raw_os_error() != Some(libc::EEXIST) {
                        return Err(err);
                    }
                }
                open_at(Some(&dir), &name)?
            }
            other => other?,
        };
    }

    Ok(dir)
}

fn c_name(name: &OsStr) -> io::Result<CString> {
    CString::new(name.as_bytes()).map_err(|_| io::Error::from_raw_os_error(libc::EINVAL))
}

/// O_PATH open of one component. Refuses anything but a real directory.
fn open_at(parent: Option<&OwnedFd>, name: &CStr) -> io::Result<OwnedFd> {
    let dirfd = parent.map_or(libc::AT_FDCWD, |fd| fd.as_raw_fd());
    // SAFETY: `name` is NUL-terminated and `dirfd` is either AT_FDCWD or a
    // descriptor owned by the caller.
    let fd = unsafe {
        libc::openat(
            dirfd,
            name.as_ptr(),
            libc::O_PATH | libc::O_NOFOLLOW | libc::O_CLOEXEC,
        )
    };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: openat just returned this descriptor and nothing else owns it.
    let fd = unsafe { OwnedFd::from_raw_fd(fd) };

    let file_type = File::from(fd.try_clone()?).metadata()?.file_type();
    if file_type.is_symlink() {
        return Err(io::Error::from_raw_os_error(libc::ELOOP));
    }
    if !file_type.is_dir() {
        return Err(io::Error::from_raw_os_error(libc::ENOTDIR));
    }
    Ok(fd)
}
