//! UID/GID primitives behind a trait so sessions can be driven without root.

use nix::unistd::{self, Gid, Uid};
use std::io;

/// Credential syscalls used by [`super::PrivilegeSession`].
pub trait CredentialOps {
    fn real_uid(&self) -> u32;
    fn effective_uid(&self) -> u32;
    fn real_gid(&self) -> u32;
    fn effective_gid(&self) -> u32;
    fn supplementary_groups(&self) -> io::Result<Vec<u32>>;

    /// seteuid(2)
    fn set_effective_uid(&self, uid: u32) -> io::Result<()>;
    /// setgid(2)
    fn set_gid(&self, gid: u32) -> io::Result<()>;
    /// setgroups(2)
    fn set_groups(&self, groups: &[u32]) -> io::Result<()>;
    /// setuid(2)
    fn set_uid(&self, uid: u32) -> io::Result<()>;
}

/// nix-backed credential primitives for the calling process.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemCredentials;

fn errno_to_io(err: nix::Error) -> io::Error {
    io::Error::from_raw_os_error(err as i32)
}

impl CredentialOps for SystemCredentials {
    fn real_uid(&self) -> u32 {
        unistd::getuid().as_raw()
    }

    fn effective_uid(&self) -> u32 {
        unistd::geteuid().as_raw()
    }

    fn real_gid(&self) -> u32 {
        unistd::getgid().as_raw()
    }

    fn effective_gid(&self) -> u32 {
        unistd::getegid().as_raw()
    }

    fn supplementary_groups(&self) -> io::Result<Vec<u32>> {
        let groups = unistd::getgroups().map_err(errno_to_io)?;
        Ok(groups.into_iter().map(Gid::as_raw).collect())
    }

    fn set_effective_uid(&self, uid: u32) -> io::Result<()> {
        unistd::seteuid(Uid::from_raw(uid)).map_err(errno_to_io)
    }

    fn set_gid(&self, gid: u32) -> io::Result<()> {
        unistd::setgid(Gid::from_raw(gid)).map_err(errno_to_io)
    }

    fn set_groups(&self, groups: &[u32]) -> io::Result<()> {
        let groups: Vec<Gid> = groups.iter().copied().map(Gid::from_raw).collect();
        unistd::setgroups(&groups).map_err(errno_to_io)
    }

    fn set_uid(&self, uid: u32) -> io::Result<()> {
        unistd::setuid(Uid::from_raw(uid)).map_err(errno_to_io)
    }
}
