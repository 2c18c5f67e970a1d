//! Reversible elevation to superuser and back to the invoking identity.
//!
//! CRITICAL: a drop restores GID, then supplementary groups, then UID. Once
//! the UID is gone the process can no longer change its groups.

use super::identity::IdentityRecord;
use super::ops::{CredentialOps, SystemCredentials};
use crate::config::types::{DropStage, PrivilegeError, PrivilegeState};

pub struct PrivilegeSession {
    identity: IdentityRecord,
    state: PrivilegeState,
    ops: Box<dyn CredentialOps>,
}

impl PrivilegeSession {
    /// Capture the calling process's identity using the real syscalls.
    pub fn new() -> Result<Self, PrivilegeError> {
        Self::with_ops(Box::new(SystemCredentials))
    }

    pub fn with_ops(ops: Box<dyn CredentialOps>) -> Result<Self, PrivilegeError> {
        let identity = IdentityRecord::capture(ops.as_ref())?;
        let state = if ops.effective_uid() == 0 {
            PrivilegeState::Elevated
        } else {
            PrivilegeState::Unprivileged
        };

        log::debug!(
            "Captured identity uid={} gid={} groups={:?}, initial state {}",
            identity.real_uid(),
            identity.real_gid(),
            identity.supplementary_groups(),
            state
        );

        Ok(Self {
            identity,
            state,
            ops,
        })
    }

    pub fn check_root_access(&self) -> bool {
        self.state == PrivilegeState::Elevated
    }

    pub fn state(&self) -> PrivilegeState {
        self.state
    }

    pub fn identity(&self) -> &IdentityRecord {
        &self.identity
    }

    /// Set the effective UID to 0. A no-op when already elevated.
    pub fn elevate(&mut self) -> Result<(), PrivilegeError> {
        if self.state == PrivilegeState::Elevated {
            return Ok(());
        }

        self.ops
            .set_effective_uid(0)
            .map_err(PrivilegeError::ElevationDenied)?;
        self.state = PrivilegeState::Elevated;
        log::info!("Elevated effective UID to 0");
        Ok(())
    }

    /// Restore the captured identity. A no-op (no syscalls) when already
    /// unprivileged.
    pub fn drop_privileges(&mut self) -> Result<(), PrivilegeError> {
        if self.state == PrivilegeState::Unprivileged {
            return Ok(());
        }

        let gid = self.identity.real_gid();
        let uid = self.identity.real_uid();

        // CRITICAL: GID before groups before UID
        self.ops
            .set_gid(gid)
            .map_err(|e| drop_failed(DropStage::Gid, e))?;
        self.ops
            .set_groups(self.identity.supplementary_groups())
            .map_err(|e| drop_failed(DropStage::Groups, e))?;
        self.ops
            .set_uid(uid)
            .map_err(|e| drop_failed(DropStage::Uid, e))?;

        self.verify_restored()?;

        self.state = PrivilegeState::Unprivileged;
        log::info!("Dropped privileges to UID={}, GID={}", uid, gid);
        Ok(())
    }

    fn verify_restored(&self) -> Result<(), PrivilegeError> {
        let expected_uid = self.identity.real_uid();
        let expected_gid = self.identity.real_gid();
        let real_uid = self.ops.real_uid();
        let effective_uid = self.ops.effective_uid();
        let real_gid = self.ops.real_gid();
        let effective_gid = self.ops.effective_gid();

        if real_uid != expected_uid || effective_uid != expected_uid {
            return Err(verify_failed(format!(
                "UID expected {}, got real={}, effective={}",
                expected_uid, real_uid, effective_uid
            )));
        }

        if real_gid != expected_gid || effective_gid != expected_gid {
            return Err(verify_failed(format!(
                "GID expected {}, got real={}, effective={}",
                expected_gid, real_gid, effective_gid
            )));
        }

        // The kernel keeps group lists sorted, so compare as multisets.
        let mut current = self
            .ops
            .supplementary_groups()
            .map_err(|e| drop_failed(DropStage::Verify, e))?;
        let mut expected = self.identity.supplementary_groups().to_vec();
        current.sort_unstable();
        expected.sort_unstable();
        if current != expected {
            return Err(verify_failed(format!(
                "groups expected {:?}, got {:?}",
                expected, current
            )));
        }

        Ok(())
    }
}

impl Drop for PrivilegeSession {
    fn drop(&mut self) {
        if self.state == PrivilegeState::Elevated {
            if let Err(e) = self.drop_privileges() {
                log::error!("Best-effort privilege drop on teardown failed: {}", e);
            }
        }
    }
}

fn drop_failed(stage: DropStage, cause: std::io::Error) -> PrivilegeError {
    PrivilegeError::PrivilegeDropFailed {
        stage,
        cause: cause.to_string(),
    }
}

fn verify_failed(cause: String) -> PrivilegeError {
    PrivilegeError::PrivilegeDropFailed {
        stage: DropStage::Verify,
        cause,
    }
}
