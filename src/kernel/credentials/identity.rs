use super::ops::CredentialOps;
use crate::config::types::PrivilegeError;
use serde::{Deserialize, Serialize};

/// The invoking identity, captured once and never mutated.
///
/// A privilege drop may only restore these values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
    real_uid: u32,
    real_gid: u32,
    /// Order and duplicates preserved as returned by getgroups(2)
    supplementary_groups: Vec<u32>,
}

impl IdentityRecord {
    pub fn capture(ops: &dyn CredentialOps) -> Result<Self, PrivilegeError> {
        let supplementary_groups = ops
            .supplementary_groups()
            .map_err(PrivilegeError::IdentityCapture)?;

        Ok(Self {
            real_uid: ops.real_uid(),
            real_gid: ops.real_gid(),
            supplementary_groups,
        })
    }

    pub fn real_uid(&self) -> u32 {
        self.real_uid
    }

    pub fn real_gid(&self) -> u32 {
        self.real_gid
    }

    pub fn supplementary_groups(&self) -> &[u32] {
        &self.supplementary_groups
    }
}
