use super::ops::{MountOps, SystemMounts};
use super::plan::{MountEntry, MOUNT_PLAN};
use crate::config::types::{MountError, MountOperation};
use std::path::{Path, PathBuf};

/// Establishes and releases the fixed virtual filesystem plan under a root.
///
/// `mount_all` never unwinds on its own: the caller owns the done list and
/// hands it back to `unmount_all`.
pub struct MountSet {
    ops: Box<dyn MountOps>,
    lazy_unmount: bool,
}

impl MountSet {
    pub fn new(ops: Box<dyn MountOps>, lazy_unmount: bool) -> Self {
        Self { ops, lazy_unmount }
    }

    pub fn system(lazy_unmount: bool) -> Self {
        Self::new(Box::new(SystemMounts), lazy_unmount)
    }

    pub fn plan(&self) -> &'static [MountEntry] {
        &MOUNT_PLAN
    }

    /// Run the plan in order, stopping at the first failure. On failure the
    /// entries mounted so far come back alongside the error.
    pub fn mount_all(
        &self,
        root: &Path,
    ) -> Result<Vec<MountEntry>, (MountError, Vec<MountEntry>)> {
        let mut done = Vec::with_capacity(MOUNT_PLAN.len());

        for entry in MOUNT_PLAN.iter() {
            let target = target_path(root, entry);

            if let Err(cause) = self.ops.ensure_dir(&target) {
                return Err((
                    mount_error(entry, target, MountOperation::CreateDir, cause),
                    done,
                ));
            }

            if let Err(cause) = self.ops.mount(entry, &target) {
                return Err((
                    mount_error(entry, target, MountOperation::Mount, cause),
                    done,
                ));
            }

            log::info!(
                "Mounted {} at {} ({})",
                entry.source_type,
                target.display(),
                entry.flags
            );
            done.push(*entry);
        }

        Ok(done)
    }

    /// Unmount `done` in reverse, continuing past failures.
    pub fn unmount_all(&self, root: &Path, done: &[MountEntry]) -> Vec<MountError> {
        let mut errors = Vec::new();

        for entry in done.iter().rev() {
            let target = target_path(root, entry);
            match self.ops.unmount(&target, self.lazy_unmount) {
                Ok(()) => log::debug!("Unmounted {}", target.display()),
                Err(cause) => {
                    log::warn!("Failed to unmount {}: {}", target.display(), cause);
                    errors.push(mount_error(entry, target, MountOperation::Unmount, cause));
                }
            }
        }

        errors
    }
}

pub fn target_path(root: &Path, entry: &MountEntry) -> PathBuf {
    root.join(entry.target)
}

fn mount_error(
    entry: &MountEntry,
    target: PathBuf,
    operation: MountOperation,
    cause: std::io::Error,
) -> MountError {
    MountError {
        entry: *entry,
        target,
        operation,
        cause,
    }
}
