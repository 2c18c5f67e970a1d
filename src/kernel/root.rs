//! Root transition: chdir into the target, then chroot to it.

use crate::config::types::{IsolationError, Result, RootTransitionStage};
use nix::unistd::{chdir, chroot};
use std::path::Path;

/// Move the calling process into `root`. Irreversible for this process,
/// which is why only the jail process calls it.
pub fn enter_root(root: &Path) -> Result<()> {
    chdir(root).map_err(|e| transition_failed(RootTransitionStage::Chdir, root, e))?;
    chroot(root).map_err(|e| transition_failed(RootTransitionStage::Chroot, root, e))?;
    log::debug!("Entered root {}", root.display());
    Ok(())
}

fn transition_failed(stage: RootTransitionStage, root: &Path, err: nix::Error) -> IsolationError {
    IsolationError::RootTransitionFailed {
        stage,
        cause: format!("{}: {}", root.display(), err.desc()),
    }
}
