/// Mount ledger for one sandbox root
///
/// Entries are recorded immediately after each successful mount and are the
/// only input to teardown. Teardown never recomputes the plan.
use crate::kernel::mount::MountEntry;
use log::debug;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct SandboxRoot {
    path: PathBuf,
    mounts_done: Vec<MountEntry>,
    entered: bool,
}

impl SandboxRoot {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            mounts_done: Vec::new(),
            entered: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Must be called right after the mount succeeded.
    pub fn record(&mut self, entry: MountEntry) {
        debug!(
            "Recording mount: {} at {}",
            entry.source_type,
            self.path.join(entry.target).display()
        );
        self.mounts_done.push(entry);
    }

    pub fn record_all(&mut self, entries: impl IntoIterator<Item = MountEntry>) {
        for entry in entries {
            self.record(entry);
        }
    }

    pub fn mounts_done(&self) -> &[MountEntry] {
        &self.mounts_done
    }

    pub fn mark_entered(&mut self) {
        self.entered = true;
    }

    pub fn is_entered(&self) -> bool {
        self.entered
    }

    /// Hand the ledger to teardown. A second call returns nothing, so an
    /// entry is never released twice.
    pub fn take_mounts(&mut self) -> Vec<MountEntry> {
        std::mem::take(&mut self.mounts_done)
    }

    pub fn is_empty(&self) -> bool {
        self.mounts_done.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::mount::MOUNT_PLAN;

    #[test]
    fn ledger_grows_in_record_order() {
        let mut sandbox = SandboxRoot::new(PathBuf::from("/srv/jail"));
        sandbox.record(MOUNT_PLAN[0]);
        sandbox.record_all(MOUNT_PLAN[1..3].iter().copied());

        let names: Vec<&str> = sandbox
            .mounts_done()
            .iter()
            .map(|e| e.source_type)
            .collect();
        assert_eq!(names, ["proc", "sysfs", "devtmpfs"]);
    }

    #[test]
    fn take_mounts_drains_the_ledger_once() {
        let mut sandbox = SandboxRoot::new(PathBuf::from("/srv/jail"));
        sandbox.record_all(MOUNT_PLAN.iter().copied());

        assert_eq!(sandbox.take_mounts().len(), MOUNT_PLAN.len());
        assert!(sandbox.take_mounts().is_empty());
        assert!(sandbox.is_empty());
    }

    #[test]
    fn entered_flag_is_independent_of_mounts() {
        let mut sandbox = SandboxRoot::new(PathBuf::from("/srv/jail"));
        assert!(!sandbox.is_entered());
        sandbox.mark_entered();
        assert!(sandbox.is_entered());
        assert!(sandbox.is_empty());
    }
}
