//! In-memory backends for driving sessions without root.
//!
//! Each fake is a cheap handle onto shared state: clone it, hand one clone to
//! the session, and inspect the recorded calls through the other.

use crate::config::types::{
    BoundaryStep, ExecutionError, ExitStatus, IsolationError, Result, RootTransitionStage,
    SecurityError,
};
use crate::exec::command::ExecRequest;
use crate::exec::jail::Jail;
use crate::kernel::credentials::CredentialOps;
use crate::kernel::mount::{MountEntry, MountOps};
use std::cell::RefCell;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;

fn eperm() -> io::Error {
    io::Error::from_raw_os_error(libc::EPERM)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialCall {
    SetEffectiveUid(u32),
    SetGid(u32),
    SetGroups(Vec<u32>),
    SetUid(u32),
}

#[derive(Debug, Default)]
struct CredentialState {
    ruid: u32,
    euid: u32,
    suid: u32,
    rgid: u32,
    egid: u32,
    groups: Vec<u32>,
    calls: Vec<CredentialCall>,
    fail_on: Vec<CredentialCall>,
    fail_getgroups: bool,
    ignore_set_uid: bool,
}

/// Process credentials with the kernel's permission rules for root and
/// non-root callers.
#[derive(Debug, Clone)]
pub struct FakeCredentials {
    state: Rc<RefCell<CredentialState>>,
}

impl FakeCredentials {
    fn with_ids(ruid: u32, euid: u32, gid: u32, groups: Vec<u32>) -> Self {
        Self {
            state: Rc::new(RefCell::new(CredentialState {
                ruid,
                euid,
                suid: euid,
                rgid: gid,
                egid: gid,
                groups,
                ..Default::default()
            })),
        }
    }

    /// A set-user-ID-root program started by `uid`.
    pub fn setuid_root(uid: u32, gid: u32, groups: Vec<u32>) -> Self {
        Self::with_ids(uid, 0, gid, groups)
    }

    pub fn unprivileged(uid: u32, gid: u32, groups: Vec<u32>) -> Self {
        Self::with_ids(uid, uid, gid, groups)
    }

    /// Make the given call fail with EPERM.
    pub fn fail_on(&self, call: CredentialCall) {
        self.state.borrow_mut().fail_on.push(call);
    }

    pub fn fail_getgroups(&self) {
        self.state.borrow_mut().fail_getgroups = true;
    }

    /// setuid reports success without changing anything.
    pub fn ignore_set_uid(&self) {
        self.state.borrow_mut().ignore_set_uid = true;
    }

    /// Every state-changing call, in order, failed ones included.
    pub fn mutations(&self) -> Vec<CredentialCall> {
        self.state.borrow().calls.clone()
    }

    fn begin_call(&self, call: CredentialCall) -> io::Result<std::cell::RefMut<'_, CredentialState>> {
        let mut state = self.state.borrow_mut();
        let fail = state.fail_on.contains(&call);
        state.calls.push(call);
        if fail {
            return Err(eperm());
        }
        Ok(state)
    }
}

impl CredentialOps for FakeCredentials {
    fn real_uid(&self) -> u32 {
        self.state.borrow().ruid
    }

    fn effective_uid(&self) -> u32 {
        self.state.borrow().euid
    }

    fn real_gid(&self) -> u32 {
        self.state.borrow().rgid
    }

    fn effective_gid(&self) -> u32 {
        self.state.borrow().egid
    }

    fn supplementary_groups(&self) -> io::Result<Vec<u32>> {
        let state = self.state.borrow();
        if state.fail_getgroups {
            return Err(io::Error::from_raw_os_error(libc::EINVAL));
        }
        Ok(state.groups.clone())
    }

    fn set_effective_uid(&self, uid: u32) -> io::Result<()> {
        let mut state = self.begin_call(CredentialCall::SetEffectiveUid(uid))?;
        if state.euid == 0 || uid == state.ruid || uid == state.suid {
            state.euid = uid;
            Ok(())
        } else {
            Err(eperm())
        }
    }

    fn set_gid(&self, gid: u32) -> io::Result<()> {
        let mut state = self.begin_call(CredentialCall::SetGid(gid))?;
        if state.euid == 0 {
            state.rgid = gid;
            state.egid = gid;
            Ok(())
        } else if gid == state.rgid {
            state.egid = gid;
            Ok(())
        } else {
            Err(eperm())
        }
    }

    fn set_groups(&self, groups: &[u32]) -> io::Result<()> {
        let mut state = self.begin_call(CredentialCall::SetGroups(groups.to_vec()))?;
        if state.euid != 0 {
            return Err(eperm());
        }
        // The kernel stores the list sorted.
        let mut sorted = groups.to_vec();
        sorted.sort_unstable();
        state.groups = sorted;
        Ok(())
    }

    fn set_uid(&self, uid: u32) -> io::Result<()> {
        let mut state = self.begin_call(CredentialCall::SetUid(uid))?;
        if state.ignore_set_uid {
            return Ok(());
        }
        if state.euid == 0 {
            state.ruid = uid;
            state.euid = uid;
            state.suid = uid;
            Ok(())
        } else if uid == state.ruid || uid == state.suid {
            state.euid = uid;
            Ok(())
        } else {
            Err(eperm())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountCall {
    EnsureDir(PathBuf),
    Mount(PathBuf),
    Unmount { target: PathBuf, lazy: bool },
}

#[derive(Debug, Default)]
struct MountState {
    table: Vec<PathBuf>,
    calls: Vec<MountCall>,
    fail_mount: Vec<String>,
    fail_ensure_dir: Vec<String>,
    fail_unmount: Vec<String>,
}

/// A mount table keyed by absolute target path.
#[derive(Debug, Clone, Default)]
pub struct FakeMounts {
    state: Rc<RefCell<MountState>>,
}

impl FakeMounts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a table that already holds `existing`.
    pub fn with_existing(existing: Vec<PathBuf>) -> Self {
        let fake = Self::new();
        fake.state.borrow_mut().table = existing;
        fake
    }

    /// Mounting a filesystem of this type fails with EPERM.
    pub fn fail_mount(&self, source_type: &str) {
        self.state
            .borrow_mut()
            .fail_mount
            .push(source_type.to_string());
    }

    /// Creating this relative mount point fails with EACCES.
    pub fn fail_ensure_dir(&self, relative: &str) {
        self.state
            .borrow_mut()
            .fail_ensure_dir
            .push(relative.to_string());
    }

    /// Unmounting this relative mount point fails with EBUSY.
    pub fn fail_unmount(&self, relative: &str) {
        self.state
            .borrow_mut()
            .fail_unmount
            .push(relative.to_string());
    }

    /// Current mount table in mount order.
    pub fn mounted(&self) -> Vec<PathBuf> {
        self.state.borrow().table.clone()
    }

    /// Current mounts under `root`.
    pub fn mounted_under(&self, root: &Path) -> Vec<PathBuf> {
        self.mounted()
            .into_iter()
            .filter(|p| p.starts_with(root))
            .collect()
    }

    pub fn calls(&self) -> Vec<MountCall> {
        self.state.borrow().calls.clone()
    }

    pub fn unmount_order(&self) -> Vec<PathBuf> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                MountCall::Unmount { target, .. } => Some(target),
                _ => None,
            })
            .collect()
    }
}

fn matches_relative(path: &Path, relatives: &[String]) -> bool {
    relatives.iter().any(|rel| path.ends_with(rel))
}

impl MountOps for FakeMounts {
    fn ensure_dir(&self, path: &Path) -> io::Result<()> {
        let mut state = self.state.borrow_mut();
        state.calls.push(MountCall::EnsureDir(path.to_path_buf()));
        if matches_relative(path, &state.fail_ensure_dir) {
            return Err(io::Error::from_raw_os_error(libc::EACCES));
        }
        Ok(())
    }

    fn mount(&self, entry: &MountEntry, target: &Path) -> io::Result<()> {
        let mut state = self.state.borrow_mut();
        state.calls.push(MountCall::Mount(target.to_path_buf()));
        if state.fail_mount.iter().any(|t| t == entry.source_type) {
            return Err(eperm());
        }
        state.table.push(target.to_path_buf());
        Ok(())
    }

    fn unmount(&self, target: &Path, lazy: bool) -> io::Result<()> {
        let mut state = self.state.borrow_mut();
        state.calls.push(MountCall::Unmount {
            target: target.to_path_buf(),
            lazy,
        });
        if matches_relative(target, &state.fail_unmount) {
            return Err(io::Error::from_raw_os_error(libc::EBUSY));
        }
        match state.table.iter().rposition(|p| p == target) {
            Some(index) => {
                state.table.remove(index);
                Ok(())
            }
            None => Err(io::Error::from_raw_os_error(libc::EINVAL)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JailCall {
    EnterRoot(PathBuf),
    Restrict,
    Exec(ExecRequest),
    Release,
}

#[derive(Debug)]
struct JailState {
    calls: Vec<JailCall>,
    running: bool,
    fail_enter: Option<RootTransitionStage>,
    fail_restrict: Option<BoundaryStep>,
    spawn_failure: Option<String>,
    exit_status: ExitStatus,
}

impl Default for JailState {
    fn default() -> Self {
        Self {
            calls: Vec::new(),
            running: false,
            fail_enter: None,
            fail_restrict: None,
            spawn_failure: None,
            exit_status: ExitStatus::Exited(0),
        }
    }
}

/// Jail that records requests instead of forking.
#[derive(Debug, Clone, Default)]
pub struct FakeJail {
    state: Rc<RefCell<JailState>>,
}

impl FakeJail {
    pub fn new() -> Self {
        Self::default()
    }

    /// Status every executed command reports.
    pub fn exit_with(&self, status: ExitStatus) {
        self.state.borrow_mut().exit_status = status;
    }

    pub fn fail_enter_root(&self, stage: RootTransitionStage) {
        self.state.borrow_mut().fail_enter = Some(stage);
    }

    pub fn fail_restrict(&self, step: BoundaryStep) {
        self.state.borrow_mut().fail_restrict = Some(step);
    }

    pub fn fail_spawn(&self, cause: &str) {
        self.state.borrow_mut().spawn_failure = Some(cause.to_string());
    }

    pub fn calls(&self) -> Vec<JailCall> {
        self.state.borrow().calls.clone()
    }
}

fn not_running() -> IsolationError {
    ExecutionError::JailProtocol("jail is not running".to_string()).into()
}

impl Jail for FakeJail {
    fn enter_root(&mut self, root: &Path) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.calls.push(JailCall::EnterRoot(root.to_path_buf()));
        if state.running {
            return Err(ExecutionError::JailProtocol("jail is already running".to_string()).into());
        }
        if let Some(stage) = state.fail_enter {
            state.running = stage != RootTransitionStage::Fork;
            return Err(IsolationError::RootTransitionFailed {
                stage,
                cause: "injected failure".to_string(),
            });
        }
        state.running = true;
        Ok(())
    }

    fn restrict(&mut self) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.calls.push(JailCall::Restrict);
        if !state.running {
            return Err(not_running());
        }
        if let Some(step) = state.fail_restrict {
            return Err(SecurityError::BoundaryNotEstablished {
                step,
                cause: "injected failure".to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn exec(&mut self, request: &ExecRequest) -> Result<ExitStatus> {
        let mut state = self.state.borrow_mut();
        state.calls.push(JailCall::Exec(request.clone()));
        if !state.running {
            return Err(not_running());
        }
        state.running = false;
        match &state.spawn_failure {
            Some(cause) => Err(ExecutionError::SpawnFailed(cause.clone()).into()),
            None => Ok(state.exit_status),
        }
    }

    fn release(&mut self) -> std::result::Result<(), ExecutionError> {
        let mut state = self.state.borrow_mut();
        if state.running {
            state.calls.push(JailCall::Release);
            state.running = false;
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.state.borrow().running
    }
}
