//! Isolation session state machine.
//!
//! `Idle -> MountsEstablished -> RootEntered -> CapabilitiesRestricted ->
//! CommandRunning -> Finalizing -> Closed`
//!
//! Any error moves the session to `Finalizing`. `close()` is the only way
//! out and always unmounts what was mounted and drops privilege, whichever
//! stage failed.

use super::command::{CommandLine, ExecRequest};
use super::jail::{ForkedJail, Jail};
use crate::config::session::SessionConfig;
use crate::config::types::{
    ExitStatus, IsolationError, PrivilegeState, Result, SessionState,
};
use crate::kernel::credentials::PrivilegeSession;
use crate::kernel::mount::MountSet;
use crate::observability::audit::{AuditTrail, SecurityEventType};
use crate::safety::{SandboxRoot, TeardownReport};
use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

pub struct IsolationSession {
    state: SessionState,
    privilege: PrivilegeSession,
    mounts: MountSet,
    jail: Box<dyn Jail>,
    sandbox: Option<SandboxRoot>,
    config: SessionConfig,
    audit: AuditTrail,
}

impl IsolationSession {
    /// Session backed by the real mount syscalls and a forked jail.
    pub fn new(privilege: PrivilegeSession, config: &SessionConfig) -> Self {
        Self::with_backends(
            privilege,
            MountSet::system(config.lazy_unmount),
            Box::new(ForkedJail::new()),
            config,
        )
    }

    pub fn with_backends(
        privilege: PrivilegeSession,
        mounts: MountSet,
        jail: Box<dyn Jail>,
        config: &SessionConfig,
    ) -> Self {
        Self {
            state: SessionState::Idle,
            privilege,
            mounts,
            jail,
            sandbox: None,
            config: config.clone(),
            audit: AuditTrail::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn privilege(&self) -> &PrivilegeSession {
        &self.privilege
    }

    pub fn sandbox(&self) -> Option<&SandboxRoot> {
        self.sandbox.as_ref()
    }

    pub fn root(&self) -> Option<&Path> {
        self.sandbox.as_ref().map(SandboxRoot::path)
    }

    pub fn audit(&self) -> &AuditTrail {
        &self.audit
    }

    /// Regain effective UID 0 through the saved set-user-ID. Only valid
    /// before `begin`; a denial leaves the session idle.
    pub fn elevate(&mut self) -> Result<()> {
        self.expect_state("elevate", SessionState::Idle)?;
        if self.privilege.check_root_access() {
            return Ok(());
        }

        self.privilege.elevate()?;
        self.audit.record(
            SecurityEventType::PrivilegeElevated,
            format!(
                "effective uid 0 for uid={}",
                self.privilege.identity().real_uid()
            ),
        );
        Ok(())
    }

    /// Check privilege, validate `target`, and mount the plan under it.
    pub fn begin(&mut self, target: &Path) -> Result<()> {
        self.expect_state("begin", SessionState::Idle)?;

        // No filesystem access before this check.
        if !self.privilege.check_root_access() {
            return self.fail(IsolationError::InsufficientPrivilege);
        }

        let root = match validate_target(target) {
            Ok(root) => root,
            Err(e) => return self.fail(e),
        };
        self.audit.set_root(&root);
        self.audit.record(
            SecurityEventType::SessionStart,
            format!(
                "session for uid={} gid={}",
                self.privilege.identity().real_uid(),
                self.privilege.identity().real_gid()
            ),
        );

        let mut sandbox = SandboxRoot::new(root);
        let outcome = self.mounts.mount_all(sandbox.path());
        match outcome {
            Ok(done) => {
                sandbox.record_all(done);
                self.audit.record(
                    SecurityEventType::MountEstablished,
                    format!("{} filesystems mounted", sandbox.mounts_done().len()),
                );
                self.sandbox = Some(sandbox);
            }
            Err((err, done)) => {
                sandbox.record_all(done);
                self.audit
                    .record(SecurityEventType::MountFailed, err.to_string());
                self.sandbox = Some(sandbox);
                return self.fail(err.into());
            }
        }

        if self.config.motd {
            if let Some(root) = self.root() {
                if let Err(e) = write_motd(root) {
                    log::warn!("Failed to write MOTD under {}: {}", root.display(), e);
                }
            }
        }

        self.state = SessionState::MountsEstablished;
        Ok(())
    }

    /// chdir + chroot into the target, inside the jail process.
    pub fn enter_root(&mut self) -> Result<()> {
        self.expect_state("enter_root", SessionState::MountsEstablished)?;
        let Some(root) = self.root().map(Path::to_path_buf) else {
            let state = self.state;
            return self.fail(IsolationError::InvalidState {
                operation: "enter_root",
                state,
            });
        };

        if let Err(e) = self.jail.enter_root(&root) {
            return self.fail(e);
        }

        if let Some(sandbox) = self.sandbox.as_mut() {
            sandbox.mark_entered();
        }
        self.audit
            .record(SecurityEventType::RootEntered, root.display().to_string());
        self.state = SessionState::RootEntered;
        Ok(())
    }

    pub fn restrict_capabilities(&mut self) -> Result<()> {
        self.expect_state("restrict_capabilities", SessionState::RootEntered)?;

        if let Err(e) = self.jail.restrict() {
            self.audit
                .record(SecurityEventType::BoundaryFailed, e.to_string());
            return self.fail(e);
        }

        self.audit.record(
            SecurityEventType::BoundaryEstablished,
            "non-dumpable, no_new_privs, all capability sets empty",
        );
        self.state = SessionState::CapabilitiesRestricted;
        Ok(())
    }

    /// Run `command` to completion. A nonzero exit is a status, not an error.
    pub fn run_command(&mut self, command: &CommandLine) -> Result<ExitStatus> {
        self.expect_state("run_command", SessionState::CapabilitiesRestricted)?;

        let request = match ExecRequest::new(
            command,
            &self.config.shell,
            self.config.command_environment(),
        ) {
            Ok(request) => request,
            Err(e) => return self.fail(e.into()),
        };

        self.state = SessionState::CommandRunning;
        self.audit.record_command(
            SecurityEventType::CommandSpawned,
            "exec inside root",
            &command.to_string(),
        );

        match self.jail.exec(&request) {
            Ok(status) => {
                self.audit.record_command(
                    SecurityEventType::CommandExited,
                    status.to_string(),
                    &command.to_string(),
                );
                self.state = SessionState::Finalizing;
                Ok(status)
            }
            Err(e) => self.fail(e),
        }
    }

    /// `begin`, `enter_root`, `restrict_capabilities` and `run_command` in
    /// order. The caller still owns `close()`.
    pub fn execute(&mut self, target: &Path, command: &CommandLine) -> Result<ExitStatus> {
        self.begin(target)?;
        self.enter_root()?;
        self.restrict_capabilities()?;
        self.run_command(command)
    }

    /// Release everything the session acquired. Idempotent and infallible:
    /// residual failures are returned, not raised.
    pub fn close(&mut self) -> TeardownReport {
        let mut report = TeardownReport::default();
        if self.state == SessionState::Closed {
            return report;
        }
        self.state = SessionState::Finalizing;

        // The jail may pin the root; it goes before any unmount.
        if let Err(e) = self.jail.release() {
            log::warn!("Jail release failed: {}", e);
            report.jail_error = Some(e);
        }

        if let Some(mut sandbox) = self.sandbox.take() {
            let done = sandbox.take_mounts();
            report.unmount_errors = self.mounts.unmount_all(sandbox.path(), &done);
            for err in &report.unmount_errors {
                self.audit
                    .record(SecurityEventType::UnmountFailed, err.to_string());
            }
        }

        let was_elevated = self.privilege.state() == PrivilegeState::Elevated;
        match self.privilege.drop_privileges() {
            Ok(()) if was_elevated => self.audit.record(
                SecurityEventType::PrivilegeDropped,
                format!(
                    "restored uid={} gid={}",
                    self.privilege.identity().real_uid(),
                    self.privilege.identity().real_gid()
                ),
            ),
            Ok(()) => {}
            Err(e) => {
                self.audit
                    .record(SecurityEventType::PrivilegeDropFailed, e.to_string());
                report.privilege_error = Some(e);
            }
        }

        if report.is_clean() {
            self.audit
                .record(SecurityEventType::TeardownComplete, "all resources released");
        } else {
            self.audit.record(
                SecurityEventType::TeardownPartial,
                format!("{} residual errors", report.error_count()),
            );
        }

        self.state = SessionState::Closed;
        report
    }

    fn expect_state(&mut self, operation: &'static str, expected: SessionState) -> Result<()> {
        if self.state == expected {
            return Ok(());
        }
        let state = self.state;
        if state != SessionState::Closed {
            self.state = SessionState::Finalizing;
        }
        Err(IsolationError::InvalidState { operation, state })
    }

    fn fail<T>(&mut self, err: IsolationError) -> Result<T> {
        log::error!("Isolation session failed at {}: {}", err.stage(), err);
        self.state = SessionState::Finalizing;
        Err(err)
    }
}

impl Drop for IsolationSession {
    fn drop(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        log::warn!("Isolation session dropped in state {} without close()", self.state);
        let report = self.close();
        for line in report.messages() {
            log::warn!("Residual teardown error: {}", line);
        }
    }
}

/// The target must be an existing directory; its canonical form becomes the
/// root so trailing slashes and symlinks are resolved once, up front.
fn validate_target(target: &Path) -> Result<PathBuf> {
    let invalid = |reason: String| IsolationError::InvalidTarget {
        path: target.to_path_buf(),
        reason,
    };

    let root = target
        .canonicalize()
        .map_err(|e| invalid(e.to_string()))?;
    if !root.is_dir() {
        return Err(invalid("not a directory".to_string()));
    }
    if root == Path::new("/") {
        return Err(invalid("refusing to use the host root".to_string()));
    }
    Ok(root)
}

/// Write the banner to `<root>/etc/motd` if `<root>/etc` is a real directory.
fn write_motd(root: &Path) -> std::io::Result<()> {
    let etc = root.join("etc");
    match std::fs::symlink_metadata(&etc) {
        Ok(meta) if meta.is_dir() => {}
        _ => {
            log::debug!("No {} directory, skipping MOTD", etc.display());
            return Ok(());
        }
    }

    let mut motd = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o644)
        .custom_flags(libc::O_NOFOLLOW)
        .open(etc.join("motd"))?;
    write!(
        motd,
        "Welcome to the rootbox sandbox\n\
         ==============================\n\n\
         Root: {}\n\
         Architecture: {}\n\n\
         Exit the shell to tear the sandbox down.\n",
        root.display(),
        std::env::consts::ARCH
    )?;
    log::info!("Wrote MOTD to {}", etc.join("motd").display());
    Ok(())
}
