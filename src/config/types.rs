/// Core types and error taxonomy for rootbox
use crate::kernel::mount::MountEntry;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Privilege state of a [`crate::kernel::credentials::PrivilegeSession`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrivilegeState {
    Unprivileged,
    Elevated,
}

impl fmt::Display for PrivilegeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unprivileged => write!(f, "unprivileged"),
            Self::Elevated => write!(f, "elevated"),
        }
    }
}

/// Isolation session lifecycle.
///
/// `Idle -> MountsEstablished -> RootEntered -> CapabilitiesRestricted ->
/// CommandRunning -> Finalizing -> Closed`. Any error jumps to `Finalizing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    MountsEstablished,
    RootEntered,
    CapabilitiesRestricted,
    CommandRunning,
    Finalizing,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::MountsEstablished => "mounts-established",
            Self::RootEntered => "root-entered",
            Self::CapabilitiesRestricted => "capabilities-restricted",
            Self::CommandRunning => "command-running",
            Self::Finalizing => "finalizing",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// How a reaped command terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitStatus {
    Exited(i32),
    Signaled(i32),
}

impl ExitStatus {
    pub fn success(&self) -> bool {
        matches!(self, Self::Exited(0))
    }

    /// Exit code for the command, `None` if it was killed by a signal.
    pub fn code(&self) -> Option<i32> {
        match self {
            Self::Exited(code) => Some(*code),
            Self::Signaled(_) => None,
        }
    }

    /// Shell convention: signals map to 128 + N.
    pub fn as_shell_code(&self) -> i32 {
        match self {
            Self::Exited(code) => *code,
            Self::Signaled(sig) => 128 + sig,
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exited with status {}", code),
            Self::Signaled(sig) => write!(f, "terminated by signal {}", sig),
        }
    }
}

/// Step of a privilege drop, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DropStage {
    Gid,
    Groups,
    Uid,
    Verify,
}

impl fmt::Display for DropStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gid => write!(f, "gid restore"),
            Self::Groups => write!(f, "supplementary group restore"),
            Self::Uid => write!(f, "uid restore"),
            Self::Verify => write!(f, "identity verification"),
        }
    }
}

#[derive(Error, Debug)]
pub enum PrivilegeError {
    #[error("elevation denied: {0}")]
    ElevationDenied(#[source] io::Error),

    #[error("privilege drop failed at {stage}: {cause}")]
    PrivilegeDropFailed { stage: DropStage, cause: String },

    #[error("failed to capture invoking identity: {0}")]
    IdentityCapture(#[source] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MountOperation {
    CreateDir,
    Mount,
    Unmount,
}

impl fmt::Display for MountOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateDir => write!(f, "create mount point for"),
            Self::Mount => write!(f, "mount"),
            Self::Unmount => write!(f, "unmount"),
        }
    }
}

/// A single mount-plan entry that could not be established or released.
#[derive(Error, Debug)]
#[error("{operation} {} at {}: {cause}", entry.source_type, target.display())]
pub struct MountError {
    pub entry: MountEntry,
    /// Absolute host path of the mount point
    pub target: PathBuf,
    pub operation: MountOperation,
    #[source]
    pub cause: io::Error,
}

/// Security boundary step applied by the capability stripper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoundaryStep {
    NonDumpable,
    NoNewPrivileges,
    BoundingSet,
    ClearCapabilities,
    Verify,
}

impl fmt::Display for BoundaryStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonDumpable => write!(f, "PR_SET_DUMPABLE"),
            Self::NoNewPrivileges => write!(f, "PR_SET_NO_NEW_PRIVS"),
            Self::BoundingSet => write!(f, "bounding set drop"),
            Self::ClearCapabilities => write!(f, "capset"),
            Self::Verify => write!(f, "boundary verification"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecurityError {
    #[error("security boundary not established ({step}): {cause}")]
    BoundaryNotEstablished { step: BoundaryStep, cause: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionError {
    #[error("failed to spawn command: {0}")]
    SpawnFailed(String),

    #[error("command line is empty")]
    EmptyCommand,

    #[error("failed to wait for command: {0}")]
    WaitFailed(String),

    #[error("jail protocol error: {0}")]
    JailProtocol(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RootTransitionStage {
    Fork,
    Chdir,
    Chroot,
}

impl fmt::Display for RootTransitionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fork => write!(f, "jail fork"),
            Self::Chdir => write!(f, "chdir"),
            Self::Chroot => write!(f, "chroot"),
        }
    }
}

/// Errors surfaced by [`crate::exec::session::IsolationSession`]
#[derive(Error, Debug)]
pub enum IsolationError {
    #[error("superuser privilege is required to start an isolation session")]
    InsufficientPrivilege,

    #[error("invalid target {}: {reason}", path.display())]
    InvalidTarget { path: PathBuf, reason: String },

    #[error(transparent)]
    Mount(#[from] MountError),

    #[error("root transition failed at {stage}: {cause}")]
    RootTransitionFailed {
        stage: RootTransitionStage,
        cause: String,
    },

    #[error(transparent)]
    Security(#[from] SecurityError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Privilege(#[from] PrivilegeError),

    #[error("{operation} is not valid in state {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },
}

impl IsolationError {
    /// Stage name used in the one-line CLI diagnostic.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::InsufficientPrivilege => "privilege check",
            Self::InvalidTarget { .. } => "target validation",
            Self::Mount(_) => "mount",
            Self::RootTransitionFailed { .. } => "root transition",
            Self::Security(_) => "capability boundary",
            Self::Execution(_) => "spawn",
            Self::Privilege(PrivilegeError::ElevationDenied(_)) => "elevation",
            Self::Privilege(PrivilegeError::IdentityCapture(_)) => "identity capture",
            Self::Privilege(_) => "privilege drop",
            Self::InvalidState { .. } => "session protocol",
        }
    }

    /// Every session error maps to exit code 1; the command's own status is
    /// reported separately.
    pub fn exit_code(&self) -> i32 {
        1
    }
}

/// Session configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, IsolationError>;
