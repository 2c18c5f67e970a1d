//! The jail process.
//!
//! A process that has chrooted and emptied its capability sets can no
//! longer unmount host paths or restore its groups. The session owner
//! therefore forks a jail child that enters the root, restricts itself and
//! finally execs the command, while the owner stays outside with its
//! privileges intact for teardown.
//!
//! The two sides talk over a pair of CLOEXEC pipes, one JSON message per
//! line. A successful exec closes the reply pipe, so EOF after `Exec`
//! means the command is running.

use super::command::ExecRequest;
use crate::config::types::{
    ExecutionError, ExitStatus, IsolationError, Result, RootTransitionStage, SecurityError,
};
use crate::kernel::capabilities::CapabilityStripper;
use crate::kernel::{fds, root};
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::signal::{self, SigHandler, Signal};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{execvp, fork, pipe2, ForkResult, Pid};
use serde::{Deserialize, Serialize};
use std::ffi::CString;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

/// Exit code of a jail whose exec failed, matching the shell convention.
pub const EXEC_FAILED_EXIT: i32 = 127;
const PROTOCOL_EXIT: i32 = 1;
const PANIC_EXIT: i32 = 101;

/// The process that crosses into the root on the session's behalf.
pub trait Jail {
    /// Start the jail and move it into `root`.
    fn enter_root(&mut self, root: &Path) -> Result<()>;
    /// Apply the capability boundary inside the jail.
    fn restrict(&mut self) -> Result<()>;
    /// Replace the jail with the command and wait for it.
    fn exec(&mut self, request: &ExecRequest) -> Result<ExitStatus>;
    /// Kill and reap a jail that is still alive. No-op otherwise.
    fn release(&mut self) -> std::result::Result<(), ExecutionError>;
    fn is_running(&self) -> bool;
}

#[derive(Debug, Serialize, Deserialize)]
enum JailRequest {
    EnterRoot { root: PathBuf },
    Restrict,
    Exec(ExecRequest),
}

#[derive(Debug, Serialize, Deserialize)]
enum JailReply {
    Done,
    RootFailed {
        stage: RootTransitionStage,
        cause: String,
    },
    BoundaryFailed(SecurityError),
    SpawnFailed(String),
    Protocol(String),
}

fn protocol_error(message: impl Into<String>) -> IsolationError {
    ExecutionError::JailProtocol(message.into()).into()
}

/// Jail backed by a forked child of the calling process.
///
/// Forking assumes the caller is single-threaded; do not hold locks across
/// [`Jail::enter_root`].
#[derive(Debug, Default)]
pub struct ForkedJail {
    child: Option<JailChild>,
}

impl ForkedJail {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pid(&self) -> Option<i32> {
        self.child.as_ref().map(|c| c.pid.as_raw())
    }

    fn round_trip(&mut self, request: &JailRequest) -> Result<JailReply> {
        let child = self
            .child
            .as_mut()
            .ok_or_else(|| protocol_error("jail is not running"))?;
        child.send(request)?;
        child
            .receive()?
            .ok_or_else(|| protocol_error("jail exited before replying"))
    }
}

impl Jail for ForkedJail {
    fn enter_root(&mut self, root: &Path) -> Result<()> {
        if self.child.is_some() {
            return Err(protocol_error("jail is already running"));
        }

        let child = JailChild::spawn().map_err(|e| IsolationError::RootTransitionFailed {
            stage: RootTransitionStage::Fork,
            cause: e.desc().to_string(),
        })?;
        log::debug!("Forked jail process {}", child.pid);
        self.child = Some(child);

        match self.round_trip(&JailRequest::EnterRoot {
            root: root.to_path_buf(),
        })? {
            JailReply::Done => Ok(()),
            JailReply::RootFailed { stage, cause } => {
                Err(IsolationError::RootTransitionFailed { stage, cause })
            }
            other => Err(protocol_error(format!("unexpected reply {:?}", other))),
        }
    }

    fn restrict(&mut self) -> Result<()> {
        match self.round_trip(&JailRequest::Restrict)? {
            JailReply::Done => Ok(()),
            JailReply::BoundaryFailed(e) => Err(e.into()),
            other => Err(protocol_error(format!("unexpected reply {:?}", other))),
        }
    }

    fn exec(&mut self, request: &ExecRequest) -> Result<ExitStatus> {
        let mut child = self
            .child
            .take()
            .ok_or_else(|| protocol_error("jail is not running"))?;

        let _interrupts = IgnoreInterrupts::install();
        if let Err(e) = child.send(&JailRequest::Exec(request.clone())) {
            self.child = Some(child);
            return Err(e.into());
        }

        match child.receive() {
            // CLOEXEC closed the reply pipe: the command is running.
            Ok(None) => Ok(child.wait()?),
            Ok(Some(JailReply::SpawnFailed(cause))) => {
                child.wait()?;
                Err(ExecutionError::SpawnFailed(cause).into())
            }
            Ok(Some(other)) => {
                self.child = Some(child);
                Err(protocol_error(format!("unexpected reply {:?}", other)))
            }
            Err(e) => {
                self.child = Some(child);
                Err(e.into())
            }
        }
    }

    fn release(&mut self) -> std::result::Result<(), ExecutionError> {
        let Some(child) = self.child.take() else {
            return Ok(());
        };
        child.kill();
        let status = child.wait()?;
        log::debug!("Released jail process {}: {}", child.pid, status);
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.child.is_some()
    }
}

impl Drop for ForkedJail {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            log::warn!("Failed to release jail process: {}", e);
        }
    }
}

#[derive(Debug)]
struct JailChild {
    pid: Pid,
    requests: File,
    replies: BufReader<File>,
}

impl JailChild {
    fn spawn() -> nix::Result<Self> {
        let (request_read, request_write) = pipe2(OFlag::O_CLOEXEC)?;
        let (reply_read, reply_write) = pipe2(OFlag::O_CLOEXEC)?;

        // SAFETY: the child only runs jail_main, which never returns into
        // the caller's stack; it leaves through _exit so no destructor of
        // the parent's state runs twice.
        match unsafe { fork() }? {
            ForkResult::Child => {
                drop(request_write);
                drop(reply_read);
                let code = panic::catch_unwind(AssertUnwindSafe(|| {
                    jail_main(File::from(request_read), File::from(reply_write))
                }))
                .unwrap_or(PANIC_EXIT);
                // SAFETY: _exit skips atexit handlers and stdio flushing that
                // belong to the parent.
                unsafe { libc::_exit(code) }
            }
            ForkResult::Parent { child } => Ok(Self {
                pid: child,
                requests: File::from(request_write),
                replies: BufReader::new(File::from(reply_read)),
            }),
        }
    }

    fn send(&mut self, request: &JailRequest) -> std::result::Result<(), ExecutionError> {
        write_message(&mut self.requests, request)
    }

    /// `None` on EOF.
    fn receive(&mut self) -> std::result::Result<Option<JailReply>, ExecutionError> {
        read_message(&mut self.replies)
    }

    fn kill(&self) {
        match signal::kill(self.pid, Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => log::warn!("Failed to kill jail process {}: {}", self.pid, e),
        }
    }

    fn wait(&self) -> std::result::Result<ExitStatus, ExecutionError> {
        loop {
            match waitpid(self.pid, None) {
                Ok(WaitStatus::Exited(_, code)) => return Ok(ExitStatus::Exited(code)),
                Ok(WaitStatus::Signaled(_, sig, _)) => return Ok(ExitStatus::Signaled(sig as i32)),
                Ok(_) => continue,
                Err(Errno::EINTR) => continue,
                Err(e) => {
                    return Err(ExecutionError::WaitFailed(format!(
                        "waitpid({}): {}",
                        self.pid, e
                    )))
                }
            }
        }
    }
}

fn write_message<T: Serialize>(
    writer: &mut impl Write,
    message: &T,
) -> std::result::Result<(), ExecutionError> {
    let mut line = serde_json::to_string(message)
        .map_err(|e| ExecutionError::JailProtocol(format!("failed to encode message: {}", e)))?;
    line.push('\n');
    writer
        .write_all(line.as_bytes())
        .and_then(|_| writer.flush())
        .map_err(|e| ExecutionError::JailProtocol(format!("failed to write message: {}", e)))
}

fn read_message<T: for<'de> Deserialize<'de>>(
    reader: &mut impl BufRead,
) -> std::result::Result<Option<T>, ExecutionError> {
    let mut line = String::new();
    let read = reader
        .read_line(&mut line)
        .map_err(|e| ExecutionError::JailProtocol(format!("failed to read message: {}", e)))?;
    if read == 0 {
        return Ok(None);
    }
    serde_json::from_str(line.trim_end())
        .map(Some)
        .map_err(|e| ExecutionError::JailProtocol(format!("failed to decode message: {}", e)))
}

/// Body of the jail child. Serves requests until EOF or exec.
fn jail_main(requests: File, mut replies: File) -> i32 {
    // SAFETY: PR_SET_PDEATHSIG only affects the calling process.
    unsafe {
        libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL as libc::c_ulong, 0, 0, 0);
    }

    let mut requests = BufReader::new(requests);
    loop {
        let request: JailRequest = match read_message(&mut requests) {
            Ok(Some(request)) => request,
            Ok(None) => return 0,
            Err(e) => {
                let _ = write_message(&mut replies, &JailReply::Protocol(e.to_string()));
                return PROTOCOL_EXIT;
            }
        };

        let reply = match request {
            JailRequest::EnterRoot { root } => match root::enter_root(&root) {
                Ok(()) => JailReply::Done,
                Err(IsolationError::RootTransitionFailed { stage, cause }) => {
                    JailReply::RootFailed { stage, cause }
                }
                Err(other) => JailReply::RootFailed {
                    stage: RootTransitionStage::Chroot,
                    cause: other.to_string(),
                },
            },
            JailRequest::Restrict => match CapabilityStripper::restrict_process() {
                Ok(()) => JailReply::Done,
                Err(e) => JailReply::BoundaryFailed(e),
            },
            JailRequest::Exec(request) => {
                let cause = exec_command(&request);
                let _ = write_message(&mut replies, &JailReply::SpawnFailed(cause));
                return EXEC_FAILED_EXIT;
            }
        };

        if write_message(&mut replies, &reply).is_err() {
            return PROTOCOL_EXIT;
        }
    }
}

/// Replace the process image. Only returns on failure, with the reason.
fn exec_command(request: &ExecRequest) -> String {
    let argv: Vec<CString> = match request
        .argv
        .iter()
        .map(|arg| CString::new(arg.as_str()))
        .collect::<std::result::Result<_, _>>()
    {
        Ok(argv) => argv,
        Err(e) => return e.to_string(),
    };
    let Some(program) = argv.first() else {
        return ExecutionError::EmptyCommand.to_string();
    };

    // Nothing the owner left open may follow the command into the root.
    if let Err(e) = fds::mark_inherited_cloexec() {
        return format!("failed to seal inherited descriptors: {}", e);
    }

    for (key, _) in std::env::vars_os() {
        std::env::remove_var(key);
    }
    for (key, value) in &request.env {
        std::env::set_var(key, value);
    }

    match execvp(program, &argv) {
        Ok(never) => match never {},
        Err(e) => format!("{}: {}", request.program(), e.desc()),
    }
}

/// Like system(3), the owner ignores terminal interrupts while the command
/// runs; the command itself keeps default dispositions.
struct IgnoreInterrupts {
    previous: Vec<(Signal, SigHandler)>,
}

impl IgnoreInterrupts {
    fn install() -> Self {
        let mut previous = Vec::new();
        for sig in [Signal::SIGINT, Signal::SIGQUIT] {
            // SAFETY: SIG_IGN installs no handler code.
            match unsafe { signal::signal(sig, SigHandler::SigIgn) } {
                Ok(old) => previous.push((sig, old)),
                Err(e) => log::warn!("Failed to ignore {}: {}", sig, e),
            }
        }
        Self { previous }
    }
}

impl Drop for IgnoreInterrupts {
    fn drop(&mut self) {
        for (sig, handler) in self.previous.drain(..) {
            // SAFETY: restores the disposition that was active before install.
            if let Err(e) = unsafe { signal::signal(sig, handler) } {
                log::warn!("Failed to restore {}: {}", sig, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn messages_are_one_json_line_each() {
        let mut buffer = Vec::new();
        write_message(&mut buffer, &JailRequest::Restrict).unwrap();
        write_message(
            &mut buffer,
            &JailRequest::EnterRoot {
                root: PathBuf::from("/srv/jail"),
            },
        )
        .unwrap();

        let text = String::from_utf8(buffer.clone()).unwrap();
        assert_eq!(text.lines().count(), 2);

        let mut reader = Cursor::new(buffer);
        let first: JailRequest = read_message(&mut reader).unwrap().unwrap();
        assert!(matches!(first, JailRequest::Restrict));
        let second: JailRequest = read_message(&mut reader).unwrap().unwrap();
        assert!(matches!(second, JailRequest::EnterRoot { .. }));
        let end: Option<JailRequest> = read_message(&mut reader).unwrap();
        assert!(end.is_none());
    }

    #[test]
    fn garbage_is_a_protocol_error() {
        let mut reader = Cursor::new(b"not json\n".to_vec());
        let result: std::result::Result<Option<JailReply>, _> = read_message(&mut reader);
        assert!(matches!(result, Err(ExecutionError::JailProtocol(_))));
    }

    #[test]
    fn unstarted_jail_rejects_requests() {
        let mut jail = ForkedJail::new();
        assert!(!jail.is_running());
        assert!(matches!(
            jail.restrict(),
            Err(IsolationError::Execution(ExecutionError::JailProtocol(_)))
        ));
        assert!(jail.release().is_ok());
    }

    #[test]
    fn command_cannot_reach_descriptors_the_owner_left_open() {
        if !Path::new("/bin/sh").exists() {
            eprintln!("Skipping: no /bin/sh");
            return;
        }
        let host = tempfile::tempdir().unwrap();
        let dir = CString::new(host.path().to_str().unwrap()).unwrap();
        // SAFETY: plain open without O_CLOEXEC, the way a wrapper shell
        // would leave a descriptor behind.
        let leaked = unsafe { libc::open(dir.as_ptr(), libc::O_RDONLY | libc::O_DIRECTORY) };
        assert!(leaked > 2);

        let mut jail = ForkedJail::new();
        // Chrooting to / is refused without root; the jail keeps serving
        // either way.
        let _ = jail.enter_root(Path::new("/"));
        let request = ExecRequest {
            argv: vec![
                "/bin/sh".to_string(),
                "-c".to_string(),
                format!("test -e /proc/self/fd/{} && exit 1; exit 0", leaked),
            ],
            env: vec![("PATH".to_string(), "/usr/bin:/bin".to_string())],
        };
        let status = jail.exec(&request);

        // SAFETY: closes the descriptor opened above.
        unsafe { libc::close(leaked) };
        assert_eq!(status.unwrap(), ExitStatus::Exited(0));
    }

    #[test]
    fn jail_reports_a_missing_root_and_can_be_released() {
        let mut jail = ForkedJail::new();
        let err = jail
            .enter_root(Path::new("/nonexistent/rootbox-jail"))
            .unwrap_err();

        assert!(matches!(
            err,
            IsolationError::RootTransitionFailed {
                stage: RootTransitionStage::Chdir,
                ..
            }
        ));
        assert!(jail.is_running());
        assert!(jail.release().is_ok());
        assert!(!jail.is_running());
    }
}
