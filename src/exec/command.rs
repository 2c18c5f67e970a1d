use crate::config::session::ExecMode;
use crate::config::types::ExecutionError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// What to run inside the root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandLine {
    /// Passed to execvp as-is; no shell parsing
    Argv(Vec<String>),
    /// Run as `<shell> -c <line>`; only on explicit request
    Shell(String),
}

impl CommandLine {
    /// Build a command line from CLI words according to `mode`.
    pub fn from_words(words: Vec<String>, mode: ExecMode) -> Self {
        match mode {
            ExecMode::Direct => Self::Argv(words),
            ExecMode::Shell => Self::Shell(words.join(" ")),
        }
    }

    /// The configured shell on its own, interactive when stdin is a terminal.
    pub fn interactive_shell(shell: &Path) -> Self {
        Self::Argv(vec![shell.to_string_lossy().into_owned()])
    }

    /// Final argument vector; `argv[0]` is looked up through PATH.
    pub fn to_argv(&self, shell: &Path) -> Result<Vec<String>, ExecutionError> {
        let argv = match self {
            Self::Argv(words) => {
                if words.first().map_or(true, |w| w.is_empty()) {
                    return Err(ExecutionError::EmptyCommand);
                }
                words.clone()
            }
            Self::Shell(line) => {
                if line.trim().is_empty() {
                    return Err(ExecutionError::EmptyCommand);
                }
                vec![
                    shell.to_string_lossy().into_owned(),
                    "-c".to_string(),
                    line.clone(),
                ]
            }
        };

        if argv.iter().any(|arg| arg.contains('\0')) {
            return Err(ExecutionError::SpawnFailed(
                "argument contains a NUL byte".to_string(),
            ));
        }
        Ok(argv)
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Argv(words) => f.write_str(&words.join(" ")),
            Self::Shell(line) => write!(f, "sh -c {:?}", line),
        }
    }
}

/// Everything the jail needs to exec the command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecRequest {
    pub argv: Vec<String>,
    /// Complete environment; the jail replaces its own with this
    pub env: Vec<(String, String)>,
}

impl ExecRequest {
    pub fn new(
        command: &CommandLine,
        shell: &Path,
        env: Vec<(String, String)>,
    ) -> Result<Self, ExecutionError> {
        Ok(Self {
            argv: command.to_argv(shell)?,
            env,
        })
    }

    pub fn program(&self) -> &str {
        self.argv.first().map(String::as_str).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SH: &str = "/bin/sh";

    #[test]
    fn argv_is_passed_through_untouched() {
        let cmd = CommandLine::Argv(vec!["echo".into(), "a b".into(), "$HOME".into()]);
        assert_eq!(
            cmd.to_argv(Path::new(SH)).unwrap(),
            vec!["echo", "a b", "$HOME"]
        );
    }

    #[test]
    fn shell_mode_wraps_the_line_in_dash_c() {
        let cmd = CommandLine::from_words(vec!["ls".into(), "-l".into(), "/".into()], ExecMode::Shell);
        assert_eq!(cmd, CommandLine::Shell("ls -l /".into()));
        assert_eq!(
            cmd.to_argv(Path::new("/bin/bash")).unwrap(),
            vec!["/bin/bash", "-c", "ls -l /"]
        );
    }

    #[test]
    fn empty_commands_are_rejected() {
        assert_eq!(
            CommandLine::Argv(vec![]).to_argv(Path::new(SH)),
            Err(ExecutionError::EmptyCommand)
        );
        assert_eq!(
            CommandLine::Argv(vec![String::new()]).to_argv(Path::new(SH)),
            Err(ExecutionError::EmptyCommand)
        );
        assert_eq!(
            CommandLine::Shell("   ".into()).to_argv(Path::new(SH)),
            Err(ExecutionError::EmptyCommand)
        );
    }

    #[test]
    fn nul_bytes_never_reach_exec() {
        let cmd = CommandLine::Argv(vec!["echo".into(), "a\0b".into()]);
        assert!(matches!(
            cmd.to_argv(Path::new(SH)),
            Err(ExecutionError::SpawnFailed(_))
        ));
    }

    #[test]
    fn interactive_shell_runs_the_configured_shell() {
        let request =
            ExecRequest::new(&CommandLine::interactive_shell(Path::new(SH)), Path::new(SH), vec![])
                .unwrap();
        assert_eq!(request.program(), SH);
        assert_eq!(request.argv.len(), 1);
    }
}
