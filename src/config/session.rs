/// Session configuration loading from JSON
use crate::config::types::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Default interactive shell when no command is given
pub const DEFAULT_SHELL: &str = "/bin/sh";

/// PATH handed to the command when the environment is cleared
pub const DEFAULT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// How a command line reaches the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecMode {
    /// argv is passed to execvp unchanged
    #[default]
    Direct,
    /// the joined line is handed to `<shell> -c`
    Shell,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Target directory that becomes the new root
    pub root: Option<PathBuf>,
    pub exec_mode: ExecMode,
    pub shell: PathBuf,
    /// Detach busy mounts instead of reporting them
    pub lazy_unmount: bool,
    /// Write a banner to `<root>/etc/motd` once the mounts are in place
    pub motd: bool,
    /// Extra variables for the command
    pub environment: BTreeMap<String, String>,
    /// Start the command from PATH, HOME=/ and TERM only
    pub clear_environment: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            root: None,
            exec_mode: ExecMode::Direct,
            shell: PathBuf::from(DEFAULT_SHELL),
            lazy_unmount: false,
            motd: false,
            environment: BTreeMap::new(),
            clear_environment: false,
        }
    }
}

impl SessionConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        log::debug!("Loaded session config from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(root) = &self.root {
            if !root.is_absolute() {
                return Err(ConfigError::Invalid(format!(
                    "root must be an absolute path, got {}",
                    root.display()
                )));
            }
            reject_nul("root", &root.to_string_lossy())?;
        }

        if self.shell.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("shell path is empty".to_string()));
        }
        reject_nul("shell", &self.shell.to_string_lossy())?;

        for (key, value) in &self.environment {
            if key.is_empty() || key.contains('=') {
                return Err(ConfigError::Invalid(format!(
                    "invalid environment variable name {:?}",
                    key
                )));
            }
            reject_nul("environment name", key)?;
            reject_nul("environment value", value)?;
        }

        Ok(())
    }

    /// Environment the command starts with, built from the caller's own
    /// variables unless `clear_environment` is set.
    pub fn command_environment(&self) -> Vec<(String, String)> {
        let mut env: BTreeMap<String, String> = if self.clear_environment {
            let mut base = BTreeMap::new();
            base.insert(
                "PATH".to_string(),
                std::env::var("PATH").unwrap_or_else(|_| DEFAULT_PATH.to_string()),
            );
            base.insert("HOME".to_string(), "/".to_string());
            if let Ok(term) = std::env::var("TERM") {
                base.insert("TERM".to_string(), term);
            }
            base
        } else {
            std::env::vars().collect()
        };

        for (key, value) in &self.environment {
            env.insert(key.clone(), value.clone());
        }

        env.into_iter().collect()
    }
}

fn reject_nul(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.contains('\0') {
        return Err(ConfigError::Invalid(format!("{} contains a NUL byte", field)));
    }
    Ok(())
}
