/// Security event logging for rootbox sessions
///
/// Every security-relevant transition of a session is emitted as one JSON
/// line through the `log` facade under the `rootbox::audit` target, so it can
/// be filtered with `RUST_LOG=rootbox::audit=info`.
use chrono::{DateTime, Utc};
use log::Level;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub const AUDIT_TARGET: &str = "rootbox::audit";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecuritySeverity {
    Critical,
    High,
    Medium,
    Low,
}

impl SecuritySeverity {
    fn log_level(self) -> Level {
        match self {
            Self::Critical | Self::High => Level::Error,
            Self::Medium => Level::Warn,
            Self::Low => Level::Info,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecurityEventType {
    SessionStart,
    PrivilegeElevated,
    PrivilegeDropped,
    PrivilegeDropFailed,
    MountEstablished,
    MountFailed,
    UnmountFailed,
    RootEntered,
    BoundaryEstablished,
    BoundaryFailed,
    CommandSpawned,
    CommandExited,
    TeardownComplete,
    TeardownPartial,
}

impl SecurityEventType {
    pub fn default_severity(&self) -> SecuritySeverity {
        match self {
            Self::SessionStart
            | Self::PrivilegeElevated
            | Self::PrivilegeDropped
            | Self::MountEstablished
            | Self::RootEntered
            | Self::BoundaryEstablished
            | Self::CommandSpawned
            | Self::CommandExited
            | Self::TeardownComplete => SecuritySeverity::Low,
            Self::MountFailed => SecuritySeverity::Medium,
            Self::UnmountFailed | Self::TeardownPartial => SecuritySeverity::High,
            Self::PrivilegeDropFailed | Self::BoundaryFailed => SecuritySeverity::Critical,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub session_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event_type: SecurityEventType,
    pub severity: SecuritySeverity,
    pub details: String,
    pub root: Option<PathBuf>,
    pub command: Option<String>,
    pub process_id: u32,
}

/// Per-session audit trail. Keeps the events it emitted for inspection.
#[derive(Debug)]
pub struct AuditTrail {
    session_id: Uuid,
    root: Option<PathBuf>,
    events: Vec<SecurityEvent>,
}

impl Default for AuditTrail {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditTrail {
    pub fn new() -> Self {
        Self {
            session_id: Uuid::new_v4(),
            root: None,
            events: Vec::new(),
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Attach the sandbox root to every later event.
    pub fn set_root(&mut self, root: &Path) {
        self.root = Some(root.to_path_buf());
    }

    pub fn record(&mut self, event_type: SecurityEventType, details: impl Into<String>) {
        self.emit(event_type, details.into(), None);
    }

    pub fn record_command(
        &mut self,
        event_type: SecurityEventType,
        details: impl Into<String>,
        command: &str,
    ) {
        self.emit(event_type, details.into(), Some(command.to_string()));
    }

    pub fn events(&self) -> &[SecurityEvent] {
        &self.events
    }

    pub fn has(&self, event_type: SecurityEventType) -> bool {
        self.events.iter().any(|e| e.event_type == event_type)
    }

    fn emit(&mut self, event_type: SecurityEventType, details: String, command: Option<String>) {
        let event = SecurityEvent {
            session_id: self.session_id,
            timestamp: Utc::now(),
            event_type,
            severity: event_type.default_severity(),
            details,
            root: self.root.clone(),
            command,
            process_id: std::process::id(),
        };

        match serde_json::to_string(&event) {
            Ok(line) => log::log!(target: AUDIT_TARGET, event.severity.log_level(), "{}", line),
            Err(e) => log::error!(
                target: AUDIT_TARGET,
                "Failed to serialize security event {:?}: {}",
                event.event_type,
                e
            ),
        }

        self.events.push(event);
    }
}
