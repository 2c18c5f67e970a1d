/// Teardown report
///
/// Teardown never fails; whatever could not be released is collected here.
use crate::config::types::{ExecutionError, MountError, PrivilegeError};

#[derive(Debug, Default)]
pub struct TeardownReport {
    pub jail_error: Option<ExecutionError>,
    pub unmount_errors: Vec<MountError>,
    pub privilege_error: Option<PrivilegeError>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.jail_error.is_none() && self.unmount_errors.is_empty() && self.privilege_error.is_none()
    }

    pub fn error_count(&self) -> usize {
        self.unmount_errors.len()
            + usize::from(self.jail_error.is_some())
            + usize::from(self.privilege_error.is_some())
    }

    /// One human-readable line per residual error, in teardown order.
    pub fn messages(&self) -> Vec<String> {
        let mut lines = Vec::with_capacity(self.error_count());
        if let Some(e) = &self.jail_error {
            lines.push(format!("jail release: {}", e));
        }
        for e in &self.unmount_errors {
            lines.push(e.to_string());
        }
        if let Some(e) = &self.privilege_error {
            lines.push(e.to_string());
        }
        lines
    }
}
