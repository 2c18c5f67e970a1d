//! Execution control
//!
//! The isolation session, the jail process it drives, and the command lines
//! the jail executes.

pub mod command;
pub mod jail;
pub mod session;

pub use command::{CommandLine, ExecRequest};
pub use jail::{ForkedJail, Jail};
pub use session::IsolationSession;
