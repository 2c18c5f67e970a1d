//! Configuration
//!
//! Shared types, the error taxonomy, and the JSON session configuration.

pub mod session;
pub mod types;

pub use session::{ExecMode, SessionConfig};
