//! Safety and cleanup
//!
//! The mount ledger that teardown reads, and the report it produces.

pub mod report;
pub mod sandbox_root;

pub use report::TeardownReport;
pub use sandbox_root::SandboxRoot;
