//! Identity capture and reversible privilege transitions.
//!
//! CRITICAL: a drop calls setgid before setgroups before setuid.

mod identity;
mod ops;
mod session;

pub use identity::IdentityRecord;
pub use ops::{CredentialOps, SystemCredentials};
pub use session::PrivilegeSession;
