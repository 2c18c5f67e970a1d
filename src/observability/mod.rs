//! Observability
//!
//! Structured audit events for every security-relevant session transition.

pub mod audit;

pub use audit::{AuditTrail, SecurityEvent, SecurityEventType, SecuritySeverity};
