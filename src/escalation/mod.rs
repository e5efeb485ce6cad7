//! Forensic escalation of critical failures.
//!
//! The dispatcher hands a failure summary to [`EscalationHook::spawn_notify`]
//! and returns to its caller immediately. Outcomes arrive later as
//! [`EscalationReport`]s on the channel returned at construction.

pub mod hook;

pub use hook::{EscalationHook, EscalationReport, ForensicAnalysis};
