//! chainlog
//!
//! Command-line front end for the tamper-evident audit log in `chainlog-core`.

pub mod cli;
pub mod config;
pub mod logging;

// Re-export commonly used types
pub use chainlog_core::{
    AuditEntry, AuditError, AuditEvent, AuditLogger, LoggerConfig, Result, VerifyReport,
};
