//! chainlog core
//!
//! Tamper-evident audit logging: an append-only NDJSON log whose entries are
//! linked by an HMAC-SHA256 hash chain.

pub mod audit;
pub mod config;

pub use audit::{
    AuditEntry, AuditError, AuditEvent, AuditLogger, AuditLoggerBuilder, ChainState,
    IntegrityKey, Result, VerifyReport,
};
pub use config::LoggerConfig;
