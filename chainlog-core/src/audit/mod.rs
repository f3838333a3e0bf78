//! Tamper-Evident Audit Logging Module
//!
//! Provides an append-only, hash-chained audit log.
//!
//! ## Features
//! - NDJSON storage, one entry per line
//! - HMAC-SHA256 hash chain (`prevHash` / `hash`) when an integrity key is configured
//! - Age-based rotation that archives the file and starts a fresh chain
//! - Fail-closed writes: the chain head is re-verified whenever the file changed underneath us
//! - Async, strictly ordered writes through a single background writer

pub mod canonical;
pub mod chain;
pub mod entry;
pub mod logger;
pub mod retention;
pub mod storage;
pub mod verify;

pub use chain::{compute_hash, IntegrityKey, HASH_HEX_LEN};
pub use entry::{AuditEntry, AuditEvent, HASH_FIELD, PREV_HASH_FIELD, TIMESTAMP_FIELD};
pub use logger::{AuditLogger, AuditLoggerBuilder, ChainState};
pub use retention::{Clock, RotationTracker, SystemClock, ROTATION_CHECK_INTERVAL};
pub use storage::{FileLogStore, LogStore, MemoryLogStore};
pub use verify::{verify_store, VerifyReport};

/// Errors produced by the audit logger
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Integrity error at line {line}: {reason}")]
    Integrity { line: usize, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Audit writer is no longer running")]
    WriterClosed,
}

impl AuditError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        AuditError::Configuration(message.into())
    }

    pub(crate) fn integrity(line: usize, reason: impl Into<String>) -> Self {
        AuditError::Integrity {
            line,
            reason: reason.into(),
        }
    }

    pub fn is_integrity(&self) -> bool {
        matches!(self, AuditError::Integrity { .. })
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, AuditError::Configuration(_))
    }

    /// Line number (1-indexed) of the broken link, if this is an integrity failure
    pub fn integrity_line(&self) -> Option<usize> {
        match self {
            AuditError::Integrity { line, .. } => Some(*line),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, AuditError>;
