//! Audit Logger Implementation
//!
//! Every `record` call is funnelled through one bounded queue into a single
//! background writer. The writer owns the chain-head cache and applies
//! requests strictly in arrival order; each caller gets its own result back
//! over a oneshot channel, so one failed write never affects the next.

use chrono::SecondsFormat;
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::chain::{compute_hash, IntegrityKey};
use super::entry::{AuditEntry, AuditEvent, HASH_FIELD, PREV_HASH_FIELD, TIMESTAMP_FIELD};
use super::retention::{rotate_if_expired, Clock, RotationTracker, SystemClock};
use super::storage::{FileLogStore, LogStore};
use super::verify::{parse_entries, verify_store, VerifyReport};
use super::{AuditError, Result};
use crate::config::LoggerConfig;

/// Cached view of the chain head for one log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainState {
    pub last_hash: Option<String>,
    pub line_count: usize,
    /// Modification time observed when the cache was last refreshed
    pub mtime: Option<SystemTime>,
}

impl From<VerifyReport> for ChainState {
    fn from(report: VerifyReport) -> Self {
        Self {
            last_hash: report.last_hash,
            line_count: report.lines,
            mtime: report.mtime,
        }
    }
}

enum Request {
    Record {
        fields: Map<String, Value>,
        reply: oneshot::Sender<Result<AuditEntry>>,
    },
    ChainState {
        reply: oneshot::Sender<Option<ChainState>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

struct Shared {
    store: Arc<dyn LogStore>,
    integrity_key: Option<IntegrityKey>,
}

/// Handle to a tamper-evident audit log.
///
/// Cloning is cheap; all clones feed the same writer.
#[derive(Clone)]
pub struct AuditLogger {
    shared: Arc<Shared>,
    sender: mpsc::Sender<Request>,
}

impl std::fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogger")
            .field("log_path", &self.log_path())
            .field("integrity", &self.integrity_enabled())
            .finish()
    }
}

impl AuditLogger {
    /// Create a file-backed logger. Must be called inside a Tokio runtime.
    pub fn new(config: LoggerConfig) -> Result<Self> {
        AuditLoggerBuilder::new(config).build()
    }

    pub fn builder(config: LoggerConfig) -> AuditLoggerBuilder {
        AuditLoggerBuilder::new(config)
    }

    pub fn log_path(&self) -> &Path {
        self.shared.store.path()
    }

    pub fn integrity_enabled(&self) -> bool {
        self.shared.integrity_key.is_some()
    }

    /// Append one event and return it exactly as persisted
    pub async fn record(&self, event: AuditEvent) -> Result<AuditEntry> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(Request::Record {
                fields: event.into_fields(),
                reply,
            })
            .await
            .map_err(|_| AuditError::WriterClosed)?;

        response.await.map_err(|_| AuditError::WriterClosed)?
    }

    /// Append a raw JSON value; anything but an object is rejected
    pub async fn record_value(&self, value: Value) -> Result<AuditEntry> {
        self.record(AuditEvent::from_value(value)?).await
    }

    /// Append any value that serializes to a JSON object
    pub async fn record_serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<AuditEntry> {
        self.record(AuditEvent::from_serialize(value)?).await
    }

    /// Verify the whole chain. Requires an integrity key.
    pub async fn verify(&self) -> Result<VerifyReport> {
        let key = self.shared.integrity_key.as_ref().ok_or_else(|| {
            AuditError::config("verify() requires an integrity key")
        })?;

        verify_store(self.shared.store.as_ref(), key)
            .await
            .map_err(|e| {
                if let AuditError::Integrity { line, reason } = &e {
                    error!(
                        target: "audit",
                        path = %self.log_path().display(),
                        line,
                        reason = %reason,
                        "Audit chain verification failed"
                    );
                }
                e
            })
    }

    /// Read every entry of the current log without checking the chain
    pub async fn entries(&self) -> Result<Vec<AuditEntry>> {
        match self.shared.store.read_all().await? {
            Some(content) => parse_entries(&content),
            None => Ok(Vec::new()),
        }
    }

    /// Snapshot of the writer's cached chain head, taken after all writes
    /// queued before this call
    pub async fn chain_state(&self) -> Result<Option<ChainState>> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(Request::ChainState { reply })
            .await
            .map_err(|_| AuditError::WriterClosed)?;
        response.await.map_err(|_| AuditError::WriterClosed)
    }

    /// Finish queued writes and stop the background writer. Later calls on
    /// any clone fail with `WriterClosed`.
    pub async fn close(&self) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(Request::Shutdown { reply })
            .await
            .map_err(|_| AuditError::WriterClosed)?;
        response.await.map_err(|_| AuditError::WriterClosed)
    }
}

/// Builder for creating audit loggers
pub struct AuditLoggerBuilder {
    config: LoggerConfig,
    store: Option<Arc<dyn LogStore>>,
    clock: Option<Arc<dyn Clock>>,
    tracker: Option<Arc<RotationTracker>>,
}

impl AuditLoggerBuilder {
    pub fn new(config: LoggerConfig) -> Self {
        Self {
            config,
            store: None,
            clock: None,
            tracker: None,
        }
    }

    /// Use a custom storage backend instead of the log file
    pub fn store<S: LogStore + 'static>(mut self, store: S) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    pub fn clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    /// Share a rotation cooldown tracker with other loggers
    pub fn rotation_tracker(mut self, tracker: Arc<RotationTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    /// Validate the configuration and start the background writer
    pub fn build(self) -> Result<AuditLogger> {
        let log_path = self.config.resolved_log_path()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            AuditError::config("AuditLogger must be created inside a Tokio runtime")
        })?;

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(FileLogStore::new(log_path)));
        let integrity_key = self.config.integrity_key();

        let writer = ChainWriter {
            store: Arc::clone(&store),
            integrity_key: integrity_key.clone(),
            retention_days: self.config.retention_days,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            tracker: self.tracker.unwrap_or_default(),
            trace_entries: self.config.trace_entries,
            chain: None,
            appended: 0,
        };

        let (sender, receiver) = mpsc::channel(self.config.queue_capacity.max(1));
        runtime.spawn(writer.run(receiver));

        info!(
            target: "audit",
            path = %store.path().display(),
            integrity = integrity_key.is_some(),
            "Audit logger started"
        );

        Ok(AuditLogger {
            shared: Arc::new(Shared {
                store,
                integrity_key,
            }),
            sender,
        })
    }
}

/// Background writer; sole owner of the chain-head cache
struct ChainWriter {
    store: Arc<dyn LogStore>,
    integrity_key: Option<IntegrityKey>,
    retention_days: f64,
    clock: Arc<dyn Clock>,
    tracker: Arc<RotationTracker>,
    trace_entries: bool,
    chain: Option<ChainState>,
    appended: u64,
}

impl ChainWriter {
    async fn run(mut self, mut receiver: mpsc::Receiver<Request>) {
        debug!(target: "audit", "Audit logger background writer started");

        while let Some(request) = receiver.recv().await {
            match request {
                Request::Record { fields, reply } => {
                    let result = self.write(fields).await;
                    if let Err(e) = &result {
                        warn!(
                            target: "audit",
                            path = %self.store.path().display(),
                            error = %e,
                            "Audit write failed"
                        );
                    }
                    // The caller may have given up waiting; the write stands either way
                    let _ = reply.send(result);
                }
                Request::ChainState { reply } => {
                    let _ = reply.send(self.chain.clone());
                }
                Request::Shutdown { reply } => {
                    receiver.close();
                    let _ = reply.send(());
                    break;
                }
            }
        }

        debug!(
            target: "audit",
            appended = self.appended,
            "Audit logger background writer stopped"
        );
    }

    async fn write(&mut self, mut fields: Map<String, Value>) -> Result<AuditEntry> {
        if rotate_if_expired(
            self.store.as_ref(),
            self.retention_days,
            self.clock.as_ref(),
            &self.tracker,
        )
        .await?
        .is_some()
        {
            self.chain = None;
        }

        let timestamp = self.clock.now().to_rfc3339_opts(SecondsFormat::Millis, true);
        fields.insert(TIMESTAMP_FIELD.to_string(), Value::String(timestamp));

        let key = self.integrity_key.clone();
        if let Some(key) = &key {
            let prev_hash = self.resolve_chain_head(key).await?;
            fields.remove(HASH_FIELD);
            fields.insert(
                PREV_HASH_FIELD.to_string(),
                prev_hash.map_or(Value::Null, Value::String),
            );
            let hash = compute_hash(&fields, key)?;
            fields.insert(HASH_FIELD.to_string(), Value::String(hash));
        }

        let entry = AuditEntry::from_fields(fields);
        self.store.append_line(&entry.to_line()).await?;
        self.appended += 1;

        if key.is_some() {
            self.advance_chain(&entry).await;
        }

        if self.trace_entries {
            debug!(
                target: "audit",
                seq = self.appended,
                line = self.chain.as_ref().map(|c| c.line_count),
                hash = entry.hash().map(|h| &h[..h.len().min(12)]),
                "Appended audit entry"
            );
        }

        Ok(entry)
    }

    /// Make sure the cache holds the true chain head, re-verifying the whole
    /// log when it is missing or the file changed since we last looked.
    async fn resolve_chain_head(&mut self, key: &IntegrityKey) -> Result<Option<String>> {
        let mtime = self.store.modified().await?;
        if let Some(state) = &self.chain {
            if state.mtime == mtime {
                return Ok(state.last_hash.clone());
            }
            info!(
                target: "audit",
                path = %self.store.path().display(),
                "Audit log changed since last write, re-verifying chain"
            );
        }

        let report = verify_store(self.store.as_ref(), key).await.map_err(|e| {
            if let AuditError::Integrity { line, reason } = &e {
                error!(
                    target: "audit",
                    path = %self.store.path().display(),
                    line,
                    reason = %reason,
                    "Refusing to write: audit chain is broken"
                );
            }
            e
        })?;

        debug!(
            target: "audit",
            lines = report.lines,
            "Recovered audit chain head"
        );
        let state = ChainState::from(report);
        let head = state.last_hash.clone();
        self.chain = Some(state);
        Ok(head)
    }

    async fn advance_chain(&mut self, entry: &AuditEntry) {
        let line_count = self.chain.as_ref().map_or(0, |c| c.line_count) + 1;
        match self.store.modified().await {
            Ok(mtime) => {
                self.chain = Some(ChainState {
                    last_hash: entry.hash().map(str::to_string),
                    line_count,
                    mtime,
                });
            }
            Err(e) => {
                // The entry is on disk; force a re-verify before the next write
                warn!(
                    target: "audit",
                    error = %e,
                    "Could not stat audit log after append"
                );
                self.chain = None;
            }
        }
    }
}
