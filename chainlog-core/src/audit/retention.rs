//! Retention and rotation
//!
//! A log older than the retention window is archived next to itself as
//! `<path>.<mtime>.bak` and the writer starts a new, empty chain. The age
//! check is rate limited per log path.

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::storage::LogStore;
use super::Result;

/// Minimum time between two retention checks of the same path
pub const ROTATION_CHECK_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

const MILLIS_PER_DAY: f64 = 24.0 * 60.0 * 60.0 * 1000.0;

/// Source of "now" for retention decisions
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Remembers when each log path was last checked for rotation.
///
/// Every logger owns one by default; share an `Arc<RotationTracker>` between
/// loggers that should share the cooldown.
#[derive(Debug, Default)]
pub struct RotationTracker {
    last_checked: Mutex<HashMap<PathBuf, DateTime<Utc>>>,
}

impl RotationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Returns true (and records `now`) if `path` is due for a check
    pub fn try_begin_check(&self, path: &Path, now: DateTime<Utc>) -> bool {
        let mut last_checked = self.last_checked.lock();
        if let Some(last) = last_checked.get(path) {
            let elapsed_ms = now.signed_duration_since(*last).num_milliseconds();
            if elapsed_ms < ROTATION_CHECK_INTERVAL.as_millis() as i64 {
                return false;
            }
        }
        last_checked.insert(path.to_path_buf(), now);
        true
    }

    pub fn last_checked(&self, path: &Path) -> Option<DateTime<Utc>> {
        self.last_checked.lock().get(path).copied()
    }

    /// Forget every recorded check
    pub fn reset(&self) {
        self.last_checked.lock().clear();
    }
}

/// Whether a retention window rotates at all
pub fn retention_enabled(retention_days: f64) -> bool {
    retention_days.is_finite() && retention_days > 0.0
}

/// Name of the archive for a log last modified at `mtime`
pub fn rotated_path(path: &Path, mtime: DateTime<Utc>) -> PathBuf {
    let stamp = mtime
        .to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace(':', "-");
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".{}.bak", stamp));
    PathBuf::from(name)
}

/// Archive the log if it is older than `retention_days`.
///
/// Returns the archive path when a rotation happened.
pub async fn rotate_if_expired(
    store: &dyn LogStore,
    retention_days: f64,
    clock: &dyn Clock,
    tracker: &RotationTracker,
) -> Result<Option<PathBuf>> {
    if !retention_enabled(retention_days) {
        return Ok(None);
    }

    let now = clock.now();
    if !tracker.try_begin_check(store.path(), now) {
        return Ok(None);
    }

    let Some(modified) = store.modified().await? else {
        return Ok(None);
    };
    let mtime: DateTime<Utc> = modified.into();

    let age_ms = now.signed_duration_since(mtime).num_milliseconds() as f64;
    if age_ms <= retention_days * MILLIS_PER_DAY {
        return Ok(None);
    }

    let target = rotated_path(store.path(), mtime);
    store.rename(&target).await?;

    info!(
        target: "audit",
        archived = %target.display(),
        retention_days,
        "Rotated audit log past retention window"
    );

    Ok(Some(target))
}
