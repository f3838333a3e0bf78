use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::audit::{AuditError, IntegrityKey, Result};

pub const ENV_LOG_PATH: &str = "CHAINLOG_LOG_PATH";
pub const ENV_INTEGRITY_KEY: &str = "CHAINLOG_INTEGRITY_KEY";
pub const ENV_RETENTION_DAYS: &str = "CHAINLOG_RETENTION_DAYS";

/// Default retention window before a log is archived
pub const DEFAULT_RETENTION_DAYS: f64 = 30.0;

fn default_retention_days() -> f64 {
    DEFAULT_RETENTION_DAYS
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_trace_entries() -> bool {
    true
}

#[derive(Clone, Serialize, Deserialize)]
pub struct LoggerConfig {
    /// Log file; required. Relative paths are resolved against the working
    /// directory when the logger is built.
    #[serde(default)]
    pub log_path: Option<PathBuf>,
    /// Archive the log once it is older than this many days. Zero, negative
    /// or non-finite values disable rotation.
    #[serde(default = "default_retention_days")]
    pub retention_days: f64,
    /// Secret for the HMAC chain; without it entries carry no hashes
    #[serde(default, skip_serializing)]
    pub integrity_key: Option<String>,
    /// Pending writes buffered ahead of the background writer
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Emit a tracing event for every appended entry
    #[serde(default = "default_trace_entries")]
    pub trace_entries: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            log_path: None,
            retention_days: default_retention_days(),
            integrity_key: None,
            queue_capacity: default_queue_capacity(),
            trace_entries: default_trace_entries(),
        }
    }
}

impl std::fmt::Debug for LoggerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoggerConfig")
            .field("log_path", &self.log_path)
            .field("retention_days", &self.retention_days)
            .field(
                "integrity_key",
                &self.integrity_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("queue_capacity", &self.queue_capacity)
            .field("trace_entries", &self.trace_entries)
            .finish()
    }
}

impl LoggerConfig {
    pub fn new(log_path: impl Into<PathBuf>) -> Self {
        Self {
            log_path: Some(log_path.into()),
            ..Default::default()
        }
    }

    pub fn with_integrity_key(mut self, key: impl Into<String>) -> Self {
        self.integrity_key = Some(key.into());
        self
    }

    pub fn with_retention_days(mut self, days: f64) -> Self {
        self.retention_days = days;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_trace_entries(mut self, enabled: bool) -> Self {
        self.trace_entries = enabled;
        self
    }

    pub fn from_toml_str(input: &str) -> Result<Self> {
        toml::from_str(input)
            .map_err(|e| AuditError::Configuration(format!("Failed to parse config: {}", e)))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path).map_err(|e| {
            AuditError::Configuration(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&config_str)
    }

    /// Override fields from `CHAINLOG_*` environment variables
    pub fn apply_env(mut self) -> Result<Self> {
        self.apply_overrides(|name| std::env::var(name).ok())?;
        Ok(self)
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(path) = lookup(ENV_LOG_PATH).filter(|v| !v.is_empty()) {
            self.log_path = Some(PathBuf::from(path));
        }
        if let Some(key) = lookup(ENV_INTEGRITY_KEY) {
            self.integrity_key = Some(key);
        }
        if let Some(days) = lookup(ENV_RETENTION_DAYS) {
            self.retention_days = days.trim().parse().map_err(|_| {
                AuditError::Configuration(format!(
                    "{} must be a number, got {:?}",
                    ENV_RETENTION_DAYS, days
                ))
            })?;
        }
        Ok(())
    }

    /// The log path made absolute
    pub fn resolved_log_path(&self) -> Result<PathBuf> {
        let path = self
            .log_path
            .as_ref()
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or_else(|| AuditError::Configuration("log_path is required".to_string()))?;

        if path.is_absolute() {
            return Ok(path.clone());
        }
        let cwd = std::env::current_dir().map_err(|e| {
            AuditError::Configuration(format!("Failed to resolve working directory: {}", e))
        })?;
        Ok(cwd.join(path))
    }

    pub fn integrity_key(&self) -> Option<IntegrityKey> {
        IntegrityKey::from_config(self.integrity_key.as_deref())
    }
}

/// Default location of the configuration file
pub fn default_config_path() -> PathBuf {
    directories::ProjectDirs::from("dev", "chainlog", "chainlog")
        .map(|dirs| dirs.config_dir().join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("chainlog.toml"))
}

/// Default location of the audit log
pub fn default_log_path() -> PathBuf {
    directories::ProjectDirs::from("dev", "chainlog", "chainlog")
        .map(|dirs| dirs.data_dir().join("audit.jsonl"))
        .unwrap_or_else(|| PathBuf::from("audit.jsonl"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_from_minimal_toml() {
        let config = LoggerConfig::from_toml_str(r#"log_path = "/var/log/audit.jsonl""#).unwrap();

        assert_eq!(config.log_path, Some(PathBuf::from("/var/log/audit.jsonl")));
        assert_eq!(config.retention_days, DEFAULT_RETENTION_DAYS);
        assert!(config.integrity_key.is_none());
        assert_eq!(config.queue_capacity, 1024);
        assert!(config.trace_entries);
    }

    #[test]
    fn test_full_toml() {
        let config = LoggerConfig::from_toml_str(
            r#"
            log_path = "audit.jsonl"
            retention_days = 7.5
            integrity_key = "secret-key"
            queue_capacity = 16
            trace_entries = false
            "#,
        )
        .unwrap();

        assert_eq!(config.retention_days, 7.5);
        assert!(config.integrity_key().is_some());
        assert_eq!(config.queue_capacity, 16);
        assert!(!config.trace_entries);
    }

    #[test]
    fn test_invalid_toml_is_configuration_error() {
        let err = LoggerConfig::from_toml_str("retention_days = \"soon\"").unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_missing_log_path() {
        let err = LoggerConfig::default().resolved_log_path().unwrap_err();
        assert!(err.is_configuration());

        let err = LoggerConfig::new("").resolved_log_path().unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_relative_path_resolved() {
        let resolved = LoggerConfig::new("logs/audit.jsonl").resolved_log_path().unwrap();
        assert!(resolved.is_absolute());
        assert!(resolved.ends_with("logs/audit.jsonl"));
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_LOG_PATH, "/tmp/override.jsonl"),
            (ENV_INTEGRITY_KEY, "env-key"),
            (ENV_RETENTION_DAYS, " 3 "),
        ]
        .into_iter()
        .collect();

        let mut config = LoggerConfig::new("/tmp/from-file.jsonl");
        config
            .apply_overrides(|name| env.get(name).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.log_path, Some(PathBuf::from("/tmp/override.jsonl")));
        assert_eq!(config.integrity_key.as_deref(), Some("env-key"));
        assert_eq!(config.retention_days, 3.0);
    }

    #[test]
    fn test_bad_retention_override() {
        let mut config = LoggerConfig::new("/tmp/a.jsonl");
        let err = config
            .apply_overrides(|name| (name == ENV_RETENTION_DAYS).then(|| "weekly".to_string()))
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_debug_hides_key() {
        let config = LoggerConfig::new("/tmp/a.jsonl").with_integrity_key("hunter2");
        assert!(!format!("{:?}", config).contains("hunter2"));
    }
}
