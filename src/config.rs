//! Configuration management module

use anyhow::{Context, Result};
use chainlog_core::config::{default_config_path, default_log_path};
use chainlog_core::LoggerConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// trace, debug, info, warn or error; `RUST_LOG` takes precedence
    #[serde(default = "default_level")]
    pub level: String,
    /// Write JSON diagnostics to rolling files in this directory
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            dir: None,
        }
    }
}

/// Top-level configuration file
///
/// ```toml
/// [audit]
/// log_path = "/var/lib/chainlog/audit.jsonl"
/// retention_days = 30
///
/// [logging]
/// level = "debug"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChainlogConfig {
    #[serde(default)]
    pub audit: LoggerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ChainlogConfig {
    pub fn from_toml_str(input: &str) -> Result<Self> {
        toml::from_str(input).context("Failed to parse config")
    }

    /// Load the configuration.
    ///
    /// An explicit path must exist; the default location is optional. The
    /// `CHAINLOG_*` environment variables are applied on top, and a missing
    /// log path falls back to the per-user data directory.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::read(path)?,
            None => {
                let default = default_config_path();
                if default.exists() {
                    Self::read(&default)?
                } else {
                    Self::default()
                }
            }
        };

        config.audit = config.audit.apply_env()?;
        if config.audit.log_path.is_none() {
            config.audit.log_path = Some(default_log_path());
        }
        Ok(config)
    }

    fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sections() {
        let config = ChainlogConfig::from_toml_str(
            r#"
            [audit]
            log_path = "/srv/audit.jsonl"
            retention_days = 14

            [logging]
            level = "debug"
            dir = "/var/log/chainlog"
            "#,
        )
        .unwrap();

        assert_eq!(config.audit.log_path, Some(PathBuf::from("/srv/audit.jsonl")));
        assert_eq!(config.audit.retention_days, 14.0);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.dir, Some(PathBuf::from("/var/log/chainlog")));
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = ChainlogConfig::from_toml_str("").unwrap();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.audit.retention_days, 30.0);
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = ChainlogConfig::load(Some(dir.path().join("nope.toml").as_path()));
        assert!(result.is_err());
    }
}
