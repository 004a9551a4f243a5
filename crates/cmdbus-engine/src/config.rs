//! Engine configuration
//!
//! Loaded from TOML:
//!
//! ```toml
//! [store]
//! path = "var/cmdbus.db"   # omit for an in-memory store
//! wal = true
//!
//! [logging]
//! profile = "production"   # development | production | test
//!
//! [action_log]
//! default_list_limit = 50
//! ```
//!
//! `CMDBUS_DB_PATH` overrides `store.path`.

#![allow(clippy::result_large_err)]

use cmdbus_core::errors::{ExError, ExErrorKind, Result};
use cmdbus_core::logging_facility::Profile;
use cmdbus_store::{DEFAULT_LIST_LIMIT, MAX_LIST_LIMIT};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable overriding `store.path`
pub const DB_PATH_ENV: &str = "CMDBUS_DB_PATH";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub store: StoreConfig,
    pub logging: LoggingConfig,
    pub action_log: ActionLogConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// SQLite file; `None` keeps the action log in memory
    pub path: Option<PathBuf>,
    pub wal: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            wal: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    pub profile: Profile,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ActionLogConfig {
    pub default_list_limit: usize,
}

impl Default for ActionLogConfig {
    fn default() -> Self {
        Self {
            default_list_limit: DEFAULT_LIST_LIMIT,
        }
    }
}

impl EngineConfig {
    /// Read a TOML file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            ExError::new(ExErrorKind::Io)
                .with_op("config_load")
                .with_message(format!("Cannot read {}: {}", path.display(), e))
        })?;
        Ok(Self::from_toml_str(&text)?.with_env_overrides())
    }

    /// Parse and validate TOML without consulting the environment
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(text).map_err(|e| {
            ExError::new(ExErrorKind::Configuration)
                .with_op("config_parse")
                .with_message(e.to_string())
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides read through `lookup`
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(DB_PATH_ENV).filter(|p| !p.is_empty()) {
            self.store.path = Some(PathBuf::from(path));
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        let limit = self.action_log.default_list_limit;
        if limit == 0 || limit > MAX_LIST_LIMIT {
            return Err(ExError::new(ExErrorKind::Configuration)
                .with_op("config_validate")
                .with_message(format!(
                    "action_log.default_list_limit must be between 1 and {}, got {}",
                    MAX_LIST_LIMIT, limit
                )));
        }
        Ok(())
    }
}
