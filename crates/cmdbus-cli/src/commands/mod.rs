//! CLI subcommands

pub mod log;
pub mod migrate;

use cmdbus_engine::EngineConfig;
use std::path::PathBuf;

/// The configured database file; the CLI never works on an in-memory store
pub(crate) fn require_db_path(config: &EngineConfig) -> Result<PathBuf, Box<dyn std::error::Error>> {
    config
        .store
        .path
        .clone()
        .ok_or_else(|| "No database configured: pass --db or set CMDBUS_DB_PATH".into())
}
