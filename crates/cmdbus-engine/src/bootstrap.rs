//! Engine bootstrap
//!
//! Wires the pieces a process needs from an [`EngineConfig`]: a command
//! registry, the SQLite action log and a cache invalidator. Collaborators
//! the config cannot describe (cache, tenant encryption, a shared registry)
//! are supplied through [`EngineBuilder`].
//!
//! Logging is not initialized here; binaries call
//! `logging_facility::init(config.logging.profile)` themselves so tests can
//! install the capture layer first.

#![allow(clippy::result_large_err)]

use crate::bus::{CommandBus, ExecuteOutcome};
use crate::config::EngineConfig;
use crate::redo;
use cmdbus_core::action_log::{ActionLogEntry, ActionLogStore, LogEntryMetadata};
use cmdbus_core::collaborators::{CacheInvalidator, NoopCacheInvalidator, TenantEncryption};
use cmdbus_core::context::ExecutionContext;
use cmdbus_core::errors::Result;
use cmdbus_core::registry::CommandRegistry;
use cmdbus_core_types::UndoToken;
use cmdbus_store::SqliteActionLogStore;
use serde_json::Value;
use std::sync::Arc;

/// A configured command bus plus the config it was built from
#[derive(Clone)]
pub struct Engine {
    bus: CommandBus,
    config: EngineConfig,
}

impl Engine {
    /// Engine with a fresh registry and no cache invalidation
    pub fn from_config(config: EngineConfig) -> Result<Self> {
        EngineBuilder::new(config).build()
    }

    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    pub fn bus(&self) -> &CommandBus {
        &self.bus
    }

    pub fn registry(&self) -> &Arc<CommandRegistry> {
        self.bus.registry()
    }

    pub fn store(&self) -> &Arc<dyn ActionLogStore> {
        self.bus.store()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn execute(
        &self,
        command_id: &str,
        input: Value,
        ctx: &ExecutionContext,
        metadata: Option<LogEntryMetadata>,
    ) -> Result<ExecuteOutcome> {
        self.bus.execute(command_id, input, ctx, metadata)
    }

    pub fn undo(&self, token: &UndoToken, ctx: &ExecutionContext) -> Result<ActionLogEntry> {
        self.bus.undo(token, ctx)
    }

    pub fn undo_latest(&self, ctx: &ExecutionContext) -> Result<ActionLogEntry> {
        self.bus.undo_latest(ctx)
    }

    pub fn redo(&self, log_id: &str, ctx: &ExecutionContext) -> Result<ExecuteOutcome> {
        redo::redo(&self.bus, log_id, ctx)
    }

    pub fn redo_latest(&self, ctx: &ExecutionContext) -> Result<ExecuteOutcome> {
        redo::redo_latest(&self.bus, ctx)
    }
}

/// Optional collaborators layered over an [`EngineConfig`]
pub struct EngineBuilder {
    config: EngineConfig,
    registry: Option<Arc<CommandRegistry>>,
    cache: Option<Arc<dyn CacheInvalidator>>,
    encryption: Option<Arc<dyn TenantEncryption>>,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            registry: None,
            cache: None,
            encryption: None,
        }
    }

    /// Share an already populated registry
    pub fn registry(mut self, registry: Arc<CommandRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn cache(mut self, cache: Arc<dyn CacheInvalidator>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn encryption(mut self, encryption: Arc<dyn TenantEncryption>) -> Self {
        self.encryption = Some(encryption);
        self
    }

    /// Open and migrate the store, then assemble the bus
    pub fn build(self) -> Result<Engine> {
        self.config.validate()?;

        let store = match &self.config.store.path {
            Some(path) => SqliteActionLogStore::open(path, self.config.store.wal)?,
            None => SqliteActionLogStore::open_in_memory()?,
        }
        .with_default_limit(self.config.action_log.default_list_limit);
        let store = match self.encryption {
            Some(encryption) => store.with_encryption(encryption),
            None => store,
        };

        tracing::debug!(
            store_path = ?self.config.store.path,
            default_list_limit = self.config.action_log.default_list_limit,
            "engine store ready"
        );

        let bus = CommandBus::new(
            self.registry.unwrap_or_default(),
            Arc::new(store),
            self.cache
                .unwrap_or_else(|| Arc::new(NoopCacheInvalidator) as Arc<dyn CacheInvalidator>),
        );

        Ok(Engine {
            bus,
            config: self.config,
        })
    }
}
