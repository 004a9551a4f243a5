//! Command registry
//!
//! A command is a [`CommandDescriptor`]: a namespaced id, a mandatory
//! `execute` handler and up to four optional stages. Optional stages are
//! probed for presence by the bus; there are no inherited defaults.
//!
//! The registry is an explicit instance built at startup and shared through
//! an `Arc`. Registering an id that already exists replaces the previous
//! descriptor.

use crate::action_log::{ActionLogEntry, LogEntryMetadata};
use crate::context::ExecutionContext;
use crate::errors::{CommandError, ExError, Result};
use crate::undo_payload::UndoPayload;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// `prepare(input, ctx)`: load the pre-mutation snapshot
pub type PrepareFn = Arc<dyn Fn(&Value, &ExecutionContext) -> Result<Option<Value>> + Send + Sync>;

/// `execute(input, ctx)`: perform the mutation
pub type ExecuteFn = Arc<dyn Fn(&Value, &ExecutionContext) -> Result<Value> + Send + Sync>;

/// `capture_after(input, result, ctx)`: reload the committed snapshot
pub type CaptureAfterFn =
    Arc<dyn Fn(&Value, &Value, &ExecutionContext) -> Result<Option<Value>> + Send + Sync>;

/// `build_log(args)`: describe the execution for the audit log
pub type BuildLogFn = Arc<dyn Fn(&BuildLogArgs<'_>) -> Result<LogEntryMetadata> + Send + Sync>;

/// `undo(args)`: reverse a logged execution
pub type UndoFn = Arc<dyn Fn(&UndoArgs<'_>) -> Result<()> + Send + Sync>;

/// Before/after snapshots gathered around `execute`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshots {
    pub before: Option<Value>,
    pub after: Option<Value>,
}

/// Arguments handed to a `build_log` stage
#[derive(Debug, Clone, Copy)]
pub struct BuildLogArgs<'a> {
    pub input: &'a Value,
    pub result: &'a Value,
    pub snapshots: &'a Snapshots,
    pub ctx: &'a ExecutionContext,
}

/// Arguments handed to an `undo` stage
#[derive(Debug, Clone, Copy)]
pub struct UndoArgs<'a> {
    pub log_entry: &'a ActionLogEntry,
    /// Resolved by the undo payload codec; `None` when nothing was stored
    pub payload: Option<&'a UndoPayload>,
    pub ctx: &'a ExecutionContext,
}

/// One registered command
#[derive(Clone)]
pub struct CommandDescriptor {
    id: String,
    execute: ExecuteFn,
    prepare: Option<PrepareFn>,
    capture_after: Option<CaptureAfterFn>,
    build_log: Option<BuildLogFn>,
    undo: Option<UndoFn>,
    diff_fields: Option<Vec<String>>,
    cache_tags: Vec<String>,
}

impl CommandDescriptor {
    pub fn new<F>(id: impl Into<String>, execute: F) -> Self
    where
        F: Fn(&Value, &ExecutionContext) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            execute: Arc::new(execute),
            prepare: None,
            capture_after: None,
            build_log: None,
            undo: None,
            diff_fields: None,
            cache_tags: Vec::new(),
        }
    }

    pub fn with_prepare<F>(mut self, prepare: F) -> Self
    where
        F: Fn(&Value, &ExecutionContext) -> Result<Option<Value>> + Send + Sync + 'static,
    {
        self.prepare = Some(Arc::new(prepare));
        self
    }

    pub fn with_capture_after<F>(mut self, capture_after: F) -> Self
    where
        F: Fn(&Value, &Value, &ExecutionContext) -> Result<Option<Value>> + Send + Sync + 'static,
    {
        self.capture_after = Some(Arc::new(capture_after));
        self
    }

    pub fn with_build_log<F>(mut self, build_log: F) -> Self
    where
        F: Fn(&BuildLogArgs<'_>) -> Result<LogEntryMetadata> + Send + Sync + 'static,
    {
        self.build_log = Some(Arc::new(build_log));
        self
    }

    pub fn with_undo<F>(mut self, undo: F) -> Self
    where
        F: Fn(&UndoArgs<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.undo = Some(Arc::new(undo));
        self
    }

    /// Restrict diffs to these fields instead of discovering them from the snapshots
    pub fn with_diff_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.diff_fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Extra cache tags to invalidate after execute and undo
    pub fn with_cache_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cache_tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn execute_handler(&self) -> &ExecuteFn {
        &self.execute
    }

    pub fn prepare_handler(&self) -> Option<&PrepareFn> {
        self.prepare.as_ref()
    }

    pub fn capture_after_handler(&self) -> Option<&CaptureAfterFn> {
        self.capture_after.as_ref()
    }

    pub fn build_log_handler(&self) -> Option<&BuildLogFn> {
        self.build_log.as_ref()
    }

    pub fn undo_handler(&self) -> Option<&UndoFn> {
        self.undo.as_ref()
    }

    pub fn has_undo(&self) -> bool {
        self.undo.is_some()
    }

    pub fn diff_fields(&self) -> Option<&[String]> {
        self.diff_fields.as_deref()
    }

    pub fn cache_tags(&self) -> &[String] {
        &self.cache_tags
    }

    /// Resource kind implied by the id: everything before the last `.`
    ///
    /// `"widgets.create"` → `"widgets"`, `"billing.invoice.void"` →
    /// `"billing.invoice"`. An id without a dot is its own kind.
    pub fn default_resource_kind(&self) -> &str {
        self.id
            .rsplit_once('.')
            .map(|(kind, _)| kind)
            .unwrap_or(&self.id)
    }

    /// Whether redo may rebuild input from an entry's recorded changes
    pub fn is_update(&self) -> bool {
        self.id.ends_with(".update")
    }
}

impl fmt::Debug for CommandDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandDescriptor")
            .field("id", &self.id)
            .field("prepare", &self.prepare.is_some())
            .field("capture_after", &self.capture_after.is_some())
            .field("build_log", &self.build_log.is_some())
            .field("undo", &self.undo.is_some())
            .field("diff_fields", &self.diff_fields)
            .field("cache_tags", &self.cache_tags)
            .finish()
    }
}

/// Deserialize command input, mapping shape errors to `Validation`
///
/// # Errors
///
/// Returns `Validation` when `input` does not match `T`.
pub fn parse_input<T: DeserializeOwned>(input: &Value) -> Result<T> {
    serde_json::from_value(input.clone()).map_err(|e| {
        ExError::from(CommandError::InvalidInput {
            reason: e.to_string(),
        })
    })
}

/// Thread-safe id → descriptor map
#[derive(Default)]
pub struct CommandRegistry {
    commands: RwLock<BTreeMap<String, Arc<CommandDescriptor>>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor, returning the one it replaced
    pub fn register(&self, descriptor: CommandDescriptor) -> Option<Arc<CommandDescriptor>> {
        let id = descriptor.id().to_string();
        let previous = self.write().insert(id.clone(), Arc::new(descriptor));
        if previous.is_some() {
            tracing::debug!(command_id = %id, "command re-registered; previous descriptor replaced");
        }
        previous
    }

    /// Remove a descriptor. Returns `false` when the id was not registered.
    pub fn unregister(&self, id: &str) -> bool {
        self.write().remove(id).is_some()
    }

    pub fn get(&self, id: &str) -> Option<Arc<CommandDescriptor>> {
        self.read().get(id).cloned()
    }

    /// Resolve a descriptor or fail with a configuration error
    pub fn require(&self, id: &str) -> Result<Arc<CommandDescriptor>> {
        self.get(id).ok_or_else(|| {
            CommandError::UnknownCommand {
                command_id: id.to_string(),
            }
            .into()
        })
    }

    /// Registered ids, sorted
    pub fn list(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Drop every registration
    pub fn clear(&self) {
        self.write().clear();
    }

    // A panicking handler never runs under this lock, so a poisoned map is still consistent.
    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, Arc<CommandDescriptor>>> {
        self.commands
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Arc<CommandDescriptor>>> {
        self.commands
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandRegistry")
            .field("commands", &self.list())
            .finish()
    }
}
