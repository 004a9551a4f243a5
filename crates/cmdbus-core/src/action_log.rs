//! Action log model and the persistence seam the bus writes through
//!
//! An [`ActionLogEntry`] is append-only history. After creation only the
//! undo/redo transitions touch it:
//!
//! ```text
//!   done ──undo──▶ undone ──redo──▶ redone
//! ```
//!
//! `undo_token` is set iff the entry is `done` and its command had an undo
//! handler when it ran.

use crate::context::ExecutionContext;
use crate::diff::Changes;
use crate::errors::Result;
use chrono::{DateTime, Utc};
use cmdbus_core_types::UndoToken;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Key under which commands store the input needed to replay them
pub const REDO_INPUT_KEY: &str = "__redoInput";

/// Key under which commands store their undo envelope
pub const UNDO_KEY: &str = "undo";

/// Lifecycle state of an action log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Done,
    Undone,
    Redone,
    Failed,
}

impl ExecutionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionState::Done => "done",
            ExecutionState::Undone => "undone",
            ExecutionState::Redone => "redone",
            ExecutionState::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "done" => Some(ExecutionState::Done),
            "undone" => Some(ExecutionState::Undone),
            "redone" => Some(ExecutionState::Redone),
            "failed" => Some(ExecutionState::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audit metadata describing one execution
///
/// Every field is optional: a command's `build_log` result and the caller's
/// `metadata` argument are merged field by field, `build_log` first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntryMetadata {
    pub action_label: Option<String>,
    pub resource_kind: Option<String>,
    pub resource_id: Option<String>,
    pub parent_resource_kind: Option<String>,
    pub parent_resource_id: Option<String>,
    pub tenant_id: Option<String>,
    pub organization_id: Option<String>,
    pub snapshot_before: Option<Value>,
    pub snapshot_after: Option<Value>,
    pub changes: Option<Changes>,
    /// Stored verbatim as the entry's `command_payload`
    pub payload: Option<Value>,
}

impl LogEntryMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_action_label(mut self, label: impl Into<String>) -> Self {
        self.action_label = Some(label.into());
        self
    }

    pub fn with_resource(mut self, kind: impl Into<String>, id: impl Into<String>) -> Self {
        self.resource_kind = Some(kind.into());
        self.resource_id = Some(id.into());
        self
    }

    pub fn with_parent_resource(mut self, kind: impl Into<String>, id: impl Into<String>) -> Self {
        self.parent_resource_kind = Some(kind.into());
        self.parent_resource_id = Some(id.into());
        self
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn with_organization(mut self, organization_id: impl Into<String>) -> Self {
        self.organization_id = Some(organization_id.into());
        self
    }

    pub fn with_snapshots(mut self, before: Option<Value>, after: Option<Value>) -> Self {
        self.snapshot_before = before;
        self.snapshot_after = after;
        self
    }

    pub fn with_changes(mut self, changes: Changes) -> Self {
        self.changes = Some(changes);
        self
    }

    pub fn with_payload(mut self, payload: LogPayload) -> Self {
        self.payload = Some(payload.into_value());
        self
    }

    /// Fill every unset field of `self` from `fallback`
    pub fn or(self, fallback: LogEntryMetadata) -> LogEntryMetadata {
        LogEntryMetadata {
            action_label: self.action_label.or(fallback.action_label),
            resource_kind: self.resource_kind.or(fallback.resource_kind),
            resource_id: self.resource_id.or(fallback.resource_id),
            parent_resource_kind: self.parent_resource_kind.or(fallback.parent_resource_kind),
            parent_resource_id: self.parent_resource_id.or(fallback.parent_resource_id),
            tenant_id: self.tenant_id.or(fallback.tenant_id),
            organization_id: self.organization_id.or(fallback.organization_id),
            snapshot_before: self.snapshot_before.or(fallback.snapshot_before),
            snapshot_after: self.snapshot_after.or(fallback.snapshot_after),
            changes: self.changes.or(fallback.changes),
            payload: self.payload.or(fallback.payload),
        }
    }
}

/// Builder for the `{ undo, __redoInput }` command payload envelope
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogPayload {
    undo: Option<Value>,
    redo_input: Option<Value>,
    extra: Map<String, Value>,
}

impl LogPayload {
    pub fn new() -> Self {
        Self::default()
    }

    /// Payload whose `undo` key holds the command-specific reversal data
    pub fn undo(undo: impl Serialize) -> Result<Self> {
        Ok(Self {
            undo: Some(serde_json::to_value(undo)?),
            ..Self::default()
        })
    }

    /// Store the input needed to replay this command on redo
    pub fn with_redo_input(mut self, input: Value) -> Self {
        self.redo_input = Some(input);
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    pub fn into_value(self) -> Value {
        let mut map = self.extra;
        if let Some(undo) = self.undo {
            map.insert(UNDO_KEY.to_string(), undo);
        }
        if let Some(redo_input) = self.redo_input {
            map.insert(REDO_INPUT_KEY.to_string(), redo_input);
        }
        Value::Object(map)
    }
}

/// A persisted audit entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionLogEntry {
    pub id: String,
    pub command_id: String,
    pub action_label: Option<String>,
    pub resource_kind: Option<String>,
    pub resource_id: Option<String>,
    pub parent_resource_kind: Option<String>,
    pub parent_resource_id: Option<String>,
    pub tenant_id: Option<String>,
    pub organization_id: Option<String>,
    pub actor_user_id: Option<String>,
    pub execution_state: ExecutionState,
    pub undo_token: Option<UndoToken>,
    pub command_payload: Option<Value>,
    pub snapshot_before: Option<Value>,
    pub snapshot_after: Option<Value>,
    #[serde(rename = "changesJson")]
    pub changes: Option<Changes>,
    #[serde(rename = "contextJson")]
    pub context: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ActionLogEntry {
    pub fn is_undoable(&self) -> bool {
        self.execution_state == ExecutionState::Done && self.undo_token.is_some()
    }

    /// Stored `__redoInput`, if the command recorded one
    pub fn redo_input(&self) -> Option<&Value> {
        self.command_payload
            .as_ref()
            .and_then(|p| p.get(REDO_INPUT_KEY))
    }
}

/// Entry to append; the store assigns `id`, `created_at` and `updated_at`
#[derive(Debug, Clone, PartialEq)]
pub struct NewActionLogEntry {
    pub command_id: String,
    pub action_label: Option<String>,
    pub resource_kind: Option<String>,
    pub resource_id: Option<String>,
    pub parent_resource_kind: Option<String>,
    pub parent_resource_id: Option<String>,
    pub tenant_id: Option<String>,
    pub organization_id: Option<String>,
    pub actor_user_id: Option<String>,
    pub execution_state: ExecutionState,
    pub undo_token: Option<UndoToken>,
    pub command_payload: Option<Value>,
    pub snapshot_before: Option<Value>,
    pub snapshot_after: Option<Value>,
    pub changes: Option<Changes>,
    pub context: Option<Value>,
}

/// Actor/tenant/organization triple that undo and redo lookups are keyed by
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorScope {
    pub actor_user_id: String,
    pub tenant_id: Option<String>,
    /// When `None`, entries of every organization match
    pub organization_id: Option<String>,
}

impl ActorScope {
    pub fn from_context(ctx: &ExecutionContext) -> Self {
        Self {
            actor_user_id: ctx.auth.subject.clone(),
            tenant_id: ctx.auth.tenant_id.clone(),
            organization_id: ctx.effective_organization_id().map(str::to_string),
        }
    }
}

/// Filters for [`ActionLogStore::list`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionLogQuery {
    pub tenant_id: Option<String>,
    pub organization_id: Option<String>,
    /// Restrict to any of these organizations (ignored when empty)
    pub organization_ids: Vec<String>,
    pub actor_user_id: Option<String>,
    pub resource_kind: Option<String>,
    pub resource_id: Option<String>,
    /// Restrict to these states (ignored when empty)
    pub states: Vec<ExecutionState>,
    /// Only entries that still hold an undo token
    pub undoable_only: bool,
    /// Hide entries currently in the `undone` state
    pub exclude_undone: bool,
    pub limit: Option<usize>,
}

impl ActionLogQuery {
    pub fn for_tenant(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: Some(tenant_id.into()),
            ..Self::default()
        }
    }

    pub fn for_resource(mut self, kind: impl Into<String>, id: impl Into<String>) -> Self {
        self.resource_kind = Some(kind.into());
        self.resource_id = Some(id.into());
        self
    }

    pub fn for_actor(mut self, actor_user_id: impl Into<String>) -> Self {
        self.actor_user_id = Some(actor_user_id.into());
        self
    }

    pub fn with_states(mut self, states: Vec<ExecutionState>) -> Self {
        self.states = states;
        self
    }

    pub fn excluding_undone(mut self) -> Self {
        self.exclude_undone = true;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Persistence and query layer for audit entries
///
/// `mark_undone` must be a single atomic conditional write: of two concurrent
/// calls with the same token exactly one succeeds, the other returns
/// `NotAvailable`.
pub trait ActionLogStore: Send + Sync {
    /// Append a new entry
    fn log(&self, entry: NewActionLogEntry) -> Result<ActionLogEntry>;

    /// Entries matching `query`, newest first
    fn list(&self, query: &ActionLogQuery) -> Result<Vec<ActionLogEntry>>;

    fn find_by_id(&self, id: &str) -> Result<Option<ActionLogEntry>>;

    fn find_by_undo_token(&self, token: &UndoToken) -> Result<Option<ActionLogEntry>>;

    /// Newest `done` entry holding an undo token for the actor
    fn latest_undoable_for_actor(&self, scope: &ActorScope) -> Result<Option<ActionLogEntry>>;

    /// Newest `done` entry holding an undo token for the actor on one resource
    fn latest_undoable_for_resource(
        &self,
        scope: &ActorScope,
        resource_kind: &str,
        resource_id: &str,
    ) -> Result<Option<ActionLogEntry>>;

    /// Most recently undone entry for the actor, by order of the undo itself
    fn latest_undone_for_actor(&self, scope: &ActorScope) -> Result<Option<ActionLogEntry>>;

    /// Clear the token and flip `done` → `undone`
    fn mark_undone(&self, id: &str, token: &UndoToken) -> Result<ActionLogEntry>;

    /// Flip `undone` → `redone`
    fn mark_redone(&self, id: &str) -> Result<ActionLogEntry>;

    /// Flip `redone` → `undone`, releasing a redo whose replay failed
    fn reopen_redone(&self, id: &str) -> Result<ActionLogEntry>;
}
