//! Command bus: execute and undo with automatic audit capture
//!
//! Stages run strictly in order for one execution:
//!
//! ```text
//! prepare → execute → capture_after → build_log → persist → invalidate cache
//! ```
//!
//! Any error before `persist` aborts with nothing logged. Cache invalidation
//! failures are logged as degraded and never fail the command.
//!
//! Both entry points own their lifecycle logging (`log_op_start!`,
//! `log_op_end!`, `log_op_error!`); the stages below them do not log
//! start/end events.

#![allow(clippy::result_large_err)]

use cmdbus_core::action_log::{
    ActionLogEntry, ActionLogStore, ActorScope, ExecutionState, LogEntryMetadata,
    NewActionLogEntry,
};
use cmdbus_core::collaborators::{CacheIdentifiers, CacheInvalidation, CacheInvalidator};
use cmdbus_core::context::ExecutionContext;
use cmdbus_core::diff::{build_changes, discover_fields};
use cmdbus_core::errors::{CommandError, ExError, ExErrorKind, Result};
use cmdbus_core::registry::{BuildLogArgs, CommandDescriptor, CommandRegistry, Snapshots, UndoArgs};
use cmdbus_core::undo_payload::resolve_undo_payload;
use cmdbus_core::{log_degraded, log_op_end, log_op_error, log_op_start};
use cmdbus_core_types::UndoToken;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;

/// Result of a successful `execute`
#[derive(Debug, Clone, PartialEq)]
pub struct ExecuteOutcome {
    /// Whatever the command's `execute` handler returned
    pub result: Value,
    pub log_entry: ActionLogEntry,
}

impl ExecuteOutcome {
    /// Token to pass to [`CommandBus::undo`], when the command is undoable
    pub fn undo_token(&self) -> Option<&UndoToken> {
        self.log_entry.undo_token.as_ref()
    }
}

/// Runs registered commands and their undo handlers
#[derive(Clone)]
pub struct CommandBus {
    registry: Arc<CommandRegistry>,
    store: Arc<dyn ActionLogStore>,
    cache: Arc<dyn CacheInvalidator>,
}

impl CommandBus {
    pub fn new(
        registry: Arc<CommandRegistry>,
        store: Arc<dyn ActionLogStore>,
        cache: Arc<dyn CacheInvalidator>,
    ) -> Self {
        Self {
            registry,
            store,
            cache,
        }
    }

    pub fn registry(&self) -> &Arc<CommandRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn ActionLogStore> {
        &self.store
    }

    /// Run a command and record it
    ///
    /// `metadata` fills whatever the command's `build_log` leaves unset.
    ///
    /// # Errors
    ///
    /// - `Configuration` if `command_id` is not registered
    /// - any error raised by the command's own stages, unchanged
    /// - `Persistence` if the action log entry cannot be written
    pub fn execute(
        &self,
        command_id: &str,
        input: Value,
        ctx: &ExecutionContext,
        metadata: Option<LogEntryMetadata>,
    ) -> Result<ExecuteOutcome> {
        log_op_start!("command_execute", command_id = command_id);
        let start = Instant::now();

        let outcome = self
            .execute_impl(command_id, input, ctx, metadata)
            .map_err(|e| {
                let e = ctx.correlate(e);
                log_op_error!(
                    "command_execute",
                    e.clone(),
                    duration_ms = start.elapsed().as_millis() as u64,
                    command_id = command_id
                );
                e
            })?;

        log_op_end!(
            "command_execute",
            duration_ms = start.elapsed().as_millis() as u64,
            command_id = command_id,
            log_id = %outcome.log_entry.id
        );

        Ok(outcome)
    }

    fn execute_impl(
        &self,
        command_id: &str,
        input: Value,
        ctx: &ExecutionContext,
        metadata: Option<LogEntryMetadata>,
    ) -> Result<ExecuteOutcome> {
        let descriptor = self.registry.require(command_id)?;

        let before = match descriptor.prepare_handler() {
            Some(prepare) => prepare(&input, ctx)?,
            None => None,
        };

        let result = (descriptor.execute_handler())(&input, ctx)?;

        let after = match descriptor.capture_after_handler() {
            Some(capture_after) => capture_after(&input, &result, ctx)?,
            None => None,
        };

        let snapshots = Snapshots { before, after };

        let built = match descriptor.build_log_handler() {
            Some(build_log) => build_log(&BuildLogArgs {
                input: &input,
                result: &result,
                snapshots: &snapshots,
                ctx,
            })?,
            None => LogEntryMetadata::default(),
        };

        let merged = built
            .or(metadata.unwrap_or_default())
            .or(LogEntryMetadata::default().with_snapshots(snapshots.before, snapshots.after));
        let merged = merged.clone().or(default_metadata(&descriptor, &result, &merged, ctx));

        let changes = match merged.changes {
            Some(changes) => changes,
            None => {
                let before = merged.snapshot_before.as_ref();
                let after = merged.snapshot_after.as_ref();
                match descriptor.diff_fields() {
                    Some(fields) => build_changes(before, after, fields),
                    None => build_changes(before, after, discover_fields(before, after).as_slice()),
                }
            }
        };

        let entry = NewActionLogEntry {
            command_id: descriptor.id().to_string(),
            action_label: merged.action_label,
            resource_kind: merged.resource_kind,
            resource_id: merged.resource_id,
            parent_resource_kind: merged.parent_resource_kind,
            parent_resource_id: merged.parent_resource_id,
            tenant_id: merged.tenant_id,
            organization_id: merged.organization_id,
            actor_user_id: Some(ctx.actor().to_string()),
            execution_state: ExecutionState::Done,
            undo_token: descriptor.has_undo().then(UndoToken::generate),
            command_payload: merged.payload,
            snapshot_before: merged.snapshot_before,
            snapshot_after: merged.snapshot_after,
            changes: Some(changes),
            context: Some(ctx.audit_json()),
        };

        let log_entry = self.store.log(entry)?;

        self.invalidate(&descriptor, &log_entry, "execute");

        Ok(ExecuteOutcome { result, log_entry })
    }

    /// Reverse the execution that issued `token`
    ///
    /// Returns the entry in its new `undone` state. A token works at most once.
    ///
    /// The undo handler runs before the token is consumed. Two concurrent
    /// calls with one token can both run the handler while only one of them
    /// succeeds, so undo handlers must be idempotent.
    ///
    /// # Errors
    ///
    /// - `NotAvailable` if the token is unknown or used, the entry is not
    ///   `done`, it is outside the caller's tenant/organizations, or its
    ///   command has no undo handler
    /// - any error raised by the undo handler, unchanged
    pub fn undo(&self, token: &UndoToken, ctx: &ExecutionContext) -> Result<ActionLogEntry> {
        log_op_start!("command_undo");
        let start = Instant::now();

        let undone = self.undo_impl(token, ctx).map_err(|e| {
            let e = ctx.correlate(e);
            log_op_error!(
                "command_undo",
                e.clone(),
                duration_ms = start.elapsed().as_millis() as u64
            );
            e
        })?;

        log_op_end!(
            "command_undo",
            duration_ms = start.elapsed().as_millis() as u64,
            command_id = %undone.command_id,
            log_id = %undone.id
        );

        Ok(undone)
    }

    fn undo_impl(&self, token: &UndoToken, ctx: &ExecutionContext) -> Result<ActionLogEntry> {
        let entry = self
            .store
            .find_by_undo_token(token)?
            .ok_or(CommandError::UndoTokenNotFound)?;

        if entry.execution_state != ExecutionState::Done {
            return Err(CommandError::EntryStateMismatch {
                log_id: entry.id,
                state: entry.execution_state.to_string(),
                expected: ExecutionState::Done.to_string(),
            }
            .into());
        }

        ensure_in_scope(&entry, ctx)?;

        let descriptor = self
            .registry
            .get(&entry.command_id)
            .ok_or_else(|| CommandError::UndoHandlerMissing {
                command_id: entry.command_id.clone(),
            })?;
        let undo = descriptor
            .undo_handler()
            .ok_or_else(|| CommandError::UndoHandlerMissing {
                command_id: entry.command_id.clone(),
            })?;

        let payload = resolve_undo_payload(&entry);
        undo(&UndoArgs {
            log_entry: &entry,
            payload: payload.as_ref(),
            ctx,
        })?;

        let undone = self.store.mark_undone(&entry.id, token)?;

        self.invalidate(&descriptor, &undone, "undo");

        Ok(undone)
    }

    /// Undo the actor's most recent undoable execution
    ///
    /// # Errors
    ///
    /// `NotAvailable` when the actor has nothing left to undo, plus every
    /// error of [`CommandBus::undo`].
    pub fn undo_latest(&self, ctx: &ExecutionContext) -> Result<ActionLogEntry> {
        let latest = self
            .store
            .latest_undoable_for_actor(&ActorScope::from_context(ctx))?;
        self.undo_entry(latest, ctx)
    }

    /// Undo the actor's most recent undoable execution on one resource
    ///
    /// # Errors
    ///
    /// Same as [`CommandBus::undo_latest`].
    pub fn undo_latest_for_resource(
        &self,
        resource_kind: &str,
        resource_id: &str,
        ctx: &ExecutionContext,
    ) -> Result<ActionLogEntry> {
        let latest = self.store.latest_undoable_for_resource(
            &ActorScope::from_context(ctx),
            resource_kind,
            resource_id,
        )?;
        self.undo_entry(latest, ctx)
    }

    fn undo_entry(
        &self,
        entry: Option<ActionLogEntry>,
        ctx: &ExecutionContext,
    ) -> Result<ActionLogEntry> {
        let token = entry
            .and_then(|e| e.undo_token)
            .ok_or_else(|| CommandError::NothingToReplay {
                action: "undo".to_string(),
            })?;
        self.undo(&token, ctx)
    }

    fn invalidate(&self, descriptor: &CommandDescriptor, entry: &ActionLogEntry, stage: &str) {
        let reason = CacheInvalidation::reason_for(descriptor.id(), stage);
        let invalidation = CacheInvalidation {
            entity_kind: entry
                .resource_kind
                .clone()
                .unwrap_or_else(|| descriptor.default_resource_kind().to_string()),
            identifiers: CacheIdentifiers {
                id: entry.resource_id.clone(),
                organization_id: entry.organization_id.clone(),
                tenant_id: entry.tenant_id.clone(),
            },
            tenant_id: entry.tenant_id.clone(),
            reason,
            affected_tags: descriptor.cache_tags().to_vec(),
        };

        if let Err(err) = self.cache.invalidate(&invalidation) {
            let degraded = ExError::new(ExErrorKind::DegradedDependency)
                .with_op("cache_invalidate")
                .with_command_id(descriptor.id())
                .with_log_id(entry.id.clone())
                .with_message(format!("Cache invalidation failed: {}", err.message()))
                .with_source(err);
            log_degraded!(
                "cache_invalidate",
                degraded,
                command_id = descriptor.id(),
                cache_reason = %invalidation.reason
            );
        }
    }
}

/// Reject entries of another tenant or of an organization the caller cannot see
pub(crate) fn ensure_in_scope(entry: &ActionLogEntry, ctx: &ExecutionContext) -> Result<()> {
    let same_tenant = entry.tenant_id.as_deref() == ctx.tenant_id();
    if !same_tenant || !ctx.can_access_organization(entry.organization_id.as_deref()) {
        return Err(CommandError::OutOfScope {
            log_id: entry.id.clone(),
        }
        .into());
    }
    Ok(())
}

/// Values used when neither `build_log` nor the caller's metadata set them
fn default_metadata(
    descriptor: &CommandDescriptor,
    result: &Value,
    merged: &LogEntryMetadata,
    ctx: &ExecutionContext,
) -> LogEntryMetadata {
    let resource_id = resource_id_of(result)
        .or_else(|| merged.snapshot_after.as_ref().and_then(resource_id_of_object));

    LogEntryMetadata {
        action_label: Some(descriptor.id().to_string()),
        resource_kind: Some(descriptor.default_resource_kind().to_string()),
        resource_id,
        tenant_id: ctx.tenant_id().map(str::to_string),
        organization_id: ctx.effective_organization_id().map(str::to_string),
        ..LogEntryMetadata::default()
    }
}

/// A string result is the id itself; otherwise `result.id`
fn resource_id_of(result: &Value) -> Option<String> {
    match result {
        Value::String(id) => Some(id.clone()),
        other => resource_id_of_object(other),
    }
}

fn resource_id_of_object(value: &Value) -> Option<String> {
    match value.get("id")? {
        Value::String(id) => Some(id.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
