//! Redo, composed on top of the command bus
//!
//! Redo replays an undone execution as a brand-new one:
//!
//! 1. the target must be `undone` and the actor's most recently undone entry
//! 2. input comes from the stored `__redoInput`, or for `*.update` commands is
//!    rebuilt from the recorded `to` values plus the resource id
//! 3. the original entry is claimed by flipping it to `redone`; of two
//!    concurrent redos only one gets past this
//! 4. the command runs again through [`CommandBus::execute`], producing a new
//!    entry with a fresh undo token. If it fails the claim is released and
//!    the original is `undone` again
//!
//! Entries with neither a stored input nor an update-style id are rejected.

#![allow(clippy::result_large_err)]

use crate::bus::{ensure_in_scope, CommandBus, ExecuteOutcome};
use cmdbus_core::action_log::{ActionLogEntry, ActorScope, ExecutionState};
use cmdbus_core::context::ExecutionContext;
use cmdbus_core::errors::{CommandError, Result};
use cmdbus_core::{log_op_end, log_op_error, log_op_start};
use serde_json::{Map, Value};
use std::time::Instant;

const CUSTOM_FIELD_PREFIX: &str = "cf_";
const CUSTOM_FIELDS_KEY: &str = "customFields";

/// Replay the undone entry `log_id`
///
/// # Errors
///
/// `NotAvailable` if the entry is missing, outside the caller's scope, not
/// `undone`, not the most recently undone entry, or not replayable; plus any
/// error of the replayed command.
pub fn redo(bus: &CommandBus, log_id: &str, ctx: &ExecutionContext) -> Result<ExecuteOutcome> {
    log_op_start!("command_redo", log_id = log_id);
    let start = Instant::now();

    let outcome = redo_impl(bus, log_id, ctx).map_err(|e| {
        let e = ctx.correlate(e);
        log_op_error!(
            "command_redo",
            e.clone(),
            duration_ms = start.elapsed().as_millis() as u64,
            log_id = log_id
        );
        e
    })?;

    log_op_end!(
        "command_redo",
        duration_ms = start.elapsed().as_millis() as u64,
        log_id = log_id,
        new_log_id = %outcome.log_entry.id
    );

    Ok(outcome)
}

/// Replay the actor's most recently undone entry
///
/// # Errors
///
/// `NotAvailable` when nothing is undone for the actor, plus every error of
/// [`redo`].
pub fn redo_latest(bus: &CommandBus, ctx: &ExecutionContext) -> Result<ExecuteOutcome> {
    let latest = bus
        .store()
        .latest_undone_for_actor(&ActorScope::from_context(ctx))?
        .ok_or_else(|| CommandError::NothingToReplay {
            action: "redo".to_string(),
        })?;
    redo(bus, &latest.id, ctx)
}

fn redo_impl(bus: &CommandBus, log_id: &str, ctx: &ExecutionContext) -> Result<ExecuteOutcome> {
    let entry = bus
        .store()
        .find_by_id(log_id)?
        .ok_or_else(|| CommandError::EntryNotFound {
            log_id: log_id.to_string(),
        })?;

    if entry.actor_user_id.as_deref() != Some(ctx.actor()) {
        return Err(CommandError::OutOfScope {
            log_id: entry.id,
        }
        .into());
    }
    ensure_in_scope(&entry, ctx)?;

    if entry.execution_state != ExecutionState::Undone {
        return Err(CommandError::EntryStateMismatch {
            log_id: entry.id,
            state: entry.execution_state.to_string(),
            expected: ExecutionState::Undone.to_string(),
        }
        .into());
    }

    let latest = bus
        .store()
        .latest_undone_for_actor(&ActorScope::from_context(ctx))?;
    if latest.as_ref().map(|l| l.id.as_str()) != Some(entry.id.as_str()) {
        return Err(CommandError::RedoOutOfOrder { log_id: entry.id }.into());
    }

    let input = redo_input_for(&entry).ok_or_else(|| CommandError::RedoInputUnavailable {
        log_id: entry.id.clone(),
        command_id: entry.command_id.clone(),
    })?;

    bus.store().mark_redone(&entry.id)?;

    bus.execute(&entry.command_id, input, ctx, None).map_err(|err| {
        if let Err(release) = bus.store().reopen_redone(&entry.id) {
            tracing::warn!(
                log_id = %entry.id,
                err.code = release.code(),
                "redo claim not released after failed replay"
            );
        }
        err
    })
}

/// Input that replays `entry`, or `None` when it cannot be replayed
pub fn redo_input_for(entry: &ActionLogEntry) -> Option<Value> {
    if let Some(stored) = entry.redo_input() {
        return Some(stored.clone());
    }
    if entry.command_id.ends_with(".update") {
        return derive_update_input(entry);
    }
    None
}

/// `{id, <field>: to, customFields: {<key>: to}}` from an update's recorded changes
pub fn derive_update_input(entry: &ActionLogEntry) -> Option<Value> {
    let resource_id = entry.resource_id.as_ref()?;

    let mut input = Map::new();
    let mut custom_fields = Map::new();

    for (field, change) in entry.changes.iter().flatten() {
        match field.strip_prefix(CUSTOM_FIELD_PREFIX) {
            Some(key) => {
                custom_fields.insert(key.to_string(), change.to.clone());
            }
            None => {
                input.insert(field.clone(), change.to.clone());
            }
        }
    }

    if !custom_fields.is_empty() {
        input.insert(CUSTOM_FIELDS_KEY.to_string(), Value::Object(custom_fields));
    }
    input.insert("id".to_string(), Value::String(resource_id.clone()));

    Some(Value::Object(input))
}
