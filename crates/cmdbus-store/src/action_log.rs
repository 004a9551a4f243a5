//! SQLite-backed action log
//!
//! One `action_logs` row per execution. JSON columns are stored as text,
//! timestamps as epoch milliseconds. Undo and redo transitions are single
//! conditional `UPDATE`s, so the row's state and token are never read and
//! written in separate steps.

#![allow(clippy::result_large_err)]

use crate::db;
use crate::errors::{corrupt_column, from_rusqlite, lock_poisoned, Result};
use crate::migrations::apply_migrations;
use chrono::{DateTime, TimeZone, Utc};
use cmdbus_core::action_log::{
    ActionLogEntry, ActionLogQuery, ActionLogStore, ActorScope, ExecutionState, NewActionLogEntry,
};
use cmdbus_core::collaborators::TenantEncryption;
use cmdbus_core::diff::Changes;
use cmdbus_core::errors::{CommandError, ExError, ExErrorKind};
use cmdbus_core_types::UndoToken;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};
use serde_json::Value;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Page size used by `list` when the query sets no limit
pub const DEFAULT_LIST_LIMIT: usize = 50;

/// Largest page `list` ever returns
pub const MAX_LIST_LIMIT: usize = 500;

const COLUMNS: &str = "id, command_id, action_label, resource_kind, resource_id, \
     parent_resource_kind, parent_resource_id, tenant_id, organization_id, actor_user_id, \
     execution_state, undo_token, command_payload, snapshot_before, snapshot_after, \
     changes_json, context_json, created_at, updated_at";

// Decrypt failures are reported once per process, not once per row.
static DECRYPT_FAILURE_REPORTED: AtomicBool = AtomicBool::new(false);

/// `ActionLogStore` over a single SQLite connection
pub struct SqliteActionLogStore {
    conn: Mutex<Connection>,
    encryption: Option<Arc<dyn TenantEncryption>>,
    default_limit: usize,
}

impl SqliteActionLogStore {
    /// Open (or create) a database file and bring its schema up to date
    pub fn open<P: AsRef<Path>>(path: P, wal: bool) -> Result<Self> {
        let conn = db::open(path)?;
        db::configure(&conn, wal)?;
        Self::from_connection(conn)
    }

    /// Migrated in-memory store
    pub fn open_in_memory() -> Result<Self> {
        let conn = db::open_in_memory()?;
        db::configure(&conn, false)?;
        Self::from_connection(conn)
    }

    /// Wrap an existing connection, applying pending migrations
    pub fn from_connection(mut conn: Connection) -> Result<Self> {
        apply_migrations(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            encryption: None,
            default_limit: DEFAULT_LIST_LIMIT,
        })
    }

    /// Decrypt payload, snapshot and context columns on read
    pub fn with_encryption(mut self, encryption: Arc<dyn TenantEncryption>) -> Self {
        self.encryption = Some(encryption);
        self
    }

    /// Page size for queries without a limit; clamped to [`MAX_LIST_LIMIT`]
    pub fn with_default_limit(mut self, limit: usize) -> Self {
        self.default_limit = limit.clamp(1, MAX_LIST_LIMIT);
        self
    }

    pub fn default_limit(&self) -> usize {
        self.default_limit
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| lock_poisoned())
    }

    fn query_one(&self, sql: &str, params: Vec<SqlValue>) -> Result<Option<ActionLogEntry>> {
        let raw = {
            let conn = self.conn()?;
            conn.query_row(sql, params_from_iter(params), RawEntry::from_row)
                .optional()
                .map_err(from_rusqlite)?
        };
        raw.map(|r| self.decode(r)).transpose()
    }

    fn query_many(&self, sql: &str, params: Vec<SqlValue>) -> Result<Vec<ActionLogEntry>> {
        let raws = {
            let conn = self.conn()?;
            let mut stmt = conn.prepare(sql).map_err(from_rusqlite)?;
            let rows = stmt
                .query_map(params_from_iter(params), RawEntry::from_row)
                .map_err(from_rusqlite)?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(from_rusqlite)?;
            rows
        };
        raws.into_iter().map(|r| self.decode(r)).collect()
    }

    fn decode(&self, raw: RawEntry) -> Result<ActionLogEntry> {
        let execution_state = ExecutionState::parse(&raw.execution_state).ok_or_else(|| {
            corrupt_column(&raw.id, "execution_state", &raw.execution_state)
        })?;

        let command_payload = parse_json(&raw.id, "command_payload", raw.command_payload)?;
        let snapshot_before = parse_json(&raw.id, "snapshot_before", raw.snapshot_before)?;
        let snapshot_after = parse_json(&raw.id, "snapshot_after", raw.snapshot_after)?;
        let context = parse_json(&raw.id, "context_json", raw.context_json)?;
        let changes: Option<Changes> = raw
            .changes_json
            .map(|text| serde_json::from_str(&text))
            .transpose()
            .map_err(|e| corrupt_column(&raw.id, "changes_json", e))?;

        let tenant = raw.tenant_id.as_deref();
        let org = raw.organization_id.as_deref();

        Ok(ActionLogEntry {
            command_payload: self.decrypt(tenant, org, command_payload),
            snapshot_before: self.decrypt(tenant, org, snapshot_before),
            snapshot_after: self.decrypt(tenant, org, snapshot_after),
            context: self.decrypt(tenant, org, context),
            changes,
            created_at: from_millis(&raw.id, "created_at", raw.created_at)?,
            updated_at: from_millis(&raw.id, "updated_at", raw.updated_at)?,
            undo_token: raw.undo_token.map(UndoToken::from_string),
            execution_state,
            id: raw.id,
            command_id: raw.command_id,
            action_label: raw.action_label,
            resource_kind: raw.resource_kind,
            resource_id: raw.resource_id,
            parent_resource_kind: raw.parent_resource_kind,
            parent_resource_id: raw.parent_resource_id,
            tenant_id: raw.tenant_id,
            organization_id: raw.organization_id,
            actor_user_id: raw.actor_user_id,
        })
    }

    fn decrypt(&self, tenant: Option<&str>, org: Option<&str>, value: Option<Value>) -> Option<Value> {
        let Some(encryption) = &self.encryption else {
            return value;
        };
        let stored = value?;
        match encryption.decrypt_value(tenant, org, &stored) {
            Ok(plain) => Some(plain),
            Err(err) => {
                if !DECRYPT_FAILURE_REPORTED.swap(true, Ordering::Relaxed) {
                    tracing::warn!(
                        event = cmdbus_core::schema::EVENT_DEGRADED,
                        err.code = err.code(),
                        reason = err.message(),
                        "action log decrypt failed; returning stored values"
                    );
                }
                Some(stored)
            }
        }
    }

    /// Explain why a conditional transition matched no row
    /// Conditional `from` → `to`; the state sequence advances so the entry
    /// sorts as the most recent transition.
    fn flip_state(
        &self,
        id: &str,
        from: ExecutionState,
        to: ExecutionState,
    ) -> Result<ActionLogEntry> {
        let changed = {
            let conn = self.conn()?;
            conn.execute(
                "UPDATE action_logs
                 SET execution_state = ?1,
                     updated_at = ?2,
                     state_seq = (SELECT COALESCE(MAX(state_seq), 0) + 1 FROM action_logs)
                 WHERE id = ?3 AND execution_state = ?4",
                rusqlite::params![to.as_str(), Utc::now().timestamp_millis(), id, from.as_str()],
            )
            .map_err(from_rusqlite)?
        };

        if changed == 0 {
            return Err(self.transition_failure(id, from));
        }

        self.find_by_id(id)?.ok_or_else(|| {
            CommandError::EntryNotFound {
                log_id: id.to_string(),
            }
            .into()
        })
    }

    fn transition_failure(&self, id: &str, expected: ExecutionState) -> ExError {
        match self.find_by_id(id) {
            Ok(Some(entry)) => CommandError::EntryStateMismatch {
                log_id: id.to_string(),
                state: entry.execution_state.to_string(),
                expected: expected.to_string(),
            }
            .into(),
            Ok(None) => CommandError::EntryNotFound {
                log_id: id.to_string(),
            }
            .into(),
            Err(err) => err,
        }
    }
}

impl ActionLogStore for SqliteActionLogStore {
    fn log(&self, entry: NewActionLogEntry) -> Result<ActionLogEntry> {
        if entry.undo_token.is_some() && entry.execution_state != ExecutionState::Done {
            return Err(ExError::new(ExErrorKind::Internal)
                .with_op("action_log_append")
                .with_command_id(entry.command_id)
                .with_message("Only done entries may carry an undo token"));
        }

        let id = uuid::Uuid::now_v7().to_string();
        let now = Utc::now().timestamp_millis();

        {
            let conn = self.conn()?;
            conn.execute(
                &format!(
                    "INSERT INTO action_logs ({}) VALUES \
                     (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
                    COLUMNS
                ),
                rusqlite::params![
                    id,
                    entry.command_id,
                    entry.action_label,
                    entry.resource_kind,
                    entry.resource_id,
                    entry.parent_resource_kind,
                    entry.parent_resource_id,
                    entry.tenant_id,
                    entry.organization_id,
                    entry.actor_user_id,
                    entry.execution_state.as_str(),
                    entry.undo_token.as_ref().map(UndoToken::expose),
                    to_json_text(entry.command_payload.as_ref())?,
                    to_json_text(entry.snapshot_before.as_ref())?,
                    to_json_text(entry.snapshot_after.as_ref())?,
                    entry
                        .changes
                        .as_ref()
                        .map(serde_json::to_string)
                        .transpose()?,
                    to_json_text(entry.context.as_ref())?,
                    now,
                    now,
                ],
            )
            .map_err(from_rusqlite)?;
        }

        tracing::debug!(log_id = %id, command_id = %entry.command_id, "action log entry appended");

        self.find_by_id(&id)?.ok_or_else(|| {
            CommandError::Internal {
                message: format!("appended action log entry {} could not be read back", id),
            }
            .into()
        })
    }

    fn list(&self, query: &ActionLogQuery) -> Result<Vec<ActionLogEntry>> {
        let mut clauses: Vec<String> = Vec::new();
        let mut params: Vec<SqlValue> = Vec::new();

        let mut eq = |column: &str, value: &Option<String>| {
            if let Some(v) = value {
                params.push(SqlValue::Text(v.clone()));
                clauses.push(format!("{} = ?{}", column, params.len()));
            }
        };
        eq("tenant_id", &query.tenant_id);
        eq("organization_id", &query.organization_id);
        eq("actor_user_id", &query.actor_user_id);
        eq("resource_kind", &query.resource_kind);
        eq("resource_id", &query.resource_id);

        if !query.organization_ids.is_empty() {
            let placeholders = query
                .organization_ids
                .iter()
                .map(|org| {
                    params.push(SqlValue::Text(org.clone()));
                    format!("?{}", params.len())
                })
                .collect::<Vec<_>>()
                .join(", ");
            clauses.push(format!("organization_id IN ({})", placeholders));
        }

        if !query.states.is_empty() {
            let placeholders = query
                .states
                .iter()
                .map(|state| {
                    params.push(SqlValue::Text(state.as_str().to_string()));
                    format!("?{}", params.len())
                })
                .collect::<Vec<_>>()
                .join(", ");
            clauses.push(format!("execution_state IN ({})", placeholders));
        }

        if query.undoable_only {
            clauses.push("undo_token IS NOT NULL".to_string());
        }
        if query.exclude_undone {
            clauses.push("execution_state <> 'undone'".to_string());
        }

        let limit = query
            .limit
            .unwrap_or(self.default_limit)
            .clamp(1, MAX_LIST_LIMIT);
        params.push(SqlValue::Integer(limit as i64));

        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let sql = format!(
            "SELECT {} FROM action_logs {} ORDER BY created_at DESC, id DESC LIMIT ?{}",
            COLUMNS,
            where_sql,
            params.len()
        );

        self.query_many(&sql, params)
    }

    fn find_by_id(&self, id: &str) -> Result<Option<ActionLogEntry>> {
        self.query_one(
            &format!("SELECT {} FROM action_logs WHERE id = ?1", COLUMNS),
            vec![SqlValue::Text(id.to_string())],
        )
    }

    fn find_by_undo_token(&self, token: &UndoToken) -> Result<Option<ActionLogEntry>> {
        self.query_one(
            &format!("SELECT {} FROM action_logs WHERE undo_token = ?1", COLUMNS),
            vec![SqlValue::Text(token.expose().to_string())],
        )
    }

    fn latest_undoable_for_actor(&self, scope: &ActorScope) -> Result<Option<ActionLogEntry>> {
        let (scope_sql, params) = scope_filter(scope);
        self.query_one(
            &format!(
                "SELECT {} FROM action_logs WHERE {} \
                 AND execution_state = 'done' AND undo_token IS NOT NULL \
                 ORDER BY created_at DESC, id DESC LIMIT 1",
                COLUMNS, scope_sql
            ),
            params,
        )
    }

    fn latest_undoable_for_resource(
        &self,
        scope: &ActorScope,
        resource_kind: &str,
        resource_id: &str,
    ) -> Result<Option<ActionLogEntry>> {
        let (scope_sql, mut params) = scope_filter(scope);
        params.push(SqlValue::Text(resource_kind.to_string()));
        let kind_idx = params.len();
        params.push(SqlValue::Text(resource_id.to_string()));
        let id_idx = params.len();

        self.query_one(
            &format!(
                "SELECT {} FROM action_logs WHERE {} \
                 AND resource_kind = ?{} AND resource_id = ?{} \
                 AND execution_state = 'done' AND undo_token IS NOT NULL \
                 ORDER BY created_at DESC, id DESC LIMIT 1",
                COLUMNS, scope_sql, kind_idx, id_idx
            ),
            params,
        )
    }

    fn latest_undone_for_actor(&self, scope: &ActorScope) -> Result<Option<ActionLogEntry>> {
        let (scope_sql, params) = scope_filter(scope);
        self.query_one(
            &format!(
                "SELECT {} FROM action_logs WHERE {} AND execution_state = 'undone' \
                 ORDER BY state_seq DESC, updated_at DESC, id DESC LIMIT 1",
                COLUMNS, scope_sql
            ),
            params,
        )
    }

    fn mark_undone(&self, id: &str, token: &UndoToken) -> Result<ActionLogEntry> {
        let changed = {
            let conn = self.conn()?;
            conn.execute(
                "UPDATE action_logs
                 SET execution_state = 'undone',
                     undo_token = NULL,
                     updated_at = ?1,
                     state_seq = (SELECT COALESCE(MAX(state_seq), 0) + 1 FROM action_logs)
                 WHERE id = ?2 AND undo_token = ?3 AND execution_state = 'done'",
                rusqlite::params![Utc::now().timestamp_millis(), id, token.expose()],
            )
            .map_err(from_rusqlite)?
        };

        if changed == 0 {
            return Err(self.transition_failure(id, ExecutionState::Done));
        }

        self.find_by_id(id)?.ok_or_else(|| {
            CommandError::EntryNotFound {
                log_id: id.to_string(),
            }
            .into()
        })
    }

    fn mark_redone(&self, id: &str) -> Result<ActionLogEntry> {
        self.flip_state(id, ExecutionState::Undone, ExecutionState::Redone)
    }

    fn reopen_redone(&self, id: &str) -> Result<ActionLogEntry> {
        self.flip_state(id, ExecutionState::Redone, ExecutionState::Undone)
    }
}

/// Row as stored, before JSON decoding and decryption
struct RawEntry {
    id: String,
    command_id: String,
    action_label: Option<String>,
    resource_kind: Option<String>,
    resource_id: Option<String>,
    parent_resource_kind: Option<String>,
    parent_resource_id: Option<String>,
    tenant_id: Option<String>,
    organization_id: Option<String>,
    actor_user_id: Option<String>,
    execution_state: String,
    undo_token: Option<String>,
    command_payload: Option<String>,
    snapshot_before: Option<String>,
    snapshot_after: Option<String>,
    changes_json: Option<String>,
    context_json: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl RawEntry {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            command_id: row.get(1)?,
            action_label: row.get(2)?,
            resource_kind: row.get(3)?,
            resource_id: row.get(4)?,
            parent_resource_kind: row.get(5)?,
            parent_resource_id: row.get(6)?,
            tenant_id: row.get(7)?,
            organization_id: row.get(8)?,
            actor_user_id: row.get(9)?,
            execution_state: row.get(10)?,
            undo_token: row.get(11)?,
            command_payload: row.get(12)?,
            snapshot_before: row.get(13)?,
            snapshot_after: row.get(14)?,
            changes_json: row.get(15)?,
            context_json: row.get(16)?,
            created_at: row.get(17)?,
            updated_at: row.get(18)?,
        })
    }
}

/// `WHERE` fragment for an actor scope; parameters are numbered from 1
fn scope_filter(scope: &ActorScope) -> (String, Vec<SqlValue>) {
    let mut params = vec![SqlValue::Text(scope.actor_user_id.clone())];
    let mut sql = String::from("actor_user_id = ?1");

    params.push(
        scope
            .tenant_id
            .clone()
            .map(SqlValue::Text)
            .unwrap_or(SqlValue::Null),
    );
    sql.push_str(&format!(" AND tenant_id IS ?{}", params.len()));

    if let Some(org) = &scope.organization_id {
        params.push(SqlValue::Text(org.clone()));
        sql.push_str(&format!(" AND organization_id IS ?{}", params.len()));
    }

    (sql, params)
}

fn to_json_text(value: Option<&Value>) -> Result<Option<String>> {
    Ok(value.map(serde_json::to_string).transpose()?)
}

fn parse_json(id: &str, column: &str, text: Option<String>) -> Result<Option<Value>> {
    text.map(|t| serde_json::from_str(&t))
        .transpose()
        .map_err(|e| corrupt_column(id, column, e))
}

fn from_millis(id: &str, column: &str, millis: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| corrupt_column(id, column, millis))
}
