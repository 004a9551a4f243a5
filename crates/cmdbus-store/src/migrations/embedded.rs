//! Embedded SQL migrations
//!
//! Bodies are compiled into the binary; once released a body must never
//! change, the runner rejects databases whose recorded checksum differs.

/// Migration metadata
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub id: &'static str,
    pub sql: &'static str,
}

const ACTION_LOGS: &str = r#"
CREATE TABLE action_logs (
    id                   TEXT PRIMARY KEY,
    command_id           TEXT NOT NULL,
    action_label         TEXT,
    resource_kind        TEXT,
    resource_id          TEXT,
    parent_resource_kind TEXT,
    parent_resource_id   TEXT,
    tenant_id            TEXT,
    organization_id      TEXT,
    actor_user_id        TEXT,
    execution_state      TEXT NOT NULL
        CHECK (execution_state IN ('done', 'undone', 'redone', 'failed')),
    undo_token           TEXT,
    command_payload      TEXT,
    snapshot_before      TEXT,
    snapshot_after       TEXT,
    changes_json         TEXT,
    context_json         TEXT,
    state_seq            INTEGER NOT NULL DEFAULT 0,
    created_at           INTEGER NOT NULL,
    updated_at           INTEGER NOT NULL,
    CHECK (undo_token IS NULL OR execution_state = 'done')
);

CREATE INDEX idx_action_logs_actor
    ON action_logs (tenant_id, actor_user_id, execution_state, created_at);

CREATE INDEX idx_action_logs_resource
    ON action_logs (resource_kind, resource_id);

CREATE UNIQUE INDEX idx_action_logs_undo_token
    ON action_logs (undo_token) WHERE undo_token IS NOT NULL;
"#;

/// Get all embedded migrations in order
pub fn get_migrations() -> Vec<Migration> {
    vec![Migration {
        id: "001_action_logs",
        sql: ACTION_LOGS,
    }]
}
