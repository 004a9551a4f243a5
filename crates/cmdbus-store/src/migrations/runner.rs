//! Migration runner
//!
//! Applies embedded migrations in order, each in its own transaction, and
//! records them in `schema_version` with their checksum. Re-running is a
//! no-op; a recorded checksum that no longer matches the embedded body is an
//! error.

#![allow(clippy::result_large_err)]

use crate::errors::{checksum_mismatch, from_rusqlite, migration_error, Result};
use crate::migrations::checksums::compute_checksum;
use crate::migrations::embedded::get_migrations;
use rusqlite::{Connection, OptionalExtension};

/// A row of `schema_version`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMigration {
    pub migration_id: String,
    pub applied_at: i64,
    pub checksum: Option<String>,
}

/// Apply pending migrations, returning the ids applied by this call
///
/// An empty result means the schema was already current.
pub fn apply_migrations(conn: &mut Connection) -> Result<Vec<&'static str>> {
    create_schema_version_table(conn)?;

    let mut applied = Vec::new();
    for migration in get_migrations() {
        match recorded_state(conn, migration.id, migration.sql)? {
            RecordedState::Current => {}
            RecordedState::Pending => {
                apply_migration(conn, migration.id, migration.sql)?;
                applied.push(migration.id);
            }
        }
    }

    Ok(applied)
}

/// Migrations recorded in `schema_version`, oldest first
pub fn applied_migrations(conn: &Connection) -> Result<Vec<AppliedMigration>> {
    create_schema_version_table(conn)?;

    let mut stmt = conn
        .prepare("SELECT migration_id, applied_at, checksum FROM schema_version ORDER BY id")
        .map_err(from_rusqlite)?;
    let rows = stmt
        .query_map([], |row| {
            Ok(AppliedMigration {
                migration_id: row.get(0)?,
                applied_at: row.get(1)?,
                checksum: row.get(2)?,
            })
        })
        .map_err(from_rusqlite)?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(from_rusqlite)?;

    Ok(rows)
}

fn create_schema_version_table(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            id INTEGER PRIMARY KEY,
            migration_id TEXT NOT NULL UNIQUE,
            applied_at INTEGER NOT NULL,
            checksum TEXT
        )",
        [],
    )
    .map_err(from_rusqlite)?;

    Ok(())
}

enum RecordedState {
    Pending,
    Current,
}

fn recorded_state(conn: &Connection, migration_id: &str, sql: &str) -> Result<RecordedState> {
    let recorded: Option<Option<String>> = conn
        .query_row(
            "SELECT checksum FROM schema_version WHERE migration_id = ?1",
            [migration_id],
            |row| row.get(0),
        )
        .optional()
        .map_err(from_rusqlite)?;

    match recorded {
        None => Ok(RecordedState::Pending),
        // Rows written before checksums were tracked are trusted.
        Some(None) => Ok(RecordedState::Current),
        Some(Some(existing)) => {
            let embedded = compute_checksum(sql);
            if existing == embedded {
                Ok(RecordedState::Current)
            } else {
                Err(checksum_mismatch(migration_id, &existing, &embedded))
            }
        }
    }
}

fn apply_migration(conn: &mut Connection, migration_id: &str, sql: &str) -> Result<()> {
    let tx = conn.transaction().map_err(from_rusqlite)?;
    tx.execute_batch(sql)
        .map_err(|e| migration_error(migration_id, &e.to_string()))?;
    tx.execute(
        "INSERT INTO schema_version (migration_id, applied_at, checksum) VALUES (?1, ?2, ?3)",
        rusqlite::params![
            migration_id,
            chrono::Utc::now().timestamp(),
            compute_checksum(sql)
        ],
    )
    .map_err(from_rusqlite)?;
    tx.commit().map_err(from_rusqlite)?;

    tracing::debug!(migration_id, "migration applied");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_run_applies_nothing() {
        let mut conn = Connection::open_in_memory().unwrap();
        assert_eq!(apply_migrations(&mut conn).unwrap(), vec!["001_action_logs"]);
        assert!(apply_migrations(&mut conn).unwrap().is_empty());
        assert_eq!(applied_migrations(&conn).unwrap().len(), 1);
    }

    #[test]
    fn test_tampered_checksum_is_rejected() {
        let mut conn = Connection::open_in_memory().unwrap();
        apply_migrations(&mut conn).unwrap();
        conn.execute(
            "UPDATE schema_version SET checksum = 'deadbeef' WHERE migration_id = '001_action_logs'",
            [],
        )
        .unwrap();

        let err = apply_migrations(&mut conn).unwrap_err();
        assert_eq!(err.kind(), cmdbus_core::ExErrorKind::Configuration);
    }
}
