//! Constructors mapping SQLite and migration failures onto `ExError`

use cmdbus_core::errors::{ExError, ExErrorKind};

pub type Result<T> = std::result::Result<T, ExError>;

/// A migration body failed to execute; the transaction is rolled back
pub fn migration_error(migration_id: &str, reason: &str) -> ExError {
    ExError::new(ExErrorKind::Persistence)
        .with_op("migration")
        .with_message(format!("Migration {} failed: {}", migration_id, reason))
}

/// The recorded body of an applied migration differs from the embedded one
pub fn checksum_mismatch(migration_id: &str, expected: &str, actual: &str) -> ExError {
    ExError::new(ExErrorKind::Configuration)
        .with_op("migration_checksum")
        .with_message(format!(
            "Checksum mismatch for migration {}: recorded {}, embedded {}",
            migration_id, expected, actual
        ))
}

pub fn from_rusqlite(err: rusqlite::Error) -> ExError {
    ExError::new(ExErrorKind::Persistence)
        .with_op("sqlite")
        .with_message(err.to_string())
}

/// A stored column could not be decoded
pub fn corrupt_column(log_id: &str, column: &str, reason: impl std::fmt::Display) -> ExError {
    ExError::new(ExErrorKind::Serialization)
        .with_op("action_log_decode")
        .with_log_id(log_id)
        .with_message(format!("Column {} is not decodable: {}", column, reason))
}

/// The connection mutex was poisoned by a panicking writer
pub fn lock_poisoned() -> ExError {
    ExError::new(ExErrorKind::Internal)
        .with_op("sqlite_lock")
        .with_message("Action log connection lock poisoned")
}
