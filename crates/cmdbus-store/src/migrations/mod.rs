//! Schema migrations for the action log database
//!
//! Bodies are compiled into the binary; `schema_version` tracks what has run.

mod checksums;
mod embedded;
mod runner;

pub use embedded::{get_migrations, Migration};
pub use runner::{applied_migrations, apply_migrations, AppliedMigration};
