//! cmdbus Store - SQLite persistence for the action log
//!
//! Provides:
//! - SQLite connection helpers and an embedded, checksummed migration runner
//! - `SqliteActionLogStore`, the `ActionLogStore` implementation the bus writes through
//! - `MemoryUnitOfWork`, an in-memory unit-of-work provider for tests and tooling

pub mod action_log;
pub mod db;
pub mod errors;
pub mod migrations;
pub mod unit_of_work;

// Re-export key types
pub use action_log::{SqliteActionLogStore, DEFAULT_LIST_LIMIT, MAX_LIST_LIMIT};
pub use errors::Result;
pub use unit_of_work::MemoryUnitOfWork;
