//! cmdbus Engine - Orchestration layer
//!
//! Provides the command bus (execute/undo), the redo protocol composed on
//! top of it, engine configuration and the bootstrap that wires a registry,
//! an action log store and a cache invalidator together.

pub mod bootstrap;
pub mod bus;
pub mod config;
pub mod redo;

pub use bootstrap::{Engine, EngineBuilder};
pub use bus::{CommandBus, ExecuteOutcome};
pub use config::EngineConfig;
pub use redo::{redo, redo_latest};
