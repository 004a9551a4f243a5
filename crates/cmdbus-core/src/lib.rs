//! cmdbus Core - command model, audit model and pure algorithms
//!
//! This crate holds everything the command bus needs that does not touch
//! storage:
//! - Command registry and the descriptor/handler model
//! - Execution context and typed service container
//! - Action log model and the `ActionLogStore` persistence seam
//! - Field-level diff engine (cycle-safe)
//! - Undo payload codec
//! - Collaborator seams: unit of work, tenant encryption, cache invalidation
//! - Error and logging facilities shared by every cmdbus crate

pub mod action_log;
pub mod collaborators;
pub mod context;
pub mod diff;
pub mod errors;
pub mod logging_facility;
pub mod registry;
pub mod undo_payload;

// Logging macros reference `$crate::schema`
pub use cmdbus_core_types::schema;

// Re-export commonly used types
pub use action_log::{
    ActionLogEntry, ActionLogQuery, ActionLogStore, ActorScope, ExecutionState, LogEntryMetadata,
    LogPayload, NewActionLogEntry,
};
pub use collaborators::{
    CacheInvalidation, CacheInvalidator, NoopCacheInvalidator, TenantEncryption, UnitOfWork,
    UnitOfWorkProvider,
};
pub use context::{AuthContext, ExecutionContext, OrganizationScope, ServiceContainer};
pub use errors::{CommandError, ExError, ExErrorKind, Result};
pub use registry::{BuildLogArgs, CommandDescriptor, CommandRegistry, Snapshots, UndoArgs};
pub use undo_payload::{resolve_undo_payload, UndoPayload};
