//! Core types shared across cmdbus crates
//!
//! This crate provides foundational types used by the error facility,
//! the logging facility and the action log:
//!
//! - **Correlation types**: RequestId, TraceId, RequestContext
//! - **Undo tokens**: UndoToken, a single-use credential that never prints itself
//! - **Schema constants**: Canonical field keys and event names

pub mod correlation;
pub mod schema;
pub mod token;

pub use correlation::{RequestContext, RequestId, TraceId};
pub use token::UndoToken;
