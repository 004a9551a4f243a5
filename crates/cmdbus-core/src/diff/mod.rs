//! Field-level diff engine.
//!
//! Compares a before/after pair of entity snapshots and reports, per field,
//! the `{from, to}` values that differ.
//!
//! ## Entry points
//!
//! ```
//! use cmdbus_core::diff::build_changes;
//! use serde_json::json;
//!
//! let changes = build_changes(
//!     Some(&json!({"a": 1, "b": 2, "updatedAt": "t0"})),
//!     Some(&json!({"a": 1, "b": 3, "updatedAt": "t1"})),
//!     &["a", "b", "updatedAt"],
//! );
//! assert_eq!(changes.len(), 1);
//! assert_eq!(changes["b"].from, json!(2));
//! ```
//!
//! ## Rules
//!
//! - `updatedAt`-style bookkeeping fields are never reported.
//! - Timestamps compare by instant, whatever their representation.
//! - `null` and `{}` differ.
//! - A `customFields` container is reported as synthetic `cf_<key>` fields.
//! - A missing `before` snapshot yields no changes.
//! - Cyclic snapshots ([`SnapshotGraph`]) are compared with a seen-set of
//!   node pairs; a revisited pair counts as equal.

pub mod engine;
pub mod graph;
pub mod model;

pub use engine::{build_changes, build_graph_changes, discover_fields, is_bookkeeping_field};
pub use graph::{Node, NodeId, SnapshotGraph};
pub use model::{Changes, FieldChange};
