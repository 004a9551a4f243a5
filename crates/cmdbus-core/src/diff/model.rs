//! Diff output types.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Before/after values of one changed field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub from: Value,
    pub to: Value,
}

impl FieldChange {
    pub fn new(from: Value, to: Value) -> Self {
        Self { from, to }
    }
}

/// Changed fields keyed by field name (`cf_<key>` for custom fields)
///
/// `BTreeMap` keeps serialization order deterministic.
pub type Changes = BTreeMap<String, FieldChange>;
