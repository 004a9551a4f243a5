//! Undo payload codec
//!
//! Commands store their reversal data in several shapes. This module is the
//! single place that knows them; undo handlers receive an already resolved
//! [`UndoPayload`].
//!
//! Resolution order over an entry's `command_payload`:
//!
//! 1. `payload.undo`
//! 2. `payload.value.undo`
//! 3. the first property (other than `__redoInput`) that has an `undo` key
//! 4. `{before: snapshot_before, after: snapshot_after}` when either exists

use crate::action_log::{ActionLogEntry, REDO_INPUT_KEY, UNDO_KEY};
use crate::errors::{CommandError, ExError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Where an undo envelope was found
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeSource {
    /// `payload.undo`
    Root,
    /// `payload.value.undo`
    Value,
    /// `payload.<key>.undo`
    Property(String),
}

/// Resolved undo data for one action log entry
#[derive(Debug, Clone, PartialEq)]
pub enum UndoPayload {
    /// A command-specific value stored under an `undo` key
    Envelope { source: EnvelopeSource, value: Value },
    /// No envelope; rebuilt from the entry's snapshots
    Snapshots {
        before: Option<Value>,
        after: Option<Value>,
    },
}

/// Conventional `{before, after}` shape of an undo envelope
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BeforeAfter<T> {
    pub before: Option<T>,
    pub after: Option<T>,
}

impl UndoPayload {
    /// `before` state, for either shape
    pub fn before(&self) -> Option<&Value> {
        match self {
            UndoPayload::Envelope { value, .. } => value.get("before").filter(|v| !v.is_null()),
            UndoPayload::Snapshots { before, .. } => before.as_ref(),
        }
    }

    /// `after` state, for either shape
    pub fn after(&self) -> Option<&Value> {
        match self {
            UndoPayload::Envelope { value, .. } => value.get("after").filter(|v| !v.is_null()),
            UndoPayload::Snapshots { after, .. } => after.as_ref(),
        }
    }

    /// The payload as a single JSON value
    pub fn to_value(&self) -> Value {
        match self {
            UndoPayload::Envelope { value, .. } => value.clone(),
            UndoPayload::Snapshots { before, after } => serde_json::json!({
                "before": before,
                "after": after,
            }),
        }
    }

    /// Deserialize into a command-specific type
    ///
    /// # Errors
    ///
    /// Returns `Serialization` when the stored shape does not match `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.to_value()).map_err(|e| {
            ExError::from(CommandError::Serialization {
                message: format!("undo payload does not match expected shape: {}", e),
            })
            .with_op("decode_undo_payload")
        })
    }

    /// Deserialize as `{before, after}` of `T`
    ///
    /// # Errors
    ///
    /// Returns `Serialization` when either side does not match `T`.
    pub fn before_after<T: DeserializeOwned>(&self) -> Result<BeforeAfter<T>> {
        self.decode()
    }
}

/// Resolve the undo payload stored on an entry, or `None` when there is none
pub fn resolve_undo_payload(entry: &ActionLogEntry) -> Option<UndoPayload> {
    resolve_parts(
        entry.command_payload.as_ref(),
        entry.snapshot_before.as_ref(),
        entry.snapshot_after.as_ref(),
    )
}

/// Resolution over the raw parts, for callers that have no full entry
pub fn resolve_parts(
    command_payload: Option<&Value>,
    snapshot_before: Option<&Value>,
    snapshot_after: Option<&Value>,
) -> Option<UndoPayload> {
    if let Some(Value::Object(payload)) = command_payload {
        if let Some(undo) = payload.get(UNDO_KEY).filter(|v| !v.is_null()) {
            return Some(UndoPayload::Envelope {
                source: EnvelopeSource::Root,
                value: undo.clone(),
            });
        }

        if let Some(undo) = payload
            .get("value")
            .and_then(|v| v.get(UNDO_KEY))
            .filter(|v| !v.is_null())
        {
            return Some(UndoPayload::Envelope {
                source: EnvelopeSource::Value,
                value: undo.clone(),
            });
        }

        let nested = payload
            .iter()
            .filter(|(key, _)| key.as_str() != REDO_INPUT_KEY && key.as_str() != "value")
            .find_map(|(key, v)| {
                v.as_object()
                    .and_then(|o| o.get(UNDO_KEY))
                    .filter(|u| !u.is_null())
                    .map(|u| (key.clone(), u.clone()))
            });
        if let Some((key, value)) = nested {
            return Some(UndoPayload::Envelope {
                source: EnvelopeSource::Property(key),
                value,
            });
        }
    }

    let before = snapshot_before.filter(|v| !v.is_null()).cloned();
    let after = snapshot_after.filter(|v| !v.is_null()).cloned();
    if before.is_some() || after.is_some() {
        return Some(UndoPayload::Snapshots { before, after });
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_root_undo_wins() {
        let payload = json!({
            "undo": {"before": {"name": "A"}},
            "value": {"undo": {"before": {"name": "B"}}},
        });
        let resolved = resolve_parts(Some(&payload), None, None).unwrap();

        assert!(matches!(
            resolved,
            UndoPayload::Envelope { source: EnvelopeSource::Root, .. }
        ));
        assert_eq!(resolved.before(), Some(&json!({"name": "A"})));
    }

    #[test]
    fn test_value_nested_undo() {
        let payload = json!({"value": {"undo": {"after": {"id": "w1"}}}});
        let resolved = resolve_parts(Some(&payload), None, None).unwrap();

        assert!(matches!(
            resolved,
            UndoPayload::Envelope { source: EnvelopeSource::Value, .. }
        ));
        assert_eq!(resolved.after(), Some(&json!({"id": "w1"})));
    }

    #[test]
    fn test_property_nested_undo_skips_redo_input() {
        let payload = json!({
            "__redoInput": {"undo": "not me"},
            "currency": {"undo": {"before": {"code": "EUR"}}},
        });
        let resolved = resolve_parts(Some(&payload), None, None).unwrap();

        assert_eq!(
            resolved,
            UndoPayload::Envelope {
                source: EnvelopeSource::Property("currency".to_string()),
                value: json!({"before": {"code": "EUR"}}),
            }
        );
    }

    #[test]
    fn test_snapshot_fallback() {
        let before = json!({"name": "Old"});
        let resolved = resolve_parts(Some(&json!({})), Some(&before), None).unwrap();

        assert_eq!(resolved.before(), Some(&before));
        assert_eq!(resolved.after(), None);
    }

    #[test]
    fn test_nothing_resolves_to_none() {
        assert_eq!(resolve_parts(None, None, None), None);
        assert_eq!(
            resolve_parts(Some(&json!({"__redoInput": {}})), Some(&Value::Null), None),
            None
        );
    }

    #[test]
    fn test_decode_typed_before_after() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct Widget {
            id: String,
            name: String,
        }

        let payload = json!({"undo": {"before": {"id": "w1", "name": "Old"}, "after": null}});
        let resolved = resolve_parts(Some(&payload), None, None).unwrap();
        let typed: BeforeAfter<Widget> = resolved.before_after().unwrap();

        assert_eq!(
            typed.before,
            Some(Widget {
                id: "w1".to_string(),
                name: "Old".to_string()
            })
        );
        assert!(typed.after.is_none());
    }

    #[test]
    fn test_decode_missing_side_is_none() {
        let payload = json!({"undo": {"after": {"id": "w9"}}});
        let resolved = resolve_parts(Some(&payload), None, None).unwrap();
        let typed: BeforeAfter<Value> = resolved.before_after().unwrap();

        assert!(typed.before.is_none());
        assert_eq!(typed.after, Some(json!({"id": "w9"})));
    }

    #[test]
    fn test_nested_undo_follows_stored_key_order() {
        let payload: Value = serde_json::from_str(
            r#"{"zeta": {"undo": {"before": {"n": 1}}}, "alpha": {"undo": {"before": {"n": 2}}}}"#,
        )
        .unwrap();
        let resolved = resolve_parts(Some(&payload), None, None).unwrap();

        assert!(matches!(
            &resolved,
            UndoPayload::Envelope { source: EnvelopeSource::Property(key), .. } if key == "zeta"
        ));
        assert_eq!(resolved.before(), Some(&json!({"n": 1})));
    }

    #[test]
    fn test_decode_shape_mismatch_is_serialization_error() {
        let resolved = resolve_parts(Some(&json!({"undo": "plain"})), None, None).unwrap();
        let err = resolved.decode::<BeforeAfter<u32>>().unwrap_err();
        assert_eq!(err.kind(), crate::errors::ExErrorKind::Serialization);
    }
}
