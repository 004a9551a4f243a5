//! Field-level change computation.
//!
//! [`build_changes`] is the JSON entry point the bus uses; it imports both
//! snapshots into [`SnapshotGraph`]s and delegates to [`build_graph_changes`],
//! so tree and cyclic inputs share one comparison routine.

use crate::diff::graph::{Node, NodeId, SnapshotGraph};
use crate::diff::model::{Changes, FieldChange};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{BTreeSet, HashSet};

/// Field names treated as a dynamic custom-fields container
const CUSTOM_FIELDS_KEYS: &[&str] = &["customFields", "custom_fields"];

/// Prefix of the synthetic fields a custom-fields container is flattened into
const CUSTOM_FIELD_PREFIX: &str = "cf_";

/// Whether `field` is `updatedAt`-style bookkeeping (`updatedAt`, `updated_at`, `UPDATED-AT`, ...)
pub fn is_bookkeeping_field(field: &str) -> bool {
    let normalized: String = field
        .chars()
        .filter(|c| *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect();
    normalized == "updatedat"
}

/// Whether integers stored under `field` may be epoch milliseconds
///
/// Matches `createdAt`, `due_at`, `startTime`, `birthDate`, `timestamp`, `epoch`.
fn is_time_like_field(field: &str) -> bool {
    let lower = field.to_lowercase();
    if lower.ends_with("timestamp") || ["epoch", "date", "time"].contains(&lower.as_str()) {
        return true;
    }
    ["At", "Date", "Time"].iter().any(|s| field.ends_with(s))
        || ["_at", "-at", "_date", "_time"].iter().any(|s| lower.ends_with(s))
}

fn is_custom_fields_container(field: &str) -> bool {
    CUSTOM_FIELDS_KEYS.contains(&field)
}

/// Sorted union of the top-level keys of both snapshots, minus bookkeeping
///
/// Used when a command declares no explicit diff allowlist.
pub fn discover_fields(before: Option<&Value>, after: Option<&Value>) -> Vec<String> {
    let mut fields = BTreeSet::new();
    for snapshot in [before, after].into_iter().flatten() {
        if let Value::Object(map) = snapshot {
            fields.extend(
                map.keys()
                    .filter(|k| !is_bookkeeping_field(k))
                    .cloned(),
            );
        }
    }
    fields.into_iter().collect()
}

/// Compute `{field: {from, to}}` for every allowlisted field that differs
///
/// A missing or `null` `before` yields an empty map. Missing fields read as
/// `null`.
pub fn build_changes<S: AsRef<str>>(
    before: Option<&Value>,
    after: Option<&Value>,
    allowlist: &[S],
) -> Changes {
    let before = match before {
        None | Some(Value::Null) => return Changes::new(),
        Some(v) => SnapshotGraph::from_value(v),
    };
    let after = after.map(SnapshotGraph::from_value);
    build_graph_changes(Some(&before), after.as_ref(), allowlist)
}

/// [`build_changes`] over arena graphs, which may contain cycles
pub fn build_graph_changes<S: AsRef<str>>(
    before: Option<&SnapshotGraph>,
    after: Option<&SnapshotGraph>,
    allowlist: &[S],
) -> Changes {
    let mut changes = Changes::new();
    let before = match before {
        Some(g) if !g.is_null(g.root()) => g,
        _ => return changes,
    };

    for field in allowlist.iter().map(AsRef::as_ref) {
        if is_bookkeeping_field(field) {
            continue;
        }

        if is_custom_fields_container(field) {
            diff_custom_fields(before, after, field, &mut changes);
            continue;
        }

        let prev = lookup(before, field);
        let next = after.and_then(|g| lookup(g, field));
        if !fields_equivalent(before, prev, after, next, is_time_like_field(field)) {
            changes.insert(
                field.to_string(),
                FieldChange::new(render(before, prev), render_opt(after, next)),
            );
        }
    }

    changes
}

fn diff_custom_fields(
    before: &SnapshotGraph,
    after: Option<&SnapshotGraph>,
    container: &str,
    changes: &mut Changes,
) {
    let before_container = before.field(before.root(), container);
    let after_container = after.and_then(|g| g.field(g.root(), container));

    let mut keys: BTreeSet<String> = BTreeSet::new();
    if let Some(c) = before_container {
        keys.extend(before.keys(c).into_iter().map(str::to_string));
    }
    if let (Some(g), Some(c)) = (after, after_container) {
        keys.extend(g.keys(c).into_iter().map(str::to_string));
    }

    for key in keys {
        let prev = before_container.and_then(|c| before.field(c, &key));
        let next = match (after, after_container) {
            (Some(g), Some(c)) => g.field(c, &key),
            _ => None,
        };
        if !fields_equivalent(before, prev, after, next, is_time_like_field(&key)) {
            changes.insert(
                format!("{}{}", CUSTOM_FIELD_PREFIX, key),
                FieldChange::new(render(before, prev), render_opt(after, next)),
            );
        }
    }
}

/// Top-level field lookup; `cf_<key>` falls back to the custom-fields container
fn lookup(graph: &SnapshotGraph, field: &str) -> Option<NodeId> {
    if let Some(id) = graph.field(graph.root(), field) {
        return Some(id);
    }
    let key = field.strip_prefix(CUSTOM_FIELD_PREFIX)?;
    CUSTOM_FIELDS_KEYS
        .iter()
        .filter_map(|c| graph.field(graph.root(), c))
        .find_map(|container| graph.field(container, key))
}

fn render(graph: &SnapshotGraph, id: Option<NodeId>) -> Value {
    id.map(|id| graph.to_value(id)).unwrap_or(Value::Null)
}

fn render_opt(graph: Option<&SnapshotGraph>, id: Option<NodeId>) -> Value {
    graph.map(|g| render(g, id)).unwrap_or(Value::Null)
}

fn fields_equivalent(
    a: &SnapshotGraph,
    a_id: Option<NodeId>,
    b: Option<&SnapshotGraph>,
    b_id: Option<NodeId>,
    time_like: bool,
) -> bool {
    let b_resolved = b.zip(b_id);
    match (a_id, b_resolved) {
        (None, None) => true,
        (Some(x), None) => a.is_null(x),
        (None, Some((g, y))) => g.is_null(y),
        (Some(x), Some((g, y))) => nodes_equivalent(a, x, g, y, time_like),
    }
}

/// Deep comparison with an index-pair seen-set
///
/// A pair already visited is treated as equal, so cycles terminate.
/// `time_like` is re-derived from each object key on the way down.
fn nodes_equivalent(
    a: &SnapshotGraph,
    a_id: NodeId,
    b: &SnapshotGraph,
    b_id: NodeId,
    time_like: bool,
) -> bool {
    let mut seen: HashSet<(NodeId, NodeId)> = HashSet::new();
    let mut stack = vec![(a_id, b_id, time_like)];

    while let Some((x, y, time_like)) = stack.pop() {
        if !seen.insert((x, y)) {
            continue;
        }
        match (a.node(x), b.node(y)) {
            (Some(Node::Array(xs)), Some(Node::Array(ys))) => {
                if xs.len() != ys.len() {
                    return false;
                }
                stack.extend(
                    xs.iter()
                        .copied()
                        .zip(ys.iter().copied())
                        .map(|(xc, yc)| (xc, yc, time_like)),
                );
            }
            (Some(Node::Object(xm)), Some(Node::Object(ym))) => {
                if xm.len() != ym.len() {
                    return false;
                }
                for (key, xc) in xm {
                    match ym.get(key) {
                        Some(yc) => stack.push((*xc, *yc, is_time_like_field(key))),
                        None => return false,
                    }
                }
            }
            (Some(xn), Some(yn)) => {
                if !scalars_equivalent(xn, yn, time_like) {
                    return false;
                }
            }
            _ => return false,
        }
    }

    true
}

fn scalars_equivalent(x: &Node, y: &Node, time_like: bool) -> bool {
    if let (Node::Scalar(a), Node::Scalar(b)) = (x, y) {
        if a == b {
            return true;
        }
        if let (Value::Number(m), Value::Number(n)) = (a, b) {
            return numbers_equal(m, n);
        }
    }

    // Epoch millis only count as an instant against a typed timestamp or
    // under a time-like field name.
    let coerce =
        time_like || matches!(x, Node::Timestamp(_)) || matches!(y, Node::Timestamp(_));
    match (instant_of(x), instant_of(y)) {
        (Some(a), Some(b)) => a == b,
        (Some(a), None) if coerce => epoch_millis_of(y) == Some(a.timestamp_millis()),
        (None, Some(b)) if coerce => epoch_millis_of(x) == Some(b.timestamp_millis()),
        _ => false,
    }
}

fn numbers_equal(m: &serde_json::Number, n: &serde_json::Number) -> bool {
    if let (Some(a), Some(b)) = (m.as_i64(), n.as_i64()) {
        return a == b;
    }
    if let (Some(a), Some(b)) = (m.as_u64(), n.as_u64()) {
        return a == b;
    }
    if m.is_f64() || n.is_f64() {
        return m.as_f64() == n.as_f64();
    }
    // One side negative, the other beyond i64::MAX.
    false
}

fn instant_of(node: &Node) -> Option<DateTime<Utc>> {
    match node {
        Node::Timestamp(ts) => Some(*ts),
        Node::Scalar(Value::String(s)) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        _ => None,
    }
}

fn epoch_millis_of(node: &Node) -> Option<i64> {
    match node {
        Node::Scalar(Value::Number(n)) => n.as_i64(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_reference_scenario() {
        let changes = build_changes(
            Some(&json!({"a": 1, "b": 2, "updatedAt": "t0"})),
            Some(&json!({"a": 1, "b": 3, "updatedAt": "t1"})),
            &["a", "b", "updatedAt"],
        );

        assert_eq!(changes.len(), 1);
        assert_eq!(changes["b"], FieldChange::new(json!(2), json!(3)));
    }

    #[test]
    fn test_bookkeeping_names() {
        assert!(is_bookkeeping_field("updatedAt"));
        assert!(is_bookkeeping_field("updated_at"));
        assert!(is_bookkeeping_field("UPDATED-AT"));
        assert!(!is_bookkeeping_field("updatedBy"));
        assert!(!is_bookkeeping_field("createdAt"));
    }

    #[test]
    fn test_null_before_is_empty() {
        let changes = build_changes(None, Some(&json!({"a": 1})), &["a"]);
        assert!(changes.is_empty());

        let changes = build_changes(Some(&Value::Null), Some(&json!({"a": 1})), &["a"]);
        assert!(changes.is_empty());
    }

    #[test]
    fn test_null_and_empty_object_differ() {
        let changes = build_changes(
            Some(&json!({"meta": null})),
            Some(&json!({"meta": {}})),
            &["meta"],
        );
        assert_eq!(changes["meta"], FieldChange::new(Value::Null, json!({})));
    }

    #[test]
    fn test_missing_reads_as_null() {
        let changes = build_changes(
            Some(&json!({"a": null})),
            Some(&json!({})),
            &["a", "absent"],
        );
        assert!(changes.is_empty());
    }

    #[test]
    fn test_timestamp_representations_are_equal() {
        let changes = build_changes(
            Some(&json!({
                "at": "2024-03-01T10:00:00Z",
                "due": "2024-03-01T10:00:00.000Z",
                "epoch": 1_709_287_200_000_i64,
            })),
            Some(&json!({
                "at": "2024-03-01T11:00:00+01:00",
                "due": "2024-03-01T10:00:00Z",
                "epoch": "2024-03-01T10:00:00Z",
            })),
            &["at", "due", "epoch"],
        );
        assert!(changes.is_empty(), "unexpected changes: {:?}", changes);
    }

    #[test]
    fn test_time_like_names() {
        for name in ["createdAt", "due_at", "startTime", "birthDate", "timestamp", "epoch"] {
            assert!(is_time_like_field(name), "{}", name);
        }
        for name in ["qty", "format", "update", "count"] {
            assert!(!is_time_like_field(name), "{}", name);
        }
    }

    #[test]
    fn test_plain_integer_is_not_an_instant() {
        let changes = build_changes(
            Some(&json!({"qty": 0})),
            Some(&json!({"qty": "1970-01-01T00:00:00Z"})),
            &["qty"],
        );
        assert_eq!(
            changes["qty"],
            FieldChange::new(json!(0), json!("1970-01-01T00:00:00Z"))
        );
    }

    #[test]
    fn test_epoch_millis_under_time_like_names() {
        let changes = build_changes(
            Some(&json!({"createdAt": 0, "due_at": 0, "customFields": {"startTime": 0}})),
            Some(&json!({
                "createdAt": "1970-01-01T00:00:00Z",
                "due_at": "1970-01-01T00:00:00Z",
                "customFields": {"startTime": "1970-01-01T00:00:00Z"},
            })),
            &["createdAt", "due_at", "customFields"],
        );
        assert!(changes.is_empty(), "unexpected changes: {:?}", changes);
    }

    #[test]
    fn test_large_integers_compared_exactly() {
        let changes = build_changes(
            Some(&json!({"serial": 9_007_199_254_740_993_u64})),
            Some(&json!({"serial": 9_007_199_254_740_992_u64})),
            &["serial"],
        );
        assert_eq!(changes.len(), 1);

        let changes = build_changes(
            Some(&json!({"ratio": 1})),
            Some(&json!({"ratio": 1.0})),
            &["ratio"],
        );
        assert!(changes.is_empty());
    }

    #[test]
    fn test_typed_timestamp_node_matches_iso_string() {
        let instant = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();

        let mut before = SnapshotGraph::new_object();
        let root = before.root();
        let ts = before.add(Node::Timestamp(instant));
        before.set_field(root, "at", ts);

        let after = SnapshotGraph::from_value(&json!({"at": "2024-03-01T10:00:00Z"}));

        let changes = build_graph_changes(Some(&before), Some(&after), &["at"]);
        assert!(changes.is_empty());
    }

    #[test]
    fn test_custom_fields_are_flattened() {
        let changes = build_changes(
            Some(&json!({"customFields": {"color": "red", "size": 2}})),
            Some(&json!({"customFields": {"color": "blue", "size": 2, "shape": "round"}})),
            &["customFields"],
        );

        assert_eq!(changes.len(), 2);
        assert_eq!(changes["cf_color"], FieldChange::new(json!("red"), json!("blue")));
        assert_eq!(changes["cf_shape"], FieldChange::new(Value::Null, json!("round")));
        assert!(!changes.contains_key("customFields"));
    }

    #[test]
    fn test_cf_field_allowlisted_directly() {
        let changes = build_changes(
            Some(&json!({"custom_fields": {"color": "red"}})),
            Some(&json!({"custom_fields": {"color": "blue"}})),
            &["cf_color"],
        );
        assert_eq!(changes["cf_color"], FieldChange::new(json!("red"), json!("blue")));
    }

    #[test]
    fn test_self_referential_graphs_terminate() {
        fn looped(name: &str) -> SnapshotGraph {
            let mut g = SnapshotGraph::new_object();
            let root = g.root();
            let n = g.add(Node::Scalar(json!(name)));
            let parent = g.add(Node::Object(Default::default()));
            g.set_field(parent, "child", root);
            g.set_field(root, "name", n);
            g.set_field(root, "parent", parent);
            g
        }

        let same = build_graph_changes(
            Some(&looped("a")),
            Some(&looped("a")),
            &["name", "parent"],
        );
        assert!(same.is_empty());

        let differ = build_graph_changes(
            Some(&looped("a")),
            Some(&looped("b")),
            &["name", "parent"],
        );
        assert_eq!(differ.len(), 2);
        assert_eq!(differ["name"], FieldChange::new(json!("a"), json!("b")));
        assert_eq!(differ["parent"].from["child"]["parent"], json!("[Circular]"));
    }

    #[test]
    fn test_discover_fields_skips_bookkeeping() {
        let fields = discover_fields(
            Some(&json!({"name": "x", "updated_at": 1})),
            Some(&json!({"code": "y"})),
        );
        assert_eq!(fields, vec!["code".to_string(), "name".to_string()]);
    }

    #[test]
    fn test_integer_and_float_equal() {
        let changes = build_changes(Some(&json!({"n": 1})), Some(&json!({"n": 1.0})), &["n"]);
        assert!(changes.is_empty());
    }
}
