use cmdbus_core::diff::{build_changes, discover_fields};
use proptest::prelude::*;
use serde_json::{json, Map, Value};

fn scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i32>().prop_map(Value::from),
        "[a-z]{0,6}".prop_map(Value::from),
    ]
}

fn snapshot() -> impl Strategy<Value = Value> {
    prop::collection::btree_map("[a-e]", scalar(), 0..5)
        .prop_map(|fields| Value::Object(fields.into_iter().collect::<Map<String, Value>>()))
}

proptest! {
    #[test]
    fn prop_identical_snapshots_have_no_changes(before in snapshot()) {
        let fields = discover_fields(Some(&before), Some(&before));
        prop_assert!(build_changes(Some(&before), Some(&before), &fields).is_empty());
    }

    #[test]
    fn prop_changes_are_within_allowlist(before in snapshot(), after in snapshot()) {
        let allowlist = ["a", "c"];
        let changes = build_changes(Some(&before), Some(&after), &allowlist);
        prop_assert!(changes.keys().all(|k| allowlist.contains(&k.as_str())));
    }

    #[test]
    fn prop_reported_values_match_snapshots(before in snapshot(), after in snapshot()) {
        let fields = discover_fields(Some(&before), Some(&after));
        let changes = build_changes(Some(&before), Some(&after), &fields);

        for (field, change) in &changes {
            prop_assert_ne!(&change.from, &change.to);
            prop_assert_eq!(&change.from, before.get(field).unwrap_or(&Value::Null));
            prop_assert_eq!(&change.to, after.get(field).unwrap_or(&Value::Null));
        }
    }

    #[test]
    fn prop_bookkeeping_never_reported(before in snapshot(), stamp in "[0-9]{1,4}") {
        let mut after = before.clone();
        after["updatedAt"] = json!(stamp);
        let changes = build_changes(Some(&before), Some(&after), &["updatedAt", "a"]);
        prop_assert!(changes.is_empty());
    }
}
