#![allow(clippy::unwrap_used, clippy::expect_used)]

use cmdbus_core::action_log::{
    ActionLogQuery, ActionLogStore, ActorScope, ExecutionState, NewActionLogEntry,
};
use cmdbus_core::collaborators::TenantEncryption;
use cmdbus_core::errors::{ExError, ExErrorKind, Result};
use cmdbus_core_types::UndoToken;
use cmdbus_store::SqliteActionLogStore;
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;

fn entry(command_id: &str, actor: &str, resource_id: &str, undoable: bool) -> NewActionLogEntry {
    NewActionLogEntry {
        command_id: command_id.to_string(),
        action_label: Some(command_id.to_string()),
        resource_kind: Some("widgets".to_string()),
        resource_id: Some(resource_id.to_string()),
        parent_resource_kind: None,
        parent_resource_id: None,
        tenant_id: Some("t1".to_string()),
        organization_id: Some("org-1".to_string()),
        actor_user_id: Some(actor.to_string()),
        execution_state: ExecutionState::Done,
        undo_token: undoable.then(UndoToken::generate),
        command_payload: Some(json!({"__redoInput": {"name": resource_id}})),
        snapshot_before: None,
        snapshot_after: Some(json!({"id": resource_id})),
        changes: None,
        context: None,
    }
}

fn scope(actor: &str) -> ActorScope {
    ActorScope {
        actor_user_id: actor.to_string(),
        tenant_id: Some("t1".to_string()),
        organization_id: None,
    }
}

#[test]
fn test_list_newest_first_with_filters() {
    let store = SqliteActionLogStore::open_in_memory().unwrap();
    let first = store.log(entry("widgets.create", "u1", "w1", true)).unwrap();
    let second = store.log(entry("widgets.create", "u1", "w2", true)).unwrap();
    store.log(entry("widgets.create", "u2", "w3", true)).unwrap();

    let mine = store
        .list(&ActionLogQuery::for_tenant("t1").for_actor("u1"))
        .unwrap();
    let ids: Vec<_> = mine.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, vec![second.id.as_str(), first.id.as_str()]);

    let on_w1 = store
        .list(&ActionLogQuery::for_tenant("t1").for_resource("widgets", "w1"))
        .unwrap();
    assert_eq!(on_w1.len(), 1);
    assert_eq!(on_w1[0].id, first.id);

    let other_tenant = store.list(&ActionLogQuery::for_tenant("t2")).unwrap();
    assert!(other_tenant.is_empty());
}

#[test]
fn test_list_limit_and_state_filters() {
    let store = SqliteActionLogStore::open_in_memory().unwrap().with_default_limit(2);
    let mut tokens = Vec::new();
    for i in 0..4 {
        let e = store
            .log(entry("widgets.create", "u1", &format!("w{}", i), true))
            .unwrap();
        tokens.push((e.id.clone(), e.undo_token.clone().unwrap()));
    }
    let (undone_id, token) = &tokens[0];
    store.mark_undone(undone_id, token).unwrap();

    assert_eq!(store.list(&ActionLogQuery::default()).unwrap().len(), 2);
    assert_eq!(
        store
            .list(&ActionLogQuery::default().with_limit(10))
            .unwrap()
            .len(),
        4
    );

    let undone = store
        .list(&ActionLogQuery::default().with_states(vec![ExecutionState::Undone]))
        .unwrap();
    assert_eq!(undone.len(), 1);
    assert_eq!(&undone[0].id, undone_id);

    let visible = store
        .list(&ActionLogQuery::default().excluding_undone().with_limit(10))
        .unwrap();
    assert_eq!(visible.len(), 3);

    let undoable = store
        .list(&ActionLogQuery {
            undoable_only: true,
            limit: Some(10),
            ..ActionLogQuery::default()
        })
        .unwrap();
    assert!(undoable.iter().all(|e| e.is_undoable()));
    assert_eq!(undoable.len(), 3);
}

#[test]
fn test_list_organization_membership() {
    let store = SqliteActionLogStore::open_in_memory().unwrap();
    let mut other = entry("widgets.create", "u1", "w9", false);
    other.organization_id = Some("org-2".to_string());
    store.log(entry("widgets.create", "u1", "w1", false)).unwrap();
    store.log(other).unwrap();

    let query = ActionLogQuery {
        organization_ids: vec!["org-2".to_string(), "org-3".to_string()],
        ..ActionLogQuery::default()
    };
    let found = store.list(&query).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].resource_id.as_deref(), Some("w9"));
}

#[test]
fn test_latest_undoable_and_undone_lookups() {
    let store = SqliteActionLogStore::open_in_memory().unwrap();
    let a = store.log(entry("widgets.create", "u1", "w1", true)).unwrap();
    let b = store.log(entry("widgets.update", "u1", "w2", true)).unwrap();
    store.log(entry("widgets.report", "u1", "w3", false)).unwrap();

    let latest = store.latest_undoable_for_actor(&scope("u1")).unwrap().unwrap();
    assert_eq!(latest.id, b.id);
    assert!(store.latest_undoable_for_actor(&scope("u2")).unwrap().is_none());

    let on_w1 = store
        .latest_undoable_for_resource(&scope("u1"), "widgets", "w1")
        .unwrap()
        .unwrap();
    assert_eq!(on_w1.id, a.id);

    // Undo b, then a: a is now the most recently undone even though it is older.
    store.mark_undone(&b.id, b.undo_token.as_ref().unwrap()).unwrap();
    store.mark_undone(&a.id, a.undo_token.as_ref().unwrap()).unwrap();

    let latest_undone = store.latest_undone_for_actor(&scope("u1")).unwrap().unwrap();
    assert_eq!(latest_undone.id, a.id);

    store.mark_redone(&a.id).unwrap();
    let next = store.latest_undone_for_actor(&scope("u1")).unwrap().unwrap();
    assert_eq!(next.id, b.id);
}

#[test]
fn test_scope_respects_organization() {
    let store = SqliteActionLogStore::open_in_memory().unwrap();
    store.log(entry("widgets.create", "u1", "w1", true)).unwrap();

    let mut other_org = scope("u1");
    other_org.organization_id = Some("org-2".to_string());
    assert!(store.latest_undoable_for_actor(&other_org).unwrap().is_none());

    let mut same_org = scope("u1");
    same_org.organization_id = Some("org-1".to_string());
    assert!(store.latest_undoable_for_actor(&same_org).unwrap().is_some());
}

#[test]
fn test_concurrent_undo_exactly_one_wins() {
    let store = Arc::new(SqliteActionLogStore::open_in_memory().unwrap());
    let logged = store.log(entry("widgets.create", "u1", "w1", true)).unwrap();
    let token = logged.undo_token.clone().unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = store.clone();
            let id = logged.id.clone();
            let token = token.clone();
            std::thread::spawn(move || store.mark_undone(&id, &token).is_ok())
        })
        .collect();

    let wins = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|ok| *ok)
        .count();
    assert_eq!(wins, 1);
}

#[test]
fn test_file_backed_store_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("audit.db");

    let id = {
        let store = SqliteActionLogStore::open(&path, true).unwrap();
        store.log(entry("widgets.create", "u1", "w1", true)).unwrap().id
    };

    let reopened = SqliteActionLogStore::open(&path, true).unwrap();
    let found = reopened.find_by_id(&id).unwrap().unwrap();
    assert_eq!(found.command_id, "widgets.create");
    assert_eq!(found.redo_input(), Some(&json!({"name": "w1"})));
}

struct PrefixDecryption;

impl TenantEncryption for PrefixDecryption {
    fn decrypt_value(
        &self,
        tenant_id: Option<&str>,
        _organization_id: Option<&str>,
        value: &Value,
    ) -> Result<Value> {
        match value.as_str() {
            Some(cipher) => match cipher.strip_prefix("enc:") {
                Some(plain) => Ok(serde_json::from_str(plain)?),
                None => Err(ExError::new(ExErrorKind::DegradedDependency)
                    .with_message(format!("not ciphertext for {:?}", tenant_id))),
            },
            None => Ok(value.clone()),
        }
    }
}

#[test]
fn test_reads_decrypt_and_fall_back_to_stored() {
    let store = SqliteActionLogStore::open_in_memory()
        .unwrap()
        .with_encryption(Arc::new(PrefixDecryption));

    let mut encrypted = entry("widgets.create", "u1", "w1", false);
    encrypted.snapshot_after = Some(json!("enc:{\"id\":\"w1\"}"));
    encrypted.snapshot_before = Some(json!("garbled"));
    let logged = store.log(encrypted).unwrap();

    assert_eq!(logged.snapshot_after, Some(json!({"id": "w1"})));
    assert_eq!(logged.snapshot_before, Some(json!("garbled")));
}
