//! Behavioral laws of the tuple and model stores, exercised against the
//! in-memory implementation.

use authz_model::{compile_source, ObjectRef, RelationshipTuple, SubjectRef, TupleFilter};
use authz_store::{MemoryStore, ModelStore, StoredModel, TupleStore};
use chrono::Utc;
use uuid::Uuid;

fn tuple(subject: &str, relation: &str, object: &str) -> RelationshipTuple {
    RelationshipTuple::new(
        SubjectRef::parse(subject).unwrap(),
        relation,
        ObjectRef::parse(object).unwrap(),
    )
}

#[tokio::test]
async fn tokens_are_strictly_monotonic() {
    let store = MemoryStore::new();
    let mut last = store.latest_token().await.unwrap();
    for i in 0..5 {
        let result = store
            .write(vec![tuple("user:alice", "viewer", &format!("doc:{i}"))], vec![])
            .await
            .unwrap();
        assert!(result.token > last, "token did not advance");
        last = result.token;
    }
}

#[tokio::test]
async fn write_then_delete_leaves_no_trace_but_two_tokens() {
    let store = MemoryStore::new();
    let t = tuple("user:alice", "viewer", "doc:1");

    let wrote = store.write(vec![t.clone()], vec![]).await.unwrap();
    assert_eq!((wrote.written, wrote.deleted), (1, 0));

    let removed = store.write(vec![], vec![t.clone()]).await.unwrap();
    assert_eq!((removed.written, removed.deleted), (0, 1));
    assert_eq!(removed.token.0, wrote.token.0 + 1);

    let remaining = store
        .find_by_object(&t.object, Some("viewer"))
        .await
        .unwrap();
    assert!(remaining.is_empty());
}

#[tokio::test]
async fn duplicate_writes_and_absent_deletes_are_idempotent() {
    let store = MemoryStore::new();
    let t = tuple("user:alice", "viewer", "doc:1");

    store.write(vec![t.clone()], vec![]).await.unwrap();
    let again = store.write(vec![t.clone()], vec![]).await.unwrap();
    assert_eq!(again.written, 0, "duplicate write must not count");

    let ghost = store
        .write(vec![], vec![tuple("user:bob", "viewer", "doc:1")])
        .await
        .unwrap();
    assert_eq!(ghost.deleted, 0, "absent delete must not count");
}

#[tokio::test]
async fn delete_then_write_replaces_atomically() {
    let store = MemoryStore::new();
    let old = tuple("user:alice", "viewer", "doc:1");
    let new = tuple("user:alice", "viewer", "doc:2");

    store.write(vec![old.clone()], vec![]).await.unwrap();
    // deletes are applied before writes inside one batch
    let result = store.write(vec![new.clone()], vec![old.clone()]).await.unwrap();
    assert_eq!((result.written, result.deleted), (1, 1));

    let all = store
        .find(
            &TupleFilter {
                subject_type: Some("user".into()),
                subject_id: Some("alice".into()),
                ..TupleFilter::default()
            },
            10,
            0,
        )
        .await
        .unwrap();
    assert_eq!(all, vec![new]);
}

#[tokio::test]
async fn unbounded_filters_are_rejected() {
    let store = MemoryStore::new();
    let err = store
        .find(
            &TupleFilter {
                relation: Some("viewer".into()),
                ..TupleFilter::default()
            },
            10,
            0,
        )
        .await
        .unwrap_err();
    assert!(err.to_string().contains("unbounded"));
}

#[tokio::test]
async fn find_shapes_agree() {
    let store = MemoryStore::new();
    store
        .write(
            vec![
                tuple("user:alice", "viewer", "doc:1"),
                tuple("user:alice", "viewer", "doc:2"),
                tuple("user:alice", "editor", "doc:1"),
                tuple("group:eng#member", "viewer", "doc:1"),
                tuple("user:bob", "viewer", "doc:3"),
            ],
            vec![],
        )
        .await
        .unwrap();

    let by_object = store
        .find_by_object(&ObjectRef::new("doc", "1"), Some("viewer"))
        .await
        .unwrap();
    assert_eq!(by_object.len(), 2);

    let alice = SubjectRef::object("user", "alice");
    let by_user = store.find_by_user(&alice, "viewer", "doc").await.unwrap();
    assert_eq!(by_user.len(), 2);
    assert!(by_user.iter().all(|t| t.subject == alice));

    // userset subjects only match the exact userset
    let eng = SubjectRef::userset("group", "eng", "member");
    let by_userset = store.find_by_user(&eng, "viewer", "doc").await.unwrap();
    assert_eq!(by_userset.len(), 1);
}

#[tokio::test]
async fn find_pagination_is_stable() {
    let store = MemoryStore::new();
    let mut writes = Vec::new();
    for i in 0..7 {
        writes.push(tuple("user:alice", "viewer", &format!("doc:d{i}")));
    }
    store.write(writes, vec![]).await.unwrap();

    let filter = TupleFilter {
        subject_type: Some("user".into()),
        subject_id: Some("alice".into()),
        ..TupleFilter::default()
    };
    let mut seen = Vec::new();
    let mut offset = 0;
    loop {
        let page = store.find(&filter, 3, offset).await.unwrap();
        if page.is_empty() {
            break;
        }
        offset += page.len();
        seen.extend(page);
    }
    assert_eq!(seen.len(), 7);
    let mut ids: Vec<String> = seen.iter().map(|t| t.object.object_id.clone()).collect();
    let sorted = ids.clone();
    ids.sort();
    assert_eq!(ids, sorted, "pages must come back in canonical order");
}

fn stored_model(version: &str) -> StoredModel {
    let schema = compile_source("type user {}\ntype doc { relation viewer: [user] }").unwrap();
    StoredModel {
        model_id: Uuid::new_v4(),
        version_id: version.to_string(),
        dsl_source: schema.canonical_source,
        compiled: schema.compiled,
        is_active: false,
        created_at: Utc::now(),
    }
}

#[tokio::test]
async fn at_most_one_model_is_active() {
    let store = MemoryStore::new();
    let first = stored_model("01ARZ3NDEKTSV4RRFFQ69G5FA1");
    let second = stored_model("01ARZ3NDEKTSV4RRFFQ69G5FA2");
    let second_id = second.model_id;

    store.insert_model(first.clone(), true).await.unwrap();
    assert_eq!(
        store.active_model().await.unwrap().unwrap().model_id,
        first.model_id
    );

    store.insert_model(second, true).await.unwrap();
    let active = store.active_model().await.unwrap().unwrap();
    assert_eq!(active.model_id, second_id);

    let all = store.list_models(10, 0).await.unwrap();
    assert_eq!(all.iter().filter(|m| m.is_active).count(), 1);
    // newest-first
    assert_eq!(all[0].model_id, second_id);
}

#[tokio::test]
async fn activating_an_unknown_model_changes_nothing() {
    let store = MemoryStore::new();
    let model = stored_model("01ARZ3NDEKTSV4RRFFQ69G5FA1");
    let model_id = model.model_id;
    store.insert_model(model, true).await.unwrap();

    let ok = store.activate_model(Uuid::new_v4()).await.unwrap();
    assert!(!ok);
    assert_eq!(
        store.active_model().await.unwrap().unwrap().model_id,
        model_id
    );
}

#[tokio::test]
async fn model_versions_survive_activation_switches() {
    let store = MemoryStore::new();
    let first = stored_model("01ARZ3NDEKTSV4RRFFQ69G5FA1");
    let first_id = first.model_id;
    let second = stored_model("01ARZ3NDEKTSV4RRFFQ69G5FA2");

    store.insert_model(first, true).await.unwrap();
    store.insert_model(second, true).await.unwrap();
    store.activate_model(first_id).await.unwrap();

    let reread = store
        .model_by_version("01ARZ3NDEKTSV4RRFFQ69G5FA2")
        .await
        .unwrap()
        .unwrap();
    assert!(!reread.is_active, "history keeps its version id, not its flag");
}
