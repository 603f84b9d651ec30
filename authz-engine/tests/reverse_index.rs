//! ListObjects / ListUsers behavior against the in-memory store.

use authz_engine::{AuthzEngine, CheckRequest, EngineConfig};
use authz_model::{ObjectRef, RelationshipTuple, SubjectRef};
use authz_store::MemoryStore;
use std::sync::Arc;

fn engine() -> AuthzEngine {
    let store = Arc::new(MemoryStore::new());
    AuthzEngine::new(store.clone(), store, EngineConfig::default())
}

async fn activate_model(engine: &AuthzEngine, source: &str) {
    let outcome = engine.write_model(source, true).await.unwrap();
    assert!(outcome.success, "model rejected: {:?}", outcome.errors);
}

async fn grant(engine: &AuthzEngine, subject: &str, relation: &str, object: &str) {
    engine
        .write(
            vec![RelationshipTuple::new(
                SubjectRef::parse(subject).unwrap(),
                relation,
                ObjectRef::parse(object).unwrap(),
            )],
            vec![],
        )
        .await
        .unwrap();
}

async fn objects_for(
    engine: &AuthzEngine,
    subject: &str,
    relation: &str,
    object_type: &str,
) -> Vec<String> {
    let subject = SubjectRef::parse(subject).unwrap();
    let mut out = Vec::new();
    let mut offset = 0;
    loop {
        let (page, next) = engine
            .list_objects(&subject, relation, object_type, 2, offset)
            .await
            .unwrap();
        out.extend(page);
        match next {
            Some(n) => offset = n,
            None => break,
        }
    }
    out
}

async fn users_for(
    engine: &AuthzEngine,
    object: &str,
    relation: &str,
    user_types: &[&str],
) -> Vec<String> {
    let object = ObjectRef::parse(object).unwrap();
    let user_types: Vec<String> = user_types.iter().map(|s| s.to_string()).collect();
    let mut out = Vec::new();
    let mut offset = 0;
    loop {
        let (page, next) = engine
            .list_users(&object, relation, &user_types, 2, offset)
            .await
            .unwrap();
        out.extend(page);
        match next {
            Some(n) => offset = n,
            None => break,
        }
    }
    out
}

#[tokio::test]
async fn list_objects_matches_direct_grants() {
    let engine = engine();
    activate_model(&engine, "type user {}\ntype doc { relation viewer: [user] }").await;
    grant(&engine, "user:alice", "viewer", "doc:1").await;
    grant(&engine, "user:alice", "viewer", "doc:2").await;
    grant(&engine, "user:bob", "viewer", "doc:3").await;

    assert_eq!(
        objects_for(&engine, "user:alice", "viewer", "doc").await,
        vec!["1", "2"]
    );
    assert_eq!(
        objects_for(&engine, "user:bob", "viewer", "doc").await,
        vec!["3"]
    );
}

#[tokio::test]
async fn list_objects_follows_computed_usersets() {
    let engine = engine();
    activate_model(
        &engine,
        r#"
        type user {}
        type doc {
          relation editor: [user]
          relation viewer: [user] or editor
        }
        "#,
    )
    .await;
    grant(&engine, "user:alice", "editor", "doc:1").await;
    grant(&engine, "user:alice", "viewer", "doc:2").await;

    assert_eq!(
        objects_for(&engine, "user:alice", "viewer", "doc").await,
        vec!["1", "2"]
    );
}

#[tokio::test]
async fn list_objects_expands_group_memberships() {
    let engine = engine();
    activate_model(
        &engine,
        r#"
        type user {}
        type group { relation member: [user, group#member] }
        type doc { relation viewer: [user, group#member] }
        "#,
    )
    .await;
    // alice is in sub, sub is in eng, eng can view two docs
    grant(&engine, "user:alice", "member", "group:sub").await;
    grant(&engine, "group:sub#member", "member", "group:eng").await;
    grant(&engine, "group:eng#member", "viewer", "doc:a").await;
    grant(&engine, "group:eng#member", "viewer", "doc:b").await;
    grant(&engine, "user:bob", "viewer", "doc:c").await;

    assert_eq!(
        objects_for(&engine, "user:alice", "viewer", "doc").await,
        vec!["a", "b"]
    );
}

#[tokio::test]
async fn list_objects_follows_parent_folders() {
    let engine = engine();
    activate_model(
        &engine,
        r#"
        type user {}
        type folder {
          relation parent: [folder]
          relation viewer: [user] or viewer from parent
        }
        type doc {
          relation parent: [folder]
          relation viewer: [user] or viewer from parent
        }
        "#,
    )
    .await;
    // root -> sub -> two docs; alice can view root
    grant(&engine, "user:alice", "viewer", "folder:root").await;
    grant(&engine, "folder:root", "parent", "folder:sub").await;
    grant(&engine, "folder:sub", "parent", "doc:x").await;
    grant(&engine, "folder:sub", "parent", "doc:y").await;
    grant(&engine, "folder:root", "parent", "doc:z").await;

    assert_eq!(
        objects_for(&engine, "user:alice", "viewer", "doc").await,
        vec!["x", "y", "z"]
    );
}

#[tokio::test]
async fn list_objects_confirms_candidates_under_negation() {
    let engine = engine();
    activate_model(
        &engine,
        r#"
        type user {}
        type doc {
          relation member: [user]
          relation banned: [user]
          relation allowed: member but not banned
        }
        "#,
    )
    .await;
    grant(&engine, "user:alice", "member", "doc:1").await;
    grant(&engine, "user:alice", "member", "doc:2").await;
    grant(&engine, "user:alice", "banned", "doc:2").await;

    // doc:2 is a candidate through `member` but must not survive the
    // confirmatory check
    assert_eq!(
        objects_for(&engine, "user:alice", "allowed", "doc").await,
        vec!["1"]
    );
}

#[tokio::test]
async fn list_objects_agrees_with_check() {
    let engine = engine();
    activate_model(
        &engine,
        r#"
        type user {}
        type group { relation member: [user, group#member] }
        type doc {
          relation editor: [user]
          relation viewer: [user, group#member] or editor
        }
        "#,
    )
    .await;
    grant(&engine, "user:alice", "viewer", "doc:d1").await;
    grant(&engine, "user:alice", "editor", "doc:d2").await;
    grant(&engine, "user:alice", "member", "group:g").await;
    grant(&engine, "group:g#member", "viewer", "doc:d3").await;
    grant(&engine, "user:bob", "viewer", "doc:d4").await;

    let listed = objects_for(&engine, "user:alice", "viewer", "doc").await;

    // the listing equals brute force over every known doc
    let mut expected = Vec::new();
    for id in ["d1", "d2", "d3", "d4"] {
        let allowed = engine
            .check(CheckRequest::new(
                SubjectRef::parse("user:alice").unwrap(),
                "viewer",
                ObjectRef::new("doc", id),
            ))
            .await
            .unwrap()
            .allowed;
        if allowed {
            expected.push(id.to_string());
        }
    }
    assert_eq!(listed, expected);
}

#[tokio::test]
async fn list_objects_pagination_is_stable_and_complete() {
    let engine = engine();
    activate_model(&engine, "type user {}\ntype doc { relation viewer: [user] }").await;
    for i in 0..7 {
        grant(&engine, "user:alice", "viewer", &format!("doc:d{i}")).await;
    }

    let subject = SubjectRef::parse("user:alice").unwrap();
    let (first_page, next) = engine
        .list_objects(&subject, "viewer", "doc", 3, 0)
        .await
        .unwrap();
    assert_eq!(first_page, vec!["d0", "d1", "d2"]);
    let (second_page, _) = engine
        .list_objects(&subject, "viewer", "doc", 3, next.unwrap())
        .await
        .unwrap();
    assert_eq!(second_page, vec!["d3", "d4", "d5"]);

    let all = objects_for(&engine, "user:alice", "viewer", "doc").await;
    assert_eq!(all.len(), 7);
}

#[tokio::test]
async fn list_users_expands_direct_groups_and_wildcards() {
    let engine = engine();
    activate_model(
        &engine,
        r#"
        type user {}
        type service {}
        type group { relation member: [user, group#member] }
        type doc { relation viewer: [user, user:*, service, group#member] }
        "#,
    )
    .await;
    grant(&engine, "user:alice", "viewer", "doc:1").await;
    grant(&engine, "service:backup", "viewer", "doc:1").await;
    grant(&engine, "user:*", "viewer", "doc:1").await;
    grant(&engine, "user:bob", "member", "group:sub").await;
    grant(&engine, "group:sub#member", "member", "group:eng").await;
    grant(&engine, "group:eng#member", "viewer", "doc:1").await;

    let everyone = users_for(&engine, "doc:1", "viewer", &[]).await;
    assert_eq!(
        everyone,
        vec!["service:backup", "user:*", "user:alice", "user:bob"]
    );

    // filtered to users only
    let users = users_for(&engine, "doc:1", "viewer", &["user"]).await;
    assert_eq!(users, vec!["user:*", "user:alice", "user:bob"]);
}

#[tokio::test]
async fn list_users_descends_parent_objects() {
    let engine = engine();
    activate_model(
        &engine,
        r#"
        type user {}
        type folder { relation viewer: [user] }
        type doc {
          relation parent: [folder]
          relation viewer: [user] or viewer from parent
        }
        "#,
    )
    .await;
    grant(&engine, "folder:f", "parent", "doc:1").await;
    grant(&engine, "user:alice", "viewer", "folder:f").await;
    grant(&engine, "user:bob", "viewer", "doc:1").await;

    assert_eq!(
        users_for(&engine, "doc:1", "viewer", &[]).await,
        vec!["user:alice", "user:bob"]
    );
}

#[tokio::test]
async fn list_users_applies_set_algebra() {
    let engine = engine();
    activate_model(
        &engine,
        r#"
        type user {}
        type doc {
          relation member: [user]
          relation banned: [user]
          relation allowed: member but not banned
        }
        "#,
    )
    .await;
    grant(&engine, "user:alice", "member", "doc:1").await;
    grant(&engine, "user:bob", "member", "doc:1").await;
    grant(&engine, "user:bob", "banned", "doc:1").await;

    assert_eq!(
        users_for(&engine, "doc:1", "allowed", &[]).await,
        vec!["user:alice"]
    );
}

#[tokio::test]
async fn list_users_survives_tuple_cycles() {
    let engine = engine();
    activate_model(
        &engine,
        r#"
        type user {}
        type group { relation member: [user, group#member] }
        "#,
    )
    .await;
    grant(&engine, "group:a#member", "member", "group:b").await;
    grant(&engine, "group:b#member", "member", "group:a").await;
    grant(&engine, "user:alice", "member", "group:b").await;

    assert_eq!(
        users_for(&engine, "group:a", "member", &[]).await,
        vec!["user:alice"]
    );
}
