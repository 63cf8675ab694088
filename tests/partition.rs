mod common;

use common::{policy, rec, Fixture};
use resource_sdk::query::{rewrite, Filter, FindQuery, ThroughOptions};
use resource_sdk::{partition, AppError, ValidationReason, WriteService};
use serde_json::{json, Value};

#[tokio::test]
async fn partition_splits_existing_from_new_in_input_order() {
    let fx = Fixture::new();
    let groups = fx.model("groups");
    for code in ["a", "b"] {
        WriteService::create(&*fx.store, groups, rec(json!({ "code": code })), &policy())
            .await
            .unwrap();
    }
    let split = partition(
        &*fx.store,
        groups,
        &[
            rec(json!({"code": "b", "title": "ignored"})),
            rec(json!({"code": "z"})),
            rec(json!({"code": "a"})),
        ],
    )
    .await
    .unwrap();
    let existing: Vec<&Value> = split.existing_rows.iter().map(|r| &r["code"]).collect();
    assert_eq!(existing, vec![&json!("b"), &json!("a")]);
    // Matched rows come back as stored, not as posted.
    assert_eq!(split.existing_rows[0]["title"], Value::Null);
    assert_eq!(split.new_rows, vec![rec(json!({"code": "z"}))]);
}

#[tokio::test]
async fn partition_treats_soft_deleted_rows_as_new() {
    let fx = Fixture::new();
    let users = fx.model("users");
    WriteService::create(&*fx.store, users, rec(json!({"email": "a@x.io"})), &policy())
        .await
        .unwrap();
    WriteService::destroy(&*fx.store, users, &Filter::eq("id", json!(1)))
        .await
        .unwrap();
    let split = partition(&*fx.store, users, &[rec(json!({"email": "a@x.io"}))]).await.unwrap();
    assert!(split.existing_rows.is_empty());
    assert_eq!(split.new_rows.len(), 1);
}

#[tokio::test]
async fn partition_requires_an_identity_per_record() {
    let fx = Fixture::new();
    let err = partition(&*fx.store, fx.model("groups"), &[rec(json!({"title": "no code"}))])
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation { reason: ValidationReason::NoIdentity, .. }));

    let split = partition(&*fx.store, fx.model("groups"), &[]).await.unwrap();
    assert!(split.existing_rows.is_empty() && split.new_rows.is_empty());
}

#[tokio::test]
async fn has_many_read_is_pinned_to_the_owner() {
    let fx = Fixture::new();
    let users = fx.model("users");
    let posts = fx.model("posts");
    WriteService::bulk_create(
        &*fx.store,
        posts,
        vec![
            rec(json!({"slug": "one", "author_id": 1})),
            rec(json!({"slug": "two", "author_id": 2})),
            rec(json!({"slug": "three", "author_id": 1})),
        ],
        &policy(),
    )
    .await
    .unwrap();

    let association = users.association("posts").unwrap();
    let base = FindQuery::filtered(Filter::eq("slug", json!("three")));
    let query = rewrite(&base, association, &json!(1)).unwrap();
    let rows = WriteService::list(&*fx.store, posts, query).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["slug"], json!("three"));
    assert_eq!(base.filter, Filter::eq("slug", json!("three")));
}

#[tokio::test]
async fn belongs_to_many_read_goes_through_the_join_model() {
    let fx = Fixture::new();
    let users = fx.model("users");
    let groups = fx.model("groups");
    let memberships = fx.model("memberships");
    WriteService::bulk_create(
        &*fx.store,
        groups,
        vec![rec(json!({"code": "a"})), rec(json!({"code": "b"})), rec(json!({"code": "c"}))],
        &policy(),
    )
    .await
    .unwrap();
    WriteService::bulk_create(
        &*fx.store,
        memberships,
        vec![
            rec(json!({"user_id": 1, "group_id": 1})),
            rec(json!({"user_id": 1, "group_id": 3})),
            rec(json!({"user_id": 2, "group_id": 2})),
        ],
        &policy(),
    )
    .await
    .unwrap();

    let association = users.association("groups").unwrap();
    let rows = WriteService::list(&*fx.store, groups, rewrite(&FindQuery::default(), association, &json!(1)).unwrap())
        .await
        .unwrap();
    let codes: Vec<&Value> = rows.iter().map(|r| &r["code"]).collect();
    assert_eq!(codes, vec![&json!("a"), &json!("c")]);
    assert!(rows[0]["memberships"].is_array());

    let narrowed = FindQuery {
        through: Some(ThroughOptions {
            filter: Some(Filter::eq("group_id", json!(3))),
            attributes: None,
        }),
        ..Default::default()
    };
    let rows = WriteService::list(&*fx.store, groups, rewrite(&narrowed, association, &json!(1)).unwrap())
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["code"], json!("c"));
}
