mod common;

use async_trait::async_trait;
use common::{policy, rec, Fixture};
use resource_sdk::query::{Filter, FindQuery};
use resource_sdk::store::{FindOptions, InsertOptions, UniqueViolation, UpsertResult};
use resource_sdk::{
    AppError, ConflictReason, MemoryStore, ModelDescriptor, Record, StoreAdapter, StoreError, ValidationReason,
    WritePolicy, WriteService,
};
use serde_json::{json, Value};
use std::sync::Arc;

fn ignoring_duplicates() -> WritePolicy {
    WritePolicy {
        ignore_duplicates: true,
        ..WritePolicy::default()
    }
}

async fn soft_delete(fx: &Fixture, model: &str, id: i64) {
    let count = WriteService::destroy(&*fx.store, fx.model(model), &Filter::eq("id", json!(id)))
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn create_assigns_server_identity_and_live_marker() {
    let fx = Fixture::new();
    let users = fx.model("users");
    let outcome = WriteService::create(
        &*fx.store,
        users,
        rec(json!({"id": 42, "email": "a@x.io", "deleted_at": "2020-01-01T00:00:00Z"})),
        &policy(),
    )
    .await
    .unwrap();
    assert!(outcome.created);
    assert_eq!(outcome.row["id"], json!(1));
    assert_eq!(outcome.row["deleted_at"], Value::Null);
    assert_eq!(outcome.row["role"], json!("member"));
}

#[tokio::test]
async fn create_rejects_live_duplicate() {
    let fx = Fixture::new();
    let users = fx.model("users");
    WriteService::create(&*fx.store, users, rec(json!({"email": "a@x.io"})), &policy())
        .await
        .unwrap();
    let err = WriteService::create(&*fx.store, users, rec(json!({"email": "a@x.io"})), &policy())
        .await
        .unwrap_err();
    assert!(
        matches!(&err, AppError::Conflict { reason: ConflictReason::Duplicate(_), .. }),
        "{err}"
    );
    assert_eq!(fx.store.rows("users").len(), 1);
}

#[tokio::test]
async fn create_overwrites_live_duplicate_when_ignoring_duplicates() {
    let fx = Fixture::new();
    let users = fx.model("users");
    let policy = ignoring_duplicates();
    WriteService::create(
        &*fx.store,
        users,
        rec(json!({"email": "a@x.io", "name": "A", "role": "admin"})),
        &policy,
    )
    .await
    .unwrap();
    let outcome = WriteService::create(&*fx.store, users, rec(json!({"email": "a@x.io", "name": "B"})), &policy)
        .await
        .unwrap();
    assert!(!outcome.created);
    assert_eq!(outcome.row["id"], json!(1));
    assert_eq!(outcome.row["name"], json!("B"));
    // Omitted attributes are reset before the overwrite.
    assert_eq!(outcome.row["role"], json!("member"));
    assert_eq!(fx.store.rows("users").len(), 1);
}

#[tokio::test]
async fn create_restores_soft_deleted_row() {
    let fx = Fixture::new();
    let users = fx.model("users");
    WriteService::create(&*fx.store, users, rec(json!({"email": "a@x.io", "name": "old"})), &policy())
        .await
        .unwrap();
    soft_delete(&fx, "users", 1).await;
    assert!(WriteService::read(&*fx.store, users, &json!(1)).await.unwrap().is_none());

    let outcome = WriteService::create(&*fx.store, users, rec(json!({"email": "a@x.io", "name": "new"})), &policy())
        .await
        .unwrap();
    assert!(!outcome.created);
    assert_eq!(outcome.row["id"], json!(1));
    assert_eq!(outcome.row["name"], json!("new"));
    assert_eq!(outcome.row["deleted_at"], Value::Null);

    let live = WriteService::read(&*fx.store, users, &json!(1)).await.unwrap();
    assert_eq!(live.map(|r| r["name"].clone()), Some(json!("new")));
}

#[tokio::test]
async fn recreating_a_soft_deleted_row_drops_its_old_values() {
    let fx = Fixture::new();
    let users = fx.model("users");
    WriteService::create(
        &*fx.store,
        users,
        rec(json!({"email": "a@x.io", "name": "old-secret", "role": "admin"})),
        &policy(),
    )
    .await
    .unwrap();
    soft_delete(&fx, "users", 1).await;

    let outcome = WriteService::create(&*fx.store, users, rec(json!({"email": "a@x.io"})), &policy())
        .await
        .unwrap();
    assert_eq!(outcome.row["id"], json!(1));
    assert_eq!(outcome.row["name"], Value::Null);
    assert_eq!(outcome.row["role"], json!("member"));

    soft_delete(&fx, "users", 1).await;
    let outcomes = WriteService::bulk_create(&*fx.store, users, vec![rec(json!({"email": "a@x.io", "role": "owner"}))], &policy())
        .await
        .unwrap();
    assert_eq!(outcomes[0].row["id"], json!(1));
    assert_eq!(outcomes[0].row["name"], Value::Null);
    assert_eq!(outcomes[0].row["role"], json!("owner"));
}

#[tokio::test]
async fn upsert_creates_then_updates_by_unique_index() {
    let fx = Fixture::new();
    let groups = fx.model("groups");
    let first = WriteService::upsert(&*fx.store, groups, rec(json!({"code": "ops", "title": "Ops"})))
        .await
        .unwrap();
    assert!(first.created);
    let second = WriteService::upsert(&*fx.store, groups, rec(json!({"code": "ops", "title": "Operations"})))
        .await
        .unwrap();
    assert!(!second.created);
    assert_eq!(second.row["id"], first.row["id"]);
    assert_eq!(second.row["title"], json!("Operations"));
}

#[tokio::test]
async fn upsert_restores_soft_deleted_row() {
    let fx = Fixture::new();
    let users = fx.model("users");
    WriteService::create(&*fx.store, users, rec(json!({"email": "a@x.io"})), &policy())
        .await
        .unwrap();
    soft_delete(&fx, "users", 1).await;

    let outcome = WriteService::upsert(&*fx.store, users, rec(json!({"email": "a@x.io", "name": "back"})))
        .await
        .unwrap();
    assert!(!outcome.created);
    assert_eq!(outcome.row["id"], json!(1));
    assert_eq!(outcome.row["deleted_at"], Value::Null);
    assert_eq!(outcome.row["name"], json!("back"));
}

#[tokio::test]
async fn upsert_colliding_on_another_index_is_rejected() {
    let fx = Fixture::new();
    let accounts = fx.model("accounts");
    for (email, login) in [("a@x.io", "alpha"), ("b@x.io", "beta")] {
        WriteService::create(&*fx.store, accounts, rec(json!({"email": email, "login": login})), &policy())
            .await
            .unwrap();
    }
    let err = WriteService::upsert(&*fx.store, accounts, rec(json!({"email": "a@x.io", "login": "beta"})))
        .await
        .unwrap_err();
    assert!(
        matches!(&err, AppError::Conflict { reason: ConflictReason::UpsertRejected, .. }),
        "{err}"
    );
    let first = WriteService::read(&*fx.store, accounts, &json!(1)).await.unwrap().unwrap();
    assert_eq!(first["login"], json!("alpha"));
}

#[tokio::test]
async fn upsert_without_identity_is_rejected() {
    let fx = Fixture::new();
    let err = WriteService::upsert(&*fx.store, fx.model("users"), rec(json!({"id": 3, "name": "x"})))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation { reason: ValidationReason::NoIdentity, .. }));
}

#[tokio::test]
async fn bulk_create_resolves_soft_deleted_conflicts() {
    let fx = Fixture::new();
    let users = fx.model("users");
    WriteService::create(&*fx.store, users, rec(json!({"email": "a@x.io", "name": "a"})), &policy())
        .await
        .unwrap();
    soft_delete(&fx, "users", 1).await;

    let outcomes = WriteService::bulk_create(
        &*fx.store,
        users,
        vec![
            rec(json!({"email": "c@x.io", "name": "c"})),
            rec(json!({"email": "a@x.io", "name": "back"})),
        ],
        &policy(),
    )
    .await
    .unwrap();
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes[0].created);
    assert_eq!(outcomes[0].row["email"], json!("c@x.io"));
    assert!(!outcomes[1].created);
    assert_eq!(outcomes[1].row["id"], json!(1));
    assert_eq!(outcomes[1].row["name"], json!("back"));
    assert_eq!(outcomes[1].row["deleted_at"], Value::Null);
    assert_eq!(fx.store.rows("users").len(), 2);
}

#[tokio::test]
async fn bulk_create_resolves_composite_index_conflicts() {
    let fx = Fixture::new();
    let handles = fx.model("handles");
    WriteService::create(&*fx.store, handles, rec(json!({"org": "acme", "handle": "bob"})), &policy())
        .await
        .unwrap();
    soft_delete(&fx, "handles", 1).await;

    let outcomes = WriteService::bulk_create(
        &*fx.store,
        handles,
        vec![rec(json!({"org": "acme", "handle": "bob", "note": "again"}))],
        &policy(),
    )
    .await
    .unwrap();
    assert_eq!(outcomes.len(), 1);
    assert!(!outcomes[0].created);
    assert_eq!(outcomes[0].row["id"], json!(1));
    assert_eq!(outcomes[0].row["note"], json!("again"));
}

#[tokio::test]
async fn bulk_create_rejects_live_duplicates_and_writes_nothing() {
    let fx = Fixture::new();
    let users = fx.model("users");
    WriteService::create(&*fx.store, users, rec(json!({"email": "a@x.io"})), &policy())
        .await
        .unwrap();
    let err = WriteService::bulk_create(
        &*fx.store,
        users,
        vec![rec(json!({"email": "b@x.io"})), rec(json!({"email": "a@x.io"}))],
        &policy(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Conflict { reason: ConflictReason::Duplicate(_), .. }));
    assert_eq!(fx.store.rows("users").len(), 1);
}

#[tokio::test]
async fn bulk_create_folds_duplicates_within_the_batch() {
    let fx = Fixture::new();
    let users = fx.model("users");
    let outcomes = WriteService::bulk_create(
        &*fx.store,
        users,
        vec![
            rec(json!({"email": "d@x.io", "name": "first"})),
            rec(json!({"email": "d@x.io", "name": "second"})),
        ],
        &policy(),
    )
    .await
    .unwrap();
    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].created);
    assert_eq!(outcomes[0].row["name"], json!("second"));
}

#[tokio::test]
async fn bulk_create_flush_colliding_with_inserted_row_is_rejected() {
    let fx = Fixture::new();
    let accounts = fx.model("accounts");
    WriteService::create(&*fx.store, accounts, rec(json!({"email": "a@x.io", "login": "alpha"})), &policy())
        .await
        .unwrap();
    soft_delete(&fx, "accounts", 1).await;

    // The restored row takes "gamma", which the clean insert already gave the new row.
    let err = WriteService::bulk_create(
        &*fx.store,
        accounts,
        vec![
            rec(json!({"email": "a@x.io", "login": "gamma"})),
            rec(json!({"email": "b@x.io", "login": "gamma"})),
        ],
        &policy(),
    )
    .await
    .unwrap_err();
    assert!(
        matches!(&err, AppError::Conflict { reason: ConflictReason::FlushRejected(_), .. }),
        "{err}"
    );
    let rows = fx.store.rows("accounts");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["login"], json!("alpha"));
    assert_ne!(rows[0]["deleted_at"], Value::Null);
}

/// Delegates to a [`MemoryStore`] but fails every insert with a fixed violation.
struct FixedViolationStore {
    inner: Arc<MemoryStore>,
    violation: UniqueViolation,
}

#[async_trait]
impl StoreAdapter for FixedViolationStore {
    async fn insert(&self, _: &ModelDescriptor, _: &[Record], _: &InsertOptions) -> Result<Vec<Record>, StoreError> {
        Err(StoreError::UniqueViolation(self.violation.clone()))
    }

    async fn update(&self, model: &ModelDescriptor, patch: &Record, scope: &Filter) -> Result<Vec<Record>, StoreError> {
        self.inner.update(model, patch, scope).await
    }

    async fn find(&self, model: &ModelDescriptor, query: &FindQuery, options: FindOptions) -> Result<Vec<Record>, StoreError> {
        self.inner.find(model, query, options).await
    }

    async fn native_upsert(
        &self,
        model: &ModelDescriptor,
        record: &Record,
        conflict_fields: &[String],
    ) -> Result<UpsertResult, StoreError> {
        self.inner.native_upsert(model, record, conflict_fields).await
    }

    async fn destroy(&self, model: &ModelDescriptor, scope: &Filter) -> Result<u64, StoreError> {
        self.inner.destroy(model, scope).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.inner.ping().await
    }
}

#[tokio::test]
async fn bulk_create_violation_matching_no_pending_record_is_internal() {
    let fx = Fixture::new();
    let users = fx.model("users");
    WriteService::create(&*fx.store, users, rec(json!({"email": "ghost@x.io"})), &policy())
        .await
        .unwrap();
    soft_delete(&fx, "users", 1).await;

    let store = FixedViolationStore {
        inner: fx.store.clone(),
        violation: UniqueViolation {
            constraint: Some("users_email_key".into()),
            fields: vec![("email".into(), json!("ghost@x.io"))],
        },
    };
    let err = WriteService::bulk_create(
        &store,
        users,
        vec![rec(json!({"email": "a@x.io"})), rec(json!({"email": "b@x.io"}))],
        &policy(),
    )
    .await
    .unwrap_err();
    assert!(matches!(&err, AppError::Internal { .. }), "{err}");
    let rows = fx.store.rows("users");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["email"], json!("ghost@x.io"));
    assert_ne!(rows[0]["deleted_at"], Value::Null);
}

#[tokio::test]
async fn bulk_create_validates_the_batch_first() {
    let fx = Fixture::new();
    let users = fx.model("users");

    let err = WriteService::bulk_create(&*fx.store, users, Vec::new(), &policy())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation { reason: ValidationReason::EmptyBatch, .. }));

    let err = WriteService::bulk_create(
        &*fx.store,
        users,
        vec![rec(json!({"email": "a@x.io"})), rec(json!({"email": "b@x.io", "name": "b"}))],
        &policy(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Validation { reason: ValidationReason::HeterogeneousBatch, .. }));

    let small = WritePolicy {
        bulk_limit: 2,
        ..WritePolicy::default()
    };
    let batch = ["a", "b", "c"].iter().map(|n| rec(json!({"email": format!("{n}@x.io")}))).collect();
    let err = WriteService::bulk_create(&*fx.store, users, batch, &small)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation { reason: ValidationReason::BatchTooLarge { limit: 2 }, .. }));
    assert!(fx.store.rows("users").is_empty());
}

#[tokio::test]
async fn bulk_upsert_returns_rows_in_primary_key_order() {
    let fx = Fixture::new();
    let groups = fx.model("groups");
    WriteService::create(&*fx.store, groups, rec(json!({"code": "b", "title": "old"})), &policy())
        .await
        .unwrap();

    let rows = WriteService::bulk_upsert(
        &*fx.store,
        groups,
        vec![
            rec(json!({"code": "c", "title": "C"})),
            rec(json!({"code": "b", "title": "B"})),
        ],
        &policy(),
    )
    .await
    .unwrap();
    let codes: Vec<&Value> = rows.iter().map(|r| &r["code"]).collect();
    assert_eq!(codes, vec![&json!("b"), &json!("c")]);
    assert_eq!(rows[0]["id"], json!(1));
    assert_eq!(rows[0]["title"], json!("B"));
}

#[tokio::test]
async fn bulk_upsert_later_records_win() {
    let fx = Fixture::new();
    let groups = fx.model("groups");
    let rows = WriteService::bulk_upsert(
        &*fx.store,
        groups,
        vec![
            rec(json!({"code": "x", "title": "1"})),
            rec(json!({"code": "x", "title": "2"})),
        ],
        &policy(),
    )
    .await
    .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["title"], json!("2"));
}

#[tokio::test]
async fn update_collision_is_never_recovered() {
    let fx = Fixture::new();
    let users = fx.model("users");
    for email in ["a@x.io", "b@x.io"] {
        WriteService::create(&*fx.store, users, rec(json!({ "email": email })), &policy())
            .await
            .unwrap();
    }
    let err = WriteService::update(
        &*fx.store,
        users,
        rec(json!({"email": "a@x.io"})),
        &Filter::eq("id", json!(2)),
    )
    .await
    .unwrap_err();
    match err {
        AppError::Conflict {
            reason: ConflictReason::UpdateRejected(culprit),
            ..
        } => assert!(culprit.contains("a@x.io"), "{culprit}"),
        other => panic!("unexpected error: {other}"),
    }
    let rows = fx.store.rows("users");
    assert_eq!(rows[1]["email"], json!("b@x.io"));
}

#[tokio::test]
async fn update_ignores_deleted_rows_and_delete_markers() {
    let fx = Fixture::new();
    let users = fx.model("users");
    WriteService::create(&*fx.store, users, rec(json!({"email": "a@x.io"})), &policy())
        .await
        .unwrap();

    let rows = WriteService::update(
        &*fx.store,
        users,
        rec(json!({"name": "renamed", "deleted_at": "2020-01-01T00:00:00Z"})),
        &Filter::eq("id", json!(1)),
    )
    .await
    .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["name"], json!("renamed"));
    assert_eq!(rows[0]["deleted_at"], Value::Null);

    soft_delete(&fx, "users", 1).await;
    let err = WriteService::update(&*fx.store, users, rec(json!({"name": "x"})), &Filter::eq("id", json!(1)))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound { .. }));
}

#[tokio::test]
async fn destroy_marks_paranoid_rows_and_removes_others() {
    let fx = Fixture::new();
    let users = fx.model("users");
    let posts = fx.model("posts");
    WriteService::create(&*fx.store, users, rec(json!({"email": "a@x.io"})), &policy())
        .await
        .unwrap();
    WriteService::create(&*fx.store, posts, rec(json!({"slug": "hello"})), &policy())
        .await
        .unwrap();

    soft_delete(&fx, "users", 1).await;
    let stored = fx.store.rows("users");
    assert_eq!(stored.len(), 1);
    assert!(stored[0]["deleted_at"].is_string());

    soft_delete(&fx, "posts", 1).await;
    assert!(fx.store.rows("posts").is_empty());

    let err = WriteService::destroy(&*fx.store, users, &Filter::eq("id", json!(1)))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound { .. }));
}
