#![allow(dead_code)]

use resource_sdk::{parse_config, resolve, AppState, MemoryStore, ModelDescriptor, ModelRegistry, Record, WritePolicy};
use serde_json::Value;
use std::sync::Arc;

pub const MODELS: &str = r#"{
    "models": [
        {
            "name": "users",
            "paranoid": true,
            "attributes": [
                {"name": "id", "type": "bigserial"},
                {"name": "email", "type": "text", "nullable": false, "validation": {"required": true, "format": "email"}},
                {"name": "name", "type": "text"},
                {"name": "role", "type": "text", "default": "member"}
            ],
            "indexes": [{"name": "users_email_key", "fields": ["email"], "unique": true}],
            "associations": [
                {"name": "posts", "kind": "has_many", "target": "posts", "foreign_key": "author_id"},
                {"name": "groups", "kind": "belongs_to_many", "target": "groups", "through": "memberships",
                 "foreign_key": "user_id", "other_key": "group_id"}
            ]
        },
        {
            "name": "posts",
            "attributes": [
                {"name": "id", "type": "bigserial"},
                {"name": "slug", "type": "text", "nullable": false},
                {"name": "title", "type": "text"},
                {"name": "author_id", "type": "bigint"}
            ],
            "indexes": [{"name": "posts_slug_key", "fields": ["slug"], "unique": true}],
            "associations": [
                {"name": "author", "kind": "belongs_to", "target": "users", "foreign_key": "author_id"}
            ]
        },
        {
            "name": "groups",
            "attributes": [
                {"name": "id", "type": "bigserial"},
                {"name": "code", "type": "text", "nullable": false},
                {"name": "title", "type": "text"}
            ],
            "unique_keys": [{"name": "groups_code_key", "fields": ["code"]}]
        },
        {
            "name": "memberships",
            "attributes": [
                {"name": "id", "type": "bigserial"},
                {"name": "user_id", "type": "bigint", "nullable": false},
                {"name": "group_id", "type": "bigint", "nullable": false}
            ],
            "unique_keys": [{"name": "memberships_user_group", "fields": ["user_id", "group_id"]}]
        },
        {
            "name": "handles",
            "paranoid": true,
            "timestamps": false,
            "attributes": [
                {"name": "id", "type": "bigserial"},
                {"name": "org", "type": "text", "nullable": false},
                {"name": "handle", "type": "text", "nullable": false},
                {"name": "note", "type": "text"}
            ],
            "unique_keys": [{"name": "handles_org_handle", "fields": ["org", "handle"]}]
        },
        {
            "name": "accounts",
            "paranoid": true,
            "attributes": [
                {"name": "id", "type": "bigserial"},
                {"name": "email", "type": "text", "nullable": false},
                {"name": "login", "type": "text", "nullable": false}
            ],
            "indexes": [
                {"name": "accounts_email_key", "fields": ["email"], "unique": true},
                {"name": "accounts_login_key", "fields": ["login"], "unique": true}
            ]
        },
        {
            "name": "audit_events",
            "operations": ["read", "create"],
            "attributes": [
                {"name": "id", "type": "bigserial"},
                {"name": "kind", "type": "text"}
            ]
        }
    ]
}"#;

pub struct Fixture {
    pub registry: Arc<ModelRegistry>,
    pub store: Arc<MemoryStore>,
}

impl Fixture {
    pub fn new() -> Self {
        let config = parse_config(MODELS).expect("models parse");
        let registry = Arc::new(resolve(&config).expect("models resolve"));
        let store = Arc::new(MemoryStore::new(registry.clone()));
        Fixture { registry, store }
    }

    pub fn model(&self, name: &str) -> &ModelDescriptor {
        self.registry.get(name).expect("model exists")
    }

    pub fn state(&self, policy: WritePolicy) -> AppState {
        AppState::new(self.store.clone(), self.registry.clone(), policy)
    }
}

pub fn rec(v: Value) -> Record {
    v.as_object().cloned().expect("object literal")
}

pub fn policy() -> WritePolicy {
    WritePolicy::default()
}
