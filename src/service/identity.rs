//! Unique index resolution: which index identifies a record, and the lookup predicate it yields.

use crate::config::{Index, ModelDescriptor};
use crate::record::Record;

/// Every index of the model in priority order: primary, declared, then named unique keys.
pub fn list_indexes(model: &ModelDescriptor) -> Vec<Index> {
    let mut out = Vec::with_capacity(1 + model.options.declared_indexes.len() + model.options.unique_keys.len());
    out.push(model.primary_index());
    out.extend(model.options.declared_indexes.iter().cloned());
    out.extend(model.options.unique_keys.iter().cloned());
    out
}

pub fn list_unique_indexes(model: &ModelDescriptor) -> Vec<Index> {
    list_indexes(model).into_iter().filter(|i| i.unique).collect()
}

/// First index, in priority order, whose every field carries a value in `record`.
/// A null value identifies nothing and counts as absent.
pub fn select_matching_index<'a>(indexes: &'a [Index], record: &Record) -> Option<&'a Index> {
    indexes.iter().find(|index| {
        index
            .fields
            .iter()
            .all(|f| record.get(f).map(|v| !v.is_null()).unwrap_or(false))
    })
}

/// Sub-record holding only the index's fields: the identity predicate.
pub fn extract_identity(index: &Index, record: &Record) -> Record {
    index
        .fields
        .iter()
        .filter_map(|f| record.get(f).map(|v| (f.clone(), v.clone())))
        .collect()
}

/// Matching unique index and identity predicate for a record.
pub fn identify(model: &ModelDescriptor, record: &Record) -> Option<(Index, Record)> {
    let indexes = list_unique_indexes(model);
    let index = select_matching_index(&indexes, record)?.clone();
    let identity = extract_identity(&index, record);
    Some((index, identity))
}

/// Predicate on the primary key, when the row carries it.
pub fn primary_identity(model: &ModelDescriptor, row: &Record) -> Option<Record> {
    let index = model.primary_index();
    let identity = extract_identity(&index, row);
    (identity.len() == index.fields.len() && identity.values().all(|v| !v.is_null())).then_some(identity)
}

/// Remove client-supplied values for server-assigned identity fields.
pub fn strip_generated(model: &ModelDescriptor, record: &mut Record) {
    for field in model.generated_fields() {
        if record.remove(field).is_some() {
            tracing::debug!(model = %model.name, field = %field, "ignoring client-supplied identity");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{resolve, parse_config};
    use serde_json::{json, Value};

    fn rec(v: Value) -> Record {
        v.as_object().cloned().unwrap()
    }

    fn model() -> ModelDescriptor {
        let config = parse_config(
            r#"{"models": [{
                "name": "accounts",
                "attributes": [
                    {"name": "id", "type": "bigserial"},
                    {"name": "email", "type": "text"},
                    {"name": "tenant", "type": "text"},
                    {"name": "handle", "type": "text"},
                    {"name": "city", "type": "text"}
                ],
                "indexes": [
                    {"name": "accounts_city_idx", "fields": ["city"]},
                    {"name": "accounts_email_key", "fields": ["email"], "unique": true}
                ],
                "unique_keys": [{"name": "accounts_tenant_handle", "fields": ["tenant", "handle"]}]
            }]}"#,
        )
        .unwrap();
        resolve(&config).unwrap().get("accounts").unwrap().clone()
    }

    #[test]
    fn indexes_are_listed_in_priority_order() {
        let names: Vec<String> = list_indexes(&model()).into_iter().map(|i| i.name).collect();
        assert_eq!(
            names,
            vec!["accounts_pkey", "accounts_city_idx", "accounts_email_key", "accounts_tenant_handle"]
        );
        let unique: Vec<String> = list_unique_indexes(&model()).into_iter().map(|i| i.name).collect();
        assert_eq!(unique, vec!["accounts_pkey", "accounts_email_key", "accounts_tenant_handle"]);
    }

    #[test]
    fn first_fully_present_index_wins() {
        let m = model();
        let indexes = list_unique_indexes(&m);
        let r = rec(json!({"email": "a@x.io", "tenant": "t", "handle": "h"}));
        assert_eq!(select_matching_index(&indexes, &r).unwrap().name, "accounts_email_key");
        let r = rec(json!({"tenant": "t", "handle": "h"}));
        assert_eq!(select_matching_index(&indexes, &r).unwrap().name, "accounts_tenant_handle");
        let r = rec(json!({"tenant": "t", "city": "x"}));
        assert!(select_matching_index(&indexes, &r).is_none());
        let r = rec(json!({"email": null}));
        assert!(select_matching_index(&indexes, &r).is_none());
    }

    #[test]
    fn identity_holds_only_index_fields() {
        let m = model();
        let (index, identity) = identify(&m, &rec(json!({"tenant": "t", "handle": "h", "city": "x"}))).unwrap();
        assert_eq!(index.fields, vec!["tenant", "handle"]);
        assert_eq!(Value::Object(identity), json!({"tenant": "t", "handle": "h"}));
    }

    #[test]
    fn generated_keys_are_stripped() {
        let m = model();
        let mut r = rec(json!({"id": 5, "email": "a@x.io"}));
        strip_generated(&m, &mut r);
        assert_eq!(Value::Object(r), json!({"email": "a@x.io"}));
    }
}
