//! Soft-delete reconciliation for paranoid models.
//!
//! A paranoid model marks deletion in its deletedAt attribute. The attribute's declared
//! default is the "not deleted" sentinel; any other value means the row is deleted.
//! Models that are not paranoid never have deleted rows.

use crate::config::{Attribute, FieldType, ModelDescriptor};
use crate::error::AppError;
use crate::query::Filter;
use crate::record::Record;
use crate::service::identity::primary_identity;
use crate::store::StoreAdapter;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;

/// deletedAt attribute and its "not deleted" sentinel.
pub fn sentinel(model: &ModelDescriptor) -> Option<(&Attribute, Value)> {
    let attr = model.deleted_at_attribute()?;
    Some((attr, attr.default.clone().unwrap_or(Value::Null)))
}

/// Restricts a lookup to rows that are not soft-deleted.
pub fn live_filter(model: &ModelDescriptor) -> Option<Filter> {
    sentinel(model).map(|(attr, value)| Filter::eq(attr.name.clone(), value))
}

/// True if `row` is absent, or carries a deletedAt value other than the sentinel.
pub fn is_deleted(model: &ModelDescriptor, row: Option<&Record>) -> bool {
    let Some(row) = row else {
        return true;
    };
    let Some((attr, not_deleted)) = sentinel(model) else {
        return false;
    };
    let current = row.get(&attr.name).unwrap_or(&Value::Null);
    !sentinel_eq(attr.field_type, current, &not_deleted)
}

/// Overwrite the deletedAt attribute of every record with the sentinel.
pub fn stamp_not_deleted(model: &ModelDescriptor, records: &mut [Record]) {
    if let Some((attr, not_deleted)) = sentinel(model) {
        for record in records.iter_mut() {
            record.insert(attr.name.clone(), not_deleted.clone());
        }
    }
}

/// Patch that marks rows deleted now.
pub fn deleted_patch(model: &ModelDescriptor) -> Option<Record> {
    let (attr, _) = sentinel(model)?;
    let mut patch = Record::new();
    patch.insert(attr.name.clone(), Value::String(Utc::now().to_rfc3339()));
    Some(patch)
}

/// Persist the sentinel on `row` if it is soft-deleted. Returns the row as stored afterwards.
pub async fn restore_if_deleted(
    store: &dyn StoreAdapter,
    model: &ModelDescriptor,
    row: Record,
) -> Result<Record, AppError> {
    if !is_deleted(model, Some(&row)) {
        return Ok(row);
    }
    let Some((attr, not_deleted)) = sentinel(model) else {
        return Ok(row);
    };
    let identity = primary_identity(model, &row)
        .ok_or_else(|| AppError::internal(&model.name, "soft-deleted row has no primary key"))?;
    let mut patch = Record::new();
    patch.insert(attr.name.clone(), not_deleted);
    tracing::info!(model = %model.name, identity = ?identity, "restoring soft-deleted row");
    let mut rows = store
        .update(model, &patch, &Filter::Match(identity.clone()))
        .await
        .map_err(|e| AppError::store(&model.name, e))?;
    rows.pop()
        .ok_or_else(|| AppError::not_found(&model.name, format!("{:?}", identity)))
}

/// Sentinel comparison by declared field type: instants for temporal fields, structural otherwise.
fn sentinel_eq(field_type: FieldType, a: &Value, b: &Value) -> bool {
    if a.is_null() || b.is_null() {
        return a.is_null() && b.is_null();
    }
    if field_type.is_temporal() {
        if let (Some(x), Some(y)) = (parse_instant(a), parse_instant(b)) {
            return x == y;
        }
    }
    a == b
}

fn parse_instant(v: &Value) -> Option<DateTime<Utc>> {
    let s = v.as_str()?;
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{parse_config, resolve};
    use serde_json::json;

    fn rec(v: Value) -> Record {
        v.as_object().cloned().unwrap()
    }

    fn model(default: &str) -> ModelDescriptor {
        let raw = format!(
            r#"{{"models": [{{
                "name": "notes",
                "attributes": [
                    {{"name": "id", "type": "bigserial"}},
                    {{"name": "removed_at", "type": "timestamptz", "default": {}}}
                ],
                "paranoid": true,
                "deleted_at": "removed_at"
            }}]}}"#,
            default
        );
        resolve(&parse_config(&raw).unwrap()).unwrap().get("notes").unwrap().clone()
    }

    #[test]
    fn absent_row_counts_as_deleted() {
        assert!(is_deleted(&model("null"), None));
    }

    #[test]
    fn null_sentinel() {
        let m = model("null");
        assert!(!is_deleted(&m, Some(&rec(json!({"id": 1, "removed_at": null})))));
        assert!(is_deleted(&m, Some(&rec(json!({"id": 1, "removed_at": "2024-02-01T10:00:00Z"})))));
    }

    #[test]
    fn temporal_sentinel_compares_instants() {
        let m = model("\"1970-01-01T00:00:00Z\"");
        assert!(!is_deleted(&m, Some(&rec(json!({"removed_at": "1970-01-01T00:00:00+00:00"})))));
        assert!(!is_deleted(&m, Some(&rec(json!({"removed_at": "1970-01-01T00:00:00"})))));
        assert!(is_deleted(&m, Some(&rec(json!({"removed_at": "2020-01-01T00:00:00Z"})))));
    }

    #[test]
    fn stamping_overrides_client_markers() {
        let m = model("null");
        let mut batch = vec![rec(json!({"removed_at": "2024-01-01T00:00:00Z"})), rec(json!({}))];
        stamp_not_deleted(&m, &mut batch);
        assert!(batch.iter().all(|r| r.get("removed_at") == Some(&Value::Null)));
    }

    #[test]
    fn plain_models_have_no_deleted_rows() {
        let config = parse_config(
            r#"{"models": [{"name": "plain", "attributes": [{"name": "id", "type": "bigserial"}]}]}"#,
        )
        .unwrap();
        let registry = resolve(&config).unwrap();
        let plain = registry.get("plain").unwrap();
        assert!(!is_deleted(plain, Some(&rec(json!({"id": 1})))));
        assert!(live_filter(plain).is_none());
    }
}
