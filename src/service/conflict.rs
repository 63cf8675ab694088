//! Turn a store uniqueness violation into the identity of the row it collided with, and decide
//! whether that row may be overwritten.

use crate::config::{Index, ModelDescriptor};
use crate::error::{AppError, ConflictReason};
use crate::query::{Filter, FindQuery};
use crate::record::Record;
use crate::service::identity::list_indexes;
use crate::service::paranoid::is_deleted;
use crate::store::{FindOptions, StoreAdapter, UniqueViolation};
use serde_json::Value;

/// Separator of legacy single-string composite values (`"a-b"` for an index on two fields).
pub const COMPOSITE_DELIMITER: char = '-';

#[derive(Clone, Copy, Debug, Default)]
pub struct ConflictOptions {
    /// Allow overwriting a live (not soft-deleted) duplicate.
    pub ignore_duplicates: bool,
}

/// A conflicting row prepared for overwrite.
#[derive(Clone, Debug)]
pub struct Resolution {
    /// Stored row reset to fresh-row values, primary key kept.
    pub row: Record,
    pub identity: Record,
    pub was_deleted: bool,
}

/// Identity predicate of the row a violation collided with, or `None` if it cannot be decoded.
pub fn decode_violation(model: &ModelDescriptor, violation: &UniqueViolation) -> Option<Record> {
    if violation.fields.is_empty() {
        return None;
    }
    if violation.fields.iter().all(|(f, _)| model.has_attribute(f)) {
        return Some(violation.fields.iter().cloned().collect());
    }

    // Named composite index: exactly one reported value, carrying every field of the index.
    let [(reported, value)] = violation.fields.as_slice() else {
        return None;
    };
    let indexes = list_indexes(model);
    let index = find_index(&indexes, reported).or_else(|| {
        violation
            .constraint
            .as_deref()
            .and_then(|c| find_index(&indexes, c))
    })?;
    let values = split_composite(index, value)?;
    Some(index.fields.iter().cloned().zip(values).collect())
}

fn find_index<'a>(indexes: &'a [Index], name: &str) -> Option<&'a Index> {
    indexes.iter().find(|i| i.name == name)
}

fn split_composite(index: &Index, value: &Value) -> Option<Vec<Value>> {
    let arity = index.fields.len();
    match value {
        Value::Array(values) if values.len() == arity => Some(values.clone()),
        Value::Array(_) => None,
        scalar if arity == 1 => Some(vec![scalar.clone()]),
        Value::String(s) => {
            let parts: Vec<Value> = s
                .split(COMPOSITE_DELIMITER)
                .map(|p| Value::String(p.to_string()))
                .collect();
            (parts.len() == arity).then_some(parts)
        }
        _ => None,
    }
}

/// Stored row carrying `identity`, soft-deleted rows included.
pub async fn find_conflicting_row(
    store: &dyn StoreAdapter,
    model: &ModelDescriptor,
    identity: &Record,
) -> Result<Option<Record>, AppError> {
    let query = FindQuery {
        limit: Some(1),
        ..FindQuery::filtered(Filter::Match(identity.clone()))
    };
    let mut rows = store
        .find(model, &query, FindOptions::with_soft_deleted())
        .await
        .map_err(|e| AppError::store(&model.name, e))?;
    Ok(rows.pop())
}

/// Reset every non-key attribute to the value a fresh row would take (see [`Attribute::fresh_value`]).
/// A non-nullable attribute with nothing to fall back on keeps its stored value, which the
/// overwriting record is required to replace.
///
/// [`Attribute::fresh_value`]: crate::config::Attribute::fresh_value
pub fn reset_to_defaults(model: &ModelDescriptor, row: &Record) -> Record {
    let mut out = row.clone();
    for attr in model.attributes.iter().filter(|a| !a.primary_key) {
        match attr.fresh_value() {
            Some(value) if !value.is_null() || attr.nullable => {
                out.insert(attr.name.clone(), value);
            }
            _ => {}
        }
    }
    out
}

/// Decode the violation, look up the conflicting row, and apply the overwrite policy:
/// a live duplicate is only overwritten when `ignore_duplicates` is set.
pub async fn resolve_conflict(
    store: &dyn StoreAdapter,
    model: &ModelDescriptor,
    violation: &UniqueViolation,
    options: ConflictOptions,
) -> Result<Resolution, AppError> {
    let identity = decode_violation(model, violation).ok_or_else(|| {
        tracing::warn!(model = %model.name, violation = %violation, "undecodable uniqueness violation");
        AppError::conflict(&model.name, ConflictReason::Undecodable)
    })?;
    let row = find_conflicting_row(store, model, &identity)
        .await?
        .ok_or_else(|| AppError::conflict(&model.name, ConflictReason::RowMissing(describe(&identity))))?;
    resolution_for(model, row, identity, options)
}

/// Policy step of [`resolve_conflict`] for an already-fetched row.
pub fn resolution_for(
    model: &ModelDescriptor,
    row: Record,
    identity: Record,
    options: ConflictOptions,
) -> Result<Resolution, AppError> {
    let was_deleted = is_deleted(model, Some(&row));
    if !options.ignore_duplicates && !was_deleted {
        return Err(AppError::conflict(&model.name, ConflictReason::Duplicate(describe(&identity))));
    }
    tracing::info!(model = %model.name, identity = %describe(&identity), was_deleted, "resolved uniqueness conflict");
    Ok(Resolution {
        row: reset_to_defaults(model, &row),
        identity,
        was_deleted,
    })
}

/// Compact rendering of an identity for error messages.
pub fn describe(identity: &Record) -> String {
    Value::Object(identity.clone()).to_string()
}
