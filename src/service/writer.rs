//! Conflict-aware writes: create, upsert, their bulk forms, update, and destroy.
//!
//! Client-supplied server identities are stripped and delete markers are overwritten before
//! anything reaches the store. Batches are validated before the first store call.

use crate::config::{ModelDescriptor, WritePolicy};
use crate::error::{AppError, ConflictReason, ValidationReason};
use crate::query::{Filter, FindQuery, OrderBy};
use crate::record::{is_homogeneous, matches_predicate, overlay, Record};
use crate::service::conflict::{
    decode_violation, describe, find_conflicting_row, resolution_for, resolve_conflict, ConflictOptions,
};
use crate::service::identity::{identify, primary_identity, strip_generated};
use crate::service::paranoid::{deleted_patch, live_filter, restore_if_deleted, stamp_not_deleted};
use crate::store::{FindOptions, InsertOptions, OnConflict, StoreAdapter, StoreError};
use serde::Serialize;
use serde_json::Value;

/// Result of one write: `created` is false when an existing row was matched or restored.
#[derive(Clone, Debug, Serialize)]
pub struct WriteOutcome {
    pub created: bool,
    pub row: Record,
}

impl From<&WritePolicy> for ConflictOptions {
    fn from(policy: &WritePolicy) -> Self {
        ConflictOptions {
            ignore_duplicates: policy.ignore_duplicates,
        }
    }
}

pub struct WriteService;

impl WriteService {
    /// Insert one record. On a uniqueness violation the conflicting row (soft-deleted, or any
    /// row when duplicates are ignored) is reset to its defaults and overwritten with `record`.
    pub async fn create(
        store: &dyn StoreAdapter,
        model: &ModelDescriptor,
        record: Record,
        policy: &WritePolicy,
    ) -> Result<WriteOutcome, AppError> {
        let mut batch = [record];
        prepare(model, &mut batch);
        let [record] = batch;

        let violation = match store.insert(model, std::slice::from_ref(&record), &InsertOptions::default()).await {
            Ok(mut rows) => {
                let row = rows
                    .pop()
                    .ok_or_else(|| AppError::internal(&model.name, "insert returned no row"))?;
                return Ok(WriteOutcome { created: true, row });
            }
            Err(StoreError::UniqueViolation(v)) => v,
            Err(e) => return Err(AppError::store(&model.name, e)),
        };

        let resolution = resolve_conflict(store, model, &violation, policy.into()).await?;
        let scope = primary_identity(model, &resolution.row).unwrap_or_else(|| resolution.identity.clone());
        let mut patch = overlay(&resolution.row, &record);
        for pk in &model.primary_key {
            patch.remove(pk);
        }
        if model.options.timestamps {
            patch.remove("updated_at");
        }
        let mut rows = store
            .update(model, &patch, &Filter::Match(scope))
            .await
            .map_err(|e| match e {
                StoreError::UniqueViolation(v) => {
                    AppError::conflict(&model.name, ConflictReason::UpdateRejected(v.to_string()))
                }
                other => AppError::store(&model.name, other),
            })?;
        let row = rows.pop().ok_or_else(|| {
            AppError::conflict(&model.name, ConflictReason::RowMissing(describe(&resolution.identity)))
        })?;
        Ok(WriteOutcome { created: false, row })
    }

    /// Insert or update by the first unique index the record fully carries.
    pub async fn upsert(
        store: &dyn StoreAdapter,
        model: &ModelDescriptor,
        record: Record,
    ) -> Result<WriteOutcome, AppError> {
        let mut batch = [record];
        prepare(model, &mut batch);
        let [record] = batch;

        let (index, identity) =
            identify(model, &record).ok_or_else(|| AppError::validation(&model.name, ValidationReason::NoIdentity))?;
        let result = store
            .native_upsert(model, &record, &index.fields)
            .await
            .map_err(|e| match e {
                StoreError::UniqueViolation(v) => {
                    tracing::warn!(model = %model.name, violation = %v, "upsert rejected");
                    AppError::conflict(&model.name, ConflictReason::UpsertRejected)
                }
                other => AppError::store(&model.name, other),
            })?;

        let row = match find_one(store, model, &identity, FindOptions::default()).await? {
            Some(row) => row,
            None => find_one(store, model, &identity, FindOptions::with_soft_deleted())
                .await?
                .ok_or_else(|| AppError::internal(&model.name, format!("upserted row {} not found", describe(&identity))))?,
        };
        let row = restore_if_deleted(store, model, row).await?;
        Ok(WriteOutcome {
            created: result.created,
            row,
        })
    }

    /// Insert a batch, resolving one conflicting record per failed attempt.
    ///
    /// Each attempt removes one record from the pending batch, so at most `records.len()`
    /// retries happen. Resolved records are written together at the end with an
    /// update-on-duplicate insert.
    pub async fn bulk_create(
        store: &dyn StoreAdapter,
        model: &ModelDescriptor,
        mut records: Vec<Record>,
        policy: &WritePolicy,
    ) -> Result<Vec<WriteOutcome>, AppError> {
        check_batch(model, &records, policy)?;
        prepare(model, &mut records);
        for record in &records {
            if identify(model, record).is_none() {
                return Err(AppError::validation(&model.name, ValidationReason::NoIdentity));
            }
        }

        let options = ConflictOptions::from(policy);
        let bound = records.len();
        let mut pending = records;
        let mut resolved: Vec<Record> = Vec::new();
        let mut inserted = None;

        for attempt in 0..=bound {
            if pending.is_empty() {
                inserted = Some(Vec::new());
                break;
            }
            let violation = match store.insert(model, &pending, &InsertOptions::default()).await {
                Ok(rows) => {
                    inserted = Some(rows);
                    break;
                }
                Err(StoreError::UniqueViolation(v)) => v,
                Err(e) => return Err(AppError::store(&model.name, e)),
            };
            tracing::debug!(model = %model.name, attempt, pending = pending.len(), violation = %violation, "bulk insert collided");

            let identity = decode_violation(model, &violation)
                .ok_or_else(|| AppError::conflict(&model.name, ConflictReason::Undecodable))?;
            let matching: Vec<usize> = pending
                .iter()
                .enumerate()
                .filter(|(_, r)| matches_predicate(r, &identity))
                .map(|(i, _)| i)
                .collect();

            match find_conflicting_row(store, model, &identity).await? {
                Some(row) => {
                    let resolution = resolution_for(model, row, identity, options)?;
                    let Some(&position) = matching.first() else {
                        return Err(AppError::internal(
                            &model.name,
                            format!("violation on {} matches no pending record", describe(&resolution.identity)),
                        ));
                    };
                    let record = pending.remove(position);
                    queue_resolved(model, &mut resolved, overlay(&resolution.row, &record));
                }
                // Two records of this batch share the identity: fold the later one into the first.
                None if matching.len() >= 2 => {
                    let later = pending.remove(matching[matching.len() - 1]);
                    let first = &mut pending[matching[0]];
                    *first = overlay(first, &later);
                }
                None => {
                    return Err(AppError::conflict(&model.name, ConflictReason::RowMissing(describe(&identity))));
                }
            }
        }

        let inserted = inserted.ok_or_else(|| {
            AppError::internal(&model.name, format!("bulk create did not settle within {} attempts", bound + 1))
        })?;
        let mut out: Vec<WriteOutcome> = inserted
            .into_iter()
            .map(|row| WriteOutcome { created: true, row })
            .collect();

        if !resolved.is_empty() {
            let update: Vec<String> = model
                .attributes
                .iter()
                .filter(|a| !a.primary_key && resolved.iter().any(|r| r.contains_key(&a.name)))
                .map(|a| a.name.clone())
                .collect();
            let flush = InsertOptions {
                on_conflict: Some(OnConflict {
                    target: model.primary_key.clone(),
                    update,
                }),
            };
            let rows = store.insert(model, &resolved, &flush).await.map_err(|e| match e {
                StoreError::UniqueViolation(v) => {
                    AppError::conflict(&model.name, ConflictReason::FlushRejected(v.to_string()))
                }
                other => AppError::store(&model.name, other),
            })?;
            out.extend(rows.into_iter().map(|row| WriteOutcome { created: false, row }));
        }
        Ok(out)
    }

    /// Upsert a batch in one statement keyed by the batch's unique index; returns the affected
    /// rows ordered by primary key.
    pub async fn bulk_upsert(
        store: &dyn StoreAdapter,
        model: &ModelDescriptor,
        mut records: Vec<Record>,
        policy: &WritePolicy,
    ) -> Result<Vec<Record>, AppError> {
        check_batch(model, &records, policy)?;
        prepare(model, &mut records);

        let (index, _) = identify(model, &records[0])
            .ok_or_else(|| AppError::validation(&model.name, ValidationReason::NoIdentity))?;
        // One statement cannot touch the same row twice: later records win.
        let mut batch: Vec<(Record, Record)> = Vec::with_capacity(records.len());
        for record in records {
            let (_, identity) = identify(model, &record)
                .filter(|(i, _)| i.name == index.name)
                .ok_or_else(|| AppError::validation(&model.name, ValidationReason::NoIdentity))?;
            match batch.iter_mut().find(|(id, _)| *id == identity) {
                Some((_, existing)) => *existing = overlay(existing, &record),
                None => batch.push((identity, record)),
            }
        }

        let update: Vec<String> = batch[0]
            .1
            .keys()
            .filter(|f| !index.fields.contains(f) && !model.primary_key.contains(f))
            .cloned()
            .collect();
        let options = InsertOptions {
            on_conflict: Some(OnConflict {
                target: index.fields.clone(),
                update,
            }),
        };
        let (identities, rows): (Vec<Record>, Vec<Record>) = batch.into_iter().unzip();
        store.insert(model, &rows, &options).await.map_err(|e| match e {
            StoreError::UniqueViolation(v) => {
                tracing::warn!(model = %model.name, violation = %v, "bulk upsert rejected");
                AppError::conflict(&model.name, ConflictReason::UpsertRejected)
            }
            other => AppError::store(&model.name, other),
        })?;

        let query = FindQuery {
            order: model.primary_key.iter().map(OrderBy::asc).collect(),
            ..FindQuery::filtered(Filter::any_of(identities))
        };
        store
            .find(model, &query, FindOptions::default())
            .await
            .map_err(|e| AppError::store(&model.name, e))
    }

    /// Apply `patch` to live rows in `scope`. A uniqueness violation is never recovered:
    /// the conflicting row is looked up for the error message and the update fails with a conflict.
    pub async fn update(
        store: &dyn StoreAdapter,
        model: &ModelDescriptor,
        mut patch: Record,
        scope: &Filter,
    ) -> Result<Vec<Record>, AppError> {
        strip_generated(model, &mut patch);
        if let Some(deleted_at) = model.deleted_at_attribute() {
            patch.remove(&deleted_at.name);
        }
        let scope = live_scope(model, scope);

        if patch.is_empty() {
            let rows = Self::list(store, model, FindQuery::filtered(scope)).await?;
            if rows.is_empty() {
                return Err(AppError::not_found(&model.name, "no rows in scope"));
            }
            return Ok(rows);
        }

        let updated = match store.update(model, &patch, &scope).await {
            Ok(rows) => rows,
            Err(StoreError::UniqueViolation(v)) => {
                let culprit = match resolve_conflict(store, model, &v, ConflictOptions { ignore_duplicates: true }).await {
                    Ok(resolution) => describe(&resolution.identity),
                    Err(_) => v.to_string(),
                };
                tracing::warn!(model = %model.name, culprit = %culprit, "update collides with an existing row");
                return Err(AppError::conflict(&model.name, ConflictReason::UpdateRejected(culprit)));
            }
            Err(e) => return Err(AppError::store(&model.name, e)),
        };
        if updated.is_empty() {
            return Err(AppError::not_found(&model.name, "no rows in scope"));
        }

        let query = FindQuery {
            order: model.primary_key.iter().map(OrderBy::asc).collect(),
            ..FindQuery::filtered(key_filter(model, &updated))
        };
        Self::list(store, model, query).await
    }

    /// Delete live rows in `scope`; paranoid models are marked deleted instead.
    pub async fn destroy(store: &dyn StoreAdapter, model: &ModelDescriptor, scope: &Filter) -> Result<u64, AppError> {
        let scope = live_scope(model, scope);
        let count = match deleted_patch(model) {
            Some(patch) => store
                .update(model, &patch, &scope)
                .await
                .map(|rows| rows.len() as u64),
            None => store.destroy(model, &scope).await,
        }
        .map_err(|e| AppError::store(&model.name, e))?;
        if count == 0 {
            return Err(AppError::not_found(&model.name, "no rows in scope"));
        }
        tracing::info!(model = %model.name, count, soft = model.options.paranoid, "destroyed rows");
        Ok(count)
    }

    /// Live row by primary key value (single-column keys).
    pub async fn read(store: &dyn StoreAdapter, model: &ModelDescriptor, id: &Value) -> Result<Option<Record>, AppError> {
        let mut identity = Record::new();
        identity.insert(model.primary_key[0].clone(), id.clone());
        find_one(store, model, &identity, FindOptions::default()).await
    }

    /// Live rows matching `query`.
    pub async fn list(store: &dyn StoreAdapter, model: &ModelDescriptor, query: FindQuery) -> Result<Vec<Record>, AppError> {
        store
            .find(model, &query, FindOptions::default())
            .await
            .map_err(|e| AppError::store(&model.name, e))
    }
}

fn prepare(model: &ModelDescriptor, records: &mut [Record]) {
    for record in records.iter_mut() {
        strip_generated(model, record);
    }
    stamp_not_deleted(model, records);
}

fn check_batch(model: &ModelDescriptor, records: &[Record], policy: &WritePolicy) -> Result<(), AppError> {
    if records.is_empty() {
        return Err(AppError::validation(&model.name, ValidationReason::EmptyBatch));
    }
    if records.len() > policy.bulk_limit {
        return Err(AppError::validation(
            &model.name,
            ValidationReason::BatchTooLarge { limit: policy.bulk_limit },
        ));
    }
    if !is_homogeneous(records) {
        return Err(AppError::validation(&model.name, ValidationReason::HeterogeneousBatch));
    }
    Ok(())
}

/// Rows by primary key: `IN` for single-column keys, an OR of key predicates otherwise.
fn key_filter(model: &ModelDescriptor, rows: &[Record]) -> Filter {
    match model.primary_key.as_slice() {
        [pk] => Filter::one_of(pk.clone(), rows.iter().filter_map(|r| r.get(pk).cloned()).collect()),
        _ => Filter::any_of(rows.iter().filter_map(|r| primary_identity(model, r))),
    }
}

fn live_scope(model: &ModelDescriptor, scope: &Filter) -> Filter {
    match live_filter(model) {
        Some(live) => scope.clone().and(live),
        None => scope.clone(),
    }
}

// Two pending records can resolve to the same stored row; merge them so the flush touches it once.
fn queue_resolved(model: &ModelDescriptor, resolved: &mut Vec<Record>, row: Record) {
    let key = primary_identity(model, &row);
    let existing = key
        .as_ref()
        .and_then(|k| resolved.iter_mut().find(|r| matches_predicate(r, k)));
    match existing {
        Some(slot) => *slot = overlay(slot, &row),
        None => resolved.push(row),
    }
}

async fn find_one(
    store: &dyn StoreAdapter,
    model: &ModelDescriptor,
    identity: &Record,
    options: FindOptions,
) -> Result<Option<Record>, AppError> {
    let query = FindQuery {
        limit: Some(1),
        ..FindQuery::filtered(Filter::Match(identity.clone()))
    };
    let mut rows = store
        .find(model, &query, options)
        .await
        .map_err(|e| AppError::store(&model.name, e))?;
    Ok(rows.pop())
}
