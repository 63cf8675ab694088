//! Association handlers: read the rows an owner is associated with, and attach rows to it.

use super::resource::{body_to_records, find_query_from_params, parse_id, query_value, require, THROUGH_PREFIX};
use crate::config::{Association, AssociationKind, ModelDescriptor};
use crate::error::AppError;
use crate::query::{rewrite, Filter, ThroughOptions};
use crate::record::Record;
use crate::response::{success_many, success_one};
use crate::service::identity::primary_identity;
use crate::service::{partition, RequestValidator, WriteService};
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;
use std::collections::HashMap;

struct Owned<'a> {
    owner_model: &'a ModelDescriptor,
    owner: Record,
    association: &'a Association,
    target: &'a ModelDescriptor,
}

async fn resolve_owned<'a>(
    state: &'a AppState,
    resource: &str,
    id_str: &str,
    association: &str,
    operation: &str,
) -> Result<Owned<'a>, AppError> {
    let owner_model = state.model(resource)?;
    require(owner_model, operation)?;
    let id = parse_id(owner_model, id_str)?;
    let owner = WriteService::read(state.store.as_ref(), owner_model, &id)
        .await?
        .ok_or_else(|| AppError::not_found(&owner_model.name, id_str))?;
    let association = owner_model
        .association(association)
        .ok_or_else(|| AppError::not_found(&owner_model.name, format!("association {}", association)))?;
    let target = state.model(&association.target)?;
    Ok(Owned {
        owner_model,
        owner,
        association,
        target,
    })
}

/// `through.<field>=value` query parameters, typed against the join model.
fn through_options(state: &AppState, association: &Association, params: &HashMap<String, String>) -> Option<ThroughOptions> {
    let AssociationKind::BelongsToMany { through: Some(through), .. } = &association.kind else {
        return None;
    };
    let through_model = state.registry.get(&through.model)?;
    let fields: Record = params
        .iter()
        .filter_map(|(k, v)| {
            let field = k.strip_prefix(THROUGH_PREFIX)?;
            through_model
                .has_attribute(field)
                .then(|| (field.to_string(), query_value(through_model, field, v)))
        })
        .collect();
    (!fields.is_empty()).then(|| ThroughOptions {
        filter: Some(Filter::Match(fields)),
        attributes: None,
    })
}

pub async fn list_associated(
    State(state): State<AppState>,
    Path((resource, id_str, association)): Path<(String, String, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, AppError> {
    let owned = resolve_owned(&state, &resource, &id_str, &association, "read").await?;
    let to_many = owned.association.is_to_many();
    let Some(owner_key) = owned.association.owner_key(&owned.owner).cloned() else {
        return Ok(if to_many {
            success_many(StatusCode::OK, Vec::<Record>::new()).into_response()
        } else {
            success_one(StatusCode::OK, Value::Null).into_response()
        });
    };

    let mut base = find_query_from_params(owned.target, &params)?;
    base.through = through_options(&state, owned.association, &params);
    let query = rewrite(&base, owned.association, &owner_key)?;
    let mut rows = WriteService::list(state.store.as_ref(), owned.target, query).await?;

    Ok(if to_many {
        success_many(StatusCode::OK, rows).into_response()
    } else {
        success_one(StatusCode::OK, rows.pop()).into_response()
    })
}

/// Find-or-create the posted target rows and link each one to the owner.
pub async fn attach(
    State(state): State<AppState>,
    Path((resource, id_str, association)): Path<(String, String, String)>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let owned = resolve_owned(&state, &resource, &id_str, &association, "update").await?;
    let records = body_to_records(body)?;
    for record in &records {
        RequestValidator::validate(owned.target, record)?;
    }
    let store = state.store.as_ref();

    let rows = match &owned.association.kind {
        AssociationKind::HasMany { foreign_key, source_key } => {
            let owner_value = owned
                .owner
                .get(source_key)
                .cloned()
                .ok_or_else(|| AppError::internal(&owned.owner_model.name, format!("owner has no {}", source_key)))?;
            let split = partition(store, owned.target, &records).await?;
            let mut linked = Vec::new();
            if !split.existing_rows.is_empty() {
                let keys: Vec<Record> = split
                    .existing_rows
                    .iter()
                    .filter_map(|r| primary_identity(owned.target, r))
                    .collect();
                let mut patch = Record::new();
                patch.insert(foreign_key.clone(), owner_value.clone());
                linked.extend(WriteService::update(store, owned.target, patch, &Filter::any_of(keys)).await?);
            }
            if !split.new_rows.is_empty() {
                let new_rows: Vec<Record> = split
                    .new_rows
                    .into_iter()
                    .map(|mut r| {
                        r.insert(foreign_key.clone(), owner_value.clone());
                        r
                    })
                    .collect();
                let created = WriteService::bulk_create(store, owned.target, new_rows, &state.policy).await?;
                linked.extend(created.into_iter().map(|o| o.row));
            }
            linked
        }
        AssociationKind::BelongsToMany {
            foreign_key,
            other_key,
            source_key,
            target_key,
            through: Some(through),
        } => {
            let through_model = state.model(&through.model)?;
            let owner_value = owned
                .owner
                .get(source_key)
                .cloned()
                .ok_or_else(|| AppError::internal(&owned.owner_model.name, format!("owner has no {}", source_key)))?;
            let split = partition(store, owned.target, &records).await?;
            let mut targets = split.existing_rows;
            if !split.new_rows.is_empty() {
                let created = WriteService::bulk_create(store, owned.target, split.new_rows, &state.policy).await?;
                targets.extend(created.into_iter().map(|o| o.row));
            }
            let links: Vec<Record> = targets
                .iter()
                .map(|t| {
                    let mut link = through.scope.clone().unwrap_or_default();
                    link.insert(foreign_key.clone(), owner_value.clone());
                    link.insert(other_key.clone(), t.get(target_key).cloned().unwrap_or(Value::Null));
                    link
                })
                .collect();
            if !links.is_empty() {
                WriteService::bulk_upsert(store, through_model, links, &state.policy).await?;
            }
            targets
        }
        _ => {
            return Err(AppError::BadRequest(format!(
                "{}.{} is not a to-many association with a join model",
                owned.owner_model.name, owned.association.name
            )))
        }
    };
    tracing::info!(
        model = %owned.owner_model.name,
        association = %owned.association.name,
        linked = rows.len(),
        "attached rows"
    );
    Ok(success_many(StatusCode::OK, rows))
}
