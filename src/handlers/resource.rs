//! Resource handlers: list, create, upsert, read, update, delete.

use crate::config::{FieldType, ModelDescriptor};
use crate::error::AppError;
use crate::query::{Filter, FindQuery, OrderBy};
use crate::record::Record;
use crate::response::{success_many, success_one, success_written};
use crate::service::{RequestValidator, WriteService};
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;
use std::collections::HashMap;

pub(crate) const DEFAULT_LIMIT: u32 = 100;
pub(crate) const MAX_LIMIT: u32 = 1000;
/// Query-string prefix of filters on the join rows of a many-to-many read.
pub(crate) const THROUGH_PREFIX: &str = "through.";

pub(crate) fn require(model: &ModelDescriptor, operation: &str) -> Result<(), AppError> {
    if model.allows(operation) {
        Ok(())
    } else {
        Err(AppError::BadRequest(format!("{} not allowed on {}", operation, model.name)))
    }
}

/// Primary key value from a path segment, typed by the key's field type.
pub(crate) fn parse_id(model: &ModelDescriptor, id_str: &str) -> Result<Value, AppError> {
    if model.primary_key.len() != 1 {
        return Err(AppError::BadRequest(format!("{} has a composite primary key", model.name)));
    }
    Ok(match model.primary_key_field_type() {
        FieldType::Uuid => {
            let u = uuid::Uuid::parse_str(id_str).map_err(|_| AppError::BadRequest("invalid uuid".into()))?;
            Value::String(u.to_string())
        }
        FieldType::Integer | FieldType::BigInt => {
            let n: i64 = id_str.parse().map_err(|_| AppError::BadRequest("invalid id".into()))?;
            Value::Number(n.into())
        }
        _ => Value::String(id_str.to_string()),
    })
}

pub(crate) fn id_scope(model: &ModelDescriptor, id: Value) -> Filter {
    Filter::eq(model.primary_key[0].clone(), id)
}

pub(crate) fn body_to_record(value: Value) -> Result<Record, AppError> {
    match value {
        Value::Object(m) => Ok(m),
        _ => Err(AppError::BadRequest("body must be a JSON object".into())),
    }
}

pub(crate) fn body_to_records(value: Value) -> Result<Vec<Record>, AppError> {
    match value {
        Value::Array(items) => items.into_iter().map(body_to_record).collect(),
        Value::Object(m) => Ok(vec![m]),
        _ => Err(AppError::BadRequest("body must be a JSON object or array".into())),
    }
}

/// Query-string value typed by the attribute's field type; falls back to text.
pub(crate) fn query_value(model: &ModelDescriptor, field: &str, raw: &str) -> Value {
    let Some(attr) = model.attribute(field) else {
        return Value::String(raw.to_string());
    };
    let text = || Value::String(raw.to_string());
    match attr.field_type {
        FieldType::Integer | FieldType::BigInt => raw.parse::<i64>().map(Value::from).unwrap_or_else(|_| text()),
        FieldType::Float | FieldType::Numeric => raw
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or_else(text),
        FieldType::Boolean if raw.eq_ignore_ascii_case("true") => Value::Bool(true),
        FieldType::Boolean if raw.eq_ignore_ascii_case("false") => Value::Bool(false),
        FieldType::Uuid => uuid::Uuid::parse_str(raw)
            .map(|u| Value::String(u.to_string()))
            .unwrap_or_else(|_| text()),
        _ => text(),
    }
}

fn field_list(model: &ModelDescriptor, raw: &str) -> Result<Vec<String>, AppError> {
    raw.split(',')
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(|f| {
            if model.has_attribute(f) {
                Ok(f.to_string())
            } else {
                Err(AppError::BadRequest(format!("unknown field {} on {}", f, model.name)))
            }
        })
        .collect()
}

/// Base read query from the query string: exact-match filters on attributes, `limit`,
/// `offset`, `order` (comma separated, `-` prefix for descending) and `attributes`.
/// Other keys are ignored.
pub(crate) fn find_query_from_params(model: &ModelDescriptor, params: &HashMap<String, String>) -> Result<FindQuery, AppError> {
    let mut query = FindQuery {
        limit: Some(DEFAULT_LIMIT),
        ..Default::default()
    };
    let mut filters = Record::new();
    for (k, v) in params {
        match k.as_str() {
            "limit" => {
                let n: u32 = v.parse().map_err(|_| AppError::BadRequest("invalid limit".into()))?;
                query.limit = Some(n.min(MAX_LIMIT));
            }
            "offset" => {
                query.offset = Some(v.parse().map_err(|_| AppError::BadRequest("invalid offset".into()))?);
            }
            "order" => {
                query.order = v
                    .split(',')
                    .map(str::trim)
                    .filter(|f| !f.is_empty())
                    .map(|f| match f.strip_prefix('-') {
                        Some(field) => OrderBy {
                            field: field.to_string(),
                            descending: true,
                        },
                        None => OrderBy::asc(f),
                    })
                    .collect();
                if let Some(o) = query.order.iter().find(|o| !model.has_attribute(&o.field)) {
                    return Err(AppError::BadRequest(format!("unknown field {} on {}", o.field, model.name)));
                }
            }
            "attributes" => query.attributes = Some(field_list(model, v)?),
            _ if k.starts_with(THROUGH_PREFIX) => {}
            _ => {
                if model.has_attribute(k) {
                    filters.insert(k.clone(), query_value(model, k, v));
                }
            }
        }
    }
    query.filter = Filter::Match(filters);
    Ok(query)
}

pub async fn list(
    State(state): State<AppState>,
    Path(resource): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<impl IntoResponse, AppError> {
    let model = state.model(&resource)?;
    require(model, "read")?;
    let query = find_query_from_params(model, &params)?;
    let rows = WriteService::list(state.store.as_ref(), model, query).await?;
    Ok(success_many(StatusCode::OK, rows))
}

/// Object body creates one row; array body creates a batch.
pub async fn create(
    State(state): State<AppState>,
    Path(resource): Path<String>,
    Json(body): Json<Value>,
) -> Result<Response, AppError> {
    let model = state.model(&resource)?;
    match body {
        Value::Array(_) => {
            require(model, "bulk_create")?;
            let records = body_to_records(body)?;
            for record in &records {
                RequestValidator::validate(model, record)?;
            }
            let outcomes = WriteService::bulk_create(state.store.as_ref(), model, records, &state.policy).await?;
            let rows: Vec<Record> = outcomes.into_iter().map(|o| o.row).collect();
            Ok(success_many(StatusCode::CREATED, rows).into_response())
        }
        body => {
            require(model, "create")?;
            let record = body_to_record(body)?;
            RequestValidator::validate(model, &record)?;
            let outcome = WriteService::create(state.store.as_ref(), model, record, &state.policy).await?;
            Ok(success_one(StatusCode::CREATED, outcome.row).into_response())
        }
    }
}

/// Object body upserts one row; array body upserts a batch.
pub async fn upsert(
    State(state): State<AppState>,
    Path(resource): Path<String>,
    Json(body): Json<Value>,
) -> Result<Response, AppError> {
    let model = state.model(&resource)?;
    match body {
        Value::Array(_) => {
            require(model, "bulk_upsert")?;
            let records = body_to_records(body)?;
            for record in &records {
                RequestValidator::validate(model, record)?;
            }
            let rows = WriteService::bulk_upsert(state.store.as_ref(), model, records, &state.policy).await?;
            Ok(success_many(StatusCode::OK, rows).into_response())
        }
        body => {
            require(model, "upsert")?;
            let record = body_to_record(body)?;
            RequestValidator::validate(model, &record)?;
            let outcome = WriteService::upsert(state.store.as_ref(), model, record).await?;
            Ok(success_written(outcome.row, outcome.created).into_response())
        }
    }
}

pub async fn read(
    State(state): State<AppState>,
    Path((resource, id_str)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let model = state.model(&resource)?;
    require(model, "read")?;
    let id = parse_id(model, &id_str)?;
    let row = WriteService::read(state.store.as_ref(), model, &id)
        .await?
        .ok_or_else(|| AppError::not_found(&model.name, id_str))?;
    Ok(success_one(StatusCode::OK, row))
}

pub async fn update(
    State(state): State<AppState>,
    Path((resource, id_str)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let model = state.model(&resource)?;
    require(model, "update")?;
    let id = parse_id(model, &id_str)?;
    let patch = body_to_record(body)?;
    RequestValidator::validate_partial(model, &patch)?;
    let mut rows = WriteService::update(state.store.as_ref(), model, patch, &id_scope(model, id)).await?;
    let row = rows.pop().ok_or_else(|| AppError::not_found(&model.name, id_str))?;
    Ok(success_one(StatusCode::OK, row))
}

pub async fn delete(
    State(state): State<AppState>,
    Path((resource, id_str)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let model = state.model(&resource)?;
    require(model, "delete")?;
    let id = parse_id(model, &id_str)?;
    WriteService::destroy(state.store.as_ref(), model, &id_scope(model, id)).await?;
    Ok(StatusCode::NO_CONTENT)
}
