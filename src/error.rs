//! Typed errors and HTTP mapping.

use crate::store::StoreError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing reference: {kind} '{id}'")]
    MissingReference { kind: &'static str, id: String },
    #[error("invalid primary key: model {model} field {field}")]
    InvalidPrimaryKey { model: String, field: String },
    #[error("duplicate resource name: {0}")]
    DuplicateResource(String),
    #[error("config load: {0}")]
    Load(String),
    #[error("validation: {0}")]
    Validation(String),
}

/// Why a write was rejected before it reached the store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationReason {
    #[error("every record in a batch must carry the same fields")]
    HeterogeneousBatch,
    #[error("record does not contain every field of any unique index")]
    NoIdentity,
    #[error("batch is empty")]
    EmptyBatch,
    #[error("batch limited to {limit} items")]
    BatchTooLarge { limit: usize },
    #[error("{0}")]
    Field(String),
}

impl ValidationReason {
    pub fn code(&self) -> &'static str {
        match self {
            ValidationReason::HeterogeneousBatch => "heterogeneous_batch",
            ValidationReason::NoIdentity => "no_identity",
            ValidationReason::EmptyBatch => "empty_batch",
            ValidationReason::BatchTooLarge { .. } => "batch_too_large",
            ValidationReason::Field(_) => "invalid_field",
        }
    }
}

/// Why a uniqueness violation could not be turned into a successful write.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConflictReason {
    #[error("uniqueness violation could not be decoded")]
    Undecodable,
    #[error("conflicting row {0} could not be found")]
    RowMissing(String),
    #[error("duplicate of live row {0}")]
    Duplicate(String),
    #[error("upsert rejected by a unique constraint")]
    UpsertRejected,
    #[error("writing resolved conflicts failed: {0}")]
    FlushRejected(String),
    #[error("update collides with row {0}")]
    UpdateRejected(String),
}

impl ConflictReason {
    pub fn code(&self) -> &'static str {
        match self {
            ConflictReason::Undecodable => "undecodable",
            ConflictReason::RowMissing(_) => "row_missing",
            ConflictReason::Duplicate(_) => "duplicate",
            ConflictReason::UpsertRejected => "upsert_rejected",
            ConflictReason::FlushRejected(_) => "flush_rejected",
            ConflictReason::UpdateRejected(_) => "update_rejected",
        }
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("{model}: {reason}")]
    Validation { model: String, reason: ValidationReason },
    #[error("{model}: not found: {what}")]
    NotFound { model: String, what: String },
    #[error("{model}: conflict: {reason}")]
    Conflict { model: String, reason: ConflictReason },
    #[error("{model}: internal: {reason}")]
    Internal { model: String, reason: String },
    #[error("{model}: store: {source}")]
    Store {
        model: String,
        #[source]
        source: StoreError,
    },
    #[error("bad request: {0}")]
    BadRequest(String),
}

impl AppError {
    pub fn validation(model: &str, reason: ValidationReason) -> Self {
        AppError::Validation {
            model: model.to_string(),
            reason,
        }
    }

    pub fn conflict(model: &str, reason: ConflictReason) -> Self {
        AppError::Conflict {
            model: model.to_string(),
            reason,
        }
    }

    pub fn not_found(model: &str, what: impl Into<String>) -> Self {
        AppError::NotFound {
            model: model.to_string(),
            what: what.into(),
        }
    }

    pub fn internal(model: &str, reason: impl Into<String>) -> Self {
        AppError::Internal {
            model: model.to_string(),
            reason: reason.into(),
        }
    }

    pub fn store(model: &str, source: StoreError) -> Self {
        AppError::Store {
            model: model.to_string(),
            source,
        }
    }

    /// Model (resource) the error refers to, when there is one.
    pub fn model(&self) -> Option<&str> {
        match self {
            AppError::Validation { model, .. }
            | AppError::NotFound { model, .. }
            | AppError::Conflict { model, .. }
            | AppError::Internal { model, .. }
            | AppError::Store { model, .. } => Some(model),
            AppError::Config(_) | AppError::BadRequest(_) => None,
        }
    }

    /// Stable reason code for clients.
    pub fn reason_code(&self) -> Option<&'static str> {
        match self {
            AppError::Validation { reason, .. } => Some(reason.code()),
            AppError::Conflict { reason, .. } => Some(reason.code()),
            _ => None,
        }
    }
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            AppError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error"),
            AppError::Validation { .. } => (StatusCode::BAD_REQUEST, "validation_error"),
            AppError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
            AppError::Conflict { .. } => (StatusCode::CONFLICT, "conflict"),
            AppError::Internal { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
            AppError::Store { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "database_error"),
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
        };
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let details = self.model().map(|model| {
            serde_json::json!({
                "model": model,
                "reason": self.reason_code(),
            })
        });
        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message: self.to_string(),
                details,
            },
        };
        (status, Json(body)).into_response()
    }
}
