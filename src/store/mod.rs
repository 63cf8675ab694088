//! Store adapter contract consumed by the write pipeline, plus the Postgres and in-memory adapters.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::{ensure_database_exists, PgStore};

use crate::config::ModelDescriptor;
use crate::query::{Filter, FindQuery};
use crate::record::Record;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// A write broke a primary key, unique index, or unique constraint.
///
/// Each entry of `fields` is either `(attribute, value)` or, when the store only knows the
/// constraint, `(index name, value)` where the value is an array of the index's values in
/// field order. A single delimited string is accepted for legacy adapters.
#[derive(Clone, Debug, PartialEq)]
pub struct UniqueViolation {
    pub constraint: Option<String>,
    pub fields: Vec<(String, Value)>,
}

impl fmt::Display for UniqueViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unique violation")?;
        if let Some(c) = &self.constraint {
            write!(f, " on {}", c)?;
        }
        let parts: Vec<String> = self.fields.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        if !parts.is_empty() {
            write!(f, " ({})", parts.join(", "))?;
        }
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{0}")]
    UniqueViolation(UniqueViolation),
    #[error("unknown model: {0}")]
    UnknownModel(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

impl StoreError {
    pub fn as_unique_violation(&self) -> Option<&UniqueViolation> {
        match self {
            StoreError::UniqueViolation(v) => Some(v),
            _ => None,
        }
    }
}

/// Update-on-duplicate behaviour for an insert.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OnConflict {
    /// Fields of the unique index the insert may collide on.
    pub target: Vec<String>,
    /// Fields overwritten on the existing row; empty means leave it untouched.
    pub update: Vec<String>,
}

#[derive(Clone, Debug, Default)]
pub struct InsertOptions {
    pub on_conflict: Option<OnConflict>,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct FindOptions {
    /// Also return rows a paranoid model marks as deleted.
    pub include_soft_deleted: bool,
}

impl FindOptions {
    pub fn with_soft_deleted() -> Self {
        FindOptions {
            include_soft_deleted: true,
        }
    }
}

#[derive(Clone, Debug)]
pub struct UpsertResult {
    /// Row as written, when the store returns it.
    pub row: Option<Record>,
    pub created: bool,
}

/// Transactional relational store that enforces uniqueness.
///
/// Batch inserts are atomic. Every write that breaks a unique index fails with
/// [`StoreError::UniqueViolation`].
#[async_trait]
pub trait StoreAdapter: Send + Sync {
    async fn insert(
        &self,
        model: &ModelDescriptor,
        records: &[Record],
        options: &InsertOptions,
    ) -> Result<Vec<Record>, StoreError>;

    async fn update(
        &self,
        model: &ModelDescriptor,
        patch: &Record,
        scope: &Filter,
    ) -> Result<Vec<Record>, StoreError>;

    async fn find(
        &self,
        model: &ModelDescriptor,
        query: &FindQuery,
        options: FindOptions,
    ) -> Result<Vec<Record>, StoreError>;

    async fn native_upsert(
        &self,
        model: &ModelDescriptor,
        record: &Record,
        conflict_fields: &[String],
    ) -> Result<UpsertResult, StoreError>;

    async fn destroy(&self, model: &ModelDescriptor, scope: &Filter) -> Result<u64, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}
