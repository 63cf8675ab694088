//! Postgres store adapter over a sqlx pool.

use super::{FindOptions, InsertOptions, StoreAdapter, StoreError, UniqueViolation, UpsertResult};
use crate::config::{ModelDescriptor, ModelRegistry};
use crate::query::{Filter, FindQuery};
use crate::record::Record;
use crate::service::paranoid::live_filter;
use crate::sql::{self, bind_all, QueryBuf, INSERTED_COLUMN, ROW_COLUMN};
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use sqlx::postgres::{PgDatabaseError, PgRow};
use sqlx::{ConnectOptions, PgPool, Row};
use std::str::FromStr;
use std::sync::{Arc, OnceLock};

/// SQLSTATE unique_violation.
const UNIQUE_VIOLATION: &str = "23505";

pub struct PgStore {
    pool: PgPool,
    registry: Arc<ModelRegistry>,
}

impl PgStore {
    pub fn new(pool: PgPool, registry: Arc<ModelRegistry>) -> Self {
        PgStore { pool, registry }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_rows(&self, model: &ModelDescriptor, q: &QueryBuf) -> Result<Vec<Record>, StoreError> {
        tracing::debug!(model = %model.name, sql = %q.sql, params = ?q.params, "query");
        let rows = bind_all(sqlx::query(&q.sql), &q.params)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_db_error(model, e))?;
        rows.iter().map(row_to_record).collect()
    }
}

fn row_to_record(row: &PgRow) -> Result<Record, StoreError> {
    match row.try_get::<Value, _>(ROW_COLUMN)? {
        Value::Object(m) => Ok(m),
        other => Err(StoreError::Unsupported(format!("row is not an object: {}", other))),
    }
}

fn map_db_error(model: &ModelDescriptor, e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &e {
        if db.code().as_deref() == Some(UNIQUE_VIOLATION) {
            let constraint = db.constraint().map(str::to_string);
            let detail = db.try_downcast_ref::<PgDatabaseError>().and_then(|pg| pg.detail());
            let violation = unique_violation(model, constraint, detail);
            tracing::debug!(model = %model.name, violation = %violation, "unique violation");
            return StoreError::UniqueViolation(violation);
        }
    }
    StoreError::Db(e)
}

fn key_detail() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^Key \((.+)\)=\((.*)\) already exists").ok())
        .as_ref()
}

/// Decode `Key (a, b)=(x, y) already exists`. Column names that are attributes are reported
/// per field; anything else (expression indexes) as the constraint with its values in order.
/// Values containing the separator make the counts disagree and the violation undecodable.
fn unique_violation(model: &ModelDescriptor, constraint: Option<String>, detail: Option<&str>) -> UniqueViolation {
    let fields = detail
        .and_then(|d| key_detail()?.captures(d))
        .and_then(|caps| {
            let names: Vec<&str> = caps.get(1)?.as_str().split(", ").map(|n| n.trim_matches('"')).collect();
            let values: Vec<Value> = caps
                .get(2)?
                .as_str()
                .split(", ")
                .map(|v| Value::String(v.to_string()))
                .collect();
            if names.len() != values.len() {
                return None;
            }
            if names.iter().all(|n| model.has_attribute(n)) {
                Some(names.into_iter().map(str::to_string).zip(values).collect())
            } else {
                let constraint = constraint.clone()?;
                Some(vec![(constraint, Value::Array(values))])
            }
        })
        .unwrap_or_default();
    UniqueViolation { constraint, fields }
}

#[async_trait]
impl StoreAdapter for PgStore {
    async fn insert(
        &self,
        model: &ModelDescriptor,
        records: &[Record],
        options: &InsertOptions,
    ) -> Result<Vec<Record>, StoreError> {
        if records.is_empty() {
            return Ok(Vec::new());
        }
        let q = sql::insert(model, records, options.on_conflict.as_ref())?;
        self.fetch_rows(model, &q).await
    }

    async fn update(&self, model: &ModelDescriptor, patch: &Record, scope: &Filter) -> Result<Vec<Record>, StoreError> {
        let q = sql::update(model, patch, scope)?;
        self.fetch_rows(model, &q).await
    }

    async fn find(&self, model: &ModelDescriptor, query: &FindQuery, options: FindOptions) -> Result<Vec<Record>, StoreError> {
        let filter = match (options.include_soft_deleted, live_filter(model)) {
            (false, Some(live)) => query.filter.clone().and(live),
            _ => query.filter.clone(),
        };
        let q = sql::select(&self.registry, model, &filter, query)?;
        self.fetch_rows(model, &q).await
    }

    async fn native_upsert(
        &self,
        model: &ModelDescriptor,
        record: &Record,
        conflict_fields: &[String],
    ) -> Result<UpsertResult, StoreError> {
        let q = sql::upsert(model, record, conflict_fields)?;
        tracing::debug!(model = %model.name, sql = %q.sql, params = ?q.params, "upsert");
        let row = bind_all(sqlx::query(&q.sql), &q.params)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_db_error(model, e))?;
        match row {
            Some(row) => Ok(UpsertResult {
                created: row.try_get::<bool, _>(INSERTED_COLUMN)?,
                row: Some(row_to_record(&row)?),
            }),
            None => Ok(UpsertResult { row: None, created: false }),
        }
    }

    async fn destroy(&self, model: &ModelDescriptor, scope: &Filter) -> Result<u64, StoreError> {
        let q = sql::delete(model, scope)?;
        tracing::debug!(model = %model.name, sql = %q.sql, params = ?q.params, "delete");
        let done = bind_all(sqlx::query(&q.sql), &q.params)
            .execute(&self.pool)
            .await
            .map_err(|e| map_db_error(model, e))?;
        Ok(done.rows_affected())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Ensure the database in `database_url` exists; create it if not. Connects to the
/// default `postgres` database to run CREATE DATABASE. Call before creating the main pool.
pub async fn ensure_database_exists(database_url: &str) -> Result<(), StoreError> {
    let (admin_url, db_name) = parse_db_name_from_url(database_url)?;
    if db_name.is_empty() || db_name == "postgres" {
        return Ok(());
    }
    let opts = sqlx::postgres::PgConnectOptions::from_str(&admin_url)?;
    let mut conn: sqlx::PgConnection = opts.connect().await?;
    let exists: (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
        .bind(&db_name)
        .fetch_one(&mut conn)
        .await?;
    if !exists.0 {
        tracing::info!(database = %db_name, "creating database");
        sqlx::query(&format!("CREATE DATABASE \"{}\"", db_name.replace('"', "\"\"")))
            .execute(&mut conn)
            .await?;
    }
    Ok(())
}

fn parse_db_name_from_url(url: &str) -> Result<(String, String), StoreError> {
    let path_start = url
        .rfind('/')
        .ok_or_else(|| StoreError::Db(sqlx::Error::Configuration("DATABASE_URL: no path".into())))?
        + 1;
    let path_and_query = url.get(path_start..).unwrap_or("");
    let db_name = path_and_query.split('?').next().unwrap_or("").trim();
    let base = url.get(..path_start).unwrap_or(url);
    Ok((format!("{}postgres", base), db_name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{parse_config, resolve};
    use serde_json::json;

    fn model() -> ModelDescriptor {
        let config = parse_config(
            r#"{"models": [{
                "name": "members",
                "attributes": [
                    {"name": "id", "type": "bigserial"},
                    {"name": "org", "type": "text"},
                    {"name": "handle", "type": "text"}
                ],
                "unique_keys": [{"name": "members_org_handle", "fields": ["org", "handle"]}]
            }]}"#,
        )
        .unwrap();
        resolve(&config).unwrap().get("members").unwrap().clone()
    }

    #[test]
    fn key_detail_decodes_per_field() {
        let v = unique_violation(
            &model(),
            Some("members_org_handle".into()),
            Some("Key (org, handle)=(acme, bob) already exists."),
        );
        assert_eq!(
            v.fields,
            vec![("org".to_string(), json!("acme")), ("handle".to_string(), json!("bob"))]
        );
    }

    #[test]
    fn expression_keys_report_the_constraint() {
        let v = unique_violation(
            &model(),
            Some("members_org_handle".into()),
            Some("Key (lower(org), handle)=(acme, bob) already exists."),
        );
        assert_eq!(v.fields, vec![("members_org_handle".to_string(), json!(["acme", "bob"]))]);
    }

    #[test]
    fn separator_inside_values_is_undecodable() {
        let v = unique_violation(
            &model(),
            Some("members_org_handle".into()),
            Some("Key (org, handle)=(acme, inc, bob) already exists."),
        );
        assert!(v.fields.is_empty());
        assert_eq!(v.constraint.as_deref(), Some("members_org_handle"));
    }

    #[test]
    fn admin_url_targets_postgres_database() {
        let (admin, name) = parse_db_name_from_url("postgres://u:p@localhost:5432/app?sslmode=disable").unwrap();
        assert_eq!(admin, "postgres://u:p@localhost:5432/postgres");
        assert_eq!(name, "app");
    }
}
