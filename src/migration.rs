//! Bootstrap DDL for resolved models: schemas, tables, and indexes.
//! Every statement is idempotent (IF NOT EXISTS); existing tables are left as they are.

use crate::config::{Attribute, ModelDescriptor, ModelRegistry};
use crate::store::StoreError;
use serde_json::Value;
use sqlx::PgPool;
use std::collections::BTreeSet;

fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// SQL literal for a declared default. Null declares no column default.
fn default_literal(v: &Value) -> Option<String> {
    match v {
        Value::Null => None,
        Value::Bool(b) => Some(if *b { "TRUE".into() } else { "FALSE".into() }),
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(format!("'{}'", s.replace('\'', "''"))),
        Value::Array(_) | Value::Object(_) => Some(format!("'{}'", v.to_string().replace('\'', "''"))),
    }
}

fn column_def(attr: &Attribute) -> String {
    let mut def = format!("{} {}", quote(&attr.name), attr.sql_type);
    if !attr.nullable {
        def.push_str(" NOT NULL");
    }
    let default = attr
        .db_default
        .clone()
        .or_else(|| attr.default.as_ref().and_then(default_literal));
    if let Some(d) = default {
        def.push_str(" DEFAULT ");
        def.push_str(&d);
    }
    def
}

/// CREATE TABLE plus one CREATE INDEX per declared index and unique key, named as configured
/// so the constraint names Postgres reports map back to indexes.
pub fn model_ddl(model: &ModelDescriptor) -> Vec<String> {
    let table = format!("{}.{}", quote(&model.schema_name), quote(&model.table_name));
    let mut col_defs: Vec<String> = model.attributes.iter().map(column_def).collect();
    let pk_cols: Vec<String> = model.primary_key.iter().map(|s| quote(s)).collect();
    col_defs.push(format!(
        "CONSTRAINT {} PRIMARY KEY ({})",
        quote(&model.primary_index().name),
        pk_cols.join(", ")
    ));

    let mut out = vec![format!(
        "CREATE TABLE IF NOT EXISTS {} (\n  {}\n)",
        table,
        col_defs.join(",\n  ")
    )];
    for idx in model.options.declared_indexes.iter().chain(&model.options.unique_keys) {
        let cols: Vec<String> = idx.fields.iter().map(|s| quote(s)).collect();
        out.push(format!(
            "CREATE {}INDEX IF NOT EXISTS {} ON {} ({})",
            if idx.unique { "UNIQUE " } else { "" },
            quote(&idx.name),
            table,
            cols.join(", ")
        ));
    }
    out
}

/// Create every schema, table, and index the registry describes.
pub async fn apply_migrations(pool: &PgPool, registry: &ModelRegistry) -> Result<(), StoreError> {
    let schemas: BTreeSet<&str> = registry.models.iter().map(|m| m.schema_name.as_str()).collect();
    for schema in schemas {
        sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", quote(schema)))
            .execute(pool)
            .await?;
    }
    for model in &registry.models {
        for sql in model_ddl(model) {
            tracing::debug!(model = %model.name, sql = %sql, "migration");
            sqlx::query(&sql).execute(pool).await?;
        }
    }
    tracing::info!(models = registry.models.len(), "migrations applied");
    Ok(())
}
