//! Bind JSON values as text; placeholders carry the column's cast so Postgres parses them.

use crate::config::Attribute;
use serde_json::Value;
use sqlx::postgres::{PgArguments, Postgres};
use sqlx::query::Query;

/// Text form of a value for binding. `None` binds SQL NULL.
pub fn bind_text(v: &Value) -> Option<String> {
    match v {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(_) | Value::Object(_) => Some(v.to_string()),
    }
}

/// Placeholder `$n` with the cast for the attribute's column type.
/// Custom types (`schema.type`) are cast to themselves.
pub fn placeholder(n: usize, attr: &Attribute) -> String {
    if attr.sql_type.contains('.') {
        return format!("${}::{}", n, attr.sql_type);
    }
    match attr.field_type.pg_cast() {
        Some(cast) => format!("${}::{}", n, cast),
        None => format!("${}", n),
    }
}

/// Bind every parameter, in order, as nullable text.
pub fn bind_all<'q>(mut query: Query<'q, Postgres, PgArguments>, params: &[Value]) -> Query<'q, Postgres, PgArguments> {
    for p in params {
        query = query.bind(bind_text(p));
    }
    query
}
