//! Untyped records exchanged between the HTTP layer, the write pipeline, and store adapters.

use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// One row or request body: field name -> JSON value.
pub type Record = Map<String, Value>;

/// Field names present in a record, ordered.
pub fn field_set(record: &Record) -> BTreeSet<&str> {
    record.keys().map(String::as_str).collect()
}

/// True when every record carries exactly the same set of field names.
pub fn is_homogeneous(records: &[Record]) -> bool {
    let Some(first) = records.first() else {
        return true;
    };
    let expected = field_set(first);
    records.iter().skip(1).all(|r| field_set(r) == expected)
}

/// Copy of `base` with every field of `top` written over it.
pub fn overlay(base: &Record, top: &Record) -> Record {
    let mut out = base.clone();
    for (k, v) in top {
        out.insert(k.clone(), v.clone());
    }
    out
}

/// Loose equality used when matching store rows against request values.
/// Postgres reports conflicting keys as text, so `42` and `"42"` are the same key.
pub fn values_match(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(n), Value::Number(m)) => match (n.as_i64(), m.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => n.as_f64() == m.as_f64(),
        },
        (Value::Number(n), Value::String(s)) | (Value::String(s), Value::Number(n)) => {
            n.to_string() == *s
                || s.parse::<f64>().ok().zip(n.as_f64()).map(|(x, y)| x == y).unwrap_or(false)
        }
        (Value::Bool(x), Value::String(s)) | (Value::String(s), Value::Bool(x)) => {
            s.eq_ignore_ascii_case(if *x { "true" } else { "false" })
        }
        (Value::String(s), Value::String(t)) => s == t || (s.eq_ignore_ascii_case(t) && is_uuid(s)),
        _ => a == b,
    }
}

fn is_uuid(s: &str) -> bool {
    uuid::Uuid::parse_str(s).is_ok()
}

/// True when `row` carries a matching value for every field of `predicate`.
pub fn matches_predicate(row: &Record, predicate: &Record) -> bool {
    predicate.iter().all(|(field, expected)| {
        row.get(field)
            .map(|actual| values_match(actual, expected))
            .unwrap_or(false)
    })
}
