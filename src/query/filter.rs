//! Where-clause tree shared by the write pipeline, the rewriter, and the store adapters.

use crate::record::{values_match, Record};
use serde_json::Value;

#[derive(Clone, Debug, PartialEq)]
pub enum Filter {
    /// `field = value` for every entry; a null value means `IS NULL`. Empty matches every row.
    Match(Record),
    In { field: String, values: Vec<Value> },
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

impl Default for Filter {
    fn default() -> Self {
        Filter::Match(Record::new())
    }
}

impl Filter {
    pub fn all() -> Self {
        Filter::default()
    }

    pub fn eq(field: impl Into<String>, value: Value) -> Self {
        let mut m = Record::new();
        m.insert(field.into(), value);
        Filter::Match(m)
    }

    /// Logical OR of identity predicates. An empty list matches nothing.
    pub fn any_of(predicates: impl IntoIterator<Item = Record>) -> Self {
        Filter::Or(predicates.into_iter().map(Filter::Match).collect())
    }

    pub fn one_of(field: impl Into<String>, values: Vec<Value>) -> Self {
        Filter::In {
            field: field.into(),
            values,
        }
    }

    pub fn is_all(&self) -> bool {
        match self {
            Filter::Match(m) => m.is_empty(),
            Filter::And(parts) => parts.iter().all(Filter::is_all),
            _ => false,
        }
    }

    /// Logical AND, dropping parts that match everything.
    pub fn and(self, other: Filter) -> Filter {
        Filter::all_of([self, other])
    }

    pub fn all_of(parts: impl IntoIterator<Item = Filter>) -> Filter {
        let mut kept: Vec<Filter> = parts.into_iter().filter(|f| !f.is_all()).collect();
        match kept.len() {
            0 => Filter::all(),
            1 => kept.remove(0),
            _ => Filter::And(kept),
        }
    }

    /// Merge field equalities into this filter; `fields` win over same-named equalities already present.
    pub fn merge_fields(self, fields: &Record) -> Filter {
        if fields.is_empty() {
            return self;
        }
        match self {
            Filter::Match(mut m) => {
                for (k, v) in fields {
                    m.insert(k.clone(), v.clone());
                }
                Filter::Match(m)
            }
            other => other.and(Filter::Match(fields.clone())),
        }
    }

    /// Evaluate against an in-memory row.
    pub fn matches(&self, row: &Record) -> bool {
        match self {
            Filter::Match(m) => m.iter().all(|(field, expected)| match (row.get(field), expected) {
                (None, Value::Null) | (Some(Value::Null), Value::Null) => true,
                (Some(actual), expected) => !actual.is_null() && values_match(actual, expected),
                (None, _) => false,
            }),
            Filter::In { field, values } => row
                .get(field)
                .map(|actual| values.iter().any(|v| values_match(actual, v)))
                .unwrap_or(false),
            Filter::And(parts) => parts.iter().all(|f| f.matches(row)),
            Filter::Or(parts) => parts.iter().any(|f| f.matches(row)),
        }
    }

    /// Field names referenced anywhere in the tree.
    pub fn fields(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Filter::Match(m) => out.extend(m.keys().map(String::as_str)),
            Filter::In { field, .. } => out.push(field),
            Filter::And(parts) | Filter::Or(parts) => {
                for p in parts {
                    p.collect_fields(out);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rec(v: Value) -> Record {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn match_treats_null_as_is_null() {
        let f = Filter::Match(rec(json!({"deleted_at": null})));
        assert!(f.matches(&rec(json!({"deleted_at": null}))));
        assert!(f.matches(&rec(json!({}))));
        assert!(!f.matches(&rec(json!({"deleted_at": "2024-01-01T00:00:00Z"}))));
    }

    #[test]
    fn or_of_predicates() {
        let f = Filter::any_of(vec![rec(json!({"uniq": "a"})), rec(json!({"uniq": "b"}))]);
        assert!(f.matches(&rec(json!({"uniq": "b", "x": 1}))));
        assert!(!f.matches(&rec(json!({"uniq": "c"}))));
        assert!(!Filter::any_of(Vec::new()).matches(&rec(json!({"uniq": "a"}))));
    }

    #[test]
    fn in_matches_any_listed_value() {
        let f = Filter::one_of("id", vec![json!(1), json!("3")]);
        assert!(f.matches(&rec(json!({"id": 3}))));
        assert!(!f.matches(&rec(json!({"id": 2}))));
        assert_eq!(f.fields(), vec!["id"]);
    }

    #[test]
    fn and_drops_match_all_parts() {
        let f = Filter::all().and(Filter::eq("a", json!(1)));
        assert_eq!(f, Filter::eq("a", json!(1)));
        assert!(Filter::all().and(Filter::all()).is_all());
    }

    #[test]
    fn merge_fields_overrides_equalities() {
        let f = Filter::eq("owner_id", json!(1)).merge_fields(&rec(json!({"owner_id": 7})));
        assert_eq!(f, Filter::eq("owner_id", json!(7)));
        let nested = Filter::Or(vec![Filter::eq("a", json!(1))]).merge_fields(&rec(json!({"b": 2})));
        assert!(matches!(nested, Filter::And(ref parts) if parts.len() == 2));
    }
}
