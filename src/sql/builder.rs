//! Builds parameterized SELECT, INSERT, UPDATE, DELETE from model descriptors.
//!
//! Every statement returns rows as a single jsonb column `__row`, so includes nest as
//! jsonb and rows decode straight into records.

use crate::config::{Attribute, ModelDescriptor, ModelRegistry};
use crate::query::{Filter, FindQuery, Include};
use crate::record::Record;
use crate::service::paranoid::live_filter;
use crate::sql::params::placeholder;
use crate::store::{OnConflict, StoreError};
use serde_json::Value;

/// Alias of the statement's main table.
const MAIN_ALIAS: &str = "main";
/// Column holding each row as jsonb.
pub const ROW_COLUMN: &str = "__row";
/// Column reporting whether an upsert inserted (true) or updated (false).
pub const INSERTED_COLUMN: &str = "__inserted";
/// Upper bound on LIMIT.
const MAX_LIMIT: u32 = 1000;
/// jsonb_build_object accepts at most 100 arguments.
const PAIRS_PER_OBJECT: usize = 50;

/// Quote identifier for PostgreSQL (safe: only from config).
fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

fn literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

fn qualified_table(model: &ModelDescriptor) -> String {
    format!("{}.{}", quoted(&model.schema_name), quoted(&model.table_name))
}

#[derive(Debug, Default)]
pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<Value>,
    aliases: usize,
}

impl QueryBuf {
    fn new() -> Self {
        QueryBuf::default()
    }

    fn push_param(&mut self, v: Value) -> usize {
        self.params.push(v);
        self.params.len()
    }

    fn next_alias(&mut self) -> String {
        self.aliases += 1;
        format!("i{}", self.aliases)
    }
}

fn attribute<'a>(model: &'a ModelDescriptor, field: &str) -> Result<&'a Attribute, StoreError> {
    model
        .attribute(field)
        .ok_or_else(|| StoreError::Unsupported(format!("{}: unknown field {}", model.name, field)))
}

/// Compile a filter tree against `alias`. Unknown fields are rejected.
fn compile_filter(q: &mut QueryBuf, model: &ModelDescriptor, alias: &str, filter: &Filter) -> Result<String, StoreError> {
    Ok(match filter {
        Filter::Match(fields) if fields.is_empty() => "TRUE".into(),
        Filter::Match(fields) => {
            let mut parts = Vec::with_capacity(fields.len());
            for (field, value) in fields {
                let attr = attribute(model, field)?;
                let column = format!("{}.{}", alias, quoted(field));
                if value.is_null() {
                    parts.push(format!("{} IS NULL", column));
                } else {
                    let n = q.push_param(value.clone());
                    parts.push(format!("{} = {}", column, placeholder(n, attr)));
                }
            }
            format!("({})", parts.join(" AND "))
        }
        Filter::In { field, values } => {
            let attr = attribute(model, field)?;
            let phs: Vec<String> = values
                .iter()
                .filter(|v| !v.is_null())
                .map(|v| {
                    let n = q.push_param(v.clone());
                    placeholder(n, attr)
                })
                .collect();
            if phs.is_empty() {
                "FALSE".into()
            } else {
                format!("{}.{} IN ({})", alias, quoted(field), phs.join(", "))
            }
        }
        Filter::And(parts) if parts.is_empty() => "TRUE".into(),
        Filter::Or(parts) if parts.is_empty() => "FALSE".into(),
        Filter::And(parts) | Filter::Or(parts) => {
            let op = if matches!(filter, Filter::And(_)) { " AND " } else { " OR " };
            let compiled = parts
                .iter()
                .map(|p| compile_filter(q, model, alias, p))
                .collect::<Result<Vec<_>, _>>()?;
            format!("({})", compiled.join(op))
        }
    })
}

/// `jsonb_build_object('a', alias."a", ...)`, chunked and concatenated for wide rows.
fn object_expr(pairs: Vec<(String, String)>) -> String {
    if pairs.is_empty() {
        return "'{}'::jsonb".into();
    }
    pairs
        .chunks(PAIRS_PER_OBJECT)
        .map(|chunk| {
            let args: Vec<String> = chunk.iter().map(|(k, expr)| format!("{}, {}", literal(k), expr)).collect();
            format!("jsonb_build_object({})", args.join(", "))
        })
        .collect::<Vec<_>>()
        .join(" || ")
}

fn column_pairs(model: &ModelDescriptor, alias: &str, attributes: Option<&Vec<String>>) -> Result<Vec<(String, String)>, StoreError> {
    match attributes {
        Some(fields) => fields
            .iter()
            .map(|f| attribute(model, f).map(|a| (a.name.clone(), format!("{}.{}", alias, quoted(&a.name)))))
            .collect(),
        None => Ok(model
            .attributes
            .iter()
            .map(|a| (a.name.clone(), format!("{}.{}", alias, quoted(&a.name))))
            .collect()),
    }
}

struct IncludeScope<'r> {
    target: &'r ModelDescriptor,
    alias: String,
    /// `schema.table alias`
    from: String,
    condition: String,
}

/// Correlation of an include under `parent_alias`: a fresh alias, the join key equality,
/// the include's filter, the target's live filter, and nested required includes.
fn include_scope<'r>(
    q: &mut QueryBuf,
    registry: &'r ModelRegistry,
    parent: &ModelDescriptor,
    parent_alias: &str,
    include: &Include,
) -> Result<IncludeScope<'r>, StoreError> {
    let target = registry
        .get(&include.model)
        .ok_or_else(|| StoreError::UnknownModel(include.model.clone()))?;
    attribute(parent, &include.parent_key)?;
    attribute(target, &include.child_key)?;
    let alias = q.next_alias();
    let mut conditions = vec![format!(
        "{}.{} = {}.{}",
        alias,
        quoted(&include.child_key),
        parent_alias,
        quoted(&include.parent_key)
    )];
    let filter = Filter::all_of(include.filter.clone().into_iter().chain(live_filter(target)));
    if !filter.is_all() {
        conditions.push(compile_filter(q, target, &alias, &filter)?);
    }
    for nested in include.include.iter().filter(|i| i.required) {
        conditions.push(exists_expr(q, registry, target, &alias, nested)?);
    }
    Ok(IncludeScope {
        target,
        from: format!("{} {}", qualified_table(target), alias),
        condition: conditions.join(" AND "),
        alias,
    })
}

fn exists_expr(
    q: &mut QueryBuf,
    registry: &ModelRegistry,
    parent: &ModelDescriptor,
    parent_alias: &str,
    include: &Include,
) -> Result<String, StoreError> {
    let scope = include_scope(q, registry, parent, parent_alias, include)?;
    Ok(format!("EXISTS (SELECT 1 FROM {} WHERE {})", scope.from, scope.condition))
}

/// Correlated subquery yielding the included rows: a jsonb array for to-many, an object (or null) for to-one.
fn include_expr(
    q: &mut QueryBuf,
    registry: &ModelRegistry,
    parent: &ModelDescriptor,
    parent_alias: &str,
    include: &Include,
) -> Result<String, StoreError> {
    let scope = include_scope(q, registry, parent, parent_alias, include)?;
    let row = row_expr(q, registry, scope.target, &scope.alias, include.attributes.as_ref(), &include.include)?;
    Ok(if include.to_many {
        format!(
            "(SELECT COALESCE(jsonb_agg({}), '[]'::jsonb) FROM {} WHERE {})",
            row, scope.from, scope.condition
        )
    } else {
        format!("(SELECT {} FROM {} WHERE {} LIMIT 1)", row, scope.from, scope.condition)
    })
}

fn row_expr(
    q: &mut QueryBuf,
    registry: &ModelRegistry,
    model: &ModelDescriptor,
    alias: &str,
    attributes: Option<&Vec<String>>,
    includes: &[Include],
) -> Result<String, StoreError> {
    let mut pairs = column_pairs(model, alias, attributes)?;
    for include in includes {
        pairs.push((include.association.clone(), include_expr(q, registry, model, alias, include)?));
    }
    Ok(object_expr(pairs))
}

/// SELECT rows matching `filter` with the query's projection, includes, order and paging.
/// Order defaults to the primary key.
pub fn select(
    registry: &ModelRegistry,
    model: &ModelDescriptor,
    filter: &Filter,
    query: &FindQuery,
) -> Result<QueryBuf, StoreError> {
    let mut q = QueryBuf::new();
    let table = qualified_table(model);
    let row = row_expr(&mut q, registry, model, MAIN_ALIAS, query.attributes.as_ref(), &query.include)?;

    let mut conditions = vec![compile_filter(&mut q, model, MAIN_ALIAS, filter)?];
    for include in query.include.iter().filter(|i| i.required) {
        conditions.push(exists_expr(&mut q, registry, model, MAIN_ALIAS, include)?);
    }
    let where_clause = conditions.join(" AND ");

    let order: Vec<(&str, bool)> = if query.order.is_empty() {
        model.primary_key.iter().map(|f| (f.as_str(), false)).collect()
    } else {
        query.order.iter().map(|o| (o.field.as_str(), o.descending)).collect()
    };
    for (field, _) in &order {
        attribute(model, field)?;
    }
    let direction = |desc: bool| if desc { " DESC" } else { "" };
    let limit_clause = query
        .limit
        .map(|n| format!(" LIMIT {}", n.min(MAX_LIMIT)))
        .unwrap_or_default();
    let offset_clause = query.offset.map(|n| format!(" OFFSET {}", n)).unwrap_or_default();

    q.sql = if query.distinct {
        // ORDER BY of a DISTINCT select must appear in its select list.
        let order_columns: Vec<String> = order
            .iter()
            .enumerate()
            .map(|(i, (f, _))| format!("{}.{} AS \"__o{}\"", MAIN_ALIAS, quoted(f), i))
            .collect();
        let order_by: Vec<String> = order
            .iter()
            .enumerate()
            .map(|(i, (_, desc))| format!("\"__o{}\"{}", i, direction(*desc)))
            .collect();
        format!(
            "SELECT {row_col} FROM (SELECT DISTINCT {} AS {row_col}, {} FROM {} {} WHERE {}) d ORDER BY {}{}{}",
            row,
            order_columns.join(", "),
            table,
            MAIN_ALIAS,
            where_clause,
            order_by.join(", "),
            limit_clause,
            offset_clause,
            row_col = quoted(ROW_COLUMN),
        )
    } else {
        let order_by: Vec<String> = order
            .iter()
            .map(|(f, desc)| format!("{}.{}{}", MAIN_ALIAS, quoted(f), direction(*desc)))
            .collect();
        format!(
            "SELECT {} AS {} FROM {} {} WHERE {} ORDER BY {}{}{}",
            row,
            quoted(ROW_COLUMN),
            table,
            MAIN_ALIAS,
            where_clause,
            order_by.join(", "),
            limit_clause,
            offset_clause
        )
    };
    Ok(q)
}

fn returning(model: &ModelDescriptor) -> String {
    let pairs = model
        .attributes
        .iter()
        .map(|a| (a.name.clone(), format!("{}.{}", MAIN_ALIAS, quoted(&a.name))))
        .collect();
    format!("{} AS {}", object_expr(pairs), quoted(ROW_COLUMN))
}

fn touches_updated_at(model: &ModelDescriptor) -> bool {
    model.options.timestamps && model.has_attribute("updated_at")
}

enum ConflictMode<'a> {
    Fail,
    /// Update the listed fields; an empty list leaves the row untouched and returns nothing.
    Merge(&'a OnConflict),
    /// Always touch the conflicting row so it is returned, and report whether it was inserted.
    Upsert(&'a OnConflict),
}

fn insert_with(model: &ModelDescriptor, records: &[Record], mode: ConflictMode<'_>) -> Result<QueryBuf, StoreError> {
    let mut q = QueryBuf::new();
    let table = qualified_table(model);

    for record in records {
        if let Some(field) = record.keys().find(|f| !model.has_attribute(f)) {
            return Err(StoreError::Unsupported(format!("{}: unknown field {}", model.name, field)));
        }
    }
    let mut columns: Vec<&Attribute> = model
        .attributes
        .iter()
        .filter(|a| a.default.is_some() || records.iter().any(|r| r.contains_key(&a.name)))
        .collect();
    if columns.is_empty() {
        columns.push(attribute(model, &model.primary_key[0])?);
    }

    let mut rows = Vec::with_capacity(records.len());
    for record in records {
        let values: Vec<String> = columns
            .iter()
            .map(|attr| match record.get(&attr.name).or(attr.default.as_ref()) {
                Some(v) => {
                    let n = q.push_param(v.clone());
                    placeholder(n, attr)
                }
                None => "DEFAULT".to_string(),
            })
            .collect();
        rows.push(format!("({})", values.join(", ")));
    }

    let conflict_clause = match mode {
        ConflictMode::Fail => String::new(),
        ConflictMode::Merge(oc) | ConflictMode::Upsert(oc) => {
            for f in oc.target.iter().chain(&oc.update) {
                attribute(model, f)?;
            }
            let target: Vec<String> = oc.target.iter().map(|f| quoted(f)).collect();
            let mut sets: Vec<String> = oc
                .update
                .iter()
                .filter(|f| f.as_str() != "updated_at" || !touches_updated_at(model))
                .filter(|f| columns.iter().any(|c| &c.name == *f))
                .map(|f| format!("{0} = EXCLUDED.{0}", quoted(f)))
                .collect();
            if sets.is_empty() && matches!(mode, ConflictMode::Upsert(_)) {
                sets.push(format!("{0} = EXCLUDED.{0}", target[0]));
            }
            if sets.is_empty() {
                format!(" ON CONFLICT ({}) DO NOTHING", target.join(", "))
            } else {
                if touches_updated_at(model) {
                    sets.push(format!("{} = NOW()", quoted("updated_at")));
                }
                format!(" ON CONFLICT ({}) DO UPDATE SET {}", target.join(", "), sets.join(", "))
            }
        }
    };

    let mut returning = returning(model);
    if matches!(mode, ConflictMode::Upsert(_)) {
        returning.push_str(&format!(", ({}.xmax = 0) AS {}", MAIN_ALIAS, quoted(INSERTED_COLUMN)));
    }
    let column_list: Vec<String> = columns.iter().map(|c| quoted(&c.name)).collect();
    q.sql = format!(
        "INSERT INTO {} AS {} ({}) VALUES {}{} RETURNING {}",
        table,
        MAIN_ALIAS,
        column_list.join(", "),
        rows.join(", "),
        conflict_clause,
        returning
    );
    Ok(q)
}

/// Multi-row INSERT. Absent fields take their declared default, else the column default.
pub fn insert(model: &ModelDescriptor, records: &[Record], on_conflict: Option<&OnConflict>) -> Result<QueryBuf, StoreError> {
    match on_conflict {
        Some(oc) => insert_with(model, records, ConflictMode::Merge(oc)),
        None => insert_with(model, records, ConflictMode::Fail),
    }
}

/// Single-row INSERT ... ON CONFLICT DO UPDATE that always returns the row plus `__inserted`.
pub fn upsert(model: &ModelDescriptor, record: &Record, conflict_fields: &[String]) -> Result<QueryBuf, StoreError> {
    let update: Vec<String> = record
        .keys()
        .filter(|f| !conflict_fields.contains(f) && !model.primary_key.contains(f))
        .cloned()
        .collect();
    let oc = OnConflict {
        target: conflict_fields.to_vec(),
        update,
    };
    insert_with(model, std::slice::from_ref(record), ConflictMode::Upsert(&oc))
}

/// UPDATE rows matching `filter`: SET only known fields present in the patch.
pub fn update(model: &ModelDescriptor, patch: &Record, filter: &Filter) -> Result<QueryBuf, StoreError> {
    let mut q = QueryBuf::new();
    let table = qualified_table(model);
    let mut sets = Vec::new();
    for (k, v) in patch {
        let Some(attr) = model.attribute(k) else { continue };
        let n = q.push_param(v.clone());
        sets.push(format!("{} = {}", quoted(k), placeholder(n, attr)));
    }
    if touches_updated_at(model) && !patch.contains_key("updated_at") {
        sets.push(format!("{} = NOW()", quoted("updated_at")));
    }
    if sets.is_empty() {
        let pk = quoted(&model.primary_key[0]);
        sets.push(format!("{} = {}.{}", pk, MAIN_ALIAS, pk));
    }
    let where_clause = compile_filter(&mut q, model, MAIN_ALIAS, filter)?;
    q.sql = format!(
        "UPDATE {} AS {} SET {} WHERE {} RETURNING {}",
        table,
        MAIN_ALIAS,
        sets.join(", "),
        where_clause,
        returning(model)
    );
    Ok(q)
}

/// DELETE rows matching `filter`.
pub fn delete(model: &ModelDescriptor, filter: &Filter) -> Result<QueryBuf, StoreError> {
    let mut q = QueryBuf::new();
    let table = qualified_table(model);
    let where_clause = compile_filter(&mut q, model, MAIN_ALIAS, filter)?;
    q.sql = format!("DELETE FROM {} AS {} WHERE {}", table, MAIN_ALIAS, where_clause);
    Ok(q)
}
