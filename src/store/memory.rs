//! In-memory store adapter. Enforces every unique index of a model the way Postgres does and
//! applies batches atomically; used by tests and by the demo server without a database.

use super::{FindOptions, InsertOptions, OnConflict, StoreAdapter, StoreError, UniqueViolation, UpsertResult};
use crate::config::{FieldType, ModelDescriptor, ModelRegistry};
use crate::query::{Filter, FindQuery, Include};
use crate::record::{values_match, Record};
use crate::service::identity::list_unique_indexes;
use crate::service::paranoid::live_filter;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Clone, Debug, Default)]
struct Table {
    rows: Vec<Record>,
    next_id: i64,
}

pub struct MemoryStore {
    registry: Arc<ModelRegistry>,
    tables: Mutex<HashMap<String, Table>>,
}

impl MemoryStore {
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        MemoryStore {
            registry,
            tables: Mutex::new(HashMap::new()),
        }
    }

    /// Every stored row of a model, soft-deleted rows included, in insertion order.
    pub fn rows(&self, model: &str) -> Vec<Record> {
        self.lock()
            .map(|tables| tables.get(model).map(|t| t.rows.clone()).unwrap_or_default())
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Table>>, StoreError> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Unsupported("memory store lock poisoned".into()))
    }

    fn known(&self, model: &ModelDescriptor) -> Result<(), StoreError> {
        if self.registry.get(&model.name).is_none() {
            return Err(StoreError::UnknownModel(model.name.clone()));
        }
        Ok(())
    }
}

fn now() -> Value {
    Value::String(Utc::now().to_rfc3339())
}

fn check_filter_fields(model: &ModelDescriptor, filter: &Filter) -> Result<(), StoreError> {
    match filter.fields().into_iter().find(|f| !model.has_attribute(f)) {
        Some(field) => Err(StoreError::Unsupported(format!("{}: unknown filter field {}", model.name, field))),
        None => Ok(()),
    }
}

/// Fill server-side values of a new row: generated keys, declared and database defaults.
fn prepare_row(model: &ModelDescriptor, table: &mut Table, record: &Record) -> Result<Record, StoreError> {
    let mut row = Record::new();
    for attr in &model.attributes {
        let value = match record.get(&attr.name) {
            Some(v) => v.clone(),
            None if attr.generated && attr.field_type.is_integer() => {
                table.next_id += 1;
                Value::from(table.next_id)
            }
            None if attr.generated && attr.field_type == FieldType::Uuid => {
                Value::String(uuid::Uuid::new_v4().to_string())
            }
            None => attr.fresh_value().unwrap_or(Value::Null),
        };
        if value.is_null() && (attr.primary_key || !attr.nullable) {
            return Err(StoreError::Unsupported(format!(
                "{}: null value in non-nullable field {}",
                model.name, attr.name
            )));
        }
        if attr.primary_key && attr.field_type.is_integer() {
            if let Some(n) = value.as_i64() {
                table.next_id = table.next_id.max(n);
            }
        }
        row.insert(attr.name.clone(), value);
    }
    Ok(row)
}

/// First unique index on which `row` (at `position`, if already stored) duplicates another row.
fn find_violation(model: &ModelDescriptor, rows: &[Record], row: &Record, position: Option<usize>) -> Option<UniqueViolation> {
    for index in list_unique_indexes(model) {
        let values: Option<Vec<&Value>> = index
            .fields
            .iter()
            .map(|f| row.get(f).filter(|v| !v.is_null()))
            .collect();
        let Some(values) = values else { continue };
        let clash = rows.iter().enumerate().any(|(i, other)| {
            Some(i) != position
                && index
                    .fields
                    .iter()
                    .zip(&values)
                    .all(|(f, v)| other.get(f).map(|o| values_match(o, v)).unwrap_or(false))
        });
        if clash {
            return Some(UniqueViolation {
                constraint: Some(index.name.clone()),
                fields: index.fields.iter().cloned().zip(values.into_iter().cloned()).collect(),
            });
        }
    }
    None
}

fn find_by_target(rows: &[Record], target: &[String], record: &Record) -> Option<usize> {
    let values: Option<Vec<&Value>> = target.iter().map(|f| record.get(f).filter(|v| !v.is_null())).collect();
    let values = values?;
    rows.iter().position(|row| {
        target
            .iter()
            .zip(&values)
            .all(|(f, v)| row.get(f).map(|o| values_match(o, v)).unwrap_or(false))
    })
}

fn apply_patch(model: &ModelDescriptor, row: &mut Record, patch: &Record, fields: &[String]) {
    for field in fields {
        if let Some(v) = patch.get(field) {
            if model.has_attribute(field) {
                row.insert(field.clone(), v.clone());
            }
        }
    }
    if model.options.timestamps && model.has_attribute("updated_at") && !fields.iter().any(|f| f == "updated_at") {
        row.insert("updated_at".into(), now());
    }
}

/// Insert or, with `on_conflict`, update the row carrying the target values. `None` means skipped.
fn write_row(
    model: &ModelDescriptor,
    table: &mut Table,
    record: &Record,
    on_conflict: Option<&OnConflict>,
) -> Result<Option<Record>, StoreError> {
    if let Some(oc) = on_conflict {
        if let Some(position) = find_by_target(&table.rows, &oc.target, record) {
            if oc.update.is_empty() {
                return Ok(None);
            }
            let mut row = table.rows[position].clone();
            apply_patch(model, &mut row, record, &oc.update);
            if let Some(v) = find_violation(model, &table.rows, &row, Some(position)) {
                return Err(StoreError::UniqueViolation(v));
            }
            table.rows[position] = row.clone();
            return Ok(Some(row));
        }
    }
    let row = prepare_row(model, table, record)?;
    if let Some(v) = find_violation(model, &table.rows, &row, None) {
        return Err(StoreError::UniqueViolation(v));
    }
    table.rows.push(row.clone());
    Ok(Some(row))
}

fn compare(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None | Some(Value::Null), None | Some(Value::Null)) => Ordering::Equal,
        (None | Some(Value::Null), _) => Ordering::Greater,
        (_, None | Some(Value::Null)) => Ordering::Less,
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}

fn project(row: &Record, attributes: Option<&Vec<String>>, keep: &[String]) -> Record {
    match attributes {
        Some(fields) => row
            .iter()
            .filter(|(k, _)| fields.contains(k) || keep.contains(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        None => row.clone(),
    }
}

impl MemoryStore {
    /// Attach included rows to `row`; `false` when a required include has no match.
    fn attach(&self, tables: &HashMap<String, Table>, row: &mut Record, includes: &[Include]) -> Result<bool, StoreError> {
        for include in includes {
            let target = self
                .registry
                .get(&include.model)
                .ok_or_else(|| StoreError::UnknownModel(include.model.clone()))?;
            let filter = Filter::all_of(
                include
                    .filter
                    .clone()
                    .into_iter()
                    .chain(live_filter(target)),
            );
            check_filter_fields(target, &filter)?;
            let parent_value = row.get(&include.parent_key).cloned().unwrap_or(Value::Null);
            let mut children = Vec::new();
            if !parent_value.is_null() {
                for child in tables.get(&include.model).map(|t| t.rows.as_slice()).unwrap_or_default() {
                    let correlated = child
                        .get(&include.child_key)
                        .map(|v| values_match(v, &parent_value))
                        .unwrap_or(false);
                    if !correlated || !filter.matches(child) {
                        continue;
                    }
                    let mut child = child.clone();
                    if !self.attach(tables, &mut child, &include.include)? {
                        continue;
                    }
                    let nested: Vec<String> = include.include.iter().map(|i| i.association.clone()).collect();
                    children.push(project(&child, include.attributes.as_ref(), &nested));
                }
            }
            if include.required && children.is_empty() {
                return Ok(false);
            }
            let value = if include.to_many {
                Value::Array(children.into_iter().map(Value::Object).collect())
            } else {
                children.into_iter().next().map(Value::Object).unwrap_or(Value::Null)
            };
            row.insert(include.association.clone(), value);
        }
        Ok(true)
    }
}

#[async_trait]
impl StoreAdapter for MemoryStore {
    async fn insert(
        &self,
        model: &ModelDescriptor,
        records: &[Record],
        options: &InsertOptions,
    ) -> Result<Vec<Record>, StoreError> {
        self.known(model)?;
        let mut tables = self.lock()?;
        let mut working = tables.get(&model.name).cloned().unwrap_or_default();
        let mut out = Vec::with_capacity(records.len());
        for record in records {
            if let Some(row) = write_row(model, &mut working, record, options.on_conflict.as_ref())? {
                out.push(row);
            }
        }
        tables.insert(model.name.clone(), working);
        Ok(out)
    }

    async fn update(&self, model: &ModelDescriptor, patch: &Record, scope: &Filter) -> Result<Vec<Record>, StoreError> {
        self.known(model)?;
        check_filter_fields(model, scope)?;
        let mut tables = self.lock()?;
        let mut working = tables.get(&model.name).cloned().unwrap_or_default();
        let fields: Vec<String> = patch.keys().cloned().collect();
        let positions: Vec<usize> = working
            .rows
            .iter()
            .enumerate()
            .filter(|(_, r)| scope.matches(r))
            .map(|(i, _)| i)
            .collect();
        for &i in &positions {
            let mut row = working.rows[i].clone();
            apply_patch(model, &mut row, patch, &fields);
            working.rows[i] = row;
        }
        for &i in &positions {
            if let Some(v) = find_violation(model, &working.rows, &working.rows[i], Some(i)) {
                return Err(StoreError::UniqueViolation(v));
            }
        }
        let out = positions.iter().map(|&i| working.rows[i].clone()).collect();
        tables.insert(model.name.clone(), working);
        Ok(out)
    }

    async fn find(&self, model: &ModelDescriptor, query: &FindQuery, options: FindOptions) -> Result<Vec<Record>, StoreError> {
        self.known(model)?;
        let filter = match (options.include_soft_deleted, live_filter(model)) {
            (false, Some(live)) => query.filter.clone().and(live),
            _ => query.filter.clone(),
        };
        check_filter_fields(model, &filter)?;
        let tables = self.lock()?;
        let stored = tables.get(&model.name).map(|t| t.rows.as_slice()).unwrap_or_default();

        let mut rows = Vec::new();
        for row in stored.iter().filter(|r| filter.matches(r)) {
            let mut row = row.clone();
            if self.attach(&tables, &mut row, &query.include)? {
                rows.push(row);
            }
        }

        let order: Vec<(String, bool)> = if query.order.is_empty() {
            model.primary_key.iter().map(|f| (f.clone(), false)).collect()
        } else {
            query.order.iter().map(|o| (o.field.clone(), o.descending)).collect()
        };
        rows.sort_by(|a, b| {
            order
                .iter()
                .map(|(f, desc)| {
                    let ord = compare(a.get(f), b.get(f));
                    if *desc { ord.reverse() } else { ord }
                })
                .find(|o| *o != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        });

        let included: Vec<String> = query.include.iter().map(|i| i.association.clone()).collect();
        let mut out: Vec<Record> = Vec::new();
        for row in rows.into_iter().skip(query.offset.unwrap_or(0) as usize) {
            let row = project(&row, query.attributes.as_ref(), &included);
            if query.distinct && out.contains(&row) {
                continue;
            }
            out.push(row);
            if query.limit.map(|l| out.len() >= l as usize).unwrap_or(false) {
                break;
            }
        }
        Ok(out)
    }

    async fn native_upsert(
        &self,
        model: &ModelDescriptor,
        record: &Record,
        conflict_fields: &[String],
    ) -> Result<UpsertResult, StoreError> {
        self.known(model)?;
        let mut tables = self.lock()?;
        let mut working = tables.get(&model.name).cloned().unwrap_or_default();
        let created = find_by_target(&working.rows, conflict_fields, record).is_none();
        let update: Vec<String> = record
            .keys()
            .filter(|f| !conflict_fields.contains(f) && !model.primary_key.contains(f))
            .cloned()
            .collect();
        let on_conflict = OnConflict {
            target: conflict_fields.to_vec(),
            update,
        };
        let row = match write_row(model, &mut working, record, Some(&on_conflict))? {
            Some(row) => Some(row),
            // Nothing to overwrite: report the existing row.
            None => find_by_target(&working.rows, conflict_fields, record).map(|i| working.rows[i].clone()),
        };
        tables.insert(model.name.clone(), working);
        Ok(UpsertResult { row, created })
    }

    async fn destroy(&self, model: &ModelDescriptor, scope: &Filter) -> Result<u64, StoreError> {
        self.known(model)?;
        check_filter_fields(model, scope)?;
        let mut tables = self.lock()?;
        let Some(table) = tables.get_mut(&model.name) else {
            return Ok(0);
        };
        let before = table.rows.len();
        table.rows.retain(|r| !scope.matches(r));
        Ok((before - table.rows.len()) as u64)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.lock().map(|_| ())
    }
}
