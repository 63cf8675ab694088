//! Split candidate records into rows that already exist and records that still need creating.

use crate::config::ModelDescriptor;
use crate::error::{AppError, ValidationReason};
use crate::query::{Filter, FindQuery};
use crate::record::{matches_predicate, Record};
use crate::service::identity::identify;
use crate::store::{FindOptions, StoreAdapter};

#[derive(Clone, Debug, Default)]
pub struct Partition {
    /// Stored rows matched by an input record's identity, in input order.
    pub existing_rows: Vec<Record>,
    /// Input records with no stored match.
    pub new_rows: Vec<Record>,
}

/// One batched lookup (OR of every record's identity predicate), then match per record.
pub async fn partition(
    store: &dyn StoreAdapter,
    model: &ModelDescriptor,
    records: &[Record],
) -> Result<Partition, AppError> {
    let identities = records
        .iter()
        .map(|r| {
            identify(model, r)
                .map(|(_, identity)| identity)
                .ok_or_else(|| AppError::validation(&model.name, ValidationReason::NoIdentity))
        })
        .collect::<Result<Vec<_>, _>>()?;
    if identities.is_empty() {
        return Ok(Partition::default());
    }

    let query = FindQuery::filtered(Filter::any_of(identities.iter().cloned()));
    let stored = store
        .find(model, &query, FindOptions::default())
        .await
        .map_err(|e| AppError::store(&model.name, e))?;

    let mut out = Partition::default();
    for (record, identity) in records.iter().zip(&identities) {
        match stored.iter().find(|row| matches_predicate(row, identity)) {
            Some(row) => out.existing_rows.push(row.clone()),
            None => out.new_rows.push(record.clone()),
        }
    }
    tracing::debug!(
        model = %model.name,
        existing = out.existing_rows.len(),
        new = out.new_rows.len(),
        "partitioned candidate records"
    );
    Ok(out)
}
