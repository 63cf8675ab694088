//! Scoped read queries for associations. Every function clones the caller's query and
//! returns the rewritten copy; the base query is never modified.

use crate::config::{Association, AssociationKind};
use crate::error::AppError;
use crate::query::{Filter, FindQuery, Include};
use crate::record::Record;
use serde_json::Value;

/// Rewrite `base` to select the rows `association` links to the owner identified by `owner_key`
/// (see [`Association::owner_key`]).
pub fn rewrite(base: &FindQuery, association: &Association, owner_key: &Value) -> Result<FindQuery, AppError> {
    match &association.kind {
        AssociationKind::HasMany { foreign_key, .. } => Ok(for_has_many(base, association, foreign_key, owner_key)),
        AssociationKind::BelongsToMany { through: None, .. } => Err(AppError::internal(
            &association.target,
            format!("association {} has no through model to reach the owner", association.name),
        )),
        AssociationKind::BelongsToMany { .. } => Ok(for_belongs_to_many(base, association, owner_key)),
        AssociationKind::HasOne { foreign_key, .. } => Ok(for_single(base, association, foreign_key, owner_key)),
        AssociationKind::BelongsTo { target_key, .. } => Ok(for_single(base, association, target_key, owner_key)),
    }
}

/// Merge the association scope into the where-clause, then pin `foreign_key` (the hasMany
/// association's key on the target) to the owner.
pub fn for_has_many(base: &FindQuery, association: &Association, foreign_key: &str, owner_id: &Value) -> FindQuery {
    let mut query = base.clone();
    let mut pinned = association.scope.clone().unwrap_or_default();
    pinned.insert(foreign_key.to_string(), owner_id.clone());
    query.filter = query.filter.merge_fields(&pinned);
    apply_distinct(&mut query);
    query
}

/// AND the association scope with the caller's where, and reach the owner through the join table.
pub fn for_belongs_to_many(base: &FindQuery, association: &Association, owner_id: &Value) -> FindQuery {
    let mut query = base.clone();
    let scope = association.scope.clone().map(Filter::Match).unwrap_or_default();
    query.filter = Filter::all_of([scope, base.filter.clone()]);

    if let AssociationKind::BelongsToMany {
        foreign_key,
        other_key,
        target_key,
        through: Some(through),
        ..
    } = &association.kind
    {
        let mut pinned = Record::new();
        pinned.insert(foreign_key.clone(), owner_id.clone());
        let caller_through = base.through.clone().unwrap_or_default();
        let through_filter = Filter::all_of([
            Filter::Match(pinned),
            through.scope.clone().map(Filter::Match).unwrap_or_default(),
            caller_through.filter.unwrap_or_default(),
        ]);
        query.include.push(Include {
            association: through.inverse.clone(),
            model: through.model.clone(),
            to_many: true,
            parent_key: target_key.clone(),
            child_key: other_key.clone(),
            required: true,
            filter: Some(through_filter),
            attributes: caller_through.attributes,
            include: Vec::new(),
        });
    }
    apply_distinct(&mut query);
    query
}

fn for_single(base: &FindQuery, association: &Association, key: &str, owner_key: &Value) -> FindQuery {
    let mut query = base.clone();
    let mut pinned = association.scope.clone().unwrap_or_default();
    pinned.insert(key.to_string(), owner_key.clone());
    query.filter = query.filter.merge_fields(&pinned);
    query.limit = Some(1);
    apply_distinct(&mut query);
    query
}

// Join fan-out would otherwise inflate paginated counts.
fn apply_distinct(query: &mut FindQuery) {
    if query.has_to_many_include() {
        query.distinct = true;
    }
}
