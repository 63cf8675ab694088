//! Read query shape consumed by `StoreAdapter::find`.

use crate::config::{Association, AssociationKind};
use crate::query::Filter;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderBy {
    pub field: String,
    pub descending: bool,
}

impl OrderBy {
    pub fn asc(field: impl Into<String>) -> Self {
        OrderBy {
            field: field.into(),
            descending: false,
        }
    }
}

/// A related model rendered alongside each parent row.
#[derive(Clone, Debug, PartialEq)]
pub struct Include {
    /// Association name; also the key the related data is exposed under.
    pub association: String,
    /// Target model name.
    pub model: String,
    pub to_many: bool,
    /// Column on the parent row.
    pub parent_key: String,
    /// Column on the included row correlated with `parent_key`.
    pub child_key: String,
    /// Parent rows without a matching included row are dropped.
    pub required: bool,
    pub filter: Option<Filter>,
    pub attributes: Option<Vec<String>>,
    pub include: Vec<Include>,
}

impl Include {
    /// Include built from an association of the parent model.
    pub fn for_association(association: &Association) -> Include {
        let (parent_key, child_key) = match &association.kind {
            AssociationKind::BelongsToMany {
                through: Some(through),
                source_key,
                foreign_key,
                ..
            } => {
                // Rendered through the join table: one object per through row.
                return Include {
                    association: association.name.clone(),
                    model: through.model.clone(),
                    to_many: true,
                    parent_key: source_key.clone(),
                    child_key: foreign_key.clone(),
                    required: false,
                    filter: through.scope.clone().map(Filter::Match),
                    attributes: None,
                    include: Vec::new(),
                };
            }
            _ => association.join_keys(),
        };
        Include {
            association: association.name.clone(),
            model: association.target.clone(),
            to_many: association.is_to_many(),
            parent_key: parent_key.to_string(),
            child_key: child_key.to_string(),
            required: false,
            filter: association.scope.clone().map(Filter::Match),
            attributes: None,
            include: Vec::new(),
        }
    }

    /// True if this include or any nested include fans out to many rows.
    pub fn fans_out(&self) -> bool {
        self.to_many || self.include.iter().any(Include::fans_out)
    }
}

/// Caller options for the join rows of a many-to-many read.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ThroughOptions {
    pub filter: Option<Filter>,
    pub attributes: Option<Vec<String>>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct FindQuery {
    pub filter: Filter,
    /// Projection; `None` selects every attribute.
    pub attributes: Option<Vec<String>>,
    pub include: Vec<Include>,
    pub order: Vec<OrderBy>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    pub distinct: bool,
    pub through: Option<ThroughOptions>,
}

impl FindQuery {
    pub fn filtered(filter: Filter) -> Self {
        FindQuery {
            filter,
            ..Default::default()
        }
    }

    pub fn has_to_many_include(&self) -> bool {
        self.include.iter().any(Include::fans_out)
    }
}
