//! Config validation: referential integrity of models, indexes, and associations.

use crate::config::{AssociationKindConfig, FullConfig, ModelConfig};
use crate::error::ConfigError;
use std::collections::HashSet;

/// Attribute names a model will expose after resolution (declared plus implicit timestamps / deletedAt).
pub fn effective_attribute_names(model: &ModelConfig) -> HashSet<&str> {
    let mut names: HashSet<&str> = model.attributes.iter().map(|a| a.name.as_str()).collect();
    if model.timestamps {
        names.insert("created_at");
        names.insert("updated_at");
    }
    if model.paranoid {
        names.insert(model.deleted_at.as_deref().unwrap_or("deleted_at"));
    }
    names
}

pub fn validate(config: &FullConfig) -> Result<(), ConfigError> {
    if config.schema.trim().is_empty() {
        return Err(ConfigError::Validation("schema name must not be empty".into()));
    }
    if config.models.is_empty() {
        return Err(ConfigError::Validation("at least one model required".into()));
    }

    let mut names = HashSet::new();
    for m in &config.models {
        if !names.insert(m.name.as_str()) {
            return Err(ConfigError::DuplicateResource(m.name.clone()));
        }
    }

    let by_name = config.models_by_name();
    for m in &config.models {
        let attrs = effective_attribute_names(m);
        if m.primary_key.fields().is_empty() {
            return Err(ConfigError::Validation(format!("model {}: empty primary key", m.name)));
        }
        for pk in m.primary_key.fields() {
            if !attrs.contains(pk.as_str()) {
                return Err(ConfigError::InvalidPrimaryKey {
                    model: m.name.clone(),
                    field: pk,
                });
            }
        }

        let mut index_names = HashSet::new();
        let indexes = m
            .indexes
            .iter()
            .map(|i| (&i.name, &i.fields))
            .chain(m.unique_keys.iter().map(|u| (&u.name, &u.fields)));
        for (name, fields) in indexes {
            if !index_names.insert(name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "model {}: duplicate index name {}",
                    m.name, name
                )));
            }
            if fields.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "model {}: index {} has no fields",
                    m.name, name
                )));
            }
            for f in fields {
                if !attrs.contains(f.as_str()) {
                    return Err(ConfigError::MissingReference {
                        kind: "attribute",
                        id: format!("{}.{}", m.name, f),
                    });
                }
            }
        }

        if let Some(deleted_at) = &m.deleted_at {
            if !m.paranoid {
                return Err(ConfigError::Validation(format!(
                    "model {}: deleted_at set on a model that is not paranoid",
                    m.name
                )));
            }
            if !attrs.contains(deleted_at.as_str()) {
                return Err(ConfigError::MissingReference {
                    kind: "attribute",
                    id: format!("{}.{}", m.name, deleted_at),
                });
            }
        }

        for a in &m.associations {
            let target = by_name.get(a.target.as_str()).ok_or_else(|| ConfigError::MissingReference {
                kind: "association target",
                id: format!("{}.{} -> {}", m.name, a.name, a.target),
            })?;
            match a.kind {
                AssociationKindConfig::BelongsToMany => {
                    if a.other_key.is_none() {
                        return Err(ConfigError::Validation(format!(
                            "association {}.{}: belongs_to_many requires other_key",
                            m.name, a.name
                        )));
                    }
                    if let Some(through) = &a.through {
                        let through_model = by_name.get(through.as_str()).ok_or_else(|| {
                            ConfigError::MissingReference {
                                kind: "through model",
                                id: through.clone(),
                            }
                        })?;
                        let through_attrs = effective_attribute_names(through_model);
                        for key in [Some(&a.foreign_key), a.other_key.as_ref()].into_iter().flatten() {
                            if !through_attrs.contains(key.as_str()) {
                                return Err(ConfigError::MissingReference {
                                    kind: "through attribute",
                                    id: format!("{}.{}", through, key),
                                });
                            }
                        }
                    }
                }
                AssociationKindConfig::HasMany | AssociationKindConfig::HasOne => {
                    if !effective_attribute_names(target).contains(a.foreign_key.as_str()) {
                        return Err(ConfigError::MissingReference {
                            kind: "foreign key",
                            id: format!("{}.{}", a.target, a.foreign_key),
                        });
                    }
                }
                AssociationKindConfig::BelongsTo => {
                    if !attrs.contains(a.foreign_key.as_str()) {
                        return Err(ConfigError::MissingReference {
                            kind: "foreign key",
                            id: format!("{}.{}", m.name, a.foreign_key),
                        });
                    }
                }
            }
        }
    }

    Ok(())
}
