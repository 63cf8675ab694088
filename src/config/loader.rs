//! Load config from a JSON file and resolve it into model descriptors.

use crate::config::resolved::{
    Association, AssociationKind, Attribute, FieldType, Index, ModelDescriptor, ModelOptions,
    ModelRegistry, Through,
};
use crate::config::types::*;
use crate::config::validate;
use crate::error::ConfigError;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;

/// Build the model registry from full config (validates first).
pub fn resolve(config: &FullConfig) -> Result<ModelRegistry, ConfigError> {
    validate(config)?;
    let by_name = config.models_by_name();

    let mut models: Vec<ModelDescriptor> = config
        .models
        .iter()
        .map(|m| resolve_model(&config.schema, m))
        .collect();

    // Associations need the target's primary key, so they resolve in a second pass.
    let mut inverse_through: Vec<(String, Association)> = Vec::new();
    for model in models.iter_mut() {
        let raw = by_name
            .get(model.name.as_str())
            .ok_or_else(|| ConfigError::MissingReference {
                kind: "model",
                id: model.name.clone(),
            })?;
        for a in &raw.associations {
            let target = by_name.get(a.target.as_str()).ok_or_else(|| ConfigError::MissingReference {
                kind: "association target",
                id: a.target.clone(),
            })?;
            let source_key = model.primary_key[0].clone();
            let target_key = target.primary_key.fields()[0].clone();
            let kind = match a.kind {
                AssociationKindConfig::HasOne => AssociationKind::HasOne {
                    foreign_key: a.foreign_key.clone(),
                    source_key,
                },
                AssociationKindConfig::BelongsTo => AssociationKind::BelongsTo {
                    foreign_key: a.foreign_key.clone(),
                    target_key,
                },
                AssociationKindConfig::HasMany => AssociationKind::HasMany {
                    foreign_key: a.foreign_key.clone(),
                    source_key,
                },
                AssociationKindConfig::BelongsToMany => {
                    let other_key = a.other_key.clone().ok_or_else(|| {
                        ConfigError::Validation(format!("{}.{}: other_key required", model.name, a.name))
                    })?;
                    let through = a.through.as_ref().map(|through_model| {
                        let inverse = through_model.clone();
                        inverse_through.push((
                            a.target.clone(),
                            Association {
                                name: inverse.clone(),
                                target: through_model.clone(),
                                kind: AssociationKind::HasMany {
                                    foreign_key: other_key.clone(),
                                    source_key: target_key.clone(),
                                },
                                scope: None,
                            },
                        ));
                        Through {
                            model: through_model.clone(),
                            inverse,
                            scope: a.through_scope.clone(),
                        }
                    });
                    AssociationKind::BelongsToMany {
                        foreign_key: a.foreign_key.clone(),
                        other_key,
                        source_key,
                        target_key,
                        through,
                    }
                }
            };
            model.associations.push(Association {
                name: a.name.clone(),
                target: a.target.clone(),
                kind,
                scope: a.scope.clone(),
            });
        }
    }

    let index_of: HashMap<String, usize> = models
        .iter()
        .enumerate()
        .map(|(i, m)| (m.name.clone(), i))
        .collect();
    for (target, inverse) in inverse_through {
        let Some(&i) = index_of.get(&target) else { continue };
        let target_model = &mut models[i];
        if target_model.association(&inverse.name).is_none() {
            tracing::debug!(model = %target, association = %inverse.name, "synthesised inverse through association");
            target_model.associations.push(inverse);
        }
    }

    Ok(ModelRegistry::new(models))
}

fn resolve_model(schema: &str, m: &ModelConfig) -> ModelDescriptor {
    let pk_names = m.primary_key.fields();
    let mut attributes: Vec<Attribute> = m
        .attributes
        .iter()
        .map(|a| {
            let field_type = FieldType::from_pg_name(&a.type_);
            let primary_key = pk_names.contains(&a.name);
            let generated = a.generated.unwrap_or_else(|| {
                primary_key
                    && (a.type_.to_lowercase().contains("serial")
                        || (field_type == FieldType::Uuid && a.db_default.is_some()))
            });
            Attribute {
                name: a.name.clone(),
                field_type,
                sql_type: a.type_.clone(),
                nullable: a.nullable && !primary_key,
                default: a.default.clone(),
                db_default: a.db_default.clone(),
                primary_key,
                generated,
                validation: a.validation.clone(),
            }
        })
        .collect();

    if m.timestamps {
        for name in ["created_at", "updated_at"] {
            if !attributes.iter().any(|a| a.name == name) {
                attributes.push(implicit_timestamp(name, false, Some("NOW()".into()), None));
            }
        }
    }

    let deleted_at = if m.paranoid {
        let name = m.deleted_at.clone().unwrap_or_else(|| "deleted_at".into());
        if !attributes.iter().any(|a| a.name == name) {
            attributes.push(implicit_timestamp(&name, true, None, Some(Value::Null)));
        }
        Some(name)
    } else {
        None
    };

    let declared_indexes = m
        .indexes
        .iter()
        .map(|i| Index {
            name: i.name.clone(),
            unique: i.unique,
            primary: false,
            fields: i.fields.clone(),
        })
        .collect();
    let unique_keys = m
        .unique_keys
        .iter()
        .map(|u| Index {
            name: u.name.clone(),
            unique: true,
            primary: false,
            fields: u.fields.clone(),
        })
        .collect();

    ModelDescriptor {
        name: m.name.clone(),
        schema_name: schema.to_string(),
        table_name: m.table.clone().unwrap_or_else(|| m.name.clone()),
        attributes,
        primary_key: pk_names,
        associations: Vec::new(),
        options: ModelOptions {
            paranoid: m.paranoid,
            deleted_at,
            timestamps: m.timestamps,
            declared_indexes,
            unique_keys,
        },
        operations: m.operations.clone(),
    }
}

fn implicit_timestamp(name: &str, nullable: bool, db_default: Option<String>, default: Option<Value>) -> Attribute {
    Attribute {
        name: name.to_string(),
        field_type: FieldType::TimestampTz,
        sql_type: "timestamptz".into(),
        nullable,
        default,
        db_default,
        primary_key: false,
        generated: false,
        validation: None,
    }
}

/// Read and parse a config file.
pub async fn load_from_path(path: impl AsRef<Path>) -> Result<FullConfig, ConfigError> {
    let path = path.as_ref();
    tracing::debug!(path = %path.display(), "loading model config");
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
    parse_config(&raw)
}

pub fn parse_config(raw: &str) -> Result<FullConfig, ConfigError> {
    serde_json::from_str(raw).map_err(|e| ConfigError::Load(e.to_string()))
}
