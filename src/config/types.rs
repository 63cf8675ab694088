//! Raw model configuration as read from `models.json`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PrimaryKeyConfig {
    Single(String),
    Composite(Vec<String>),
}

impl PrimaryKeyConfig {
    pub fn fields(&self) -> Vec<String> {
        match self {
            PrimaryKeyConfig::Single(s) => vec![s.clone()],
            PrimaryKeyConfig::Composite(v) => v.clone(),
        }
    }
}

impl Default for PrimaryKeyConfig {
    fn default() -> Self {
        PrimaryKeyConfig::Single("id".into())
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ValidationRule {
    #[serde(default)]
    pub required: Option<bool>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub max_length: Option<u32>,
    #[serde(default)]
    pub min_length: Option<u32>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub allowed: Option<Vec<Value>>,
    #[serde(default)]
    pub minimum: Option<f64>,
    #[serde(default)]
    pub maximum: Option<f64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AttributeConfig {
    pub name: String,
    /// Postgres type name (e.g. "bigserial", "text", "timestamptz").
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default = "default_true")]
    pub nullable: bool,
    /// Declared default value; also the "not deleted" sentinel for a deletedAt attribute.
    #[serde(default)]
    pub default: Option<Value>,
    /// SQL default expression used in DDL (e.g. "NOW()", "gen_random_uuid()").
    #[serde(default)]
    pub db_default: Option<String>,
    /// Server-assigned identity; client values are stripped. Inferred for serial/uuid keys when unset.
    #[serde(default)]
    pub generated: Option<bool>,
    #[serde(default)]
    pub validation: Option<ValidationRule>,
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexConfig {
    pub name: String,
    pub fields: Vec<String>,
    #[serde(default)]
    pub unique: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UniqueKeyConfig {
    pub name: String,
    pub fields: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssociationKindConfig {
    HasOne,
    BelongsTo,
    HasMany,
    BelongsToMany,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AssociationConfig {
    pub name: String,
    pub kind: AssociationKindConfig,
    pub target: String,
    pub foreign_key: String,
    /// belongs_to_many only: the through-table column referencing the target.
    #[serde(default)]
    pub other_key: Option<String>,
    /// belongs_to_many only: the join-table model.
    #[serde(default)]
    pub through: Option<String>,
    #[serde(default)]
    pub scope: Option<serde_json::Map<String, Value>>,
    #[serde(default)]
    pub through_scope: Option<serde_json::Map<String, Value>>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Resource name; also the URL path segment.
    pub name: String,
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default)]
    pub primary_key: PrimaryKeyConfig,
    pub attributes: Vec<AttributeConfig>,
    #[serde(default)]
    pub indexes: Vec<IndexConfig>,
    #[serde(default)]
    pub unique_keys: Vec<UniqueKeyConfig>,
    #[serde(default)]
    pub paranoid: bool,
    #[serde(default)]
    pub deleted_at: Option<String>,
    #[serde(default = "default_true")]
    pub timestamps: bool,
    #[serde(default = "default_operations")]
    pub operations: Vec<String>,
    #[serde(default)]
    pub associations: Vec<AssociationConfig>,
}

fn default_operations() -> Vec<String> {
    ["read", "create", "update", "upsert", "delete", "bulk_create", "bulk_upsert"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Whole configuration file.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FullConfig {
    #[serde(default = "default_schema")]
    pub schema: String,
    pub models: Vec<ModelConfig>,
}

fn default_schema() -> String {
    "public".into()
}

impl FullConfig {
    pub fn models_by_name(&self) -> HashMap<&str, &ModelConfig> {
        self.models.iter().map(|m| (m.name.as_str(), m)).collect()
    }
}
