//! Resolved model descriptors: config validated and flattened for runtime use.
//! Loaded once at startup and read-only afterwards.

use crate::config::ValidationRule;
use crate::record::Record;
use serde_json::Value;
use std::collections::HashMap;

/// Storage type of an attribute. Drives SQL casts, id parsing, and sentinel comparison.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldType {
    Integer,
    BigInt,
    Float,
    Numeric,
    Text,
    Boolean,
    Uuid,
    Timestamp,
    TimestampTz,
    Date,
    Json,
}

impl FieldType {
    pub fn from_pg_name(name: &str) -> FieldType {
        let lower = name.trim().to_lowercase();
        if lower == "timestamptz" || lower == "timestamp with time zone" {
            FieldType::TimestampTz
        } else if lower.starts_with("timestamp") {
            FieldType::Timestamp
        } else if lower == "date" {
            FieldType::Date
        } else if lower.contains("uuid") {
            FieldType::Uuid
        } else if lower.contains("bigserial") || lower.contains("bigint") || lower == "int8" {
            FieldType::BigInt
        } else if lower.contains("serial") || lower.contains("int") {
            FieldType::Integer
        } else if lower.starts_with("bool") {
            FieldType::Boolean
        } else if lower.starts_with("numeric") || lower.starts_with("decimal") {
            FieldType::Numeric
        } else if lower.starts_with("real") || lower.starts_with("double") || lower.starts_with("float") {
            FieldType::Float
        } else if lower.starts_with("json") {
            FieldType::Json
        } else {
            FieldType::Text
        }
    }

    /// Cast appended to bind placeholders so JSON-text values bind correctly.
    pub fn pg_cast(&self) -> Option<&'static str> {
        match self {
            FieldType::Integer => Some("int4"),
            FieldType::BigInt => Some("int8"),
            FieldType::Float => Some("float8"),
            FieldType::Numeric => Some("numeric"),
            FieldType::Boolean => Some("boolean"),
            FieldType::Uuid => Some("uuid"),
            FieldType::Timestamp => Some("timestamp"),
            FieldType::TimestampTz => Some("timestamptz"),
            FieldType::Date => Some("date"),
            FieldType::Json => Some("jsonb"),
            FieldType::Text => None,
        }
    }

    pub fn is_temporal(&self) -> bool {
        matches!(self, FieldType::Timestamp | FieldType::TimestampTz | FieldType::Date)
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, FieldType::Integer | FieldType::BigInt)
    }
}

#[derive(Clone, Debug)]
pub struct Attribute {
    pub name: String,
    pub field_type: FieldType,
    /// Type name as configured, used verbatim in DDL.
    pub sql_type: String,
    pub nullable: bool,
    /// Declared default value.
    pub default: Option<Value>,
    pub db_default: Option<String>,
    pub primary_key: bool,
    /// Server-assigned identity: stripped from every write.
    pub generated: bool,
    pub validation: Option<ValidationRule>,
}

impl Attribute {
    /// True if the database default stamps the current time.
    pub fn db_default_is_now(&self) -> bool {
        self.db_default.as_deref().is_some_and(|d| {
            let lower = d.to_lowercase();
            lower.contains("now()") || lower.contains("current_timestamp")
        })
    }

    /// Value a fresh row takes when the attribute is omitted: the declared default, the current
    /// time for `now()` defaults, else null. `None` when the database default cannot be evaluated here.
    pub fn fresh_value(&self) -> Option<Value> {
        match (&self.default, &self.db_default) {
            (Some(default), _) => Some(default.clone()),
            (None, Some(_)) if self.db_default_is_now() => Some(Value::String(chrono::Utc::now().to_rfc3339())),
            (None, Some(_)) => None,
            (None, None) => Some(Value::Null),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Index {
    pub name: String,
    pub unique: bool,
    pub primary: bool,
    pub fields: Vec<String>,
}

/// Join-table details of a many-to-many association.
#[derive(Clone, Debug)]
pub struct Through {
    pub model: String,
    /// Name of the target's hasMany association onto the through model.
    pub inverse: String,
    pub scope: Option<Record>,
}

#[derive(Clone, Debug)]
pub enum AssociationKind {
    /// Target row carries `foreign_key` = our `source_key`.
    HasOne { foreign_key: String, source_key: String },
    /// We carry `foreign_key` = target's `target_key`.
    BelongsTo { foreign_key: String, target_key: String },
    /// Target rows carry `foreign_key` = our `source_key`.
    HasMany { foreign_key: String, source_key: String },
    /// Through rows carry `foreign_key` = our `source_key` and `other_key` = target's `target_key`.
    BelongsToMany {
        foreign_key: String,
        other_key: String,
        source_key: String,
        target_key: String,
        through: Option<Through>,
    },
}

#[derive(Clone, Debug)]
pub struct Association {
    pub name: String,
    pub target: String,
    pub kind: AssociationKind,
    pub scope: Option<Record>,
}

impl Association {
    pub fn is_to_many(&self) -> bool {
        matches!(
            self.kind,
            AssociationKind::HasMany { .. } | AssociationKind::BelongsToMany { .. }
        )
    }

    /// Owner value the rewritten query pins: our key for has*/belongsToMany, our foreign key for belongsTo.
    pub fn owner_key<'a>(&self, owner: &'a Record) -> Option<&'a Value> {
        let field = match &self.kind {
            AssociationKind::HasOne { source_key, .. }
            | AssociationKind::HasMany { source_key, .. }
            | AssociationKind::BelongsToMany { source_key, .. } => source_key,
            AssociationKind::BelongsTo { foreign_key, .. } => foreign_key,
        };
        owner.get(field).filter(|v| !v.is_null())
    }

    /// (column on the parent row, column on the included row) used to correlate an include.
    pub fn join_keys(&self) -> (&str, &str) {
        match &self.kind {
            AssociationKind::HasOne { foreign_key, source_key }
            | AssociationKind::HasMany { foreign_key, source_key } => (source_key, foreign_key),
            AssociationKind::BelongsTo { foreign_key, target_key } => (foreign_key, target_key),
            AssociationKind::BelongsToMany { source_key, foreign_key, .. } => (source_key, foreign_key),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ModelOptions {
    pub paranoid: bool,
    pub deleted_at: Option<String>,
    pub timestamps: bool,
    pub declared_indexes: Vec<Index>,
    /// Named unique keys in configuration order.
    pub unique_keys: Vec<Index>,
}

#[derive(Clone, Debug)]
pub struct ModelDescriptor {
    pub name: String,
    pub schema_name: String,
    pub table_name: String,
    pub attributes: Vec<Attribute>,
    pub primary_key: Vec<String>,
    pub associations: Vec<Association>,
    pub options: ModelOptions,
    pub operations: Vec<String>,
}

impl ModelDescriptor {
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attribute(name).is_some()
    }

    pub fn association(&self, name: &str) -> Option<&Association> {
        self.associations.iter().find(|a| a.name == name)
    }

    pub fn allows(&self, operation: &str) -> bool {
        self.operations.iter().any(|o| o == operation)
    }

    /// The primary index. Always present after resolution.
    pub fn primary_index(&self) -> Index {
        Index {
            name: format!("{}_pkey", self.table_name),
            unique: true,
            primary: true,
            fields: self.primary_key.clone(),
        }
    }

    /// deletedAt attribute of a paranoid model.
    pub fn deleted_at_attribute(&self) -> Option<&Attribute> {
        if !self.options.paranoid {
            return None;
        }
        self.options
            .deleted_at
            .as_deref()
            .and_then(|name| self.attribute(name))
    }

    pub fn generated_fields(&self) -> impl Iterator<Item = &str> {
        self.attributes
            .iter()
            .filter(|a| a.generated)
            .map(|a| a.name.as_str())
    }

    pub fn primary_key_field_type(&self) -> FieldType {
        self.primary_key
            .first()
            .and_then(|pk| self.attribute(pk))
            .map(|a| a.field_type)
            .unwrap_or(FieldType::Text)
    }
}

/// Descriptor provider: read-only access to models by resource name.
#[derive(Clone, Debug, Default)]
pub struct ModelRegistry {
    pub models: Vec<ModelDescriptor>,
    pub by_name: HashMap<String, usize>,
}

impl ModelRegistry {
    pub fn new(models: Vec<ModelDescriptor>) -> Self {
        let by_name = models
            .iter()
            .enumerate()
            .map(|(i, m)| (m.name.clone(), i))
            .collect();
        ModelRegistry { models, by_name }
    }

    pub fn get(&self, name: &str) -> Option<&ModelDescriptor> {
        self.by_name.get(name).and_then(|i| self.models.get(*i))
    }
}
