//! Process settings from the environment, and the write policy handed to the core.

use std::net::SocketAddr;

/// Immutable write defaults passed explicitly into every write operation.
#[derive(Clone, Debug)]
pub struct WritePolicy {
    /// Overwrite live duplicates on create instead of failing with a conflict.
    pub ignore_duplicates: bool,
    /// Maximum records accepted by one bulk operation.
    pub bulk_limit: usize,
}

impl Default for WritePolicy {
    fn default() -> Self {
        WritePolicy {
            ignore_duplicates: false,
            bulk_limit: 100,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Settings {
    /// Unset means the in-memory store.
    pub database_url: Option<String>,
    pub models_path: String,
    pub bind_addr: SocketAddr,
    pub max_connections: u32,
    pub body_limit_bytes: usize,
    pub write_policy: WritePolicy,
}

impl Settings {
    /// Read settings from the environment (after loading `.env` if present).
    pub fn from_env() -> Result<Self, crate::error::ConfigError> {
        dotenvy::dotenv().ok();
        let defaults = WritePolicy::default();
        Ok(Settings {
            database_url: std::env::var("DATABASE_URL").ok().filter(|s| !s.is_empty()),
            models_path: std::env::var("MODELS_PATH").unwrap_or_else(|_| "models.json".into()),
            bind_addr: parse_var("BIND_ADDR", "0.0.0.0:3000".parse().ok())?,
            max_connections: parse_var("DB_MAX_CONNECTIONS", Some(5))?,
            body_limit_bytes: parse_var("BODY_LIMIT_BYTES", Some(2 * 1024 * 1024))?,
            write_policy: WritePolicy {
                ignore_duplicates: parse_var("IGNORE_DUPLICATES", Some(defaults.ignore_duplicates))?,
                bulk_limit: parse_var("BULK_LIMIT", Some(defaults.bulk_limit))?,
            },
        })
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: Option<T>) -> Result<T, crate::error::ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| crate::error::ConfigError::Load(format!("invalid {}: {}", name, raw))),
        Err(_) => default.ok_or_else(|| crate::error::ConfigError::Load(format!("{} is required", name))),
    }
}
