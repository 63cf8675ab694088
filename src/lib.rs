//! Resource SDK: configuration-driven REST resources with a conflict-aware write pipeline.

pub mod config;
pub mod error;
pub mod handlers;
pub mod migration;
pub mod query;
pub mod record;
pub mod response;
pub mod routes;
pub mod service;
pub mod sql;
pub mod state;
pub mod store;

pub use config::{load_from_path, parse_config, resolve, FullConfig, ModelDescriptor, ModelRegistry, Settings, WritePolicy};
pub use error::{AppError, ConfigError, ConflictReason, ValidationReason};
pub use migration::apply_migrations;
pub use record::Record;
pub use routes::{app, common_routes_with_ready, resource_routes};
pub use service::{partition, Partition, WriteOutcome, WriteService};
pub use state::AppState;
pub use store::{ensure_database_exists, MemoryStore, PgStore, StoreAdapter, StoreError};
