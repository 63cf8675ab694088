//! Shared application state for all routes. Models are resolved once at startup.

use crate::config::{ModelDescriptor, ModelRegistry, WritePolicy};
use crate::error::AppError;
use crate::store::StoreAdapter;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn StoreAdapter>,
    pub registry: Arc<ModelRegistry>,
    pub policy: Arc<WritePolicy>,
}

impl AppState {
    pub fn new(store: Arc<dyn StoreAdapter>, registry: Arc<ModelRegistry>, policy: WritePolicy) -> Self {
        AppState {
            store,
            registry,
            policy: Arc::new(policy),
        }
    }

    /// Model for a path segment; unknown resources are 404.
    pub fn model(&self, resource: &str) -> Result<&ModelDescriptor, AppError> {
        self.registry
            .get(resource)
            .ok_or_else(|| AppError::not_found(resource, "unknown resource"))
    }
}
