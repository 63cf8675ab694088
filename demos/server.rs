//! Demo server: loads models from `MODELS_PATH`, runs against Postgres when `DATABASE_URL`
//! is set (creating the database and tables), otherwise against the in-memory store.

use axum::Router;
use resource_sdk::{
    app, apply_migrations, ensure_database_exists, load_from_path, resolve, AppState, MemoryStore, PgStore, Settings,
    StoreAdapter,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("resource_sdk=info".parse()?))
        .init();

    let settings = Settings::from_env()?;
    let config = load_from_path(&settings.models_path).await?;
    let registry = Arc::new(resolve(&config)?);

    let store: Arc<dyn StoreAdapter> = match &settings.database_url {
        Some(url) => {
            ensure_database_exists(url).await?;
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(settings.max_connections)
                .connect(url)
                .await?;
            apply_migrations(&pool, &registry).await?;
            Arc::new(PgStore::new(pool, registry.clone()))
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using the in-memory store");
            Arc::new(MemoryStore::new(registry.clone()))
        }
    };

    let state = AppState::new(store, registry, settings.write_policy.clone());
    let api = Router::new().nest("/api/v1", app(state, settings.body_limit_bytes));

    let listener = TcpListener::bind(settings.bind_addr).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, api).await?;
    Ok(())
}
