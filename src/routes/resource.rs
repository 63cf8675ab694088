//! Resource routes. Parameterized paths so handlers resolve the model by segment.

use crate::handlers::{attach, create, delete as delete_handler, list, list_associated, read, update, upsert};
use crate::state::AppState;
use axum::{routing::get, Router};

pub fn resource_routes(state: AppState) -> Router {
    Router::new()
        .route("/:resource", get(list).post(create).put(upsert))
        .route(
            "/:resource/:id",
            get(read).patch(update).delete(delete_handler),
        )
        .route("/:resource/:id/:association", get(list_associated).post(attach))
        .with_state(state)
}
