//! Router assembly: common probes plus resource routes, with a request body cap.

mod common;
mod resource;

pub use common::common_routes_with_ready;
pub use resource::resource_routes;

use crate::state::AppState;
use axum::Router;
use tower_http::limit::RequestBodyLimitLayer;

/// Full application router. Bodies larger than `body_limit_bytes` are rejected with 413.
pub fn app(state: AppState, body_limit_bytes: usize) -> Router {
    common_routes_with_ready(state.clone())
        .merge(resource_routes(state))
        .layer(RequestBodyLimitLayer::new(body_limit_bytes))
}
