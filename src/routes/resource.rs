//! Resource routes: one catch-all handler feeding the dispatcher, which owns resolution.

use crate::handlers::resource::dispatch;
use crate::state::AppState;
use axum::{extract::DefaultBodyLimit, Router};
use tower_http::limit::RequestBodyLimitLayer;

pub fn resource_routes(state: AppState) -> Router {
    let limit = state.dispatcher.settings().max_body_bytes;
    Router::new()
        .fallback(dispatch)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(limit))
        .with_state(state)
}

/// Resource routes plus `/health`, `/ready` and `/version`.
pub fn app(state: AppState) -> Router {
    crate::routes::common_routes_with_ready(state.clone()).merge(resource_routes(state))
}
