//! The HTTP serving layer over a catalog store.
//!
//! Three endpoints are mounted per catalog path segment: the raw JSONL file,
//! the index-filtered subset, and the generated GraphQL schema. The caller
//! nests the returned router under its externally configured root path and
//! attaches its own TLS and middleware stack.

mod conditional;
mod error;
mod handlers;

pub use error::ApiError;

use axum::routing::{get, post};
use std::sync::Arc;

/// Build the serving router. Method gating is per route: the content
/// endpoints accept GET and HEAD, the GraphQL endpoint accepts POST, and
/// anything else is a 405.
pub fn router(store: Arc<catalog::Store>) -> axum::Router {
    axum::Router::new()
        .route("/:catalog/api/v1/all", get(handlers::all))
        .route("/:catalog/api/v1/metas", get(handlers::metas))
        .route("/:catalog/api/v1/graphql", post(handlers::graphql))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(store)
}
