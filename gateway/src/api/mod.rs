//! HTTP API.

pub mod health;
pub mod ollama;
pub mod yolo;

use std::sync::Arc;

use axum::{middleware, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::lifecycle::Gateway;
use crate::logging;

/// Build the full application router.
pub fn router(gateway: Arc<Gateway>) -> Router {
    Router::new()
        .merge(health::router())
        .nest("/ollama", ollama::router())
        .nest("/yolo", yolo::router())
        .layer(middleware::from_fn(logging::request_logger))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(gateway)
}
