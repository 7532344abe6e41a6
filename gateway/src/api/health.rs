//! Liveness and readiness endpoints.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use serde_json::{json, Value};

use crate::lifecycle::{BackendStatus, Gateway};

pub fn router() -> Router<Arc<Gateway>> {
    Router::new()
        .route("/hello", get(hello))
        .route("/health", get(health))
}

/// GET /hello - smoke test.
pub async fn hello() -> Json<Value> {
    Json(json!({ "message": "hello world" }))
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    backends: BackendStatus,
}

/// GET /health - process is up; reports whether backends are ready.
async fn health(State(gateway): State<Arc<Gateway>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        backends: gateway.status(),
    })
}
