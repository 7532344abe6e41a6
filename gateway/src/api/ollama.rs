//! Generative endpoints forwarded to Ollama.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use inference_gateway_common::{ChatRequest, ChatResponse, GenerateRequest, GenerateResponse};

use crate::error::Result;
use crate::lifecycle::Gateway;

pub fn router() -> Router<Arc<Gateway>> {
    Router::new()
        .route("/generate", post(generate))
        .route("/chat", post(chat))
}

/// The request's model if it names one, else the configured default.
fn effective_model<'a>(gateway: &'a Gateway, requested: Option<&'a str>) -> &'a str {
    requested
        .filter(|m| !m.trim().is_empty())
        .unwrap_or(gateway.config().ollama_model.as_str())
}

/// POST /ollama/generate
async fn generate(
    State(gateway): State<Arc<Gateway>>,
    payload: std::result::Result<Json<GenerateRequest>, JsonRejection>,
) -> Result<Json<GenerateResponse>> {
    let Json(request) = payload?;
    let client = gateway.ollama()?;
    let model = effective_model(&gateway, request.model.as_deref());

    tracing::debug!("Generate request for model: {}", model);

    let response = client
        .generate(model, &request.prompt, request.options.as_ref())
        .await?;
    Ok(Json(response))
}

/// POST /ollama/chat
async fn chat(
    State(gateway): State<Arc<Gateway>>,
    payload: std::result::Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>> {
    let Json(request) = payload?;
    let client = gateway.ollama()?;
    let model = effective_model(&gateway, request.model.as_deref());

    tracing::debug!(
        "Chat request for model: {} ({} messages)",
        model,
        request.messages.len()
    );

    let response = client
        .chat(model, &request.messages, request.options.as_ref())
        .await?;
    Ok(Json(response))
}
