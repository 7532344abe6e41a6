//! Object detection endpoint.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::QueryRejection;
use axum::extract::{DefaultBodyLimit, Multipart, Query, State};
use axum::routing::post;
use axum::{Json, Router};
use inference_gateway_common::DetectionResponse;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::lifecycle::Gateway;

/// Largest accepted upload.
const MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;

/// Name of the multipart field carrying the image.
const FILE_FIELD: &str = "file";

pub fn router() -> Router<Arc<Gateway>> {
    Router::new()
        .route("/detect", post(detect))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
}

#[derive(Debug, Deserialize)]
struct DetectParams {
    confidence: Option<f32>,
}

/// POST /yolo/detect?confidence=0.5 with a multipart `file` field.
async fn detect(
    State(gateway): State<Arc<Gateway>>,
    params: std::result::Result<Query<DetectParams>, QueryRejection>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<Json<DetectionResponse>> {
    let vision = gateway.vision()?;
    let Query(params) = params?;
    let confidence = vision.resolve_confidence(params.confidence)?;

    let image = read_file_field(multipart?).await?;
    tracing::debug!("Detect request: {} bytes, confidence {}", image.len(), confidence);

    let detections = vision.detect(image, Some(confidence)).await?;

    Ok(Json(DetectionResponse {
        model: vision.model_id().to_string(),
        confidence,
        detections,
    }))
}

async fn read_file_field(mut multipart: Multipart) -> Result<Bytes> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some(FILE_FIELD) {
            return Ok(field.bytes().await?);
        }
    }
    Err(Error::InvalidInput(format!(
        "Missing required multipart field '{}'",
        FILE_FIELD
    )))
}
