//! Client-facing error vocabulary.
//!
//! Every backend failure is translated into one of three kinds, each with a
//! fixed HTTP status and a single `detail` string.

use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use inference_gateway_common::ErrorResponse;

use crate::ollama::OllamaError;
use crate::vision::VisionError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Client data is malformed or out of contract. Never retried.
    #[error("{0}")]
    InvalidInput(String),

    /// A backend handle is not available yet, or any more. Retry after backoff.
    #[error("{0}")]
    Unavailable(String),

    /// A downstream backend failed or could not be reached.
    #[error("{0}")]
    BackendFailure(String),
}

impl Error {
    pub fn status(&self) -> StatusCode {
        match self {
            Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Error::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::BackendFailure(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl From<VisionError> for Error {
    fn from(e: VisionError) -> Self {
        match e {
            VisionError::InvalidConfidence(_) | VisionError::Decode(_) => {
                Error::InvalidInput(e.to_string())
            }
            VisionError::Released => Error::Unavailable(format!("YOLO runner unavailable: {}", e)),
            VisionError::Load { .. } | VisionError::Inference(_) | VisionError::Worker(_) => {
                tracing::warn!("Vision backend failed: {}", e);
                Error::BackendFailure(e.to_string())
            }
        }
    }
}

impl From<OllamaError> for Error {
    fn from(e: OllamaError) -> Self {
        match e {
            OllamaError::Closed => Error::Unavailable("Ollama client is not initialized.".to_string()),
            OllamaError::Transport { .. }
            | OllamaError::Status { .. }
            | OllamaError::InvalidResponse { .. }
            | OllamaError::Build(_) => {
                tracing::warn!("Ollama backend failed: {}", e);
                Error::BackendFailure(e.to_string())
            }
        }
    }
}

impl From<MultipartError> for Error {
    fn from(e: MultipartError) -> Self {
        Error::InvalidInput(format!("Invalid multipart upload: {}", e.body_text()))
    }
}

impl From<MultipartRejection> for Error {
    fn from(e: MultipartRejection) -> Self {
        Error::InvalidInput(format!("Expected a multipart upload: {}", e.body_text()))
    }
}

impl From<JsonRejection> for Error {
    fn from(e: JsonRejection) -> Self {
        Error::InvalidInput(format!("Invalid request body: {}", e.body_text()))
    }
}

impl From<QueryRejection> for Error {
    fn from(e: QueryRejection) -> Self {
        Error::InvalidInput(format!("Invalid query string: {}", e.body_text()))
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(ErrorResponse {
            detail: self.to_string(),
        });
        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, Error>;
