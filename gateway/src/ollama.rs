//! Client for the Ollama daemon's HTTP API.

use std::fmt;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use inference_gateway_common::{ChatResponse, GenerateResponse, Message, Options};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::BackendConfig;

/// Which backend call failed, for error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Generate,
    Chat,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Generate => f.write_str("generate"),
            Operation::Chat => f.write_str("chat"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OllamaError {
    #[error("Ollama {operation} failed: {source}")]
    Transport {
        operation: Operation,
        source: reqwest::Error,
    },

    #[error("Ollama {operation} failed: backend returned {status}: {body}")]
    Status {
        operation: Operation,
        status: StatusCode,
        body: String,
    },

    #[error("Ollama {operation} failed: invalid response: {reason}")]
    InvalidResponse { operation: Operation, reason: String },

    #[error("Ollama client is closed")]
    Closed,

    #[error("Failed to create HTTP client: {0}")]
    Build(reqwest::Error),
}

/// Pooled connection to one Ollama daemon.
///
/// Never retries; every failure goes straight back to the caller.
pub struct OllamaClient {
    http_client: RwLock<Option<Client>>,
    base_url: String,
}

// ============================================================================
// Ollama API types
// ============================================================================

#[derive(Debug, Serialize)]
struct OllamaGenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<&'a Options>,
}

#[derive(Debug, Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<&'a Options>,
}

#[derive(Debug, Deserialize)]
struct OllamaGenerateResponse {
    response: String,
    #[serde(default)]
    model: Option<String>,
    #[serde(flatten)]
    meta: OllamaTimings,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: Message,
    #[serde(default)]
    model: Option<String>,
    #[serde(flatten)]
    meta: OllamaTimings,
}

#[derive(Debug, Default, Deserialize)]
struct OllamaTimings {
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    done: Option<bool>,
    #[serde(default)]
    eval_count: Option<u64>,
    #[serde(default)]
    eval_duration: Option<u64>,
    #[serde(default)]
    total_duration: Option<u64>,
}

/// Empty option maps are sent as absent.
fn non_empty(options: Option<&Options>) -> Option<&Options> {
    options.filter(|o| !o.is_empty())
}

impl OllamaClient {
    pub fn new(
        base_url: &str,
        timeout: Duration,
        connect_timeout: Duration,
    ) -> Result<Self, OllamaError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .connect_timeout(connect_timeout)
            .build()
            .map_err(OllamaError::Build)?;

        Ok(Self {
            http_client: RwLock::new(Some(http_client)),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &BackendConfig) -> Result<Self, OllamaError> {
        Self::new(
            config.ollama_base_url.as_str(),
            config.ollama_timeout,
            config.ollama_connect_timeout,
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn is_closed(&self) -> bool {
        self.client().is_err()
    }

    /// POST /api/generate
    pub async fn generate(
        &self,
        model: &str,
        prompt: &str,
        options: Option<&Options>,
    ) -> Result<GenerateResponse, OllamaError> {
        let request = OllamaGenerateRequest {
            model,
            prompt,
            stream: false,
            options: non_empty(options),
        };
        let reply: OllamaGenerateResponse =
            self.post(Operation::Generate, "/api/generate", &request).await?;

        Ok(GenerateResponse {
            response: reply.response,
            model: reply.model.unwrap_or_else(|| model.to_string()),
            created_at: reply.meta.created_at,
            done: reply.meta.done,
            eval_count: reply.meta.eval_count,
            eval_duration: reply.meta.eval_duration,
            total_duration: reply.meta.total_duration,
        })
    }

    /// POST /api/chat
    pub async fn chat(
        &self,
        model: &str,
        messages: &[Message],
        options: Option<&Options>,
    ) -> Result<ChatResponse, OllamaError> {
        let request = OllamaChatRequest {
            model,
            messages,
            stream: false,
            options: non_empty(options),
        };
        let reply: OllamaChatResponse = self.post(Operation::Chat, "/api/chat", &request).await?;

        Ok(ChatResponse {
            message: reply.message,
            model: reply.model.unwrap_or_else(|| model.to_string()),
            created_at: reply.meta.created_at,
            done: reply.meta.done,
            eval_count: reply.meta.eval_count,
            eval_duration: reply.meta.eval_duration,
            total_duration: reply.meta.total_duration,
        })
    }

    /// Drop the connection pool. Later calls fail with `Closed`.
    pub fn close(&self) {
        let previous = self
            .http_client
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if previous.is_some() {
            tracing::info!("Ollama client at {} closed", self.base_url);
        }
    }

    fn client(&self) -> Result<Client, OllamaError> {
        self.http_client
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(OllamaError::Closed)
    }

    async fn post<Req, Resp>(
        &self,
        operation: Operation,
        path: &str,
        payload: &Req,
    ) -> Result<Resp, OllamaError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let client = self.client()?;
        let url = format!("{}{}", self.base_url, path);

        tracing::debug!("Sending {} request to Ollama: {}", operation, url);

        let response = client
            .post(&url)
            .json(payload)
            .send()
            .await
            .map_err(|source| OllamaError::Transport { operation, source })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(OllamaError::Status {
                operation,
                status,
                body: body.trim().to_string(),
            });
        }

        response
            .json()
            .await
            .map_err(|e| OllamaError::InvalidResponse {
                operation,
                reason: e.to_string(),
            })
    }
}
