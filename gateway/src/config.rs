//! Configuration for the inference gateway.

use config::{Config as ConfigLoader, Environment, File};
use reqwest::Url;
use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure, as read from file and environment.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub ollama: OllamaConfig,
    #[serde(default)]
    pub yolo: YoloConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Where the Ollama daemon listens and which model to use by default.
#[derive(Debug, Clone, Deserialize)]
pub struct OllamaConfig {
    #[serde(default = "default_ollama_host")]
    pub host: String,
    #[serde(default = "default_ollama_port")]
    pub port: u16,
    #[serde(default = "default_ollama_model")]
    pub model: String,
    /// Total per-request timeout. Generation on a cold model can take a while.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: default_ollama_host(),
            port: default_ollama_port(),
            model: default_ollama_model(),
            timeout_secs: default_timeout(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct YoloConfig {
    /// Model identifier handed to the detector loader (a weights path for ONNX).
    #[serde(default = "default_yolo_model")]
    pub model: String,
    #[serde(default = "default_confidence")]
    pub confidence: f32,
    #[serde(default = "default_iou_threshold")]
    pub iou_threshold: f32,
    #[serde(default = "default_input_size")]
    pub input_size: u32,
}

impl Default for YoloConfig {
    fn default() -> Self {
        Self {
            model: default_yolo_model(),
            confidence: default_confidence(),
            iou_threshold: default_iou_threshold(),
            input_size: default_input_size(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// "pretty" or "json".
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// Default values
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8000
}
fn default_ollama_host() -> String {
    "127.0.0.1".to_string()
}
fn default_ollama_port() -> u16 {
    11434
}
fn default_ollama_model() -> String {
    "phi3".to_string()
}
fn default_timeout() -> u64 {
    120
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_yolo_model() -> String {
    "yolov8n.onnx".to_string()
}
fn default_confidence() -> f32 {
    0.35
}
fn default_iou_threshold() -> f32 {
    0.45
}
fn default_input_size() -> u32 {
    640
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "pretty".to_string()
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("Invalid server port: 0")]
    InvalidServerPort,
    #[error("Invalid Ollama address {host:?}:{port}: {reason}")]
    InvalidOllamaAddress {
        host: String,
        port: u16,
        reason: String,
    },
    #[error("Invalid model identifier for {0}: must not be empty")]
    EmptyModel(&'static str),
}

/// Backend settings resolved once at startup.
///
/// Every threshold here is already inside [0, 1] and the Ollama address has
/// been parsed into a URL.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub ollama_base_url: Url,
    pub ollama_model: String,
    pub ollama_timeout: Duration,
    pub ollama_connect_timeout: Duration,
    pub yolo_model: String,
    pub yolo_confidence: f32,
    pub yolo_iou_threshold: f32,
    pub yolo_input_size: u32,
}

impl BackendConfig {
    /// Defaults pointed at a specific Ollama URL. Handy for tests and embedding.
    pub fn with_ollama_url(url: &str) -> Result<Self, ConfigError> {
        let mut backends = Config::default().validate()?;
        backends.ollama_base_url = Url::parse(url).map_err(|e| ConfigError::InvalidOllamaAddress {
            host: url.to_string(),
            port: 0,
            reason: e.to_string(),
        })?;
        Ok(backends)
    }
}

/// Clamp a probability into [0, 1], logging when the input was out of range.
pub fn clamp_unit(name: &str, value: f32) -> f32 {
    if value.is_nan() {
        tracing::warn!("{} is NaN, using 0.0", name);
        return 0.0;
    }
    let clamped = value.clamp(0.0, 1.0);
    if clamped != value {
        tracing::warn!("{} {} is outside [0, 1], clamped to {}", name, value, clamped);
    }
    clamped
}

impl Config {
    /// Load configuration from file and environment variables.
    ///
    /// Configuration sources (in order of precedence):
    /// 1. Environment variables (GATEWAY__SECTION__KEY format)
    /// 2. config.toml, or the file named by GATEWAY_CONFIG (if present)
    /// 3. Built-in defaults
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("GATEWAY_CONFIG").unwrap_or_else(|_| "config".to_string());

        let config = ConfigLoader::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port() as i64)?
            .add_source(File::with_name(&path).required(false))
            .add_source(
                Environment::with_prefix("GATEWAY")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Check the raw settings and produce the immutable backend view.
    pub fn validate(&self) -> Result<BackendConfig, ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::InvalidServerPort);
        }

        let host = self.ollama.host.trim();
        let port = self.ollama.port;
        let invalid = |reason: &str| ConfigError::InvalidOllamaAddress {
            host: self.ollama.host.clone(),
            port,
            reason: reason.to_string(),
        };
        if host.is_empty() {
            return Err(invalid("host is empty"));
        }
        if port == 0 {
            return Err(invalid("port is 0"));
        }
        let ollama_base_url =
            Url::parse(&format!("http://{}:{}", host, port)).map_err(|e| invalid(&e.to_string()))?;
        if ollama_base_url.host_str().is_none() {
            return Err(invalid("no host in address"));
        }

        if self.ollama.model.trim().is_empty() {
            return Err(ConfigError::EmptyModel("ollama"));
        }
        if self.yolo.model.trim().is_empty() {
            return Err(ConfigError::EmptyModel("yolo"));
        }

        Ok(BackendConfig {
            ollama_base_url,
            ollama_model: self.ollama.model.clone(),
            ollama_timeout: Duration::from_secs(self.ollama.timeout_secs),
            ollama_connect_timeout: Duration::from_secs(self.ollama.connect_timeout_secs),
            yolo_model: self.yolo.model.clone(),
            yolo_confidence: clamp_unit("yolo.confidence", self.yolo.confidence),
            yolo_iou_threshold: clamp_unit("yolo.iou_threshold", self.yolo.iou_threshold),
            yolo_input_size: self.yolo.input_size.max(32),
        })
    }
}
