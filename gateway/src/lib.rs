//! Inference Gateway - a single HTTP surface for a local Ollama daemon and an
//! in-process object detector.

pub mod api;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod ollama;
pub mod vision;

pub use config::{BackendConfig, Config, ConfigError};
pub use error::{Error, Result};
pub use lifecycle::{Backends, BackendStatus, Gateway, LifecycleError, ServingGuard};
