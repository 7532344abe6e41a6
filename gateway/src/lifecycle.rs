//! Construction and teardown of the backend handles.
//!
//! `Gateway` is the context object handed to every route. Handles exist only
//! between `start` and `shutdown`; outside that window routes get
//! `Error::Unavailable` instead of a handle.

use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;

use crate::config::BackendConfig;
use crate::error::Error;
use crate::ollama::{OllamaClient, OllamaError};
use crate::vision::{DetectorLoader, VisionHandle};

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("gateway backends are already started")]
    AlreadyStarted,
    #[error("gateway has been shut down")]
    Stopped,
    #[error("failed to start Ollama client: {0}")]
    Ollama(#[from] OllamaError),
}

/// The two process-wide backend handles.
#[derive(Clone)]
pub struct Backends {
    pub vision: Arc<VisionHandle>,
    pub ollama: Arc<OllamaClient>,
}

enum Phase {
    NotStarted,
    Running(Backends),
    Stopped,
}

/// Readiness snapshot for the health endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BackendStatus {
    pub initialized: bool,
    pub vision_loaded: bool,
}

pub struct Gateway {
    config: BackendConfig,
    loader: Arc<dyn DetectorLoader>,
    phase: RwLock<Phase>,
}

impl Gateway {
    pub fn new(config: BackendConfig, loader: Arc<dyn DetectorLoader>) -> Arc<Self> {
        Arc::new(Self {
            config,
            loader,
            phase: RwLock::new(Phase::NotStarted),
        })
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    /// Build both handles and publish them.
    ///
    /// The returned guard shuts the backends down when dropped, so release
    /// happens on every exit path of the serving scope.
    pub fn start(self: &Arc<Self>) -> Result<ServingGuard, LifecycleError> {
        let mut phase = self.phase.write().unwrap_or_else(PoisonError::into_inner);
        match *phase {
            Phase::NotStarted => {}
            Phase::Running(_) => return Err(LifecycleError::AlreadyStarted),
            Phase::Stopped => return Err(LifecycleError::Stopped),
        }

        let vision = Arc::new(VisionHandle::new(
            self.config.yolo_model.clone(),
            self.config.yolo_confidence,
            Arc::clone(&self.loader),
        ));
        let ollama = match OllamaClient::from_config(&self.config) {
            Ok(client) => Arc::new(client),
            Err(e) => {
                vision.close();
                *phase = Phase::Stopped;
                return Err(e.into());
            }
        };

        tracing::info!(
            ollama = %ollama.base_url(),
            ollama_model = %self.config.ollama_model,
            yolo_model = %vision.model_id(),
            yolo_confidence = %vision.default_confidence(),
            "Backends started"
        );
        *phase = Phase::Running(Backends { vision, ollama });

        Ok(ServingGuard {
            gateway: Arc::clone(self),
        })
    }

    /// Unpublish and release both handles. Idempotent.
    ///
    /// Requests already holding a handle finish on their own; new ones get
    /// `Unavailable`.
    pub fn shutdown(&self) {
        let previous = {
            let mut phase = self.phase.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *phase, Phase::Stopped)
        };

        if let Phase::Running(backends) = previous {
            backends.ollama.close();
            backends.vision.close();
            tracing::info!("Backends shut down");
        }
    }

    pub fn backends(&self) -> Result<Backends, Error> {
        self.published("Backends are not initialized.", "Backends")
    }

    pub fn vision(&self) -> Result<Arc<VisionHandle>, Error> {
        self.published("YOLO runner not initialized.", "YOLO runner")
            .map(|b| b.vision)
    }

    pub fn ollama(&self) -> Result<Arc<OllamaClient>, Error> {
        self.published("Ollama client is not initialized.", "Ollama client")
            .map(|b| b.ollama)
    }

    fn published(&self, not_started: &str, name: &str) -> Result<Backends, Error> {
        match &*self.phase.read().unwrap_or_else(PoisonError::into_inner) {
            Phase::Running(backends) => Ok(backends.clone()),
            Phase::NotStarted => Err(Error::Unavailable(not_started.to_string())),
            Phase::Stopped => Err(Error::Unavailable(format!(
                "{} unavailable: gateway is shutting down.",
                name
            ))),
        }
    }

    pub fn status(&self) -> BackendStatus {
        match self.backends() {
            Ok(backends) => BackendStatus {
                initialized: true,
                vision_loaded: backends.vision.is_loaded(),
            },
            Err(_) => BackendStatus {
                initialized: false,
                vision_loaded: false,
            },
        }
    }
}

/// Keeps the backends alive for a serving scope.
#[must_use = "dropping the guard shuts the backends down"]
pub struct ServingGuard {
    gateway: Arc<Gateway>,
}

impl Drop for ServingGuard {
    fn drop(&mut self) {
        self.gateway.shutdown();
    }
}
