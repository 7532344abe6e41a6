//! In-process object detection.
//!
//! Uploaded bytes are decoded, run through a lazily loaded detector on the
//! blocking pool, and normalized into `Detection` records.

pub mod decode;
pub mod detector;
mod handle;
pub mod normalize;
#[cfg(feature = "onnx")]
pub mod onnx;
#[cfg_attr(not(feature = "onnx"), allow(dead_code))]
mod pool;
#[cfg_attr(not(feature = "onnx"), allow(dead_code))]
pub mod postprocess;

pub use decode::{decode, DecodeError, DecodedImage};
pub use detector::{default_loader, Detector, DetectorLoader, Prediction, RawBox};
pub use handle::VisionHandle;
pub use normalize::normalize;

/// Errors raised by the vision backend.
#[derive(Debug, thiserror::Error)]
pub enum VisionError {
    #[error("confidence must be within [0, 1], got {0}")]
    InvalidConfidence(f32),

    #[error("Unable to decode image bytes. Ensure a valid image file is provided. ({0})")]
    Decode(#[from] DecodeError),

    #[error("failed to load model {model}: {reason}")]
    Load { model: String, reason: String },

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("vision model was released while loading")]
    Released,

    #[error("vision worker did not complete: {0}")]
    Worker(String),
}

impl From<tokio::task::JoinError> for VisionError {
    fn from(e: tokio::task::JoinError) -> Self {
        VisionError::Worker(e.to_string())
    }
}
