//! Detector abstraction.
//!
//! A `DetectorLoader` turns a model identifier into a ready `Detector`. Both
//! are synchronous: the handle runs them on the blocking pool.

use std::collections::HashMap;
use std::sync::Arc;

use super::decode::DecodedImage;
use super::VisionError;

/// One box exactly as the model produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct RawBox {
    pub class_id: Option<i64>,
    pub score: Option<f32>,
    pub xyxy: [f32; 4],
}

/// Output of a single forward pass.
#[derive(Debug, Clone, Default)]
pub struct Prediction {
    /// Boxes in the order the model emitted them.
    pub boxes: Vec<RawBox>,
    /// The model's class-index-to-name table. May be incomplete or empty.
    pub names: HashMap<i64, String>,
}

/// A loaded object detection model.
///
/// Implementations are shared across concurrent requests.
pub trait Detector: Send + Sync {
    fn predict(&self, image: &DecodedImage, confidence: f32) -> Result<Prediction, VisionError>;
}

/// Builds detectors from a model identifier. May do disk or network I/O.
pub trait DetectorLoader: Send + Sync {
    fn load(&self, model_id: &str) -> Result<Arc<dyn Detector>, VisionError>;
}

/// Loader used when the binary was built without a vision runtime.
pub struct MissingRuntimeLoader;

impl DetectorLoader for MissingRuntimeLoader {
    fn load(&self, model_id: &str) -> Result<Arc<dyn Detector>, VisionError> {
        Err(VisionError::Load {
            model: model_id.to_string(),
            reason: "gateway was built without a vision runtime (enable the `onnx` feature)"
                .to_string(),
        })
    }
}

/// The loader this build ships with.
pub fn default_loader(iou_threshold: f32, input_size: u32) -> Arc<dyn DetectorLoader> {
    #[cfg(feature = "onnx")]
    {
        Arc::new(super::onnx::OnnxLoader::new(iou_threshold, input_size))
    }
    #[cfg(not(feature = "onnx"))]
    {
        let _ = (iou_threshold, input_size);
        Arc::new(MissingRuntimeLoader)
    }
}
