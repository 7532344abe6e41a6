//! YOLO detector running on ONNX Runtime.

use std::collections::HashMap;
use std::fmt::Display;
use std::sync::Arc;
use std::thread;

use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;

use super::decode::DecodedImage;
use super::detector::{Detector, DetectorLoader, Prediction};
use super::pool::Pool;
use super::postprocess::{decode_head, letterbox_tensor, non_max_suppression, parse_names};
use super::VisionError;

/// Upper bound on sessions kept per model.
const MAX_SESSIONS: usize = 4;

/// Loads YOLOv8-style ONNX exports from a file path.
pub struct OnnxLoader {
    iou_threshold: f32,
    input_size: u32,
}

impl OnnxLoader {
    pub fn new(iou_threshold: f32, input_size: u32) -> Self {
        Self {
            iou_threshold,
            input_size,
        }
    }
}

/// How many sessions to open and how many intra-op threads each gets.
///
/// One session per core up to `MAX_SESSIONS`, the cores split between them.
fn session_layout() -> (usize, usize) {
    let cores = thread::available_parallelism().map_or(1, |n| n.get());
    let sessions = cores.clamp(1, MAX_SESSIONS);
    (sessions, (cores / sessions).max(1))
}

fn load_error(model: &str, e: impl Display) -> VisionError {
    VisionError::Load {
        model: model.to_string(),
        reason: e.to_string(),
    }
}

fn inference_error(e: impl Display) -> VisionError {
    VisionError::Inference(e.to_string())
}

fn open_session(model_id: &str, intra_threads: usize) -> Result<Session, VisionError> {
    Session::builder()
        .map_err(|e| load_error(model_id, e))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| load_error(model_id, e))?
        .with_intra_threads(intra_threads)
        .map_err(|e| load_error(model_id, e))?
        .commit_from_file(model_id)
        .map_err(|e| load_error(model_id, e))
}

impl DetectorLoader for OnnxLoader {
    fn load(&self, model_id: &str) -> Result<Arc<dyn Detector>, VisionError> {
        let (count, intra_threads) = session_layout();
        let sessions = (0..count)
            .map(|_| open_session(model_id, intra_threads))
            .collect::<Result<Vec<_>, _>>()?;

        let first = &sessions[0];
        let input_name = first
            .inputs
            .first()
            .map(|i| i.name.clone())
            .ok_or_else(|| load_error(model_id, "model has no inputs"))?;
        let output_name = first
            .outputs
            .first()
            .map(|o| o.name.clone())
            .ok_or_else(|| load_error(model_id, "model has no outputs"))?;

        let names = first
            .metadata()
            .ok()
            .and_then(|m| m.custom("names").ok().flatten())
            .map(|raw| parse_names(&raw))
            .unwrap_or_default();
        if names.is_empty() {
            tracing::warn!(model = %model_id, "Model has no class names, labels will be numeric");
        }

        let sessions =
            Pool::new(sessions).ok_or_else(|| load_error(model_id, "no sessions opened"))?;
        tracing::debug!(
            model = %model_id,
            sessions = sessions.len(),
            intra_threads,
            "ONNX sessions ready"
        );

        Ok(Arc::new(OnnxDetector {
            sessions,
            input_name,
            output_name,
            names,
            iou_threshold: self.iou_threshold,
            input_size: self.input_size,
        }))
    }
}

pub struct OnnxDetector {
    // ort needs exclusive access to run a session; each call checks one out.
    sessions: Pool<Session>,
    input_name: String,
    output_name: String,
    names: HashMap<i64, String>,
    iou_threshold: f32,
    input_size: u32,
}

impl Detector for OnnxDetector {
    fn predict(&self, image: &DecodedImage, confidence: f32) -> Result<Prediction, VisionError> {
        let (input, letterbox) = letterbox_tensor(image.pixels(), self.input_size);
        let tensor = Tensor::from_array(input).map_err(inference_error)?;

        let boxes = {
            let mut session = self.sessions.checkout();
            let outputs = session
                .run(ort::inputs![self.input_name.as_str() => tensor])
                .map_err(inference_error)?;
            let (shape, data) = outputs[self.output_name.as_str()]
                .try_extract_tensor::<f32>()
                .map_err(inference_error)?;
            let dims: &[i64] = shape.as_ref();
            decode_head(data, dims, confidence).map_err(VisionError::Inference)?
        };

        let boxes = non_max_suppression(boxes, self.iou_threshold)
            .into_iter()
            .map(|mut b| {
                b.xyxy = letterbox.to_source(b.xyxy);
                b
            })
            .collect();

        Ok(Prediction {
            boxes,
            names: self.names.clone(),
        })
    }
}
