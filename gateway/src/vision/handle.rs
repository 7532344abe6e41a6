//! Lazily loaded, shared detection model.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

use inference_gateway_common::Detection;
use tokio::sync::Mutex;
use tokio::task::spawn_blocking;

use super::decode::decode;
use super::detector::{Detector, DetectorLoader};
use super::normalize::normalize;
use super::VisionError;

type Slot = Arc<RwLock<Option<Arc<dyn Detector>>>>;

/// Owns the detection model for the lifetime of the gateway.
///
/// The model starts unloaded and is loaded on first use. Concurrent first
/// callers share a single load; afterwards the model is only read. `close`
/// drops the model and the next `detect` loads it again. A load still in
/// flight when `close` runs is discarded instead of published.
pub struct VisionHandle {
    model_id: String,
    default_confidence: f32,
    loader: Arc<dyn DetectorLoader>,
    model: Slot,
    /// Bumped by every `close`, always while holding the `model` write lock.
    generation: Arc<AtomicU64>,
    load_lock: Arc<Mutex<()>>,
}

impl VisionHandle {
    pub fn new(
        model_id: impl Into<String>,
        default_confidence: f32,
        loader: Arc<dyn DetectorLoader>,
    ) -> Self {
        Self {
            model_id: model_id.into(),
            default_confidence,
            loader,
            model: Arc::new(RwLock::new(None)),
            generation: Arc::new(AtomicU64::new(0)),
            load_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn default_confidence(&self) -> f32 {
        self.default_confidence
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded().is_some()
    }

    /// The threshold a request will run with: the override if given, else the default.
    pub fn resolve_confidence(&self, requested: Option<f32>) -> Result<f32, VisionError> {
        match requested {
            None => Ok(self.default_confidence),
            Some(c) if (0.0..=1.0).contains(&c) => Ok(c),
            Some(c) => Err(VisionError::InvalidConfidence(c)),
        }
    }

    /// Load the model if it is not loaded yet. Returns the loaded model.
    ///
    /// At most one load runs at a time. The load continues on the blocking
    /// pool even if the caller goes away, and its result is kept unless
    /// `close` ran in the meantime.
    pub async fn load(&self) -> Result<Arc<dyn Detector>, VisionError> {
        if let Some(model) = self.loaded() {
            return Ok(model);
        }

        let guard = Arc::clone(&self.load_lock).lock_owned().await;
        if let Some(model) = self.loaded() {
            return Ok(model);
        }

        let loader = Arc::clone(&self.loader);
        let slot = Arc::clone(&self.model);
        let generation = Arc::clone(&self.generation);
        let started_in = generation.load(Ordering::SeqCst);
        let model_id = self.model_id.clone();
        tracing::info!(model = %model_id, "Loading vision model");

        spawn_blocking(move || {
            let _guard = guard;
            let start = Instant::now();
            match loader.load(&model_id) {
                Ok(model) => {
                    let mut slot = slot.write().unwrap_or_else(PoisonError::into_inner);
                    if generation.load(Ordering::SeqCst) != started_in {
                        drop(slot);
                        tracing::info!(model = %model_id, "Vision model closed while loading, discarded");
                        return Err(VisionError::Released);
                    }
                    *slot = Some(Arc::clone(&model));
                    drop(slot);
                    tracing::info!(
                        model = %model_id,
                        elapsed_ms = %start.elapsed().as_millis(),
                        "Vision model loaded"
                    );
                    Ok(model)
                }
                Err(e) => {
                    tracing::warn!(model = %model_id, error = %e, "Vision model failed to load");
                    Err(e)
                }
            }
        })
        .await?
    }

    /// Run detection on an encoded image.
    ///
    /// The confidence is checked before anything else and the image is
    /// decoded before the model is touched, so bad input never triggers a
    /// load. Zero detections is a success.
    pub async fn detect<B>(
        &self,
        image: B,
        confidence: Option<f32>,
    ) -> Result<Vec<Detection>, VisionError>
    where
        B: AsRef<[u8]> + Send + 'static,
    {
        let confidence = self.resolve_confidence(confidence)?;
        let image = spawn_blocking(move || decode(image.as_ref())).await??;
        let model = self.load().await?;

        let prediction = spawn_blocking(move || model.predict(&image, confidence)).await??;
        let detections = normalize(prediction);
        tracing::debug!(
            model = %self.model_id,
            confidence = %confidence,
            count = detections.len(),
            "Detection finished"
        );
        Ok(detections)
    }

    /// Release the loaded model. Safe to call at any time, any number of times.
    ///
    /// A load running at that moment finishes on the blocking pool but its
    /// model is dropped rather than stored.
    pub fn close(&self) {
        let previous = {
            let mut slot = self.model.write().unwrap_or_else(PoisonError::into_inner);
            self.generation.fetch_add(1, Ordering::SeqCst);
            slot.take()
        };
        if previous.is_some() {
            tracing::info!(model = %self.model_id, "Vision model released");
        }
    }

    fn loaded(&self) -> Option<Arc<dyn Detector>> {
        self.model
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::decode::{encode_for_test, DecodedImage};
    use crate::vision::detector::{Prediction, RawBox};
    use image::{ImageFormat, RgbImage};
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Reports one box per image column, labelled from a partial name table.
    struct ColumnDetector;

    impl Detector for ColumnDetector {
        fn predict(
            &self,
            image: &DecodedImage,
            confidence: f32,
        ) -> Result<Prediction, VisionError> {
            let boxes = (0..image.width())
                .map(|x| RawBox {
                    class_id: Some(x as i64),
                    score: Some(confidence),
                    xyxy: [x as f32, 0.0, x as f32 + 1.0, image.height() as f32],
                })
                .collect();
            Ok(Prediction {
                boxes,
                names: HashMap::from([(0, "person".to_string())]),
            })
        }
    }

    struct CountingLoader {
        loads: AtomicUsize,
        delay: Duration,
    }

    impl CountingLoader {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                loads: AtomicUsize::new(0),
                delay,
            })
        }

        fn loads(&self) -> usize {
            self.loads.load(Ordering::SeqCst)
        }
    }

    impl DetectorLoader for CountingLoader {
        fn load(&self, _model_id: &str) -> Result<Arc<dyn Detector>, VisionError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            Ok(Arc::new(ColumnDetector))
        }
    }

    struct FailingLoader;

    impl DetectorLoader for FailingLoader {
        fn load(&self, model_id: &str) -> Result<Arc<dyn Detector>, VisionError> {
            Err(VisionError::Load {
                model: model_id.to_string(),
                reason: "weights not found".to_string(),
            })
        }
    }

    fn png(width: u32, height: u32) -> Vec<u8> {
        encode_for_test(&RgbImage::new(width, height), ImageFormat::Png)
    }

    #[test]
    fn test_resolve_confidence() {
        let handle = VisionHandle::new("m", 0.35, CountingLoader::new(Duration::ZERO));
        assert_eq!(handle.resolve_confidence(None).unwrap(), 0.35);
        assert_eq!(handle.resolve_confidence(Some(0.0)).unwrap(), 0.0);
        assert_eq!(handle.resolve_confidence(Some(1.0)).unwrap(), 1.0);
        assert!(handle.resolve_confidence(Some(1.01)).is_err());
        assert!(handle.resolve_confidence(Some(-0.1)).is_err());
        assert!(handle.resolve_confidence(Some(f32::NAN)).is_err());
    }

    #[tokio::test]
    async fn test_load_is_idempotent() {
        let loader = CountingLoader::new(Duration::ZERO);
        let handle = VisionHandle::new("m", 0.35, loader.clone());
        assert!(!handle.is_loaded());

        let first = handle.load().await.unwrap();
        let second = handle.load().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(loader.loads(), 1);
        assert!(handle.is_loaded());
    }

    #[tokio::test]
    async fn test_detect_normalizes_output() {
        let handle = VisionHandle::new("m", 0.35, CountingLoader::new(Duration::ZERO));
        let detections = handle.detect(png(2, 5), Some(0.6)).await.unwrap();
        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0].label, "person");
        assert_eq!(detections[1].label, "1");
        assert_eq!(detections[1].confidence, 0.6);
        assert_eq!(detections[1].bbox, [1.0, 0.0, 2.0, 5.0]);
    }

    #[tokio::test]
    async fn test_detect_is_stable() {
        let handle = VisionHandle::new("m", 0.35, CountingLoader::new(Duration::ZERO));
        let image = png(3, 3);
        let a = handle.detect(image.clone(), None).await.unwrap();
        let b = handle.detect(image, None).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_bad_input_never_loads_model() {
        let loader = CountingLoader::new(Duration::ZERO);
        let handle = VisionHandle::new("m", 0.35, loader.clone());

        let err = handle.detect(b"not-an-image".to_vec(), None).await.unwrap_err();
        assert!(matches!(err, VisionError::Decode(_)));

        let err = handle.detect(png(1, 1), Some(2.0)).await.unwrap_err();
        assert!(matches!(err, VisionError::InvalidConfidence(c) if c == 2.0));

        assert_eq!(loader.loads(), 0);
        assert!(!handle.is_loaded());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_detects_load_once() {
        let loader = CountingLoader::new(Duration::from_millis(200));
        let handle = Arc::new(VisionHandle::new("m", 0.35, loader.clone()));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let handle = Arc::clone(&handle);
                tokio::spawn(async move { handle.detect(png(1, 1), None).await })
            })
            .collect();

        for result in futures_util::future::join_all(tasks).await {
            let detections = result.unwrap().unwrap();
            assert_eq!(detections.len(), 1);
            assert_eq!(detections[0].label, "person");
        }
        assert_eq!(loader.loads(), 1);
    }

    #[tokio::test]
    async fn test_close_then_detect_reloads() {
        let loader = CountingLoader::new(Duration::ZERO);
        let handle = VisionHandle::new("m", 0.35, loader.clone());

        handle.detect(png(1, 1), None).await.unwrap();
        handle.close();
        assert!(!handle.is_loaded());
        handle.close();

        handle.detect(png(1, 1), None).await.unwrap();
        assert_eq!(loader.loads(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_close_during_load_discards_model() {
        let loader = CountingLoader::new(Duration::from_millis(300));
        let handle = Arc::new(VisionHandle::new("m", 0.35, loader.clone()));

        let loading = {
            let handle = Arc::clone(&handle);
            tokio::spawn(async move { handle.load().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.close();

        let err = loading.await.unwrap().err().unwrap();
        assert!(matches!(err, VisionError::Released));
        assert!(!handle.is_loaded());

        // The next request loads a fresh model.
        handle.detect(png(1, 1), None).await.unwrap();
        assert!(handle.is_loaded());
        assert_eq!(loader.loads(), 2);
    }

    #[tokio::test]
    async fn test_failed_load_is_retried() {
        let handle = VisionHandle::new("missing.onnx", 0.35, Arc::new(FailingLoader));
        for _ in 0..2 {
            let err = handle.detect(png(1, 1), None).await.unwrap_err();
            assert!(matches!(err, VisionError::Load { ref model, .. } if model == "missing.onnx"));
        }
        assert!(!handle.is_loaded());
    }
}
