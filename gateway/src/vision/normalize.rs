//! Mapping of raw model output onto the public detection record.

use inference_gateway_common::Detection;

use super::detector::{Prediction, RawBox};

/// Class id reported when the model did not assign one.
const UNKNOWN_CLASS: i64 = -1;

/// Convert a prediction into detections, keeping emission order.
///
/// A class id missing from the model's name table is reported as its decimal
/// string rather than treated as an error.
pub fn normalize(prediction: Prediction) -> Vec<Detection> {
    let Prediction { boxes, names } = prediction;
    boxes
        .into_iter()
        .map(|raw| {
            let RawBox {
                class_id,
                score,
                xyxy,
            } = raw;
            let class_id = class_id.unwrap_or(UNKNOWN_CLASS);
            let label = names
                .get(&class_id)
                .cloned()
                .unwrap_or_else(|| class_id.to_string());
            Detection {
                label,
                confidence: unit_score(score),
                bbox: xyxy,
            }
        })
        .collect()
}

fn unit_score(score: Option<f32>) -> f32 {
    match score {
        Some(s) if s.is_finite() => s.clamp(0.0, 1.0),
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn raw(class_id: Option<i64>, score: Option<f32>) -> RawBox {
        RawBox {
            class_id,
            score,
            xyxy: [1.0, 2.0, 30.5, 40.25],
        }
    }

    #[test]
    fn test_labels_resolved_through_names() {
        let prediction = Prediction {
            boxes: vec![raw(Some(0), Some(0.9)), raw(Some(16), Some(0.5))],
            names: HashMap::from([(0, "person".to_string()), (16, "dog".to_string())]),
        };
        let detections = normalize(prediction);
        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0].label, "person");
        assert_eq!(detections[1].label, "dog");
        assert_eq!(detections[1].bbox, [1.0, 2.0, 30.5, 40.25]);
    }

    #[test]
    fn test_unknown_class_falls_back_to_index() {
        let prediction = Prediction {
            boxes: vec![raw(Some(79), Some(0.4)), raw(None, Some(0.4))],
            names: HashMap::from([(0, "person".to_string())]),
        };
        let detections = normalize(prediction);
        assert_eq!(detections[0].label, "79");
        assert_eq!(detections[1].label, "-1");
    }

    #[test]
    fn test_scores_are_probabilities() {
        let prediction = Prediction {
            boxes: vec![
                raw(Some(0), None),
                raw(Some(0), Some(1.3)),
                raw(Some(0), Some(f32::NAN)),
                raw(Some(0), Some(0.25)),
            ],
            names: HashMap::new(),
        };
        let scores: Vec<f32> = normalize(prediction).iter().map(|d| d.confidence).collect();
        assert_eq!(scores, vec![0.0, 1.0, 0.0, 0.25]);
    }

    #[test]
    fn test_emission_order_preserved() {
        let prediction = Prediction {
            boxes: (0..5).map(|i| raw(Some(i), Some(0.1 * i as f32))).collect(),
            names: HashMap::new(),
        };
        let labels: Vec<String> = normalize(prediction).into_iter().map(|d| d.label).collect();
        assert_eq!(labels, ["0", "1", "2", "3", "4"]);
    }

    #[test]
    fn test_empty_prediction() {
        assert!(normalize(Prediction::default()).is_empty());
    }
}
