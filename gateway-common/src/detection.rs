//! Response bodies for `POST /yolo/detect`.

use serde::{Deserialize, Serialize};

/// One detected object.
///
/// `box` holds `[x1, y1, x2, y2]` in the coordinate space of the submitted
/// image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    pub confidence: f32,
    #[serde(rename = "box")]
    pub bbox: [f32; 4],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResponse {
    pub model: String,
    /// Threshold actually applied to this request.
    pub confidence: f32,
    pub detections: Vec<Detection>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detection_field_names() {
        let detection = Detection {
            label: "person".to_string(),
            confidence: 0.9,
            bbox: [1.0, 2.0, 3.0, 4.0],
        };
        let json = serde_json::to_value(&detection).unwrap();
        assert_eq!(json["label"], "person");
        assert_eq!(json["box"], serde_json::json!([1.0, 2.0, 3.0, 4.0]));
        assert!(json.get("bbox").is_none());
    }

    #[test]
    fn test_box_must_have_four_coordinates() {
        let json = r#"{"label": "cat", "confidence": 0.5, "box": [1.0, 2.0, 3.0]}"#;
        assert!(serde_json::from_str::<Detection>(json).is_err());
    }

    #[test]
    fn test_empty_detection_response() {
        let resp = DetectionResponse {
            model: "yolov8n.onnx".to_string(),
            confidence: 0.35,
            detections: vec![],
        };
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains(r#""detections":[]"#));
    }
}
