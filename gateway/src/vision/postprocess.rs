//! YOLO pre/post-processing that does not depend on a runtime.
//!
//! Letterboxing into the network input tensor, decoding of the `[1, 4 + classes, anchors]`
//! head, per-class non-maximum suppression, and parsing of the `names`
//! metadata entry that YOLO exports carry.

use std::collections::HashMap;

use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;

use super::detector::RawBox;

/// Upper bound on boxes returned for one image.
pub const MAX_DETECTIONS: usize = 300;

/// Grey used to pad letterboxed inputs.
pub const PAD_VALUE: f32 = 114.0 / 255.0;

/// How a source image maps into the square network input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub resized_width: u32,
    pub resized_height: u32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub source_width: u32,
    pub source_height: u32,
}

impl Letterbox {
    pub fn new(source_width: u32, source_height: u32, input_size: u32) -> Self {
        let size = input_size as f32;
        let scale = (size / source_width as f32).min(size / source_height as f32);
        let resized_width = ((source_width as f32 * scale).round() as u32).clamp(1, input_size);
        let resized_height = ((source_height as f32 * scale).round() as u32).clamp(1, input_size);
        Self {
            scale,
            resized_width,
            resized_height,
            pad_x: ((input_size - resized_width) / 2) as f32,
            pad_y: ((input_size - resized_height) / 2) as f32,
            source_width,
            source_height,
        }
    }

    /// Map a network-space box back onto the source image, clipped to its bounds.
    pub fn to_source(&self, xyxy: [f32; 4]) -> [f32; 4] {
        let w = self.source_width as f32;
        let h = self.source_height as f32;
        [
            ((xyxy[0] - self.pad_x) / self.scale).clamp(0.0, w),
            ((xyxy[1] - self.pad_y) / self.scale).clamp(0.0, h),
            ((xyxy[2] - self.pad_x) / self.scale).clamp(0.0, w),
            ((xyxy[3] - self.pad_y) / self.scale).clamp(0.0, h),
        ]
    }
}

/// Resize `image` into a square `[1, 3, size, size]` tensor in [0, 1].
///
/// The image is centered and the border filled with `PAD_VALUE`.
pub fn letterbox_tensor(image: &RgbImage, input_size: u32) -> (Array4<f32>, Letterbox) {
    let size = input_size as usize;
    let letterbox = Letterbox::new(image.width(), image.height(), input_size);
    let resized = imageops::resize(
        image,
        letterbox.resized_width,
        letterbox.resized_height,
        FilterType::Triangle,
    );

    let mut input = Array4::<f32>::from_elem((1, 3, size, size), PAD_VALUE);
    let (pad_x, pad_y) = (letterbox.pad_x as usize, letterbox.pad_y as usize);
    for (x, y, pixel) in resized.enumerate_pixels() {
        let (px, py) = (x as usize + pad_x, y as usize + pad_y);
        for c in 0..3 {
            input[[0, c, py, px]] = pixel[c] as f32 / 255.0;
        }
    }
    (input, letterbox)
}

/// Decode a YOLOv8-style head laid out as `[1, 4 + classes, anchors]`.
///
/// Each anchor keeps its best class if that score reaches `confidence`.
/// Boxes stay in network coordinates.
pub fn decode_head(data: &[f32], dims: &[i64], confidence: f32) -> Result<Vec<RawBox>, String> {
    let (rows, anchors) = match dims {
        [1, rows, anchors] if *rows > 4 && *anchors > 0 => (*rows as usize, *anchors as usize),
        _ => return Err(format!("unexpected output shape {:?}", dims)),
    };
    if data.len() != rows * anchors {
        return Err(format!(
            "output has {} values, shape {:?} needs {}",
            data.len(),
            dims,
            rows * anchors
        ));
    }

    let at = |row: usize, anchor: usize| data[row * anchors + anchor];
    let mut boxes = Vec::new();
    for anchor in 0..anchors {
        let (class_id, score) = (4..rows)
            .map(|row| (row - 4, at(row, anchor)))
            .fold((0, f32::NEG_INFINITY), |best, candidate| {
                if candidate.1 > best.1 {
                    candidate
                } else {
                    best
                }
            });
        if score < confidence {
            continue;
        }

        let (cx, cy, w, h) = (at(0, anchor), at(1, anchor), at(2, anchor), at(3, anchor));
        boxes.push(RawBox {
            class_id: Some(class_id as i64),
            score: Some(score),
            xyxy: [cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0],
        });
    }
    Ok(boxes)
}

/// Intersection over union of two xyxy boxes.
pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let ix = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
    let iy = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
    let inter = ix * iy;
    let area = |r: &[f32; 4]| (r[2] - r[0]).max(0.0) * (r[3] - r[1]).max(0.0);
    let union = area(a) + area(b) - inter;
    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}

/// Per-class non-maximum suppression. Output is sorted by descending score.
pub fn non_max_suppression(mut boxes: Vec<RawBox>, iou_threshold: f32) -> Vec<RawBox> {
    boxes.sort_by(|a, b| {
        b.score
            .unwrap_or(0.0)
            .total_cmp(&a.score.unwrap_or(0.0))
    });

    let mut kept: Vec<RawBox> = Vec::new();
    for candidate in boxes {
        let suppressed = kept.iter().any(|k| {
            k.class_id == candidate.class_id && iou(&k.xyxy, &candidate.xyxy) > iou_threshold
        });
        if !suppressed {
            kept.push(candidate);
            if kept.len() == MAX_DETECTIONS {
                break;
            }
        }
    }
    kept
}

/// Parse a `names` metadata value such as `{0: 'person', 1: 'bicycle'}`.
///
/// Malformed entries are skipped; callers fall back to numeric labels.
pub fn parse_names(raw: &str) -> HashMap<i64, String> {
    let body = raw.trim().trim_start_matches('{').trim_end_matches('}');
    let mut names = HashMap::new();
    let mut rest = body;

    while let Some(colon) = rest.find(':') {
        let key = rest[..colon].trim().trim_matches(|c| c == '\'' || c == '"');
        let after = rest[colon + 1..].trim_start();

        let (value, remainder) = match after.chars().next() {
            Some(q @ ('\'' | '"')) => match after[1..].find(q) {
                Some(end) => (&after[1..1 + end], &after[end + 2..]),
                None => break,
            },
            _ => match after.find(',') {
                Some(end) => (after[..end].trim(), &after[end..]),
                None => (after.trim(), ""),
            },
        };

        if let Ok(index) = key.parse::<i64>() {
            names.insert(index, value.to_string());
        }
        rest = remainder.trim_start().trim_start_matches(',');
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn boxed(class_id: i64, score: f32, xyxy: [f32; 4]) -> RawBox {
        RawBox {
            class_id: Some(class_id),
            score: Some(score),
            xyxy,
        }
    }

    #[test]
    fn test_letterbox_wide_image() {
        let lb = Letterbox::new(1280, 640, 640);
        assert_eq!(lb.scale, 0.5);
        assert_eq!((lb.resized_width, lb.resized_height), (640, 320));
        assert_eq!((lb.pad_x, lb.pad_y), (0.0, 160.0));

        assert_eq!(lb.to_source([0.0, 160.0, 640.0, 480.0]), [0.0, 0.0, 1280.0, 640.0]);
        assert_eq!(lb.to_source([-5.0, 0.0, 700.0, 700.0]), [0.0, 0.0, 1280.0, 640.0]);
    }

    #[test]
    fn test_letterbox_tiny_image() {
        let lb = Letterbox::new(1, 1, 640);
        assert_eq!((lb.resized_width, lb.resized_height), (640, 640));
        assert_eq!((lb.pad_x, lb.pad_y), (0.0, 0.0));
    }

    #[test]
    fn test_letterbox_tensor_pads_tall_image() {
        // 2x4 red image into an 8x8 input: scaled to 4x8, 2 columns of padding each side.
        let image = RgbImage::from_pixel(2, 4, Rgb([255, 0, 0]));
        let (tensor, lb) = letterbox_tensor(&image, 8);

        assert_eq!(tensor.shape(), &[1, 3, 8, 8]);
        assert_eq!((lb.resized_width, lb.resized_height), (4, 8));
        assert_eq!((lb.pad_x, lb.pad_y), (2.0, 0.0));

        for y in 0..8 {
            for x in [0, 1, 6, 7] {
                for c in 0..3 {
                    assert_eq!(tensor[[0, c, y, x]], PAD_VALUE, "pad at ({x}, {y})");
                }
            }
            for x in 2..6 {
                assert!((tensor[[0, 0, y, x]] - 1.0).abs() < 1.0 / 255.0, "red at ({x}, {y})");
                assert!(tensor[[0, 1, y, x]] < 1.0 / 255.0);
                assert!(tensor[[0, 2, y, x]] < 1.0 / 255.0);
            }
        }
    }

    #[test]
    fn test_letterbox_tensor_places_pixels_in_order() {
        // Left column white, right column black; no scaling at size 2.
        let mut image = RgbImage::new(2, 1);
        image.put_pixel(0, 0, Rgb([255, 255, 255]));
        let (tensor, lb) = letterbox_tensor(&image, 2);

        assert_eq!(lb.scale, 1.0);
        assert_eq!((lb.pad_x, lb.pad_y), (0.0, 0.0));
        assert_eq!(tensor[[0, 0, 0, 0]], 1.0);
        assert_eq!(tensor[[0, 2, 0, 0]], 1.0);
        assert_eq!(tensor[[0, 0, 0, 1]], 0.0);
        // Second row is padding.
        assert_eq!(tensor[[0, 1, 1, 0]], PAD_VALUE);
    }

    #[test]
    fn test_decode_head() {
        // 2 classes, 3 anchors; rows are cx, cy, w, h, class0, class1.
        let data = [
            10.0, 50.0, 90.0, // cx
            10.0, 50.0, 90.0, // cy
            4.0, 10.0, 2.0, // w
            4.0, 10.0, 2.0, // h
            0.9, 0.1, 0.2, // class 0
            0.05, 0.7, 0.1, // class 1
        ];
        let boxes = decode_head(&data, &[1, 6, 3], 0.25).unwrap();
        assert_eq!(boxes.len(), 2);
        assert_eq!(boxes[0], boxed(0, 0.9, [8.0, 8.0, 12.0, 12.0]));
        assert_eq!(boxes[1], boxed(1, 0.7, [45.0, 45.0, 55.0, 55.0]));
    }

    #[test]
    fn test_decode_head_rejects_bad_shape() {
        assert!(decode_head(&[0.0; 10], &[1, 5, 3], 0.1).is_err());
        assert!(decode_head(&[0.0; 12], &[1, 4, 3], 0.1).is_err());
        assert!(decode_head(&[0.0; 12], &[12], 0.1).is_err());
    }

    #[test]
    fn test_iou() {
        let a = [0.0, 0.0, 10.0, 10.0];
        assert_eq!(iou(&a, &a), 1.0);
        assert_eq!(iou(&a, &[20.0, 20.0, 30.0, 30.0]), 0.0);
        let half = iou(&a, &[5.0, 0.0, 15.0, 10.0]);
        assert!((half - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_is_per_class() {
        let boxes = vec![
            boxed(0, 0.6, [0.0, 0.0, 10.0, 10.0]),
            boxed(0, 0.9, [1.0, 1.0, 11.0, 11.0]),
            boxed(1, 0.8, [0.0, 0.0, 10.0, 10.0]),
            boxed(0, 0.3, [50.0, 50.0, 60.0, 60.0]),
        ];
        let kept = non_max_suppression(boxes, 0.45);
        let scores: Vec<f32> = kept.iter().map(|b| b.score.unwrap()).collect();
        assert_eq!(scores, vec![0.9, 0.8, 0.3]);
    }

    #[test]
    fn test_parse_names() {
        let names = parse_names("{0: 'person', 1: 'bicycle', 2: \"traffic light\"}");
        assert_eq!(names.len(), 3);
        assert_eq!(names[&0], "person");
        assert_eq!(names[&2], "traffic light");
    }

    #[test]
    fn test_parse_names_skips_garbage() {
        let names = parse_names("{0: 'person', x: 'bad', 5: dog}");
        assert_eq!(names.len(), 2);
        assert_eq!(names[&5], "dog");
        assert!(parse_names("").is_empty());
        assert!(parse_names("{0: 'unterminated").is_empty());
    }
}
