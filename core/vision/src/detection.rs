//! Detections and non-maximum suppression.

use serde::Serialize;

use crate::geometry::{BoundingBox, Letterbox};

/// Confidence below which detections are discarded unless configured otherwise.
pub const DEFAULT_CONFIDENCE: f32 = 0.2;

/// One detected object.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub score: f32,
    pub class_id: usize,
    /// Landmark points, e.g. eyes, nose and mouth corners for faces.
    pub keypoints: Vec<(f32, f32)>,
}

impl Detection {
    /// Map coordinates from model input space back to the source image.
    pub fn to_source(&self, letterbox: &Letterbox) -> Detection {
        Detection {
            bbox: letterbox.to_source(&self.bbox),
            score: self.score,
            class_id: self.class_id,
            keypoints: self
                .keypoints
                .iter()
                .map(|&(x, y)| letterbox.point_to_source(x, y))
                .collect(),
        }
    }
}

/// Greedy NMS: keep the best-scoring box, drop same-class boxes that
/// overlap it by more than `iou_threshold`, repeat.
///
/// # Postconditions
/// - Output is sorted by descending score
pub fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut kept: Vec<Detection> = Vec::with_capacity(detections.len());
    for candidate in detections {
        let suppressed = kept.iter().any(|k| {
            k.class_id == candidate.class_id && k.bbox.iou(&candidate.bbox) > iou_threshold
        });
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x: f32, score: f32, class_id: usize) -> Detection {
        Detection {
            bbox: BoundingBox::new(x, 0.0, x + 10.0, 10.0),
            score,
            class_id,
            keypoints: Vec::new(),
        }
    }

    #[test]
    fn test_nms_keeps_best_of_overlapping() {
        let kept = nms(vec![det(0.0, 0.6, 0), det(1.0, 0.9, 0), det(50.0, 0.3, 0)], 0.45);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].score, 0.9);
        assert_eq!(kept[1].score, 0.3);
    }

    #[test]
    fn test_nms_is_per_class() {
        let kept = nms(vec![det(0.0, 0.8, 0), det(0.0, 0.7, 1)], 0.45);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn test_nms_empty() {
        assert!(nms(Vec::new(), 0.5).is_empty());
    }
}
