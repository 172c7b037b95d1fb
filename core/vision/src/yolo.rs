//! Decoding YOLOv8/v11 detection heads.
//!
//! The head emits one `[1, 4 + classes + 3 * keypoints, N]` tensor: for each
//! of the `N` candidates, box center and size, one score per class, then
//! `(x, y, visibility)` per keypoint. Coordinates are in model input pixels.

use tracing::debug;

use flextk_common::{Error, Result};

use crate::detection::{nms, Detection, DEFAULT_CONFIDENCE};
use crate::geometry::BoundingBox;

/// COCO class index of `person`.
pub const PERSON_CLASS: usize = 0;

#[derive(Debug, Clone)]
pub struct YoloDecoder {
    pub num_classes: usize,
    pub num_keypoints: usize,
    pub confidence: f32,
    pub iou_threshold: f32,
    /// Keep only this class when set.
    pub class_filter: Option<usize>,
}

impl YoloDecoder {
    /// COCO-trained detector restricted to people.
    pub fn persons() -> Self {
        Self {
            num_classes: 80,
            num_keypoints: 0,
            confidence: DEFAULT_CONFIDENCE,
            iou_threshold: 0.45,
            class_filter: Some(PERSON_CLASS),
        }
    }

    /// Single-class face detector; `with_landmarks` for the 5-point pose head.
    pub fn faces(with_landmarks: bool) -> Self {
        Self {
            num_classes: 1,
            num_keypoints: if with_landmarks { 5 } else { 0 },
            confidence: DEFAULT_CONFIDENCE,
            iou_threshold: 0.45,
            class_filter: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }

    fn rows(&self) -> usize {
        4 + self.num_classes + 3 * self.num_keypoints
    }

    /// Decode a row-major output tensor of the given `shape`.
    ///
    /// # Errors
    /// - `InvalidInput` if `shape` does not match the configured head
    pub fn decode(&self, data: &[f32], shape: &[usize]) -> Result<Vec<Detection>> {
        let (rows, n) = match shape {
            [1, rows, n] | [rows, n] => (*rows, *n),
            other => {
                return Err(Error::InvalidInput(format!(
                    "Unexpected YOLO output shape {:?}",
                    other
                )))
            }
        };
        if rows != self.rows() || data.len() != rows * n {
            return Err(Error::InvalidInput(format!(
                "YOLO output has {} rows for {} candidates, expected {} rows",
                rows,
                n,
                self.rows()
            )));
        }

        let at = |row: usize, i: usize| data[row * n + i];
        let mut candidates = Vec::new();
        for i in 0..n {
            let (class_id, score) = (0..self.num_classes)
                .map(|c| (c, at(4 + c, i)))
                .fold((0, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });

            if score < self.confidence {
                continue;
            }
            if self.class_filter.is_some_and(|wanted| wanted != class_id) {
                continue;
            }

            let kp_base = 4 + self.num_classes;
            let keypoints = (0..self.num_keypoints)
                .map(|k| (at(kp_base + 3 * k, i), at(kp_base + 3 * k + 1, i)))
                .collect();

            candidates.push(Detection {
                bbox: BoundingBox::from_center(at(0, i), at(1, i), at(2, i), at(3, i)),
                score,
                class_id,
                keypoints,
            });
        }

        debug!("{} YOLO candidates above {}", candidates.len(), self.confidence);
        Ok(nms(candidates, self.iou_threshold))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a `[rows, n]` tensor from per-candidate columns.
    fn tensor(columns: &[Vec<f32>]) -> (Vec<f32>, Vec<usize>) {
        let rows = columns[0].len();
        let n = columns.len();
        let mut data = vec![0.0; rows * n];
        for (i, col) in columns.iter().enumerate() {
            for (r, v) in col.iter().enumerate() {
                data[r * n + i] = *v;
            }
        }
        (data, vec![1, rows, n])
    }

    #[test]
    fn test_face_head_with_threshold_and_nms() {
        let decoder = YoloDecoder::faces(false);
        let (data, shape) = tensor(&[
            vec![100.0, 100.0, 40.0, 40.0, 0.9],
            vec![102.0, 101.0, 40.0, 40.0, 0.7],
            vec![300.0, 300.0, 20.0, 20.0, 0.5],
            vec![500.0, 500.0, 20.0, 20.0, 0.1],
        ]);

        let found = decoder.decode(&data, &shape).unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].score, 0.9);
        assert_eq!(found[0].bbox, BoundingBox::new(80.0, 80.0, 120.0, 120.0));
        assert_eq!(found[1].score, 0.5);
    }

    #[test]
    fn test_person_filter_drops_other_classes() {
        let mut decoder = YoloDecoder::persons();
        decoder.num_classes = 3;
        let (data, shape) = tensor(&[
            vec![10.0, 10.0, 4.0, 4.0, 0.8, 0.1, 0.0],
            vec![50.0, 50.0, 4.0, 4.0, 0.1, 0.9, 0.0],
        ]);

        let found = decoder.decode(&data, &shape).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].class_id, PERSON_CLASS);
    }

    #[test]
    fn test_keypoints_are_decoded() {
        let decoder = YoloDecoder::faces(true);
        let mut column = vec![50.0, 50.0, 10.0, 10.0, 0.95];
        for k in 0..5 {
            column.extend([k as f32, 10.0 + k as f32, 1.0]);
        }
        let (data, shape) = tensor(&[column]);

        let found = decoder.decode(&data, &shape).unwrap();
        assert_eq!(found[0].keypoints.len(), 5);
        assert_eq!(found[0].keypoints[4], (4.0, 14.0));
    }

    #[test]
    fn test_shape_mismatch_is_rejected() {
        let decoder = YoloDecoder::persons();
        assert!(decoder.decode(&[0.0; 10], &[1, 5, 2]).is_err());
        assert!(decoder.decode(&[0.0; 10], &[10]).is_err());
    }
}
