//! Decoding SCRFD face detector outputs.
//!
//! SCRFD predicts on three feature maps (strides 8, 16 and 32) with two
//! anchors per location. For each anchor the model emits a face score,
//! four distances from the anchor center to the box edges, and optionally
//! five landmark offsets, all in units of the stride.

use tracing::debug;

use flextk_common::{Error, Result};

use crate::detection::{nms, Detection, DEFAULT_CONFIDENCE};
use crate::geometry::BoundingBox;

pub const STRIDES: [usize; 3] = [8, 16, 32];
pub const ANCHORS_PER_LOCATION: usize = 2;
pub const LANDMARKS: usize = 5;

/// Raw tensors for one stride.
#[derive(Debug, Clone, Copy)]
pub struct StrideOutput<'a> {
    pub stride: usize,
    /// One score per anchor.
    pub scores: &'a [f32],
    /// Four distances per anchor: left, top, right, bottom.
    pub boxes: &'a [f32],
    /// Ten offsets per anchor, when the model has a landmark head.
    pub keypoints: Option<&'a [f32]>,
}

#[derive(Debug, Clone)]
pub struct ScrfdDecoder {
    /// Model input size, `(width, height)`.
    pub input_size: (usize, usize),
    pub confidence: f32,
    pub iou_threshold: f32,
}

impl ScrfdDecoder {
    pub fn new(input_width: usize, input_height: usize) -> Self {
        Self {
            input_size: (input_width, input_height),
            confidence: DEFAULT_CONFIDENCE,
            iou_threshold: 0.4,
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }

    /// Anchor centers of one stride in row-major order, each repeated
    /// once per anchor.
    fn anchor_centers(&self, stride: usize) -> impl Iterator<Item = (f32, f32)> {
        let cols = self.input_size.0 / stride;
        let rows = self.input_size.1 / stride;
        (0..rows).flat_map(move |y| {
            (0..cols).flat_map(move |x| {
                std::iter::repeat(((x * stride) as f32, (y * stride) as f32))
                    .take(ANCHORS_PER_LOCATION)
            })
        })
    }

    /// Decode every stride and merge with NMS.
    ///
    /// # Errors
    /// - `InvalidInput` if a tensor's length does not match the anchor grid
    pub fn decode(&self, outputs: &[StrideOutput<'_>]) -> Result<Vec<Detection>> {
        let mut candidates = Vec::new();

        for out in outputs {
            let stride = out.stride;
            if stride == 0 {
                return Err(Error::InvalidInput("SCRFD stride must be positive".to_string()));
            }
            let anchors = (self.input_size.0 / stride)
                * (self.input_size.1 / stride)
                * ANCHORS_PER_LOCATION;
            if out.scores.len() != anchors || out.boxes.len() != anchors * 4 {
                return Err(Error::InvalidInput(format!(
                    "SCRFD stride {} expects {} anchors, got {} scores and {} box values",
                    stride,
                    anchors,
                    out.scores.len(),
                    out.boxes.len()
                )));
            }
            if let Some(kps) = out.keypoints {
                if kps.len() != anchors * LANDMARKS * 2 {
                    return Err(Error::InvalidInput(format!(
                        "SCRFD stride {} expects {} landmark values, got {}",
                        stride,
                        anchors * LANDMARKS * 2,
                        kps.len()
                    )));
                }
            }

            let s = stride as f32;
            for (i, (cx, cy)) in self.anchor_centers(stride).enumerate() {
                let score = out.scores[i];
                if score < self.confidence {
                    continue;
                }
                let d = &out.boxes[i * 4..i * 4 + 4];
                let bbox = BoundingBox::new(
                    cx - d[0] * s,
                    cy - d[1] * s,
                    cx + d[2] * s,
                    cy + d[3] * s,
                );
                let keypoints = out
                    .keypoints
                    .map(|kps| {
                        let k = &kps[i * LANDMARKS * 2..(i + 1) * LANDMARKS * 2];
                        k.chunks_exact(2)
                            .map(|p| (cx + p[0] * s, cy + p[1] * s))
                            .collect()
                    })
                    .unwrap_or_default();

                candidates.push(Detection {
                    bbox,
                    score,
                    class_id: 0,
                    keypoints,
                });
            }
        }

        debug!("{} SCRFD candidates above {}", candidates.len(), self.confidence);
        Ok(nms(candidates, self.iou_threshold))
    }
}
