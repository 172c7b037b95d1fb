//! Running detection models on images with `tract-onnx`.

use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgb, RgbImage};
use std::path::{Path, PathBuf};
use tract_onnx::prelude::*;
use tracing::{debug, info, warn};

use flextk_common::{Error, Result};

use crate::detection::Detection;
use crate::geometry::Letterbox;
use crate::scrfd::{ScrfdDecoder, StrideOutput, STRIDES};
use crate::yolo::YoloDecoder;

/// Which head the loaded model has.
#[derive(Debug, Clone)]
pub enum ModelKind {
    Yolo(YoloDecoder),
    Scrfd(ScrfdDecoder),
}

impl ModelKind {
    /// Input side length the published weights were exported with.
    fn default_input(&self) -> (usize, usize) {
        match self {
            ModelKind::Yolo(_) => (640, 640),
            ModelKind::Scrfd(d) => d.input_size,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            ModelKind::Yolo(d) if d.class_filter.is_some() => "person",
            ModelKind::Yolo(_) | ModelKind::Scrfd(_) => "face",
        }
    }
}

fn model_error(e: impl std::fmt::Display) -> Error {
    Error::Conversion(format!("Model inference failed: {}", e))
}

/// What [`OnnxDetector::annotate`] wrote.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Annotated {
    pub image: Option<PathBuf>,
    pub crops: Vec<PathBuf>,
}

/// Drawing options for annotated output.
#[derive(Debug, Clone)]
pub struct DrawOptions {
    pub color: [u8; 3],
    pub thickness: u32,
    pub draw_keypoints: bool,
    /// Write one crop per detection instead of one annotated image.
    pub save_crops: bool,
}

impl Default for DrawOptions {
    fn default() -> Self {
        Self {
            color: [0, 255, 0],
            thickness: 1,
            draw_keypoints: false,
            save_crops: false,
        }
    }
}

/// A loaded ONNX detection model.
pub struct OnnxDetector {
    model: TypedRunnableModel<TypedModel>,
    kind: ModelKind,
    input: (usize, usize),
}

impl OnnxDetector {
    /// Load and optimize the model at `path`.
    ///
    /// # Errors
    /// - `NotFound` if `path` does not exist
    /// - `InvalidInput` if the input size has a zero side
    /// - `Conversion` if the file is not a loadable ONNX model
    pub fn load(path: &Path, kind: ModelKind) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::NotFound(format!(
                "Model file not found: {}",
                path.display()
            )));
        }
        let (width, height) = kind.default_input();
        if width == 0 || height == 0 {
            return Err(Error::InvalidInput(format!(
                "Model input size must be non-zero, got {}x{}",
                width, height
            )));
        }
        let model = tract_onnx::onnx()
            .model_for_path(path)
            .and_then(|m| m.with_input_fact(0, f32::fact([1, 3, height, width]).into()))
            .and_then(|m| m.into_optimized())
            .and_then(|m| m.into_runnable())
            .map_err(model_error)?;

        info!("Loaded {} model from {}", kind.label(), path.display());
        Ok(Self {
            model,
            kind,
            input: (width, height),
        })
    }

    /// Letterbox `image` into an NCHW tensor.
    fn preprocess(&self, image: &RgbImage) -> (Tensor, Letterbox) {
        let (width, height) = self.input;
        let letterbox = Letterbox::fit(image.width(), image.height(), width as u32, height as u32);
        let resized = imageops::resize(
            image,
            letterbox.resized.0,
            letterbox.resized.1,
            FilterType::Triangle,
        );

        let (fill, normalize): (u8, fn(u8) -> f32) = match self.kind {
            ModelKind::Yolo(_) => (114, |v: u8| v as f32 / 255.0),
            ModelKind::Scrfd(_) => (0, |v: u8| (v as f32 - 127.5) / 128.0),
        };
        let mut canvas = RgbImage::from_pixel(width as u32, height as u32, Rgb([fill; 3]));
        imageops::overlay(
            &mut canvas,
            &resized,
            letterbox.pad_x.floor() as i64,
            letterbox.pad_y.floor() as i64,
        );

        let tensor: Tensor =
            tract_ndarray::Array4::from_shape_fn((1, 3, height, width), |(_, c, y, x)| {
                normalize(canvas.get_pixel(x as u32, y as u32)[c])
            })
            .into();
        (tensor, letterbox)
    }

    /// Detections in source-image coordinates, best first.
    pub fn detect(&self, image: &DynamicImage) -> Result<Vec<Detection>> {
        let rgb = image.to_rgb8();
        let (tensor, letterbox) = self.preprocess(&rgb);
        let outputs = self.model.run(tvec!(tensor.into())).map_err(model_error)?;

        let found = match &self.kind {
            ModelKind::Yolo(decoder) => {
                let view = outputs[0].to_array_view::<f32>().map_err(model_error)?;
                let shape = view.shape().to_vec();
                let data: Vec<f32> = view.iter().copied().collect();
                decoder.decode(&data, &shape)?
            }
            ModelKind::Scrfd(decoder) => {
                // Outputs are scores, boxes, then landmarks, each per stride.
                let flat = outputs
                    .iter()
                    .map(|t| {
                        t.to_array_view::<f32>()
                            .map(|v| v.iter().copied().collect::<Vec<f32>>())
                    })
                    .collect::<TractResult<Vec<_>>>()
                    .map_err(model_error)?;
                let n = STRIDES.len();
                if flat.len() < 2 * n {
                    return Err(Error::Conversion(format!(
                        "SCRFD model produced {} outputs, expected at least {}",
                        flat.len(),
                        2 * n
                    )));
                }
                let strides: Vec<StrideOutput<'_>> = STRIDES
                    .iter()
                    .enumerate()
                    .map(|(i, &stride)| StrideOutput {
                        stride,
                        scores: &flat[i],
                        boxes: &flat[n + i],
                        keypoints: flat.get(2 * n + i).map(Vec::as_slice),
                    })
                    .collect();
                decoder.decode(&strides)?
            }
        };

        let (w, h) = (rgb.width() as f32, rgb.height() as f32);
        let mapped: Vec<Detection> = found
            .iter()
            .map(|d| {
                let mut d = d.to_source(&letterbox);
                d.bbox = d.bbox.clamp(w, h);
                d
            })
            .collect();
        debug!("Detected {} {}s", mapped.len(), self.kind.label());
        Ok(mapped)
    }

    /// Run detection on the image at `path` and write results to `output_dir`.
    ///
    /// The annotated image is named `<stem>_<label>s.<ext>`; crops are
    /// `<stem>_<label>_<i>.<ext>`.
    ///
    /// # Errors
    /// - `NotFound` if `path` does not exist
    /// - `InvalidInput` if `output_dir` is not a directory
    pub fn annotate(
        &self,
        path: &Path,
        output_dir: Option<&Path>,
        options: &DrawOptions,
    ) -> Result<(Vec<Detection>, Annotated)> {
        if !path.is_file() {
            return Err(Error::NotFound(format!("Image not found: {}", path.display())));
        }
        if let Some(dir) = output_dir {
            if !dir.is_dir() {
                return Err(Error::InvalidInput(format!(
                    "Output directory does not exist: {}",
                    dir.display()
                )));
            }
        }

        let image = image::open(path)
            .map_err(|e| {
                Error::InvalidInput(format!("Unreadable image {}: {}", path.display(), e))
            })?;
        let detections = self.detect(&image)?;
        if detections.is_empty() {
            warn!("No {}s detected in {}", self.kind.label(), path.display());
        }

        let Some(dir) = output_dir else {
            return Ok((detections, Annotated::default()));
        };

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());
        let ext = path
            .extension()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "png".to_string());
        let label = self.kind.label();
        let mut rgb = image.to_rgb8();
        let mut written = Annotated::default();

        if options.save_crops {
            for (i, d) in detections.iter().enumerate() {
                let (x, y, w, h) = d.bbox.to_xywh();
                if w == 0 || h == 0 {
                    continue;
                }
                let crop = imageops::crop_imm(&rgb, x, y, w, h).to_image();
                let target = dir.join(format!("{}_{}_{}.{}", stem, label, i, ext));
                crop.save(&target).map_err(|e| Error::Conversion(e.to_string()))?;
                written.crops.push(target);
            }
        } else {
            for d in &detections {
                draw_detection(&mut rgb, d, options);
            }
            let target = dir.join(format!("{}_{}s.{}", stem, label, ext));
            rgb.save(&target).map_err(|e| Error::Conversion(e.to_string()))?;
            written.image = Some(target);
        }

        info!(
            "Wrote {} files for {} detections",
            written.crops.len() + usize::from(written.image.is_some()),
            detections.len()
        );
        Ok((detections, written))
    }
}

fn put(image: &mut RgbImage, x: i64, y: i64, color: Rgb<u8>) {
    if x >= 0 && y >= 0 && (x as u32) < image.width() && (y as u32) < image.height() {
        image.put_pixel(x as u32, y as u32, color);
    }
}

/// Rectangle outline plus optional landmark dots.
pub fn draw_detection(image: &mut RgbImage, detection: &Detection, options: &DrawOptions) {
    let color = Rgb(options.color);
    let b = &detection.bbox;
    let (x1, y1, x2, y2) = (b.x1 as i64, b.y1 as i64, b.x2 as i64, b.y2 as i64);

    for t in 0..options.thickness.max(1) as i64 {
        for x in x1..=x2 {
            put(image, x, y1 + t, color);
            put(image, x, y2 - t, color);
        }
        for y in y1..=y2 {
            put(image, x1 + t, y, color);
            put(image, x2 - t, y, color);
        }
    }

    if options.draw_keypoints {
        let dot = Rgb([255, 0, 0]);
        for &(kx, ky) in &detection.keypoints {
            for dy in -2..=2 {
                for dx in -2..=2 {
                    put(image, kx as i64 + dx, ky as i64 + dy, dot);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::BoundingBox;

    #[test]
    fn test_draw_detection_outlines_box() {
        let mut image = RgbImage::new(20, 20);
        let detection = Detection {
            bbox: BoundingBox::new(2.0, 2.0, 10.0, 10.0),
            score: 0.9,
            class_id: 0,
            keypoints: vec![(6.0, 6.0)],
        };
        let options = DrawOptions {
            draw_keypoints: true,
            ..DrawOptions::default()
        };
        draw_detection(&mut image, &detection, &options);

        assert_eq!(image.get_pixel(2, 5), &Rgb([0, 255, 0]));
        assert_eq!(image.get_pixel(10, 10), &Rgb([0, 255, 0]));
        assert_eq!(image.get_pixel(6, 6), &Rgb([255, 0, 0]));
        assert_eq!(image.get_pixel(15, 15), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_missing_model_is_not_found() {
        let result = OnnxDetector::load(
            Path::new("/no/such/model.onnx"),
            ModelKind::Yolo(YoloDecoder::persons()),
        );
        assert!(matches!(result, Err(Error::NotFound(_))));
    }
}
