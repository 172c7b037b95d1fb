//! Object and face detection helpers.
//!
//! The decoders turn raw YOLO and SCRFD output tensors into
//! [`Detection`]s and are usable without any inference runtime. The
//! `onnx` feature adds [`OnnxDetector`], which loads a model file, runs it
//! on an image and writes annotated output.

pub mod detection;
pub mod geometry;
pub mod scrfd;
pub mod yolo;

#[cfg(feature = "onnx")]
pub mod onnx;

pub use detection::{nms, Detection, DEFAULT_CONFIDENCE};
pub use geometry::{BoundingBox, Letterbox};
pub use scrfd::{ScrfdDecoder, StrideOutput};
pub use yolo::{YoloDecoder, PERSON_CLASS};

#[cfg(feature = "onnx")]
pub use onnx::{Annotated, DrawOptions, ModelKind, OnnxDetector};
