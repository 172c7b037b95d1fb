//! `flextk detect ...`

use anyhow::{Context as _, Result};
use clap::{Args, Subcommand};
use std::path::PathBuf;

use flextk_vision::{
    DrawOptions, ModelKind, OnnxDetector, ScrfdDecoder, YoloDecoder, DEFAULT_CONFIDENCE,
};

use super::print_json;

#[derive(Args)]
pub struct DetectArgs {
    /// Image to run detection on.
    #[arg(long)]
    image: PathBuf,
    /// ONNX model file.
    #[arg(long)]
    model: PathBuf,
    /// Write annotated output into this directory.
    #[arg(long = "output_dir", alias = "output-dir")]
    output_dir: Option<PathBuf>,
    #[arg(long, default_value_t = DEFAULT_CONFIDENCE)]
    confidence: f32,
    /// Write one crop per detection instead of an annotated image.
    #[arg(long = "save_crops", alias = "save-crops")]
    save_crops: bool,
}

#[derive(Subcommand)]
pub enum DetectCommand {
    /// Detect people with a COCO-trained YOLO model.
    Persons {
        #[command(flatten)]
        args: DetectArgs,
    },
    /// Detect faces with a YOLO face model.
    FacesYolo {
        #[command(flatten)]
        args: DetectArgs,
        /// The model has a five-point landmark head.
        #[arg(long)]
        landmarks: bool,
    },
    /// Detect faces with an SCRFD model.
    FacesScrfd {
        #[command(flatten)]
        args: DetectArgs,
        /// Square input size the model was exported with.
        #[arg(long = "input_size", alias = "input-size", default_value_t = 640)]
        input_size: usize,
    },
}

pub async fn run(cmd: DetectCommand) -> Result<()> {
    let (args, kind, draw_keypoints) = match cmd {
        DetectCommand::Persons { args } => {
            let decoder = YoloDecoder::persons().with_confidence(args.confidence);
            (args, ModelKind::Yolo(decoder), false)
        }
        DetectCommand::FacesYolo { args, landmarks } => {
            let decoder = YoloDecoder::faces(landmarks).with_confidence(args.confidence);
            (args, ModelKind::Yolo(decoder), landmarks)
        }
        DetectCommand::FacesScrfd { args, input_size } => {
            let decoder =
                ScrfdDecoder::new(input_size, input_size).with_confidence(args.confidence);
            (args, ModelKind::Scrfd(decoder), true)
        }
    };

    let options = DrawOptions {
        draw_keypoints,
        save_crops: args.save_crops,
        ..DrawOptions::default()
    };

    // Model loading and inference are CPU bound.
    let (detections, written) = tokio::task::spawn_blocking(move || {
        let detector = OnnxDetector::load(&args.model, kind)?;
        detector.annotate(&args.image, args.output_dir.as_deref(), &options)
    })
    .await
    .context("Detection task failed")??;

    print_json(&detections)?;
    if let Some(path) = &written.image {
        eprintln!("Annotated image: {}", path.display());
    }
    for path in &written.crops {
        eprintln!("Crop: {}", path.display());
    }
    Ok(())
}
