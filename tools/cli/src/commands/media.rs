//! `flextk media ...`

use anyhow::{Context as _, Result};
use clap::Subcommand;
use std::path::PathBuf;

use flextk_media::{AudioFormat, MediaTools, Tool, VideoFormat};

use super::print_json;

#[derive(Subcommand)]
pub enum MediaCommand {
    /// Report which external tools are available.
    CheckTools,

    /// Remux a video into another container.
    ConvertVideo {
        #[arg(long)]
        input: PathBuf,
        #[arg(long = "output_dir", alias = "output-dir", default_value = ".")]
        output_dir: PathBuf,
        /// mp4, avi, mov, mkv or ts.
        #[arg(long)]
        format: VideoFormat,
    },

    /// Convert an audio file.
    ConvertAudio {
        #[arg(long)]
        input: PathBuf,
        #[arg(long = "output_dir", alias = "output-dir", default_value = ".")]
        output_dir: PathBuf,
        /// mp3, ogg, flac or wav.
        #[arg(long)]
        format: AudioFormat,
    },

    /// Convert an office document to PDF.
    ConvertDocument {
        #[arg(long)]
        input: PathBuf,
        #[arg(long = "output_dir", alias = "output-dir", default_value = ".")]
        output_dir: PathBuf,
        /// Name for the resulting PDF.
        #[arg(long = "output_name", alias = "output-name")]
        output_name: Option<String>,
    },

    /// Convert an image to another format, next to the original.
    ConvertImage {
        #[arg(long)]
        input: PathBuf,
        /// Target extension, e.g. png or webp.
        #[arg(long)]
        format: String,
    },

    /// Keep the part of a video between two offsets, in seconds.
    TrimVideo {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
        #[arg(long, default_value_t = 0)]
        start: u64,
        #[arg(long)]
        end: u64,
    },

    /// Keep a fixed-length part of a video, in seconds.
    CutVideo {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
        #[arg(long, default_value_t = 0)]
        start: u64,
        #[arg(long)]
        duration: u64,
    },

    /// Keep the part of an audio file between two offsets, in seconds.
    TrimAudio {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
        #[arg(long, default_value_t = 0)]
        start: u64,
        #[arg(long)]
        end: u64,
    },

    /// Keep a fixed-length part of an audio file, in seconds.
    CutAudio {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
        #[arg(long, default_value_t = 0)]
        start: u64,
        #[arg(long)]
        duration: u64,
    },

    /// Print video stream details as JSON.
    VideoInfo {
        #[arg(long)]
        input: PathBuf,
    },

    /// Print audio stream details as JSON.
    AudioInfo {
        #[arg(long)]
        input: PathBuf,
    },

    /// Print image details as JSON.
    ImageInfo {
        #[arg(long)]
        input: PathBuf,
    },
}

pub async fn run(cmd: MediaCommand) -> Result<()> {
    let tools = MediaTools::new();

    match cmd {
        MediaCommand::CheckTools => {
            let mut missing = 0;
            for tool in Tool::ALL {
                match tools.check_tool(tool).await {
                    Ok(version) => println!("  {:<12} {}", tool.to_string(), version),
                    Err(e) => {
                        missing += 1;
                        println!("  {:<12} unavailable ({})", tool.to_string(), e);
                    }
                }
            }
            if missing > 0 {
                return Err(flextk_common::Error::Conversion(format!(
                    "{} of {} tools are unavailable",
                    missing,
                    Tool::ALL.len()
                ))
                .into());
            }
            Ok(())
        }
        MediaCommand::ConvertVideo {
            input,
            output_dir,
            format,
        } => {
            let output = tools
                .convert_video(&input, &output_dir, format)
                .await
                .context("Video conversion failed")?;
            println!("{}", output.display());
            Ok(())
        }
        MediaCommand::ConvertAudio {
            input,
            output_dir,
            format,
        } => {
            let output = tools
                .convert_audio(&input, &output_dir, format)
                .await
                .context("Audio conversion failed")?;
            println!("{}", output.display());
            Ok(())
        }
        MediaCommand::ConvertDocument {
            input,
            output_dir,
            output_name,
        } => {
            let output = tools
                .convert_document(&input, &output_dir, output_name.as_deref())
                .await
                .context("Document conversion failed")?;
            println!("{}", output.display());
            Ok(())
        }
        MediaCommand::ConvertImage { input, format } => {
            let output = tools
                .convert_image(&input, &format)
                .await
                .context("Image conversion failed")?;
            println!("{}", output.display());
            Ok(())
        }
        MediaCommand::TrimVideo {
            input,
            output,
            start,
            end,
        } => {
            tools
                .trim_video(&input, &output, start, end)
                .await
                .context("Video trim failed")?;
            println!("{}", output.display());
            Ok(())
        }
        MediaCommand::CutVideo {
            input,
            output,
            start,
            duration,
        } => {
            tools
                .cut_video(&input, &output, start, duration)
                .await
                .context("Video cut failed")?;
            println!("{}", output.display());
            Ok(())
        }
        MediaCommand::TrimAudio {
            input,
            output,
            start,
            end,
        } => {
            tools
                .trim_audio(&input, &output, start, end)
                .await
                .context("Audio trim failed")?;
            println!("{}", output.display());
            Ok(())
        }
        MediaCommand::CutAudio {
            input,
            output,
            start,
            duration,
        } => {
            tools
                .cut_audio(&input, &output, start, duration)
                .await
                .context("Audio cut failed")?;
            println!("{}", output.display());
            Ok(())
        }
        MediaCommand::VideoInfo { input } => print_json(&tools.probe_video(&input).await?),
        MediaCommand::AudioInfo { input } => print_json(&tools.probe_audio(&input).await?),
        MediaCommand::ImageInfo { input } => print_json(&tools.identify(&input).await?),
    }
}
