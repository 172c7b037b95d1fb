//! Video remuxing, trimming and probing with FFmpeg.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use flextk_common::{Error, Result};

use crate::formats::VideoFormat;
use crate::tools::{arg, parent_dir, require_dir, require_file, stem, timestamp, MediaTools, Tool};

/// Copy every stream unchanged; `?` keeps missing stream kinds optional.
const REMUX_FLAGS: &[&str] = &[
    "-y", "-v", "error", "-vcodec", "copy", "-acodec", "copy", "-scodec", "copy", "-map",
    "0:v?", "-map", "0:s?", "-map", "0:a?", "-threads", "0",
];

/// Stream metadata for the first video stream of a file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoDetails {
    pub frames_count: u64,
    pub duration_seconds: f64,
    pub frames_per_second: f64,
    pub width: u32,
    pub height: u32,
    /// Bits per second; 0 when the container does not report it.
    pub bit_rate: u64,
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    #[serde(default)]
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    nb_frames: Option<String>,
    duration: Option<String>,
    bit_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
    bit_rate: Option<String>,
}

/// Frames per second from an ffprobe rational such as `30000/1001`.
fn frame_rate(rational: &str) -> Option<f64> {
    let (num, den) = match rational.split_once('/') {
        Some((num, den)) => (num.parse::<f64>().ok()?, den.parse::<f64>().ok()?),
        None => (rational.parse::<f64>().ok()?, 1.0),
    };
    if den == 0.0 || num == 0.0 {
        return None;
    }
    Some(num / den)
}

/// Parse `ffprobe -of json -show_streams -show_format` output.
pub fn parse_video_details(json: &str) -> Result<VideoDetails> {
    let probe: ProbeOutput = serde_json::from_str(json)
        .map_err(|e| Error::Conversion(format!("Unreadable ffprobe output: {}", e)))?;
    let stream = probe
        .streams
        .into_iter()
        .find(|s| s.width.is_some())
        .ok_or_else(|| Error::Conversion("No video stream found".to_string()))?;

    let fps = stream
        .avg_frame_rate
        .as_deref()
        .and_then(frame_rate)
        .or_else(|| stream.r_frame_rate.as_deref().and_then(frame_rate))
        .unwrap_or_default();

    let number = |v: Option<&str>| v.and_then(|s| s.parse::<f64>().ok());
    let duration = number(stream.duration.as_deref())
        .or_else(|| number(probe.format.as_ref().and_then(|f| f.duration.as_deref())))
        .unwrap_or_default();

    let frames = stream
        .nb_frames
        .as_deref()
        .and_then(|n| n.parse::<u64>().ok())
        .unwrap_or_else(|| (duration * fps).round() as u64);

    let bit_rate = number(stream.bit_rate.as_deref())
        .or_else(|| number(probe.format.as_ref().and_then(|f| f.bit_rate.as_deref())))
        .unwrap_or_default() as u64;

    Ok(VideoDetails {
        frames_count: frames,
        duration_seconds: duration,
        frames_per_second: fps,
        width: stream.width.unwrap_or_default(),
        height: stream.height.unwrap_or_default(),
        bit_rate,
    })
}

impl MediaTools {
    /// Remux `input` into `format` inside `output_dir`, copying every
    /// video, audio and subtitle stream.
    ///
    /// # Preconditions
    /// - `input` has a supported video extension
    /// - `output_dir` exists
    ///
    /// # Postconditions
    /// - Returns `output_dir/<input stem>.<format>`, overwriting any existing file
    ///
    /// # Errors
    /// - `NotFound` if `input` does not exist
    /// - `InvalidInput` for an unsupported extension or missing directory
    /// - `Conversion` if FFmpeg fails
    pub async fn convert_video(
        &self,
        input: &Path,
        output_dir: &Path,
        format: VideoFormat,
    ) -> Result<PathBuf> {
        require_file(input, "Input video")?;
        require_dir(output_dir)?;
        VideoFormat::from_path(input)?;

        let output = output_dir.join(format!("{}.{}", stem(input)?, format));
        let mut args: Vec<String> = vec![
            "-hwaccel".to_string(),
            "auto".to_string(),
            "-i".to_string(),
            arg(input),
        ];
        args.extend(REMUX_FLAGS.iter().map(|s| s.to_string()));
        args.push(arg(&output));

        self.runner.run(Tool::Ffmpeg.program(), &args).await?;
        info!("Converted {} to {}", input.display(), output.display());
        Ok(output)
    }

    /// Copy the `[start, end)` second range of `input` to `output`.
    pub async fn trim_video(
        &self,
        input: &Path,
        output: &Path,
        start: u64,
        end: u64,
    ) -> Result<()> {
        if end <= start {
            return Err(Error::InvalidInput(format!(
                "Trim end ({}s) must be after start ({}s)",
                end, start
            )));
        }
        self.clip_video(input, output, start, "-to", timestamp(end)).await
    }

    /// Copy `duration` seconds of `input` starting at `start` to `output`.
    pub async fn cut_video(
        &self,
        input: &Path,
        output: &Path,
        start: u64,
        duration: u64,
    ) -> Result<()> {
        if duration == 0 {
            return Err(Error::InvalidInput("Cut duration must be positive".to_string()));
        }
        self.clip_video(input, output, start, "-t", timestamp(duration))
            .await
    }

    async fn clip_video(
        &self,
        input: &Path,
        output: &Path,
        start: u64,
        bound_flag: &str,
        bound: String,
    ) -> Result<()> {
        require_file(input, "Input video")?;
        VideoFormat::from_path(input)?;
        VideoFormat::from_path(output)?;
        require_dir(parent_dir(output))?;

        let args = clip_args(input, output, start, bound_flag, bound);
        self.runner.run(Tool::Ffmpeg.program(), &args).await?;
        info!("Wrote clip {}", output.display());
        Ok(())
    }

    /// Stream metadata of the first video stream in `path`.
    pub async fn probe_video(&self, path: &Path) -> Result<VideoDetails> {
        require_file(path, "Video")?;
        let args = vec![
            "-v".to_string(),
            "error".to_string(),
            "-select_streams".to_string(),
            "v:0".to_string(),
            "-show_streams".to_string(),
            "-show_format".to_string(),
            "-of".to_string(),
            "json".to_string(),
            arg(path),
        ];
        let output = self.runner.run(Tool::Ffprobe.program(), &args).await?;
        parse_video_details(&output.stdout)
    }
}

/// Stream-copy arguments shared by the audio and video clip operations.
pub(crate) fn clip_args(
    input: &Path,
    output: &Path,
    start: u64,
    bound_flag: &str,
    bound: String,
) -> Vec<String> {
    vec![
        "-i".to_string(),
        arg(input),
        "-ss".to_string(),
        timestamp(start),
        bound_flag.to_string(),
        bound,
        "-c:v".to_string(),
        "copy".to_string(),
        "-c:a".to_string(),
        "copy".to_string(),
        "-threads".to_string(),
        "0".to_string(),
        arg(output),
        "-y".to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::fake::FakeRunner;
    use std::sync::Arc;

    const PROBE_JSON: &str = r#"{
        "streams": [
            {
                "index": 0,
                "codec_type": "video",
                "width": 1920,
                "height": 1080,
                "r_frame_rate": "30000/1001",
                "avg_frame_rate": "30000/1001",
                "duration": "10.010000",
                "bit_rate": "4500000",
                "nb_frames": "300"
            }
        ],
        "format": { "duration": "10.043000", "bit_rate": "4650000" }
    }"#;

    #[test]
    fn test_parse_video_details() {
        let details = parse_video_details(PROBE_JSON).unwrap();
        assert_eq!(details.frames_count, 300);
        assert_eq!((details.width, details.height), (1920, 1080));
        assert!((details.frames_per_second - 29.97).abs() < 0.01);
        assert_eq!(details.bit_rate, 4_500_000);
    }

    #[test]
    fn test_missing_frame_count_is_derived() {
        let json = r#"{
            "streams": [{ "width": 640, "height": 360, "r_frame_rate": "25/1", "avg_frame_rate": "0/0" }],
            "format": { "duration": "4.000000" }
        }"#;
        let details = parse_video_details(json).unwrap();
        assert_eq!(details.frames_per_second, 25.0);
        assert_eq!(details.frames_count, 100);
        assert_eq!(details.bit_rate, 0);
    }

    #[test]
    fn test_audio_only_file_has_no_video_stream() {
        let json = r#"{ "streams": [{ "codec_type": "audio" }] }"#;
        assert!(matches!(parse_video_details(json), Err(Error::Conversion(_))));
    }

    #[tokio::test]
    async fn test_convert_video_remuxes_every_stream() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("movie.mkv");
        std::fs::write(&input, b"x").unwrap();

        let runner = Arc::new(FakeRunner::new());
        let tools = MediaTools::with_runner(runner.clone());
        let output = tools
            .convert_video(&input, dir.path(), VideoFormat::Mp4)
            .await
            .unwrap();

        assert_eq!(output, dir.path().join("movie.mp4"));
        let (program, args) = &runner.calls()[0];
        assert_eq!(program, "ffmpeg");
        let joined = args.join(" ");
        assert!(joined.contains("-vcodec copy -acodec copy -scodec copy"));
        assert!(joined.contains("-map 0:v? -map 0:s? -map 0:a?"));
        assert_eq!(args.last().map(String::as_str), output.to_str());
    }

    #[tokio::test]
    async fn test_convert_rejects_unsupported_input() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("movie.webm");
        std::fs::write(&input, b"x").unwrap();

        let tools = MediaTools::with_runner(Arc::new(FakeRunner::new()));
        let result = tools.convert_video(&input, dir.path(), VideoFormat::Mp4).await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_trim_passes_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.mp4");
        std::fs::write(&input, b"x").unwrap();

        let runner = Arc::new(FakeRunner::new());
        let tools = MediaTools::with_runner(runner.clone());
        tools
            .trim_video(&input, &dir.path().join("out.mp4"), 65, 130)
            .await
            .unwrap();

        let args = &runner.calls()[0].1;
        assert_eq!(args[2..6], ["-ss", "00:01:05", "-to", "00:02:10"]);
        assert!(tools.trim_video(&input, &dir.path().join("o.mp4"), 10, 5).await.is_err());
    }
}
