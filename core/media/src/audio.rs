//! Audio transcoding and probing with FFmpeg.

use regex::{Regex, RegexBuilder};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use flextk_common::{Error, Result};

use crate::formats::AudioFormat;
use crate::tools::{
    arg, parent_dir, parse_timestamp, require_dir, require_file, stem, timestamp, MediaTools,
    Tool,
};
use crate::video::clip_args;

/// What `ffprobe -hide_banner` reports about an audio file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AudioDetails {
    pub filename: String,
    pub duration_seconds: Option<f64>,
    pub bit_rate_kb: Option<u32>,
    pub frequency: Option<u32>,
    pub channels: Option<u32>,
    /// `mono` or `stereo`.
    pub sound_type: Option<String>,
}

fn capture(pattern: &str, text: &str, case_insensitive: bool) -> Result<Option<String>> {
    let re: Regex = RegexBuilder::new(pattern)
        .case_insensitive(case_insensitive)
        .build()
        .map_err(|e| Error::Conversion(format!("Bad pattern {}: {}", pattern, e)))?;
    Ok(re
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string()))
}

/// Parse the stream summary ffprobe prints to stderr.
pub fn parse_audio_details(filename: &str, stderr: &str) -> Result<AudioDetails> {
    let duration = capture(r"Duration: (\d{2}:\d{2}:\d{2}\.\d{2}),", stderr, false)?;
    let bit_rate = capture(r"bitrate: (\d+) kb/s", stderr, false)?;
    let frequency = capture(r"(\d+) Hz", stderr, false)?;
    let channels = capture(r"(\d+) channels", stderr, false)?;
    let sound_type = capture(r"\bAudio:.*?, \d+ Hz, (stereo|mono)", stderr, true)?
        .map(|s| s.to_ascii_lowercase());

    let channels = channels
        .and_then(|c| c.parse().ok())
        .or(match sound_type.as_deref() {
            Some("mono") => Some(1),
            Some("stereo") => Some(2),
            _ => None,
        });

    Ok(AudioDetails {
        filename: filename.to_string(),
        duration_seconds: duration.as_deref().and_then(parse_timestamp),
        bit_rate_kb: bit_rate.and_then(|b| b.parse().ok()),
        frequency: frequency.and_then(|f| f.parse().ok()),
        channels,
        sound_type,
    })
}

impl MediaTools {
    /// Transcode `input` to `format` inside `output_dir`.
    ///
    /// # Errors
    /// - `NotFound` if `input` does not exist
    /// - `InvalidInput` for an unsupported extension or missing directory
    /// - `Conversion` if FFmpeg fails
    pub async fn convert_audio(
        &self,
        input: &Path,
        output_dir: &Path,
        format: AudioFormat,
    ) -> Result<PathBuf> {
        require_file(input, "Input audio")?;
        require_dir(output_dir)?;
        AudioFormat::from_path(input)?;

        let output = output_dir.join(format!("{}.{}", stem(input)?, format));
        let args = vec![
            "-i".to_string(),
            arg(input),
            "-y".to_string(),
            "-v".to_string(),
            "info".to_string(),
            "-threads".to_string(),
            "0".to_string(),
            arg(&output),
        ];
        self.runner.run(Tool::Ffmpeg.program(), &args).await?;
        info!("Converted {} to {}", input.display(), output.display());
        Ok(output)
    }

    /// Copy the `[start, end)` second range of `input` to `output`.
    pub async fn trim_audio(
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
        self.clip_audio(input, output, start, "-to", timestamp(end)).await
    }

    /// Copy `duration` seconds of `input` starting at `start` to `output`.
    pub async fn cut_audio(
        &self,
        input: &Path,
        output: &Path,
        start: u64,
        duration: u64,
    ) -> Result<()> {
        if duration == 0 {
            return Err(Error::InvalidInput("Cut duration must be positive".to_string()));
        }
        self.clip_audio(input, output, start, "-t", timestamp(duration))
            .await
    }

    async fn clip_audio(
        &self,
        input: &Path,
        output: &Path,
        start: u64,
        bound_flag: &str,
        bound: String,
    ) -> Result<()> {
        require_file(input, "Input audio")?;
        AudioFormat::from_path(input)?;
        AudioFormat::from_path(output)?;
        require_dir(parent_dir(output))?;

        let args = clip_args(input, output, start, bound_flag, bound);
        self.runner.run(Tool::Ffmpeg.program(), &args).await?;
        info!("Wrote clip {}", output.display());
        Ok(())
    }

    /// Duration, bit rate, sample rate and channel layout of `path`.
    pub async fn probe_audio(&self, path: &Path) -> Result<AudioDetails> {
        require_file(path, "Audio file")?;
        let output = self
            .runner
            .run(
                Tool::Ffprobe.program(),
                &[arg(path), "-hide_banner".to_string()],
            )
            .await?;
        debug!("ffprobe reported {} bytes", output.stderr.len());

        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        parse_audio_details(&filename, &output.stderr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::fake::FakeRunner;
    use std::sync::Arc;

    const MP3_PROBE: &str = "\
Input #0, mp3, from 'song.mp3':
  Metadata:
    title           : Test Tone
  Duration: 00:03:25.50, start: 0.025057, bitrate: 320 kb/s
  Stream #0:0: Audio: mp3, 44100 Hz, stereo, fltp, 320 kb/s
";

    const WAV_PROBE: &str = "\
Input #0, wav, from 'voice.wav':
  Duration: 00:00:02.00, bitrate: 256 kb/s
  Stream #0:0: Audio: pcm_s16le ([1][0][0][0] / 0x0001), 16000 Hz, 1 channels, s16, 256 kb/s
";

    #[test]
    fn test_parse_stereo_mp3() {
        let details = parse_audio_details("song.mp3", MP3_PROBE).unwrap();
        assert_eq!(details.duration_seconds, Some(205.5));
        assert_eq!(details.bit_rate_kb, Some(320));
        assert_eq!(details.frequency, Some(44100));
        assert_eq!(details.sound_type.as_deref(), Some("stereo"));
        assert_eq!(details.channels, Some(2));
    }

    #[test]
    fn test_parse_explicit_channel_count() {
        let details = parse_audio_details("voice.wav", WAV_PROBE).unwrap();
        assert_eq!(details.channels, Some(1));
        assert_eq!(details.frequency, Some(16000));
        assert_eq!(details.sound_type, None);
    }

    #[test]
    fn test_parse_garbage_yields_empty_details() {
        let details = parse_audio_details("x", "nothing useful").unwrap();
        assert_eq!(details.duration_seconds, None);
        assert_eq!(details.channels, None);
    }

    #[tokio::test]
    async fn test_probe_audio_reads_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("song.mp3");
        std::fs::write(&input, b"x").unwrap();

        let runner = Arc::new(FakeRunner::new().stderr(MP3_PROBE));
        let tools = MediaTools::with_runner(runner.clone());
        let details = tools.probe_audio(&input).await.unwrap();

        assert_eq!(details.filename, "song.mp3");
        let (program, args) = &runner.calls()[0];
        assert_eq!(program, "ffprobe");
        assert_eq!(args[1], "-hide_banner");
    }

    #[tokio::test]
    async fn test_convert_audio_to_missing_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("song.wav");
        std::fs::write(&input, b"x").unwrap();

        let tools = MediaTools::with_runner(Arc::new(FakeRunner::new()));
        let result = tools
            .convert_audio(&input, &dir.path().join("missing"), AudioFormat::Mp3)
            .await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));

        let missing = tools
            .convert_audio(&dir.path().join("nope.wav"), dir.path(), AudioFormat::Mp3)
            .await;
        assert!(matches!(missing, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_cut_audio_uses_duration_flag() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.ogg");
        std::fs::write(&input, b"x").unwrap();

        let runner = Arc::new(FakeRunner::new());
        let tools = MediaTools::with_runner(runner.clone());
        tools
            .cut_audio(&input, &dir.path().join("out.ogg"), 5, 30)
            .await
            .unwrap();

        assert_eq!(runner.calls()[0].1[2..6], ["-ss", "00:00:05", "-t", "00:00:30"]);
    }
}
