//! Image conversion and inspection with ImageMagick.

use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::info;

use flextk_common::{Error, Result};

use crate::tools::{arg, require_file, MediaTools, Tool};

/// Summary of `magick identify -verbose`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageDetails {
    pub filename: String,
    pub format: String,
    pub mime_type: Option<String>,
    pub width: u32,
    pub height: u32,
    pub colorspace: Option<String>,
    pub color_type: Option<String>,
    pub file_size: Option<String>,
    pub pixels: Option<String>,
}

/// Parse verbose identify output.
///
/// Keys are lowercased; the first occurrence of a key wins, so nested
/// per-channel entries do not shadow the top-level ones.
pub fn parse_identify(output: &str) -> Result<ImageDetails> {
    let re = Regex::new(r"^\s*(\w[\w ]*): (.+)$")
        .map_err(|e| Error::Conversion(format!("Bad identify pattern: {}", e)))?;

    let mut info: HashMap<String, String> = HashMap::new();
    for line in output.lines() {
        if let Some(caps) = re.captures(line) {
            info.entry(caps[1].trim().to_lowercase())
                .or_insert_with(|| caps[2].trim().to_string());
        }
    }

    let geometry = info
        .get("geometry")
        .ok_or_else(|| Error::Conversion("identify output has no geometry".to_string()))?;
    let (width, height) = parse_geometry(geometry)
        .ok_or_else(|| Error::Conversion(format!("Unreadable geometry '{}'", geometry)))?;

    let mut take = |key: &str| info.remove(key);
    Ok(ImageDetails {
        filename: take("filename").unwrap_or_default(),
        format: take("format").unwrap_or_default(),
        mime_type: take("mime type"),
        width,
        height,
        colorspace: take("colorspace"),
        color_type: take("type"),
        file_size: take("filesize"),
        pixels: take("number pixels"),
    })
}

/// `640x480+0+0` -> `(640, 480)`.
fn parse_geometry(geometry: &str) -> Option<(u32, u32)> {
    let (width, rest) = geometry.split_once('x')?;
    let height = rest.split('+').next()?;
    Some((width.parse().ok()?, height.parse().ok()?))
}

impl MediaTools {
    /// Convert `input` to `format`, writing next to the input.
    ///
    /// # Errors
    /// - `NotFound` if `input` does not exist
    /// - `InvalidInput` if `format` is empty or longer than 10 characters
    /// - `Conversion` if ImageMagick fails
    pub async fn convert_image(&self, input: &Path, format: &str) -> Result<PathBuf> {
        require_file(input, "Image")?;
        let format = format.trim_start_matches('.').to_lowercase();
        if format.is_empty() || format.len() > 10 {
            return Err(Error::InvalidInput(
                "Image format must be between 1 and 10 characters".to_string(),
            ));
        }

        let output = input.with_extension(&format);
        self.runner
            .run(Tool::ImageMagick.program(), &[arg(input), arg(&output)])
            .await?;
        info!("Converted {} to {}", input.display(), output.display());
        Ok(output)
    }

    pub async fn identify(&self, path: &Path) -> Result<ImageDetails> {
        require_file(path, "Image")?;
        let output = self
            .runner
            .run(
                Tool::ImageMagick.program(),
                &["identify".to_string(), "-verbose".to_string(), arg(path)],
            )
            .await?;
        parse_identify(&output.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::fake::FakeRunner;
    use std::sync::Arc;

    const IDENTIFY: &str = "\
Image:
  Filename: photo.png
  Permissions: rw-r--r--
  Format: PNG (Portable Network Graphics)
  Mime type: image/png
  Class: DirectClass
  Geometry: 640x480+0+0
  Units: Undefined
  Colorspace: sRGB
  Type: TrueColor
  Channel depth:
    Red: 8-bit
  Channel statistics:
    Pixels: 307200
    Red:
      min: 0  (0)
  Properties:
    png:IHDR.color_type: 2 (Truecolor)
  Filesize: 112KiB
  Number pixels: 307200
";

    #[test]
    fn test_parse_identify() {
        let details = parse_identify(IDENTIFY).unwrap();
        assert_eq!(details.filename, "photo.png");
        assert_eq!(details.format, "PNG (Portable Network Graphics)");
        assert_eq!((details.width, details.height), (640, 480));
        assert_eq!(details.mime_type.as_deref(), Some("image/png"));
        assert_eq!(details.color_type.as_deref(), Some("TrueColor"));
        assert_eq!(details.file_size.as_deref(), Some("112KiB"));
        assert_eq!(details.pixels.as_deref(), Some("307200"));
    }

    #[test]
    fn test_missing_geometry_is_conversion_error() {
        assert!(matches!(
            parse_identify("Image:\n  Format: PNG\n"),
            Err(Error::Conversion(_))
        ));
    }

    #[tokio::test]
    async fn test_convert_image_swaps_extension() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("photo.png");
        std::fs::write(&input, b"x").unwrap();

        let runner = Arc::new(FakeRunner::new());
        let tools = MediaTools::with_runner(runner.clone());
        let output = tools.convert_image(&input, ".WEBP").await.unwrap();

        assert_eq!(output, dir.path().join("photo.webp"));
        assert_eq!(runner.calls()[0].0, "magick");
        assert!(tools.convert_image(&input, "").await.is_err());
    }
}
