//! The external binaries flextk drives and how to find them.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use flextk_common::{Error, Result};

use crate::runner::{Runner, SystemRunner};

/// External tools used for conversion and probing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    Ffmpeg,
    Ffprobe,
    ImageMagick,
    LibreOffice,
}

impl Tool {
    pub const ALL: [Tool; 4] = [Tool::Ffmpeg, Tool::Ffprobe, Tool::ImageMagick, Tool::LibreOffice];

    /// Executable name or path for the current platform.
    pub fn program(&self) -> &'static str {
        match self {
            Tool::Ffmpeg => "ffmpeg",
            Tool::Ffprobe => "ffprobe",
            Tool::ImageMagick => "magick",
            Tool::LibreOffice => libre_office_program(),
        }
    }

    fn version_arg(&self) -> &'static str {
        match self {
            Tool::Ffmpeg | Tool::Ffprobe | Tool::ImageMagick => "-version",
            Tool::LibreOffice => "--version",
        }
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Tool::Ffmpeg => "FFmpeg",
            Tool::Ffprobe => "FFprobe",
            Tool::ImageMagick => "ImageMagick",
            Tool::LibreOffice => "LibreOffice",
        };
        f.write_str(name)
    }
}

#[cfg(target_os = "windows")]
fn libre_office_program() -> &'static str {
    r"C:\Program Files\LibreOffice\program\soffice.exe"
}

#[cfg(target_os = "macos")]
fn libre_office_program() -> &'static str {
    "/Applications/LibreOffice.app/Contents/MacOS/soffice"
}

#[cfg(not(any(target_os = "windows", target_os = "macos")))]
fn libre_office_program() -> &'static str {
    "libreoffice"
}

/// Entry point for every media operation.
///
/// Holds the [`Runner`] used to execute tools; operations live in the
/// `audio`, `video`, `document` and `image` modules.
#[derive(Clone)]
pub struct MediaTools {
    pub(crate) runner: Arc<dyn Runner>,
}

impl MediaTools {
    /// Tools executed on the host.
    pub fn new() -> Self {
        Self::with_runner(Arc::new(SystemRunner))
    }

    pub fn with_runner(runner: Arc<dyn Runner>) -> Self {
        Self { runner }
    }

    /// Check that `tool` can be executed.
    ///
    /// Returns the first line of its version banner.
    ///
    /// # Errors
    /// - `Conversion` naming the tool if it is missing or fails
    pub async fn check_tool(&self, tool: Tool) -> Result<String> {
        let output = self
            .runner
            .run(tool.program(), &[tool.version_arg().to_string()])
            .await
            .map_err(|e| {
                warn!("{} is not available", tool);
                Error::Conversion(format!("{} is required but unavailable: {}", tool, e))
            })?;

        let banner = output
            .stdout
            .lines()
            .next()
            .unwrap_or_default()
            .trim()
            .to_string();
        info!("Found {}: {}", tool, banner);
        Ok(banner)
    }
}

impl Default for MediaTools {
    fn default() -> Self {
        Self::new()
    }
}

/// Input must be an existing file.
pub(crate) fn require_file(path: &Path, what: &str) -> Result<()> {
    if !path.is_file() {
        return Err(Error::NotFound(format!(
            "{} does not exist: {}",
            what,
            path.display()
        )));
    }
    Ok(())
}

/// Output location must be an existing directory.
pub(crate) fn require_dir(path: &Path) -> Result<()> {
    if !path.is_dir() {
        return Err(Error::InvalidInput(format!(
            "Output directory does not exist: {}",
            path.display()
        )));
    }
    Ok(())
}

/// Directory an output file lands in; bare file names land in `.`.
pub(crate) fn parent_dir(path: &Path) -> &Path {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

pub(crate) fn arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// File stem used to name converted outputs.
pub(crate) fn stem(path: &Path) -> Result<String> {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .ok_or_else(|| Error::InvalidInput(format!("Path has no file name: {}", path.display())))
}

/// `HH:MM:SS` for a whole number of seconds, as ffmpeg's `-ss`/`-to` take it.
pub(crate) fn timestamp(seconds: u64) -> String {
    format!(
        "{:02}:{:02}:{:02}",
        seconds / 3600,
        (seconds % 3600) / 60,
        seconds % 60
    )
}

/// Seconds in an ffmpeg `HH:MM:SS.ss` duration.
pub(crate) fn parse_timestamp(value: &str) -> Option<f64> {
    let mut parts = value.split(':');
    let hours: f64 = parts.next()?.parse().ok()?;
    let minutes: f64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}
