//! Media conversion by driving external binaries.
//!
//! FFmpeg and FFprobe handle audio and video, LibreOffice converts office
//! documents to PDF, and ImageMagick converts and inspects images. Every
//! operation is a method on [`MediaTools`], which executes the tools
//! through a [`Runner`]. Tool failures surface as
//! [`flextk_common::Error::Conversion`] carrying the tool's stderr.
//!
//! Tools are never installed automatically; use
//! [`MediaTools::check_tool`] to report what is missing.

pub mod audio;
pub mod document;
pub mod formats;
pub mod image;
pub mod runner;
pub mod tools;
pub mod video;

pub use audio::AudioDetails;
pub use formats::{AudioFormat, VideoFormat};
pub use image::ImageDetails;
pub use runner::{Runner, SystemRunner, ToolOutput};
pub use tools::{MediaTools, Tool};
pub use video::VideoDetails;
