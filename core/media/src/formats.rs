//! Container formats accepted by the converters.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use flextk_common::{Error, Result};

macro_rules! media_format {
    ($(#[$meta:meta])* $name:ident, $kind:literal, { $($variant:ident => $ext:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Extension without the leading dot.
            pub fn extension(&self) -> &'static str {
                match self {
                    $($name::$variant => $ext),+
                }
            }

            /// Format of `path`, judged by its extension.
            ///
            /// # Errors
            /// - `InvalidInput` if the extension is missing or unsupported
            pub fn from_path(path: &Path) -> Result<Self> {
                path.extension()
                    .and_then(|e| e.to_str())
                    .ok_or_else(|| Error::InvalidInput(format!(
                        "{} has no file extension",
                        path.display()
                    )))?
                    .parse()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.extension())
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                let ext = s.trim_start_matches('.').to_ascii_lowercase();
                $name::ALL
                    .iter()
                    .copied()
                    .find(|f| f.extension() == ext)
                    .ok_or_else(|| {
                        let supported: Vec<_> = $name::ALL.iter().map(|f| f.extension()).collect();
                        Error::InvalidInput(format!(
                            "Unsupported {} format '{}', supported: {}",
                            $kind,
                            s,
                            supported.join(", ")
                        ))
                    })
            }
        }
    };
}

media_format!(
    /// Video containers FFmpeg remuxes between.
    VideoFormat, "video", {
        Mp4 => "mp4",
        Avi => "avi",
        Mov => "mov",
        Mkv => "mkv",
        Ts => "ts",
    }
);

media_format!(
    /// Audio formats FFmpeg transcodes between.
    AudioFormat, "audio", {
        Mp3 => "mp3",
        Ogg => "ogg",
        Flac => "flac",
        Wav => "wav",
    }
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_accepts_dot_and_case() {
        assert_eq!(".MKV".parse::<VideoFormat>().unwrap(), VideoFormat::Mkv);
        assert_eq!("flac".parse::<AudioFormat>().unwrap(), AudioFormat::Flac);
    }

    #[test]
    fn test_unsupported_extension_lists_choices() {
        let err = VideoFormat::from_path(Path::new("clip.webm")).unwrap_err();
        match err {
            Error::InvalidInput(msg) => assert!(msg.contains("mp4, avi, mov, mkv, ts")),
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(AudioFormat::from_path(Path::new("noext")).is_err());
    }
}
