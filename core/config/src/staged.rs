//! Crash-safe file replacement.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use flextk_common::Result;

/// New file contents staged next to their destination.
///
/// [`StagedFile::create`] writes and fsyncs a sibling temp file;
/// [`StagedFile::commit`] renames it over the target. Until the rename the
/// target is untouched, and a staged file that is dropped without being
/// committed removes its temp file.
#[derive(Debug)]
pub struct StagedFile {
    target: PathBuf,
    tmp: PathBuf,
    committed: bool,
}

impl StagedFile {
    /// Temp path used for `target`. A stale file at this path from an
    /// interrupted run is simply overwritten.
    pub fn tmp_path(target: &Path) -> PathBuf {
        let mut name = target
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        target.with_file_name(name)
    }

    /// Write `contents` to the temp path and flush them to disk.
    ///
    /// # Errors
    /// - I/O errors creating the parent directory or writing the temp file
    pub fn create(target: &Path, contents: &[u8]) -> Result<Self> {
        if let Some(parent) = target.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp = Self::tmp_path(target);
        let staged = Self {
            target: target.to_path_buf(),
            tmp,
            committed: false,
        };

        let mut file = open_private(&staged.tmp)?;
        file.write_all(contents)?;
        file.sync_all()?;

        Ok(staged)
    }

    /// Atomically replace the target with the staged contents.
    pub fn commit(mut self) -> Result<()> {
        fs::rename(&self.tmp, &self.target)?;
        self.committed = true;

        #[cfg(unix)]
        if let Some(parent) = self.target.parent() {
            if let Ok(dir) = File::open(parent) {
                let _ = dir.sync_all();
            }
        }

        Ok(())
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.tmp);
        }
    }
}

#[cfg(unix)]
fn open_private(path: &Path) -> std::io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> std::io::Result<File> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
}
