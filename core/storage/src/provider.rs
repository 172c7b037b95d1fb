//! Object store trait definition.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::pin::Pin;

use flextk_common::{Error, ObjectPath, Result};

/// Descriptor of a remote object.
///
/// A read-only snapshot taken when the provider answered; it is not a
/// live handle and goes stale as soon as the object changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketFile {
    /// Provider-specific identifier (generation, file id, version id).
    pub id: String,
    /// Full key within the bucket.
    pub path: String,
    /// Last key component.
    pub name: String,
    /// Bucket or folder the object lives in.
    pub bucket: String,
    /// Size in bytes.
    pub size: u64,
    /// Provider checksum (MD5 hex, SHA-1 hex or ETag), if reported.
    pub checksum: Option<String>,
    /// Last modification time, if reported.
    pub modified: Option<DateTime<Utc>>,
    pub content_type: Option<String>,
    /// Publicly reachable URL, when the provider can construct one.
    pub public_url: Option<String>,
}

impl BucketFile {
    /// Extension of the object name, without the dot.
    pub fn extension(&self) -> Option<&str> {
        match self.name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => Some(ext),
            _ => None,
        }
    }
}

/// Byte stream type for downloads.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Storage backend scoped to one bucket.
///
/// All operations are async. Implementations handle their own
/// authentication; none of them retry.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Provider name (e.g., "gcs", "bb2", "s3", "drive").
    fn name(&self) -> &str;

    /// Bucket (or root folder) this store operates on.
    fn bucket(&self) -> &str;

    /// Upload data, replacing any existing object at `path`.
    ///
    /// # Postconditions
    /// - Returns the descriptor of the stored object
    ///
    /// # Errors
    /// - `InvalidInput` if `path` is the root
    /// - `Auth` if the credentials are rejected
    /// - `Provider` for any other remote failure
    async fn upload(
        &self,
        path: &ObjectPath,
        data: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<BucketFile>;

    /// Download an object as a stream of chunks.
    ///
    /// # Errors
    /// - `NotFound` if the object does not exist
    async fn download_stream(&self, path: &ObjectPath) -> Result<ByteStream>;

    /// Download the complete object into memory.
    async fn download(&self, path: &ObjectPath) -> Result<Vec<u8>> {
        let mut stream = self.download_stream(path).await?;
        let mut data = Vec::new();
        while let Some(chunk) = stream.next().await {
            data.extend_from_slice(&chunk?);
        }
        Ok(data)
    }

    /// List objects whose key starts with `prefix`. The root lists the
    /// whole bucket.
    async fn list(&self, prefix: &ObjectPath) -> Result<Vec<BucketFile>>;

    /// Get the descriptor of a single object.
    ///
    /// # Errors
    /// - `NotFound` if the object does not exist
    async fn metadata(&self, path: &ObjectPath) -> Result<BucketFile>;

    /// Check if an object exists.
    async fn exists(&self, path: &ObjectPath) -> Result<bool> {
        match self.metadata(path).await {
            Ok(_) => Ok(true),
            Err(Error::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Delete an object.
    ///
    /// # Errors
    /// - `NotFound` if the object does not exist
    async fn delete(&self, path: &ObjectPath) -> Result<()>;
}

/// Reject the root path for operations that need an object key.
pub(crate) fn require_key(path: &ObjectPath) -> Result<String> {
    if path.is_root() {
        return Err(Error::InvalidInput(
            "An object key is required, not the bucket root".to_string(),
        ));
    }
    Ok(path.key())
}

/// Best-effort MIME type from a file extension.
pub fn guess_content_type(name: &str) -> &'static str {
    let ext = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "txt" | "log" => "text/plain",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "csv" => "text/csv",
        "js" => "application/javascript",
        "json" => "application/json",
        "xml" => "application/xml",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "mp3" => "audio/mpeg",
        "ogg" => "audio/ogg",
        "flac" => "audio/flac",
        "wav" => "audio/wav",
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        "mkv" => "video/x-matroska",
        "avi" => "video/x-msvideo",
        "ts" => "video/mp2t",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_file_serialization() {
        let file = BucketFile {
            id: "1".to_string(),
            path: "a/b.txt".to_string(),
            name: "b.txt".to_string(),
            bucket: "bucket".to_string(),
            size: 3,
            checksum: Some("abc".to_string()),
            modified: Some(Utc::now()),
            content_type: Some("text/plain".to_string()),
            public_url: None,
        };

        let json = serde_json::to_string(&file).unwrap();
        let back: BucketFile = serde_json::from_str(&json).unwrap();
        assert_eq!(back, file);
        assert_eq!(back.extension(), Some("txt"));
    }

    #[test]
    fn test_guess_content_type() {
        assert_eq!(guess_content_type("clip.MP4"), "video/mp4");
        assert_eq!(guess_content_type("report.pdf"), "application/pdf");
        assert_eq!(guess_content_type("noext"), "application/octet-stream");
    }

    #[test]
    fn test_require_key_rejects_root() {
        assert!(require_key(&ObjectPath::root()).is_err());
        assert_eq!(require_key(&ObjectPath::parse("a/b").unwrap()).unwrap(), "a/b");
    }
}
