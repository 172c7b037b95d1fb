//! Google Drive v3 API client.

use chrono::{DateTime, Utc};
use futures::StreamExt;
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use flextk_auth::http::{check, json, transport_error};
use flextk_auth::TokenCache;
use flextk_common::{Error, Result};

use crate::provider::ByteStream;

/// Google APIs host.
const GOOGLE_API_BASE: &str = "https://www.googleapis.com";

/// Resumable uploads send chunks in multiples of 256 KiB.
pub const CHUNK_SIZE: usize = 32 * 256 * 1024;

pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

const FILE_FIELDS: &str =
    "id,name,mimeType,size,modifiedTime,parents,md5Checksum,webViewLink,trashed";

const LIST_FIELDS: &str =
    "files(id,name,mimeType,size,modifiedTime,parents,md5Checksum,webViewLink,trashed),nextPageToken";

/// Google Drive file metadata from API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    /// Only present for binary files; Drive reports it as a string.
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub modified_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub parents: Vec<String>,
    #[serde(default)]
    pub md5_checksum: Option<String>,
    #[serde(default)]
    pub web_view_link: Option<String>,
    #[serde(default)]
    pub trashed: bool,
}

impl DriveFile {
    pub fn is_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME_TYPE
    }

    pub fn size_bytes(&self) -> Option<u64> {
        self.size.as_ref().and_then(|s| s.parse().ok())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileListResponse {
    files: Vec<DriveFile>,
    #[serde(default)]
    next_page_token: Option<String>,
}

/// Quote a value for use inside a Drive search query.
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

/// Google Drive API client.
pub struct DriveClient {
    http: Client,
    tokens: Arc<TokenCache>,
    api_base: String,
    upload_base: String,
}

impl DriveClient {
    pub fn new(tokens: Arc<TokenCache>) -> Self {
        Self::with_base_url(tokens, GOOGLE_API_BASE)
    }

    /// Client against a different host (mock server).
    pub fn with_base_url(tokens: Arc<TokenCache>, base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            http: Client::new(),
            tokens,
            api_base: format!("{}/drive/v3", base),
            upload_base: format!("{}/upload/drive/v3", base),
        }
    }

    /// Get file metadata by ID.
    pub async fn get_file(&self, file_id: &str) -> Result<DriveFile> {
        let response = self
            .http
            .get(format!("{}/files/{}", self.api_base, file_id))
            .header(header::AUTHORIZATION, self.tokens.bearer().await?)
            .query(&[("fields", FILE_FIELDS)])
            .send()
            .await
            .map_err(|e| transport_error("Drive get file", e))?;

        json(response, "Drive get file").await
    }

    /// Create a folder under `parent_id`.
    pub async fn create_folder(&self, name: &str, parent_id: &str) -> Result<DriveFile> {
        let metadata = serde_json::json!({
            "name": name,
            "mimeType": FOLDER_MIME_TYPE,
            "parents": [parent_id],
        });

        let response = self
            .http
            .post(format!("{}/files", self.api_base))
            .header(header::AUTHORIZATION, self.tokens.bearer().await?)
            .query(&[("fields", FILE_FIELDS)])
            .json(&metadata)
            .send()
            .await
            .map_err(|e| transport_error("Drive create folder", e))?;

        json(response, "Drive create folder").await
    }

    /// List the direct children of a folder.
    pub async fn list_folder(&self, folder_id: &str) -> Result<Vec<DriveFile>> {
        let query = format!("{} in parents and trashed = false", quote(folder_id));
        let mut all_files = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .http
                .get(format!("{}/files", self.api_base))
                .header(header::AUTHORIZATION, self.tokens.bearer().await?)
                .query(&[
                    ("q", query.as_str()),
                    ("fields", LIST_FIELDS),
                    ("pageSize", "1000"),
                ]);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }

            let response = request
                .send()
                .await
                .map_err(|e| transport_error("Drive list", e))?;
            let page: FileListResponse = json(response, "Drive list").await?;
            all_files.extend(page.files);

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(all_files)
    }

    /// Find a child of `parent_id` by exact name.
    pub async fn find_file(&self, name: &str, parent_id: &str) -> Result<Option<DriveFile>> {
        let query = format!(
            "name = {} and {} in parents and trashed = false",
            quote(name),
            quote(parent_id)
        );

        let response = self
            .http
            .get(format!("{}/files", self.api_base))
            .header(header::AUTHORIZATION, self.tokens.bearer().await?)
            .query(&[("q", query.as_str()), ("fields", LIST_FIELDS), ("pageSize", "1")])
            .send()
            .await
            .map_err(|e| transport_error("Drive find", e))?;

        let page: FileListResponse = json(response, "Drive find").await?;
        Ok(page.files.into_iter().next())
    }

    /// Create a file with a single multipart request.
    pub async fn upload_multipart(
        &self,
        name: &str,
        parent_id: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<DriveFile> {
        let metadata = serde_json::json!({
            "name": name,
            "parents": [parent_id],
            "mimeType": content_type,
        });
        let metadata_json = serde_json::to_string(&metadata)
            .map_err(|e| Error::Serialization(format!("Drive metadata: {}", e)))?;

        let boundary = "flextk_boundary";
        let mut body = Vec::with_capacity(data.len() + metadata_json.len() + 256);
        body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
        body.extend_from_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
        body.extend_from_slice(metadata_json.as_bytes());
        body.extend_from_slice(format!("\r\n--{}\r\n", boundary).as_bytes());
        body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", content_type).as_bytes());
        body.extend_from_slice(&data);
        body.extend_from_slice(format!("\r\n--{}--", boundary).as_bytes());

        let response = self
            .http
            .post(format!("{}/files", self.upload_base))
            .header(header::AUTHORIZATION, self.tokens.bearer().await?)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/related; boundary={}", boundary),
            )
            .query(&[("uploadType", "multipart"), ("fields", FILE_FIELDS)])
            .body(body)
            .send()
            .await
            .map_err(|e| transport_error("Drive upload", e))?;

        json(response, "Drive upload").await
    }

    /// Replace the content of an existing file.
    pub async fn update_file(
        &self,
        file_id: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<DriveFile> {
        let response = self
            .http
            .patch(format!("{}/files/{}", self.upload_base, file_id))
            .header(header::AUTHORIZATION, self.tokens.bearer().await?)
            .header(header::CONTENT_TYPE, content_type)
            .query(&[("uploadType", "media"), ("fields", FILE_FIELDS)])
            .body(data)
            .send()
            .await
            .map_err(|e| transport_error("Drive update", e))?;

        json(response, "Drive update").await
    }

    /// Open a resumable upload session and return its URI.
    async fn start_resumable_upload(
        &self,
        name: &str,
        parent_id: &str,
        content_type: &str,
        total_size: u64,
    ) -> Result<String> {
        let metadata = serde_json::json!({
            "name": name,
            "parents": [parent_id],
            "mimeType": content_type,
        });

        let response = self
            .http
            .post(format!("{}/files", self.upload_base))
            .header(header::AUTHORIZATION, self.tokens.bearer().await?)
            .header("X-Upload-Content-Type", content_type)
            .header("X-Upload-Content-Length", total_size.to_string())
            .query(&[("uploadType", "resumable"), ("fields", FILE_FIELDS)])
            .json(&metadata)
            .send()
            .await
            .map_err(|e| transport_error("Drive resumable start", e))?;

        let response = check(response, "Drive resumable start").await?;
        response
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
            .ok_or_else(|| Error::Provider("Drive returned no resumable upload URI".to_string()))
    }

    /// Send one chunk. Returns the file once the final chunk is accepted.
    async fn upload_chunk(
        &self,
        upload_uri: &str,
        chunk: &[u8],
        start_byte: u64,
        total_size: u64,
    ) -> Result<Option<DriveFile>> {
        let end_byte = start_byte + chunk.len() as u64 - 1;
        let response = self
            .http
            .put(upload_uri)
            .header(
                header::CONTENT_RANGE,
                format!("bytes {}-{}/{}", start_byte, end_byte, total_size),
            )
            .body(chunk.to_vec())
            .send()
            .await
            .map_err(|e| transport_error("Drive chunk upload", e))?;

        // 308 Resume Incomplete
        if response.status() == StatusCode::PERMANENT_REDIRECT {
            return Ok(None);
        }
        json(response, "Drive chunk upload").await.map(Some)
    }

    /// Create a file through a resumable session, in [`CHUNK_SIZE`] pieces.
    pub async fn upload_resumable(
        &self,
        name: &str,
        parent_id: &str,
        data: &[u8],
        content_type: &str,
    ) -> Result<DriveFile> {
        let total_size = data.len() as u64;
        let upload_uri = self
            .start_resumable_upload(name, parent_id, content_type, total_size)
            .await?;

        let mut offset = 0u64;
        for chunk in data.chunks(CHUNK_SIZE) {
            debug!("Drive chunk at {} of {}", offset, total_size);
            if let Some(file) = self
                .upload_chunk(&upload_uri, chunk, offset, total_size)
                .await?
            {
                return Ok(file);
            }
            offset += chunk.len() as u64;
        }

        Err(Error::Provider("Drive upload did not complete".to_string()))
    }

    /// Download file content as a stream.
    pub async fn download_stream(&self, file_id: &str) -> Result<ByteStream> {
        let response = self
            .http
            .get(format!("{}/files/{}", self.api_base, file_id))
            .header(header::AUTHORIZATION, self.tokens.bearer().await?)
            .query(&[("alt", "media")])
            .send()
            .await
            .map_err(|e| transport_error("Drive download", e))?;

        let response = check(response, "Drive download").await?;
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| transport_error("Drive download", e)));
        Ok(Box::pin(stream))
    }

    /// Delete a file permanently (bypassing the trash).
    pub async fn delete(&self, file_id: &str) -> Result<()> {
        let response = self
            .http
            .delete(format!("{}/files/{}", self.api_base, file_id))
            .header(header::AUTHORIZATION, self.tokens.bearer().await?)
            .send()
            .await
            .map_err(|e| transport_error("Drive delete", e))?;

        check(response, "Drive delete").await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flextk_auth::StaticToken;
    use wiremock::matchers::{header as header_eq, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> DriveClient {
        DriveClient::with_base_url(
            Arc::new(TokenCache::new(Arc::new(StaticToken::new("tok")))),
            &server.uri(),
        )
    }

    #[test]
    fn test_drive_file_is_folder() {
        let folder: DriveFile = serde_json::from_value(serde_json::json!({
            "id": "1", "name": "folder", "mimeType": FOLDER_MIME_TYPE
        }))
        .unwrap();
        assert!(folder.is_folder());
        assert_eq!(folder.size_bytes(), None);

        let file: DriveFile = serde_json::from_value(serde_json::json!({
            "id": "2", "name": "a.txt", "mimeType": "text/plain", "size": "12345"
        }))
        .unwrap();
        assert!(!file.is_folder());
        assert_eq!(file.size_bytes(), Some(12345));
    }

    #[test]
    fn test_query_quoting() {
        assert_eq!(quote("it's"), "'it\\'s'");
        assert_eq!(quote("a\\b"), "'a\\\\b'");
    }

    #[tokio::test]
    async fn test_find_file_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/files"))
            .and(header_eq("authorization", "Bearer tok"))
            .and(query_param(
                "q",
                "name = 'docs' and 'root' in parents and trashed = false",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "files": [{ "id": "f1", "name": "docs", "mimeType": FOLDER_MIME_TYPE }]
            })))
            .mount(&server)
            .await;

        let found = client(&server).find_file("docs", "root").await.unwrap();
        assert_eq!(found.map(|f| f.id), Some("f1".to_string()));
    }

    #[tokio::test]
    async fn test_resumable_upload_sends_chunks() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/upload/drive/v3/files"))
            .and(query_param("uploadType", "resumable"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Location", format!("{}/session/1", server.uri()).as_str()),
            )
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/session/1"))
            .and(header_eq("content-range", "bytes 0-4/5"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "new", "name": "big.bin", "mimeType": "application/octet-stream", "size": "5"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let file = client(&server)
            .upload_resumable("big.bin", "root", b"hello", "application/octet-stream")
            .await
            .unwrap();
        assert_eq!(file.id, "new");
    }

    #[tokio::test]
    async fn test_forbidden_is_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/files/x"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let result = client(&server).get_file("x").await;
        assert!(matches!(result, Err(Error::Auth(_))));
    }
}
