//! Google Cloud Storage via the JSON API.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use flextk_auth::http::{check, json, transport_error};
use flextk_auth::{scopes, ServiceAccount, ServiceAccountSource, TokenCache};
use flextk_common::{Error, ObjectPath, Result};
use flextk_config::settings::GcsSettings;

use crate::provider::{guess_content_type, require_key, BucketFile, ByteStream, ObjectStore};

/// Public GCS endpoint.
const GCS_API_BASE: &str = "https://storage.googleapis.com";

/// Characters escaped when an object name is a single path segment.
const OBJECT_NAME: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Same, but keeping `/` for public URLs.
const OBJECT_PATH: &AsciiSet = &OBJECT_NAME.remove(b'/');

/// Object resource as returned by the JSON API.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GcsObject {
    name: String,
    bucket: String,
    #[serde(default)]
    generation: Option<String>,
    #[serde(default)]
    size: Option<String>,
    #[serde(default)]
    md5_hash: Option<String>,
    #[serde(default)]
    content_type: Option<String>,
    #[serde(default)]
    updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectList {
    #[serde(default)]
    items: Vec<GcsObject>,
    /// Common prefixes, only present when listing with a delimiter.
    #[serde(default)]
    prefixes: Vec<String>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RewriteResponse {
    done: bool,
    #[serde(default)]
    rewrite_token: Option<String>,
    #[serde(default)]
    resource: Option<GcsObject>,
}

/// A bucket as reported by the bucket listing of a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GcsBucket {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub project_number: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub location_type: Option<String>,
    #[serde(default)]
    pub storage_class: Option<String>,
    #[serde(default)]
    pub etag: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub time_created: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BucketList {
    #[serde(default)]
    items: Vec<GcsBucket>,
    #[serde(default)]
    next_page_token: Option<String>,
}

/// Content type GCS consoles give zero-byte folder placeholders.
const FOLDER_CONTENT_TYPE: &str = "application/x-www-form-urlencoded;charset=UTF-8";

/// Google Cloud Storage bucket.
pub struct GcsStore {
    bucket: String,
    project_id: Option<String>,
    base_url: String,
    http: Client,
    tokens: Arc<TokenCache>,
}

impl GcsStore {
    /// Create a store for `bucket` authenticated through `tokens`.
    pub fn new(bucket: impl Into<String>, tokens: Arc<TokenCache>) -> Self {
        Self {
            bucket: bucket.into(),
            project_id: None,
            base_url: GCS_API_BASE.to_string(),
            http: Client::new(),
            tokens,
        }
    }

    /// Build from stored settings, loading the service-account key.
    ///
    /// # Errors
    /// - `NotFound` if the key file is missing
    /// - `InvalidInput` if the key file is malformed
    pub fn from_settings(settings: &GcsSettings) -> Result<Self> {
        let account = ServiceAccount::load(&settings.service_account)?;
        let project_id = account.project_id.clone();
        let source = ServiceAccountSource::new(account, &[scopes::DEVSTORAGE_READ_WRITE]);
        Ok(Self::new(
            settings.bucket_name.clone(),
            Arc::new(TokenCache::new(Arc::new(source))),
        )
        .with_project(project_id))
    }

    /// Project whose buckets [`GcsStore::list_buckets`] enumerates.
    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    /// Point the store at a different endpoint (emulator or mock server).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn object_url(&self, key: &str) -> String {
        format!(
            "{}/storage/v1/b/{}/o/{}",
            self.base_url,
            self.bucket,
            utf8_percent_encode(key, OBJECT_NAME)
        )
    }

    fn to_bucket_file(&self, object: GcsObject) -> BucketFile {
        let name = object
            .name
            .rsplit('/')
            .next()
            .unwrap_or(&object.name)
            .to_string();
        BucketFile {
            id: object.generation.unwrap_or_default(),
            public_url: Some(public_url(&object.bucket, &object.name)),
            size: object.size.and_then(|s| s.parse().ok()).unwrap_or(0),
            checksum: object.md5_hash.as_deref().and_then(md5_base64_to_hex),
            modified: object.updated,
            content_type: object.content_type,
            path: object.name,
            name,
            bucket: object.bucket,
        }
    }

    /// Buckets of the configured project, optionally filtered by name
    /// prefix and capped at `max_results`.
    ///
    /// # Errors
    /// - `InvalidInput` if no project is known
    pub async fn list_buckets(
        &self,
        prefix: Option<&str>,
        max_results: Option<usize>,
    ) -> Result<Vec<GcsBucket>> {
        let project = self.project_id.as_deref().ok_or_else(|| {
            Error::InvalidInput("Listing buckets needs a project id".to_string())
        })?;
        let url = format!("{}/storage/v1/b", self.base_url);
        let mut buckets = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .http
                .get(&url)
                .header(header::AUTHORIZATION, self.tokens.bearer().await?)
                .query(&[("project", project)]);
            if let Some(prefix) = prefix {
                request = request.query(&[("prefix", prefix)]);
            }
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }

            let response = request
                .send()
                .await
                .map_err(|e| transport_error("GCS list buckets", e))?;
            let page: BucketList = json(response, "GCS list buckets").await?;
            buckets.extend(page.items);

            if max_results.is_some_and(|max| buckets.len() >= max) {
                break;
            }
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        if let Some(max) = max_results {
            buckets.truncate(max);
        }
        Ok(buckets)
    }

    /// Copy an object within this bucket, or into `destination_bucket`.
    /// Large objects take several rewrite rounds; they are followed until
    /// GCS reports the copy done.
    ///
    /// # Errors
    /// - `NotFound` if the source object does not exist
    pub async fn copy_object(
        &self,
        source: &ObjectPath,
        destination: &ObjectPath,
        destination_bucket: Option<&str>,
    ) -> Result<BucketFile> {
        let source_key = require_key(source)?;
        let destination_key = require_key(destination)?;
        let destination_bucket = destination_bucket.unwrap_or(&self.bucket);
        let url = format!(
            "{}/rewriteTo/b/{}/o/{}",
            self.object_url(&source_key),
            destination_bucket,
            utf8_percent_encode(&destination_key, OBJECT_NAME)
        );

        let mut rewrite_token: Option<String> = None;
        loop {
            let mut request = self
                .http
                .post(&url)
                .header(header::AUTHORIZATION, self.tokens.bearer().await?)
                .header(header::CONTENT_LENGTH, 0);
            if let Some(token) = &rewrite_token {
                request = request.query(&[("rewriteToken", token.as_str())]);
            }
            let response = request
                .send()
                .await
                .map_err(|e| transport_error("GCS copy", e))?;
            let round: RewriteResponse = json(response, "GCS copy").await?;

            if round.done {
                let object = round.resource.ok_or_else(|| {
                    Error::Provider("GCS copy finished without an object resource".to_string())
                })?;
                info!(
                    "Copied gs://{}/{} to gs://{}/{}",
                    self.bucket, source_key, destination_bucket, destination_key
                );
                return Ok(self.to_bucket_file(object));
            }
            rewrite_token = Some(round.rewrite_token.ok_or_else(|| {
                Error::Provider("GCS copy is unfinished but has no rewrite token".to_string())
            })?);
            debug!("GCS copy of {} continues", source_key);
        }
    }

    /// Copy, then delete the source.
    pub async fn move_object(
        &self,
        source: &ObjectPath,
        destination: &ObjectPath,
        destination_bucket: Option<&str>,
    ) -> Result<BucketFile> {
        let file = self
            .copy_object(source, destination, destination_bucket)
            .await?;
        self.delete(source).await?;
        Ok(file)
    }

    /// Create the zero-byte `folder/` placeholder object.
    pub async fn create_folder(&self, folder: &ObjectPath) -> Result<BucketFile> {
        let key = require_key(folder)?;
        let name = format!("{}/", key);
        let url = format!("{}/upload/storage/v1/b/{}/o", self.base_url, self.bucket);
        let response = self
            .http
            .post(&url)
            .header(header::AUTHORIZATION, self.tokens.bearer().await?)
            .header(header::CONTENT_TYPE, FOLDER_CONTENT_TYPE)
            .query(&[("uploadType", "media"), ("name", name.as_str())])
            .body(Vec::new())
            .send()
            .await
            .map_err(|e| transport_error("GCS create folder", e))?;

        let object: GcsObject = json(response, "GCS create folder").await?;
        info!("Created folder gs://{}/{}", self.bucket, name);
        Ok(self.to_bucket_file(object))
    }

    /// Names of the immediate sub-folders of `parent`.
    pub async fn list_folders(&self, parent: &ObjectPath) -> Result<Vec<String>> {
        let prefix = parent.prefix();
        let url = format!("{}/storage/v1/b/{}/o", self.base_url, self.bucket);
        let mut folders = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .http
                .get(&url)
                .header(header::AUTHORIZATION, self.tokens.bearer().await?)
                .query(&[
                    ("prefix", prefix.as_str()),
                    ("delimiter", "/"),
                    ("projection", "noAcl"),
                ]);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }

            let response = request
                .send()
                .await
                .map_err(|e| transport_error("GCS list folders", e))?;
            let page: ObjectList = json(response, "GCS list folders").await?;
            folders.extend(page.prefixes.iter().filter_map(|p| {
                p.strip_prefix(prefix.as_str())
                    .map(|rest| rest.trim_end_matches('/').to_string())
                    .filter(|name| !name.is_empty())
            }));

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(folders)
    }
}

fn public_url(bucket: &str, key: &str) -> String {
    format!(
        "https://storage.googleapis.com/{}/{}",
        bucket,
        utf8_percent_encode(key, OBJECT_PATH)
    )
}

/// GCS reports MD5 digests base64-encoded; the rest of flextk uses hex.
fn md5_base64_to_hex(encoded: &str) -> Option<String> {
    STANDARD.decode(encoded).ok().map(|raw| {
        raw.iter().map(|b| format!("{:02x}", b)).collect()
    })
}

#[async_trait]
impl ObjectStore for GcsStore {
    fn name(&self) -> &str {
        "gcs"
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn upload(
        &self,
        path: &ObjectPath,
        data: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<BucketFile> {
        let key = require_key(path)?;
        let content_type = content_type.unwrap_or_else(|| guess_content_type(&key));
        let local_md5 = format!("{:x}", md5::compute(&data));
        let size = data.len();

        let url = format!("{}/upload/storage/v1/b/{}/o", self.base_url, self.bucket);
        let response = self
            .http
            .post(&url)
            .header(header::AUTHORIZATION, self.tokens.bearer().await?)
            .header(header::CONTENT_TYPE, content_type)
            .query(&[("uploadType", "media"), ("name", key.as_str())])
            .body(data)
            .send()
            .await
            .map_err(|e| transport_error("GCS upload", e))?;

        let object: GcsObject = json(response, "GCS upload").await?;
        let file = self.to_bucket_file(object);

        if let Some(remote) = &file.checksum {
            if *remote != local_md5 {
                return Err(Error::Provider(format!(
                    "GCS upload of {} stored checksum {} but sent {}",
                    key, remote, local_md5
                )));
            }
        }

        info!("Uploaded {} bytes to gs://{}/{}", size, self.bucket, key);
        Ok(file)
    }

    async fn download_stream(&self, path: &ObjectPath) -> Result<ByteStream> {
        let key = require_key(path)?;
        let response = self
            .http
            .get(self.object_url(&key))
            .header(header::AUTHORIZATION, self.tokens.bearer().await?)
            .query(&[("alt", "media")])
            .send()
            .await
            .map_err(|e| transport_error("GCS download", e))?;

        let response = check(response, "GCS download").await?;
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| transport_error("GCS download", e)));
        Ok(Box::pin(stream))
    }

    async fn list(&self, prefix: &ObjectPath) -> Result<Vec<BucketFile>> {
        let prefix = prefix.prefix();
        let url = format!("{}/storage/v1/b/{}/o", self.base_url, self.bucket);
        let mut files = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .http
                .get(&url)
                .header(header::AUTHORIZATION, self.tokens.bearer().await?)
                .query(&[("prefix", prefix.as_str())]);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }

            let response = request
                .send()
                .await
                .map_err(|e| transport_error("GCS list", e))?;
            let page: ObjectList = json(response, "GCS list").await?;
            files.extend(page.items.into_iter().map(|o| self.to_bucket_file(o)));

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        debug!("Listed {} objects under gs://{}/{}", files.len(), self.bucket, prefix);
        Ok(files)
    }

    async fn metadata(&self, path: &ObjectPath) -> Result<BucketFile> {
        let key = require_key(path)?;
        let response = self
            .http
            .get(self.object_url(&key))
            .header(header::AUTHORIZATION, self.tokens.bearer().await?)
            .send()
            .await
            .map_err(|e| transport_error("GCS metadata", e))?;

        let object: GcsObject = json(response, "GCS metadata").await?;
        Ok(self.to_bucket_file(object))
    }

    async fn delete(&self, path: &ObjectPath) -> Result<()> {
        let key = require_key(path)?;
        let response = self
            .http
            .delete(self.object_url(&key))
            .header(header::AUTHORIZATION, self.tokens.bearer().await?)
            .send()
            .await
            .map_err(|e| transport_error("GCS delete", e))?;

        check(response, "GCS delete").await?;
        info!("Deleted gs://{}/{}", self.bucket, key);
        Ok(())
    }
}
