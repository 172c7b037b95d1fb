//! BackBlaze B2 via the native v2 API.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{TimeZone, Utc};
use futures::StreamExt;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::str::FromStr;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use flextk_auth::http::{check, json as read_json, transport_error};
use flextk_common::{Error, ObjectPath, Result, SecretString};
use flextk_config::settings::Bb2Settings;

use crate::provider::{guess_content_type, require_key, BucketFile, ByteStream, ObjectStore};

const B2_AUTH_BASE: &str = "https://api.backblazeb2.com";

/// B2 file names are percent-encoded in headers and URLs, except `/`.
const FILE_NAME: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b'/');

const LIST_PAGE_SIZE: u32 = 1000;

/// Bucket visibility as B2 names it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum B2BucketType {
    AllPublic,
    AllPrivate,
    Snapshot,
    Share,
    Restricted,
}

impl B2BucketType {
    /// Only public and private buckets can be created through the API.
    pub fn is_creatable(&self) -> bool {
        matches!(self, B2BucketType::AllPublic | B2BucketType::AllPrivate)
    }

    fn as_str(&self) -> &'static str {
        match self {
            B2BucketType::AllPublic => "allPublic",
            B2BucketType::AllPrivate => "allPrivate",
            B2BucketType::Snapshot => "snapshot",
            B2BucketType::Share => "share",
            B2BucketType::Restricted => "restricted",
        }
    }
}

impl fmt::Display for B2BucketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for B2BucketType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "allPublic" | "public" => Ok(B2BucketType::AllPublic),
            "allPrivate" | "private" => Ok(B2BucketType::AllPrivate),
            "snapshot" => Ok(B2BucketType::Snapshot),
            "share" => Ok(B2BucketType::Share),
            "restricted" => Ok(B2BucketType::Restricted),
            other => Err(Error::InvalidInput(format!(
                "Unknown B2 bucket type '{}'",
                other
            ))),
        }
    }
}

/// A bucket as reported by `b2_list_buckets`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct B2Bucket {
    pub bucket_id: String,
    pub bucket_name: String,
    pub bucket_type: B2BucketType,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Session {
    account_id: String,
    authorization_token: String,
    api_url: String,
    download_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadTarget {
    upload_url: String,
    authorization_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct B2File {
    file_id: Option<String>,
    file_name: String,
    #[serde(default)]
    content_length: u64,
    #[serde(default)]
    content_sha1: Option<String>,
    #[serde(default)]
    content_type: Option<String>,
    #[serde(default)]
    upload_timestamp: Option<i64>,
    #[serde(default)]
    action: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileNames {
    files: Vec<B2File>,
    next_file_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BucketList {
    buckets: Vec<B2Bucket>,
}

/// A B2 bucket.
///
/// The account is authorized lazily on first use and the session is
/// reused for the rest of the invocation.
pub struct B2Store {
    app_id: String,
    app_key: SecretString,
    bucket: Option<String>,
    auth_base: String,
    http: Client,
    session: OnceCell<Session>,
    bucket_id: OnceCell<String>,
}

impl B2Store {
    /// Create a store from an application key. `bucket` may be `None` for
    /// account-level calls such as [`B2Store::create_bucket`].
    pub fn new(app_id: impl Into<String>, app_key: SecretString, bucket: Option<String>) -> Self {
        Self {
            app_id: app_id.into(),
            app_key,
            bucket,
            auth_base: B2_AUTH_BASE.to_string(),
            http: Client::new(),
            session: OnceCell::new(),
            bucket_id: OnceCell::new(),
        }
    }

    /// Build from stored settings.
    pub fn from_settings(settings: &Bb2Settings) -> Self {
        Self::new(
            settings.app_id.clone(),
            settings.app_key.clone(),
            settings.bucket_name.clone(),
        )
    }

    /// Use a different bucket than the configured one.
    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = Some(bucket.into());
        self.bucket_id = OnceCell::new();
        self
    }

    /// Point authorization at a different endpoint (mock server).
    pub fn with_auth_base(mut self, base: impl Into<String>) -> Self {
        self.auth_base = base.into().trim_end_matches('/').to_string();
        self
    }

    fn bucket_name(&self) -> Result<&str> {
        self.bucket.as_deref().ok_or_else(|| {
            Error::InvalidInput("No B2 bucket configured; pass --bucket_name".to_string())
        })
    }

    async fn session(&self) -> Result<&Session> {
        self.session
            .get_or_try_init(|| async {
                debug!("Authorizing B2 account {}", self.app_id);
                let credentials =
                    STANDARD.encode(format!("{}:{}", self.app_id, self.app_key.expose()));
                let response = self
                    .http
                    .get(format!("{}/b2api/v2/b2_authorize_account", self.auth_base))
                    .header(header::AUTHORIZATION, format!("Basic {}", credentials))
                    .send()
                    .await
                    .map_err(|e| transport_error("B2 authorize", e))?;
                read_json(response, "B2 authorize").await
            })
            .await
    }

    async fn api<T: serde::de::DeserializeOwned>(
        &self,
        call: &str,
        body: serde_json::Value,
    ) -> Result<T> {
        let session = self.session().await?;
        let response = self
            .http
            .post(format!("{}/b2api/v2/{}", session.api_url, call))
            .header(header::AUTHORIZATION, &session.authorization_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(call, e))?;
        read_json(response, call).await
    }

    async fn bucket_id(&self) -> Result<&str> {
        let id = self
            .bucket_id
            .get_or_try_init(|| async {
                let name = self.bucket_name()?;
                let session = self.session().await?;
                let list: BucketList = self
                    .api(
                        "b2_list_buckets",
                        json!({ "accountId": session.account_id, "bucketName": name }),
                    )
                    .await?;
                list.buckets
                    .into_iter()
                    .find(|b| b.bucket_name == name)
                    .map(|b| b.bucket_id)
                    .ok_or_else(|| Error::NotFound(format!("B2 bucket '{}'", name)))
            })
            .await?;
        Ok(id.as_str())
    }

    /// All buckets visible to the application key.
    pub async fn list_buckets(&self) -> Result<Vec<B2Bucket>> {
        let session = self.session().await?;
        let list: BucketList = self
            .api("b2_list_buckets", json!({ "accountId": session.account_id }))
            .await?;
        Ok(list.buckets)
    }

    /// Create a bucket.
    ///
    /// # Errors
    /// - `InvalidInput` for bucket types B2 does not allow creating
    /// - `Provider` if the name is taken or invalid
    pub async fn create_bucket(&self, name: &str, bucket_type: B2BucketType) -> Result<B2Bucket> {
        if !bucket_type.is_creatable() {
            return Err(Error::InvalidInput(format!(
                "Buckets of type {} cannot be created",
                bucket_type
            )));
        }
        let session = self.session().await?;
        let bucket: B2Bucket = self
            .api(
                "b2_create_bucket",
                json!({
                    "accountId": session.account_id,
                    "bucketName": name,
                    "bucketType": bucket_type.as_str(),
                }),
            )
            .await?;
        info!("Created B2 bucket {} ({})", bucket.bucket_name, bucket.bucket_type);
        Ok(bucket)
    }

    /// Delete the configured bucket. B2 refuses while it still holds files.
    ///
    /// # Errors
    /// - `NotFound` if the bucket does not exist
    /// - `Provider` if the bucket is not empty
    pub async fn delete_bucket(&self) -> Result<B2Bucket> {
        let bucket_id = self.bucket_id().await?.to_string();
        let session = self.session().await?;
        let bucket: B2Bucket = self
            .api(
                "b2_delete_bucket",
                json!({ "accountId": session.account_id, "bucketId": bucket_id }),
            )
            .await?;
        info!("Deleted B2 bucket {}", bucket.bucket_name);
        Ok(bucket)
    }

    /// Change the visibility and/or the info map of the configured bucket.
    ///
    /// # Errors
    /// - `InvalidInput` if nothing would change, or for a bucket type that
    ///   cannot be set through the API
    pub async fn update_bucket(
        &self,
        bucket_type: Option<B2BucketType>,
        bucket_info: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<B2Bucket> {
        if bucket_type.is_none() && bucket_info.is_none() {
            return Err(Error::InvalidInput(
                "Nothing to update; give a bucket type or bucket info".to_string(),
            ));
        }
        if let Some(kind) = bucket_type.filter(|t| !t.is_creatable()) {
            return Err(Error::InvalidInput(format!(
                "Bucket type cannot be changed to {}",
                kind
            )));
        }

        let bucket_id = self.bucket_id().await?.to_string();
        let session = self.session().await?;
        let mut body = json!({ "accountId": session.account_id, "bucketId": bucket_id });
        if let Some(kind) = bucket_type {
            body["bucketType"] = json!(kind.as_str());
        }
        if let Some(info) = bucket_info {
            body["bucketInfo"] = serde_json::Value::Object(info);
        }

        let bucket: B2Bucket = self.api("b2_update_bucket", body).await?;
        info!("Updated B2 bucket {} ({})", bucket.bucket_name, bucket.bucket_type);
        Ok(bucket)
    }

    /// Descriptor of one file version, looked up by its B2 file id.
    ///
    /// # Errors
    /// - `InvalidInput` if `file_id` is blank
    /// - `NotFound` if B2 does not know the id
    pub async fn file_details(&self, file_id: &str) -> Result<BucketFile> {
        if file_id.trim().is_empty() {
            return Err(Error::InvalidInput("File id cannot be empty".to_string()));
        }
        let file: B2File = self
            .api("b2_get_file_info", json!({ "fileId": file_id }))
            .await?;
        self.to_bucket_file(self.session().await?, file)
    }

    /// Friendly download URL for an object. With `valid_for_secs`, a
    /// download authorization is attached so the URL works for private
    /// buckets until it expires.
    pub async fn download_url(
        &self,
        path: &ObjectPath,
        valid_for_secs: Option<u64>,
    ) -> Result<String> {
        let key = require_key(path)?;
        let session = self.session().await?;
        let url = self.friendly_url(session, &key)?;

        match valid_for_secs {
            None => Ok(url),
            Some(secs) => {
                #[derive(Deserialize)]
                #[serde(rename_all = "camelCase")]
                struct DownloadAuth {
                    authorization_token: String,
                }
                let bucket_id = self.bucket_id().await?;
                let auth: DownloadAuth = self
                    .api(
                        "b2_get_download_authorization",
                        json!({
                            "bucketId": bucket_id,
                            "fileNamePrefix": key,
                            "validDurationInSeconds": secs,
                        }),
                    )
                    .await?;
                Ok(format!("{}?Authorization={}", url, auth.authorization_token))
            }
        }
    }

    fn friendly_url(&self, session: &Session, key: &str) -> Result<String> {
        Ok(format!(
            "{}/file/{}/{}",
            session.download_url,
            self.bucket_name()?,
            utf8_percent_encode(key, FILE_NAME)
        ))
    }

    fn to_bucket_file(&self, session: &Session, file: B2File) -> Result<BucketFile> {
        let name = file
            .file_name
            .rsplit('/')
            .next()
            .unwrap_or(&file.file_name)
            .to_string();
        Ok(BucketFile {
            id: file.file_id.unwrap_or_default(),
            public_url: Some(self.friendly_url(session, &file.file_name)?),
            bucket: self.bucket_name()?.to_string(),
            size: file.content_length,
            checksum: file.content_sha1.filter(|s| s != "none"),
            modified: file
                .upload_timestamp
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
            content_type: file.content_type,
            path: file.file_name,
            name,
        })
    }

    async fn find_file(&self, key: &str) -> Result<B2File> {
        let bucket_id = self.bucket_id().await?;
        let page: FileNames = self
            .api(
                "b2_list_file_names",
                json!({
                    "bucketId": bucket_id,
                    "prefix": key,
                    "startFileName": key,
                    "maxFileCount": 1,
                }),
            )
            .await?;
        page.files
            .into_iter()
            .find(|f| f.file_name == key)
            .ok_or_else(|| Error::NotFound(format!("B2 object {}", key)))
    }
}

#[async_trait]
impl ObjectStore for B2Store {
    fn name(&self) -> &str {
        "bb2"
    }

    fn bucket(&self) -> &str {
        self.bucket.as_deref().unwrap_or_default()
    }

    async fn upload(
        &self,
        path: &ObjectPath,
        data: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<BucketFile> {
        let key = require_key(path)?;
        let bucket_id = self.bucket_id().await?;
        let target: UploadTarget = self
            .api("b2_get_upload_url", json!({ "bucketId": bucket_id }))
            .await?;

        let content_type = content_type.unwrap_or_else(|| guess_content_type(&key));
        let size = data.len();
        let response = self
            .http
            .post(&target.upload_url)
            .header(header::AUTHORIZATION, &target.authorization_token)
            .header("X-Bz-File-Name", utf8_percent_encode(&key, FILE_NAME).to_string())
            .header(header::CONTENT_TYPE, content_type)
            .header("X-Bz-Content-Sha1", "do_not_verify")
            .body(data)
            .send()
            .await
            .map_err(|e| transport_error("B2 upload", e))?;

        let file: B2File = read_json(response, "B2 upload").await?;
        info!("Uploaded {} bytes to b2://{}/{}", size, self.bucket(), key);
        self.to_bucket_file(self.session().await?, file)
    }

    async fn download_stream(&self, path: &ObjectPath) -> Result<ByteStream> {
        let key = require_key(path)?;
        let session = self.session().await?;
        let response = self
            .http
            .get(self.friendly_url(session, &key)?)
            .header(header::AUTHORIZATION, &session.authorization_token)
            .send()
            .await
            .map_err(|e| transport_error("B2 download", e))?;

        let response = check(response, "B2 download").await?;
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| transport_error("B2 download", e)));
        Ok(Box::pin(stream))
    }

    async fn list(&self, prefix: &ObjectPath) -> Result<Vec<BucketFile>> {
        let prefix = prefix.prefix();
        let bucket_id = self.bucket_id().await?.to_string();
        let session = self.session().await?;
        let mut files = Vec::new();
        let mut start: Option<String> = None;

        loop {
            let mut body = json!({
                "bucketId": bucket_id,
                "prefix": prefix,
                "maxFileCount": LIST_PAGE_SIZE,
            });
            if let Some(name) = &start {
                body["startFileName"] = json!(name);
            }

            let page: FileNames = self.api("b2_list_file_names", body).await?;
            for file in page.files {
                if file.action.as_deref().unwrap_or("upload") == "upload" {
                    files.push(self.to_bucket_file(session, file)?);
                }
            }

            match page.next_file_name {
                Some(next) => start = Some(next),
                None => break,
            }
        }

        Ok(files)
    }

    async fn metadata(&self, path: &ObjectPath) -> Result<BucketFile> {
        let key = require_key(path)?;
        let file = self.find_file(&key).await?;
        self.to_bucket_file(self.session().await?, file)
    }

    async fn delete(&self, path: &ObjectPath) -> Result<()> {
        let key = require_key(path)?;
        let file = self.find_file(&key).await?;
        let file_id = file
            .file_id
            .ok_or_else(|| Error::Provider(format!("B2 returned no file id for {}", key)))?;

        let _: serde_json::Value = self
            .api(
                "b2_delete_file_version",
                json!({ "fileName": key, "fileId": file_id }),
            )
            .await?;
        info!("Deleted b2://{}/{}", self.bucket(), key);
        Ok(())
    }
}
