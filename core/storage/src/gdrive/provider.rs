//! Google Drive object store.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use flextk_auth::{
    scopes, RefreshTokenSource, ServiceAccount, ServiceAccountSource, TokenCache, TokenSource,
};
use flextk_common::{Error, ObjectPath, Result};
use flextk_config::settings::DriveSettings;

use crate::provider::{guess_content_type, require_key, BucketFile, ByteStream, ObjectStore};

use super::client::{DriveClient, DriveFile};

/// Files above this size go through a resumable session.
const RESUMABLE_THRESHOLD: usize = 5 * 1024 * 1024;

/// Drive presented as a bucket rooted at one folder.
///
/// Object keys map onto nested folders. Drive has no path index, so each
/// component is looked up by name and the resulting ids are cached for the
/// lifetime of the store.
pub struct DriveStore {
    root_id: String,
    client: DriveClient,
    /// Object key to file id. The root folder is the empty key.
    path_cache: RwLock<HashMap<String, String>>,
}

impl DriveStore {
    /// Create a store rooted at `root_id` (`"root"` is My Drive).
    pub fn new(client: DriveClient, root_id: impl Into<String>) -> Self {
        let root_id = root_id.into();
        let mut path_cache = HashMap::new();
        path_cache.insert(String::new(), root_id.clone());

        Self {
            root_id,
            client,
            path_cache: RwLock::new(path_cache),
        }
    }

    /// Build from stored settings. A service account takes precedence over
    /// an OAuth refresh token.
    ///
    /// # Errors
    /// - `InvalidInput` if neither credential kind is complete
    /// - `NotFound` if the service-account key file is missing
    pub fn from_settings(settings: &DriveSettings) -> Result<Self> {
        let source: Arc<dyn TokenSource> = match (
            &settings.service_account,
            &settings.client_id,
            &settings.client_secret,
            &settings.refresh_token,
        ) {
            (Some(path), _, _, _) => Arc::new(ServiceAccountSource::new(
                ServiceAccount::load(path)?,
                &[scopes::DRIVE],
            )),
            (None, Some(id), Some(secret), Some(refresh)) => Arc::new(RefreshTokenSource::new(
                id.clone(),
                secret.clone(),
                refresh.clone(),
            )?),
            _ => {
                return Err(Error::InvalidInput(
                    "drive needs a service account or an OAuth refresh token".to_string(),
                ))
            }
        };

        let client = DriveClient::new(Arc::new(TokenCache::new(source)));
        Ok(Self::new(
            client,
            settings.folder_id.clone().unwrap_or_else(|| "root".to_string()),
        ))
    }

    async fn cached(&self, key: &str) -> Option<String> {
        self.path_cache.read().await.get(key).cloned()
    }

    async fn cache_path(&self, key: &str, file_id: &str) {
        self.path_cache
            .write()
            .await
            .insert(key.to_string(), file_id.to_string());
    }

    /// Resolve a path to a file id by walking folders from the root.
    ///
    /// With `create`, missing folders along the way are created.
    async fn resolve(&self, components: &[String], create: bool) -> Result<String> {
        let mut current_id = self.root_id.clone();
        let mut current_key = String::new();

        for component in components {
            if !current_key.is_empty() {
                current_key.push('/');
            }
            current_key.push_str(component);

            if let Some(id) = self.cached(&current_key).await {
                current_id = id;
                continue;
            }

            let found = self.client.find_file(component, &current_id).await?;
            current_id = match found {
                Some(file) => file.id,
                None if create => {
                    debug!("Creating Drive folder {}", current_key);
                    self.client.create_folder(component, &current_id).await?.id
                }
                None => {
                    return Err(Error::NotFound(format!(
                        "Drive path not found: {}",
                        current_key
                    )))
                }
            };
            self.cache_path(&current_key, &current_id).await;
        }

        Ok(current_id)
    }

    async fn resolve_path(&self, path: &ObjectPath) -> Result<String> {
        if let Some(id) = self.cached(&path.key()).await {
            return Ok(id);
        }
        self.resolve(path.components(), false).await
    }

    fn to_bucket_file(&self, file: DriveFile, key: String) -> BucketFile {
        BucketFile {
            size: file.size_bytes().unwrap_or(0),
            id: file.id,
            path: key,
            name: file.name,
            bucket: self.root_id.clone(),
            checksum: file.md5_checksum,
            modified: file.modified_time,
            content_type: Some(file.mime_type),
            public_url: file.web_view_link,
        }
    }

    /// Collect every non-folder below `folder_id`, depth first.
    async fn walk(&self, folder_id: String, prefix: String) -> Result<Vec<BucketFile>> {
        let mut results = Vec::new();
        let mut pending = vec![(folder_id, prefix)];

        while let Some((folder_id, prefix)) = pending.pop() {
            for file in self.client.list_folder(&folder_id).await? {
                let key = if prefix.is_empty() {
                    file.name.clone()
                } else {
                    format!("{}/{}", prefix, file.name)
                };
                self.cache_path(&key, &file.id).await;

                if file.is_folder() {
                    pending.push((file.id, key));
                } else {
                    results.push(self.to_bucket_file(file, key));
                }
            }
        }

        results.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(results)
    }
}

#[async_trait]
impl ObjectStore for DriveStore {
    fn name(&self) -> &str {
        "drive"
    }

    fn bucket(&self) -> &str {
        &self.root_id
    }

    async fn upload(
        &self,
        path: &ObjectPath,
        data: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<BucketFile> {
        let key = require_key(path)?;
        let components = path.components();
        let (name, parents) = match components.split_last() {
            Some(split) => split,
            None => return Err(Error::InvalidInput("Empty Drive path".to_string())),
        };
        let parent_id = self.resolve(parents, true).await?;
        let content_type = content_type.unwrap_or_else(|| guess_content_type(name));
        let size = data.len();

        let file = match self.client.find_file(name, &parent_id).await? {
            Some(existing) if existing.is_folder() => {
                return Err(Error::AlreadyExists(format!(
                    "A Drive folder already exists at {}",
                    key
                )))
            }
            Some(existing) => {
                self.client
                    .update_file(&existing.id, data, content_type)
                    .await?
            }
            None if size > RESUMABLE_THRESHOLD => {
                self.client
                    .upload_resumable(name, &parent_id, &data, content_type)
                    .await?
            }
            None => {
                self.client
                    .upload_multipart(name, &parent_id, data, content_type)
                    .await?
            }
        };

        self.cache_path(&key, &file.id).await;
        info!("Uploaded {} bytes to Drive {}", size, key);
        Ok(self.to_bucket_file(file, key))
    }

    async fn download_stream(&self, path: &ObjectPath) -> Result<ByteStream> {
        require_key(path)?;
        let file_id = self.resolve_path(path).await?;
        self.client.download_stream(&file_id).await
    }

    async fn list(&self, prefix: &ObjectPath) -> Result<Vec<BucketFile>> {
        let folder_id = self.resolve_path(prefix).await?;
        self.walk(folder_id, prefix.key()).await
    }

    async fn metadata(&self, path: &ObjectPath) -> Result<BucketFile> {
        let key = require_key(path)?;
        let file_id = self.resolve_path(path).await?;
        let file = self.client.get_file(&file_id).await?;
        Ok(self.to_bucket_file(file, key))
    }

    async fn delete(&self, path: &ObjectPath) -> Result<()> {
        let key = require_key(path)?;
        let file_id = self.resolve_path(path).await?;
        self.client.delete(&file_id).await?;

        // Cached descendants of a deleted folder are stale too.
        let nested = format!("{}/", key);
        self.path_cache
            .write()
            .await
            .retain(|k, _| k != &key && !k.starts_with(&nested));

        info!("Deleted Drive {}", key);
        Ok(())
    }
}
