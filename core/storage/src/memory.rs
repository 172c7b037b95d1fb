//! In-memory object store for tests and dry runs.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::stream;
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use flextk_common::{Error, ObjectPath, Result};

use crate::provider::{guess_content_type, require_key, BucketFile, ByteStream, ObjectStore};

/// In-memory object store.
///
/// Keys are kept in a sorted map so listings come back in key order, the
/// same order GCS and S3 use.
pub struct MemoryStore {
    bucket: String,
    objects: RwLock<BTreeMap<String, (Bytes, BucketFile)>>,
}

impl MemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::with_bucket("memory")
    }

    /// Create an empty store reporting `bucket` as its bucket name.
    pub fn with_bucket(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            objects: RwLock::new(BTreeMap::new()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
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
        let name = path.name().unwrap_or_default().to_string();

        let file = BucketFile {
            id: Uuid::new_v4().to_string(),
            path: key.clone(),
            content_type: Some(
                content_type
                    .unwrap_or_else(|| guess_content_type(&name))
                    .to_string(),
            ),
            name,
            bucket: self.bucket.clone(),
            size: data.len() as u64,
            checksum: Some(format!("{:x}", md5::compute(&data))),
            modified: Some(Utc::now()),
            public_url: None,
        };

        self.objects
            .write()
            .await
            .insert(key, (Bytes::from(data), file.clone()));

        Ok(file)
    }

    async fn download_stream(&self, path: &ObjectPath) -> Result<ByteStream> {
        let key = require_key(path)?;
        let objects = self.objects.read().await;
        let (data, _) = objects
            .get(&key)
            .ok_or_else(|| Error::NotFound(format!("Object not found: {}", key)))?;
        let data = data.clone();
        Ok(Box::pin(stream::once(async move { Ok(data) })))
    }

    async fn list(&self, prefix: &ObjectPath) -> Result<Vec<BucketFile>> {
        let prefix = prefix.prefix();
        let objects = self.objects.read().await;
        Ok(objects
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .map(|(_, (_, file))| file.clone())
            .collect())
    }

    async fn metadata(&self, path: &ObjectPath) -> Result<BucketFile> {
        let key = require_key(path)?;
        self.objects
            .read()
            .await
            .get(&key)
            .map(|(_, file)| file.clone())
            .ok_or_else(|| Error::NotFound(format!("Object not found: {}", key)))
    }

    async fn delete(&self, path: &ObjectPath) -> Result<()> {
        let key = require_key(path)?;
        self.objects
            .write()
            .await
            .remove(&key)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("Object not found: {}", key)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> ObjectPath {
        ObjectPath::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_upload_download() {
        let store = MemoryStore::new();

        let file = store.upload(&p("docs/a.txt"), b"hello".to_vec(), None).await.unwrap();
        assert_eq!(file.size, 5);
        assert_eq!(file.content_type.as_deref(), Some("text/plain"));
        assert_eq!(
            file.checksum.as_deref(),
            Some("5d41402abc4b2a76b9719d911017c592")
        );

        assert_eq!(store.download(&p("docs/a.txt")).await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_list_by_prefix() {
        let store = MemoryStore::new();
        store.upload(&p("docs/a.txt"), vec![1], None).await.unwrap();
        store.upload(&p("docs/b.txt"), vec![2], None).await.unwrap();
        store.upload(&p("docsx/c.txt"), vec![3], None).await.unwrap();
        store.upload(&p("img/d.png"), vec![4], None).await.unwrap();

        let docs = store.list(&p("docs")).await.unwrap();
        let names: Vec<_> = docs.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(names, vec!["docs/a.txt", "docs/b.txt"]);

        assert_eq!(store.list(&ObjectPath::root()).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_delete_and_exists() {
        let store = MemoryStore::new();
        store.upload(&p("a.txt"), vec![1], None).await.unwrap();

        assert!(store.exists(&p("a.txt")).await.unwrap());
        store.delete(&p("a.txt")).await.unwrap();
        assert!(!store.exists(&p("a.txt")).await.unwrap());

        assert!(matches!(store.delete(&p("a.txt")).await, Err(Error::NotFound(_))));
        assert!(matches!(store.download(&p("a.txt")).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_overwrite_replaces_content() {
        let store = MemoryStore::new();
        store.upload(&p("a.txt"), b"one".to_vec(), None).await.unwrap();
        store.upload(&p("a.txt"), b"three".to_vec(), None).await.unwrap();

        assert_eq!(store.download(&p("a.txt")).await.unwrap(), b"three");
        assert_eq!(store.metadata(&p("a.txt")).await.unwrap().size, 5);
    }

    #[tokio::test]
    async fn test_root_is_not_an_object() {
        let store = MemoryStore::new();
        let result = store.upload(&ObjectPath::root(), vec![], None).await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }
}
