//! Unsplash photo search and download.

use futures::StreamExt;
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use flextk_auth::http::{check, json as read_json, transport_error};
use flextk_common::{Error, Result, SecretString};
use flextk_config::settings::UnsplashSettings;

const UNSPLASH_API_BASE: &str = "https://api.unsplash.com";

/// `photos/random` serves at most this many photos per call.
pub const MAX_RANDOM_COUNT: u32 = 30;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotoUrls {
    pub raw: String,
    pub full: String,
    pub regular: String,
    pub small: String,
    pub thumb: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotoLinks {
    pub html: String,
    pub download: String,
    /// Must be hit when a photo is downloaded, per Unsplash API terms.
    pub download_location: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotoUser {
    pub username: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Photo {
    pub id: String,
    #[serde(default)]
    pub slug: Option<String>,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub alt_description: Option<String>,
    #[serde(default)]
    pub likes: u64,
    pub urls: PhotoUrls,
    pub links: PhotoLinks,
    pub user: PhotoUser,
}

impl Photo {
    /// File extension from the `fm=` parameter of the image URL.
    pub fn extension(&self) -> &str {
        self.urls
            .regular
            .split(['?', '&'])
            .find_map(|part| part.strip_prefix("fm="))
            .filter(|ext| !ext.is_empty())
            .unwrap_or("jpg")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResults {
    pub total: u64,
    pub total_pages: u64,
    pub results: Vec<Photo>,
}

/// Rendition to download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PhotoSize {
    Raw,
    Full,
    #[default]
    Regular,
    Small,
    Thumb,
}

impl PhotoSize {
    fn url<'a>(&self, urls: &'a PhotoUrls) -> &'a str {
        match self {
            PhotoSize::Raw => &urls.raw,
            PhotoSize::Full => &urls.full,
            PhotoSize::Regular => &urls.regular,
            PhotoSize::Small => &urls.small,
            PhotoSize::Thumb => &urls.thumb,
        }
    }
}

impl std::str::FromStr for PhotoSize {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "raw" => Ok(PhotoSize::Raw),
            "full" => Ok(PhotoSize::Full),
            "regular" => Ok(PhotoSize::Regular),
            "small" => Ok(PhotoSize::Small),
            "thumb" | "thumbnail" => Ok(PhotoSize::Thumb),
            other => Err(Error::InvalidInput(format!("Unknown photo size '{}'", other))),
        }
    }
}

/// Unsplash API client using public (`Client-ID`) authentication.
pub struct UnsplashClient {
    access_key: SecretString,
    base_url: String,
    http: Client,
}

impl UnsplashClient {
    pub fn new(access_key: SecretString) -> Self {
        Self {
            access_key,
            base_url: UNSPLASH_API_BASE.to_string(),
            http: Client::new(),
        }
    }

    pub fn from_settings(settings: &UnsplashSettings) -> Self {
        Self::new(settings.access_key.clone())
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
        what: &str,
    ) -> Result<T> {
        let response = self
            .http
            .get(url)
            .header(
                header::AUTHORIZATION,
                format!("Client-ID {}", self.access_key.expose()),
            )
            .header("Accept-Version", "v1")
            .query(query)
            .send()
            .await
            .map_err(|e| transport_error(what, e))?;
        read_json(response, what).await
    }

    /// Search photos by keyword.
    pub async fn search_photos(&self, query: &str, per_page: u32) -> Result<SearchResults> {
        if query.trim().is_empty() {
            return Err(Error::InvalidInput("Search query cannot be empty".to_string()));
        }
        self.get(
            &format!("{}/search/photos", self.base_url),
            &[
                ("query", query.to_string()),
                ("per_page", per_page.clamp(1, 30).to_string()),
            ],
            "Unsplash search",
        )
        .await
    }

    /// Random photos; `count` is capped at [`MAX_RANDOM_COUNT`].
    pub async fn random_photos(&self, count: u32) -> Result<Vec<Photo>> {
        self.get(
            &format!("{}/photos/random", self.base_url),
            &[("count", count.clamp(1, MAX_RANDOM_COUNT).to_string())],
            "Unsplash random",
        )
        .await
    }

    /// Download one photo into `dir` as `{slug or id}.{ext}`.
    ///
    /// # Errors
    /// - `InvalidInput` if `dir` is not an existing directory
    /// - `Io` if the file cannot be written
    pub async fn download_photo(
        &self,
        photo: &Photo,
        size: PhotoSize,
        dir: &Path,
    ) -> Result<PathBuf> {
        if !dir.is_dir() {
            return Err(Error::InvalidInput(format!(
                "Download path is not a directory: {}",
                dir.display()
            )));
        }

        // Counts the download on Unsplash's side; the image itself comes
        // from the CDN URL.
        let _: serde_json::Value = self
            .get(&photo.links.download_location, &[], "Unsplash download tracking")
            .await?;

        let stem = photo.slug.as_deref().unwrap_or(&photo.id);
        let target = dir.join(format!("{}.{}", stem, photo.extension()));

        let response = self
            .http
            .get(size.url(&photo.urls))
            .send()
            .await
            .map_err(|e| transport_error("Unsplash download", e))?;
        let response = check(response, "Unsplash download").await?;

        let mut file = tokio::fs::File::create(&target).await?;
        let mut stream = response.bytes_stream();
        let mut written = 0usize;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| transport_error("Unsplash download", e))?;
            written += chunk.len();
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        debug!("Wrote {} bytes", written);
        info!("Downloaded photo {} to {}", photo.id, target.display());
        Ok(target)
    }

    /// Search and download every result into `dir`.
    pub async fn download_search(
        &self,
        query: &str,
        per_page: u32,
        size: PhotoSize,
        dir: &Path,
    ) -> Result<Vec<PathBuf>> {
        let results = self.search_photos(query, per_page).await?;
        let mut paths = Vec::with_capacity(results.results.len());
        for photo in &results.results {
            paths.push(self.download_photo(photo, size, dir).await?);
        }
        Ok(paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header as header_eq, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn photo_json(base: &str) -> serde_json::Value {
        serde_json::json!({
            "id": "abc",
            "slug": "red-fox",
            "width": 4000,
            "height": 3000,
            "color": "#c06030",
            "alt_description": "a fox",
            "likes": 12,
            "urls": {
                "raw": format!("{}/img/raw?ixid=1", base),
                "full": format!("{}/img/full?ixid=1&fm=jpg", base),
                "regular": format!("{}/img/regular?ixid=1&fm=png&w=1080", base),
                "small": format!("{}/img/small", base),
                "thumb": format!("{}/img/thumb", base)
            },
            "links": {
                "html": "https://unsplash.com/photos/abc",
                "download": "https://unsplash.com/photos/abc/download",
                "download_location": format!("{}/photos/abc/download?ixid=1", base)
            },
            "user": { "username": "ada", "name": "Ada" }
        })
    }

    fn client(server: &MockServer) -> UnsplashClient {
        UnsplashClient::new("key".into()).with_base_url(server.uri())
    }

    #[tokio::test]
    async fn test_search_photos() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search/photos"))
            .and(query_param("query", "fox"))
            .and(query_param("per_page", "5"))
            .and(header_eq("authorization", "Client-ID key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "total": 1,
                "total_pages": 1,
                "results": [photo_json(&server.uri())]
            })))
            .mount(&server)
            .await;

        let results = client(&server).search_photos("fox", 5).await.unwrap();
        assert_eq!(results.total, 1);
        assert_eq!(results.results[0].extension(), "png");
        assert_eq!(results.results[0].user.username, "ada");
    }

    #[tokio::test]
    async fn test_random_count_is_capped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/photos/random"))
            .and(query_param("count", "30"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!([photo_json(&server.uri())])),
            )
            .expect(1)
            .mount(&server)
            .await;

        let photos = client(&server).random_photos(100).await.unwrap();
        assert_eq!(photos.len(), 1);
    }

    #[tokio::test]
    async fn test_download_photo_writes_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/photos/abc/download"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "url": "x" })),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/img/regular"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"PNGDATA".to_vec()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let photo: Photo = serde_json::from_value(photo_json(&server.uri())).unwrap();
        let path = client(&server)
            .download_photo(&photo, PhotoSize::Regular, dir.path())
            .await
            .unwrap();

        assert_eq!(path, dir.path().join("red-fox.png"));
        assert_eq!(std::fs::read(&path).unwrap(), b"PNGDATA");
    }

    #[tokio::test]
    async fn test_download_into_missing_dir_fails() {
        let server = MockServer::start().await;
        let photo: Photo = serde_json::from_value(photo_json(&server.uri())).unwrap();
        let result = client(&server)
            .download_photo(&photo, PhotoSize::Small, Path::new("/definitely/not/here"))
            .await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_extension_defaults_to_jpg() {
        let mut photo: Photo = serde_json::from_value(photo_json("http://x")).unwrap();
        photo.urls.regular = "http://x/img".to_string();
        assert_eq!(photo.extension(), "jpg");
        assert_eq!("thumbnail".parse::<PhotoSize>().unwrap(), PhotoSize::Thumb);
    }
}
