//! Media storage for course images and lesson videos.
//!
//! The catalog only ever keeps the URL handed back by [`BlobStore::upload`].

use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use uuid::Uuid;

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn upload(&self, bytes: Vec<u8>, content_type: &str) -> Result<String>;
}

/// Object name for an upload: random stem, extension from the content type.
pub fn object_name(content_type: &str) -> String {
    let ext = match content_type.split(';').next().unwrap_or("").trim() {
        "image/png" => "png",
        "image/jpeg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "video/mp4" => "mp4",
        "video/webm" => "webm",
        "application/pdf" => "pdf",
        _ => "bin",
    };
    format!("{}.{}", Uuid::new_v4(), ext)
}

/// Writes under `DATA_DIR/media`; the router serves that directory at `/media`.
pub struct LocalBlobStore {
    root: PathBuf,
    public_base_url: String,
}

impl LocalBlobStore {
    pub fn new(data_dir: PathBuf, public_base_url: impl Into<String>) -> Self {
        Self {
            root: data_dir.join("media"),
            public_base_url: public_base_url.into(),
        }
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn upload(&self, bytes: Vec<u8>, content_type: &str) -> Result<String> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("creating {}", self.root.display()))?;
        let name = object_name(content_type);
        tokio::fs::write(self.root.join(&name), bytes).await?;
        Ok(format!("{}/media/{}", self.public_base_url, name))
    }
}

/// PUTs objects to `{endpoint}/storage/v1/object/{bucket}/{name}`.
pub struct HttpBlobStore {
    client: reqwest::Client,
    endpoint: String,
    bucket: String,
    token: Option<String>,
}

impl HttpBlobStore {
    pub fn new(endpoint: String, bucket: String, token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            bucket,
            token,
        }
    }

    fn object_path(&self, name: &str) -> String {
        format!(
            "{}/{}",
            utf8_percent_encode(&self.bucket, NON_ALPHANUMERIC),
            utf8_percent_encode(name, NON_ALPHANUMERIC)
        )
    }
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    async fn upload(&self, bytes: Vec<u8>, content_type: &str) -> Result<String> {
        let path = self.object_path(&object_name(content_type));
        let mut req = self
            .client
            .put(format!("{}/storage/v1/object/{}", self.endpoint, path))
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        req.send()
            .await
            .context("blob upload request")?
            .error_for_status()
            .context("blob upload rejected")?;
        Ok(format!("{}/storage/v1/object/public/{}", self.endpoint, path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_name_uses_content_type_extension() {
        assert!(object_name("image/png").ends_with(".png"));
        assert!(object_name("video/mp4; codecs=avc1").ends_with(".mp4"));
        assert!(object_name("application/x-unknown").ends_with(".bin"));
    }

    #[test]
    fn http_object_path_is_percent_encoded() {
        let store = HttpBlobStore::new("http://blob".into(), "course images".into(), None);
        assert_eq!(store.object_path("a.png"), "course%20images/a%2Epng");
    }

    #[tokio::test]
    async fn local_store_writes_file_and_returns_public_url() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path().to_path_buf(), "http://localhost:8081");
        let url = store.upload(b"png-bytes".to_vec(), "image/png").await.unwrap();
        assert!(url.starts_with("http://localhost:8081/media/"));
        let name = url.rsplit('/').next().unwrap();
        let written = tokio::fs::read(store.root().join(name)).await.unwrap();
        assert_eq!(written, b"png-bytes");
    }
}
