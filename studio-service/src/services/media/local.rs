//! Filesystem media store for local development.

use super::{DataUri, MediaError, MediaStore, StoredAsset};
use async_trait::async_trait;
use reqwest::Client;
use std::path::PathBuf;
use tokio::fs;
use uuid::Uuid;

pub struct LocalMediaStore {
    base_path: PathBuf,
    public_base_url: String,
    client: Client,
}

impl LocalMediaStore {
    pub async fn new(
        base_path: impl Into<PathBuf>,
        public_base_url: impl Into<String>,
    ) -> Result<Self, MediaError> {
        let base_path = base_path.into();
        if !base_path.exists() {
            fs::create_dir_all(&base_path).await?;
        }
        Ok(Self {
            base_path,
            public_base_url: public_base_url.into(),
            client: Client::new(),
        })
    }

    async fn fetch(&self, url: &str) -> Result<DataUri, MediaError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| MediaError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(MediaError::Api {
                status: status.as_u16(),
                message: format!("fetching {} failed", url),
            });
        }

        let mime_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("image/png")
            .to_string();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| MediaError::Network(e.to_string()))?;

        Ok(DataUri {
            mime_type,
            bytes: bytes.to_vec(),
        })
    }

    fn path_for(&self, asset_id: &str) -> Result<PathBuf, MediaError> {
        if asset_id.is_empty() || asset_id.contains(['/', '\\']) || asset_id.starts_with('.') {
            return Err(MediaError::InvalidSource(format!(
                "invalid asset id: {}",
                asset_id
            )));
        }
        Ok(self.base_path.join(asset_id))
    }
}

#[async_trait]
impl MediaStore for LocalMediaStore {
    async fn upload(&self, source: &str) -> Result<StoredAsset, MediaError> {
        let image = if source.starts_with("data:") {
            DataUri::parse(source)?
        } else if source.starts_with("http://") || source.starts_with("https://") {
            self.fetch(source).await?
        } else {
            return Err(MediaError::InvalidSource(
                "expected a data URI or an http(s) URL".into(),
            ));
        };

        let asset_id = format!("{}.{}", Uuid::new_v4(), image.extension());
        fs::write(self.path_for(&asset_id)?, &image.bytes).await?;

        tracing::debug!(asset_id = %asset_id, bytes = image.bytes.len(), "Image stored locally");

        Ok(StoredAsset {
            url: format!("{}/{}", self.public_base_url.trim_end_matches('/'), asset_id),
            asset_id,
        })
    }

    async fn delete(&self, asset_id: &str) -> Result<(), MediaError> {
        let path = self.path_for(asset_id)?;
        if path.exists() {
            fs::remove_file(path).await?;
        }
        Ok(())
    }
}
