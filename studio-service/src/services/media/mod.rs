//! Media storage for uploaded and generated images.

pub mod cloudinary;
pub mod local;

use async_trait::async_trait;
use base64::Engine;
use service_core::retry::Retryable;
use thiserror::Error;

pub use cloudinary::CloudinaryStore;
pub use local::LocalMediaStore;

#[derive(Error, Debug)]
pub enum MediaError {
    #[error("Media store not configured: {0}")]
    NotConfigured(String),

    #[error("Invalid media source: {0}")]
    InvalidSource(String),

    #[error("Media API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Retryable for MediaError {
    fn is_retryable(&self) -> bool {
        match self {
            MediaError::Network(_) => true,
            MediaError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// A stored asset: a stable public URL plus the identifier needed to delete it.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredAsset {
    pub url: String,
    pub asset_id: String,
}

#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Store an image given as a `data:` URI or a fetchable URL.
    async fn upload(&self, source: &str) -> Result<StoredAsset, MediaError>;

    async fn delete(&self, asset_id: &str) -> Result<(), MediaError>;
}

/// Decoded `data:<mime>;base64,<payload>` URI.
#[derive(Debug)]
pub struct DataUri {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl DataUri {
    pub fn parse(source: &str) -> Result<Self, MediaError> {
        let rest = source
            .strip_prefix("data:")
            .ok_or_else(|| MediaError::InvalidSource("not a data URI".into()))?;
        let (meta, payload) = rest
            .split_once(',')
            .ok_or_else(|| MediaError::InvalidSource("data URI has no payload".into()))?;
        let mime_type = meta
            .strip_suffix(";base64")
            .ok_or_else(|| MediaError::InvalidSource("data URI is not base64".into()))?;

        let bytes = base64::engine::general_purpose::STANDARD
            .decode(payload.trim())
            .map_err(|e| MediaError::InvalidSource(e.to_string()))?;

        Ok(Self {
            mime_type: mime_type.to_string(),
            bytes,
        })
    }

    pub fn extension(&self) -> &'static str {
        match self.mime_type.as_str() {
            "image/jpeg" | "image/jpg" => "jpg",
            "image/gif" => "gif",
            "image/webp" => "webp",
            _ => "png",
        }
    }
}
