//! Cloudinary media store using signed upload and destroy calls.

use super::{MediaError, MediaStore, StoredAsset};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::Deserialize;
use service_core::retry::{retry_async, RetryConfig};
use sha2::{Digest, Sha256};
use std::time::Instant;

use crate::config::{CloudinaryConfig, HttpClientConfig};
use crate::services::metrics::record_external_call;

pub struct CloudinaryStore {
    client: Client,
    config: CloudinaryConfig,
    retry: RetryConfig,
}

impl CloudinaryStore {
    pub fn new(config: CloudinaryConfig, http: &HttpClientConfig) -> Result<Self, MediaError> {
        let client = Client::builder()
            .timeout(http.timeout)
            .build()
            .map_err(|e| MediaError::NotConfigured(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            config,
            retry: http.retry.clone(),
        })
    }

    pub fn is_configured(&self) -> bool {
        !self.config.cloud_name.is_empty()
            && !self.config.api_key.is_empty()
            && !self.config.api_secret.expose_secret().is_empty()
    }

    fn endpoint(&self, action: &str) -> String {
        format!(
            "{}/{}/image/{}",
            self.config.api_base_url.trim_end_matches('/'),
            self.config.cloud_name,
            action
        )
    }

    /// Signs `params` as Cloudinary expects: sorted `k=v` pairs joined by `&`,
    /// with the API secret appended, hashed with SHA-256.
    fn sign(&self, params: &[(&str, &str)]) -> String {
        let mut sorted = params.to_vec();
        sorted.sort_by(|a, b| a.0.cmp(b.0));
        let to_sign = sorted
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");

        let mut hasher = Sha256::new();
        hasher.update(to_sign.as_bytes());
        hasher.update(self.config.api_secret.expose_secret().as_bytes());
        hex::encode(hasher.finalize())
    }

    async fn signed_post<T: serde::de::DeserializeOwned>(
        &self,
        operation: &'static str,
        action: &str,
        signed: &[(&str, &str)],
        unsigned: &[(&str, &str)],
    ) -> Result<T, MediaError> {
        if !self.is_configured() {
            return Err(MediaError::NotConfigured(
                "Cloudinary credentials are not set".into(),
            ));
        }

        let url = self.endpoint(action);
        let start = Instant::now();
        let result = retry_async(&self.retry, operation, || async {
            // Signatures are bound to the timestamp, so each attempt signs afresh.
            let timestamp = chrono::Utc::now().timestamp().to_string();
            let mut to_sign = signed.to_vec();
            to_sign.push(("timestamp", timestamp.as_str()));
            let signature = self.sign(&to_sign);

            let mut form: Vec<(&str, &str)> = to_sign;
            form.extend_from_slice(unsigned);
            form.push(("api_key", self.config.api_key.as_str()));
            form.push(("signature", signature.as_str()));
            form.push(("signature_algorithm", "sha256"));

            let response = self
                .client
                .post(&url)
                .form(&form)
                .send()
                .await
                .map_err(|e| MediaError::Network(e.to_string()))?;

            let status = response.status();
            let body = response
                .text()
                .await
                .map_err(|e| MediaError::Network(e.to_string()))?;

            if !status.is_success() {
                let message = serde_json::from_str::<CloudinaryErrorResponse>(&body)
                    .map(|e| e.error.message)
                    .unwrap_or(body);
                return Err(MediaError::Api {
                    status: status.as_u16(),
                    message,
                });
            }

            serde_json::from_str(&body).map_err(|e| MediaError::Api {
                status: status.as_u16(),
                message: format!("unexpected response: {}", e),
            })
        })
        .await;
        record_external_call("cloudinary", operation, start.elapsed().as_secs_f64());
        result
    }
}

#[async_trait]
impl MediaStore for CloudinaryStore {
    async fn upload(&self, source: &str) -> Result<StoredAsset, MediaError> {
        let response: UploadResponse = self
            .signed_post(
                "upload",
                "upload",
                &[("folder", self.config.folder.as_str())],
                &[("file", source)],
            )
            .await?;

        tracing::info!(asset_id = %response.public_id, "Image uploaded to Cloudinary");

        Ok(StoredAsset {
            url: response.secure_url,
            asset_id: response.public_id,
        })
    }

    async fn delete(&self, asset_id: &str) -> Result<(), MediaError> {
        let response: DestroyResponse = self
            .signed_post("destroy", "destroy", &[("public_id", asset_id)], &[])
            .await?;

        match response.result.as_str() {
            "ok" => Ok(()),
            "not found" => {
                tracing::debug!(asset_id, "Cloudinary asset already gone");
                Ok(())
            }
            other => Err(MediaError::Api {
                status: 200,
                message: format!("destroy returned {}", other),
            }),
        }
    }
}

#[derive(Deserialize)]
struct UploadResponse {
    public_id: String,
    secure_url: String,
}

#[derive(Deserialize)]
struct DestroyResponse {
    result: String,
}

#[derive(Deserialize)]
struct CloudinaryErrorResponse {
    error: CloudinaryErrorDetail,
}

#[derive(Deserialize)]
struct CloudinaryErrorDetail {
    message: String,
}
