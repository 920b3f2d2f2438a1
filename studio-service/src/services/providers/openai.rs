//! OpenAI provider implementation.
//!
//! Descriptions go through the chat completions endpoint with a vision model;
//! images come from the images endpoint.

use super::{GeneratedImage, GenerativeModel, ProviderError};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, Secret};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use service_core::retry::{retry_async, RetryConfig};
use std::time::Instant;

use crate::config::{HttpClientConfig, ModelConfig};
use crate::services::metrics::record_external_call;

pub const DESCRIBE_INSTRUCTION: &str =
    "Describe the image in detail (colors, features, theme, style, etc)";

/// OpenAI provider configuration.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: Secret<String>,
    pub api_base_url: String,
    pub vision_model: String,
    pub image_model: String,
    pub image_size: String,
    pub image_quality: String,
    pub describe_max_tokens: u32,
}

impl From<&ModelConfig> for OpenAiConfig {
    fn from(config: &ModelConfig) -> Self {
        Self {
            api_key: config.api_key.clone(),
            api_base_url: config.api_base_url.clone(),
            vision_model: config.vision_model.clone(),
            image_model: config.image_model.clone(),
            image_size: config.image_size.clone(),
            image_quality: config.image_quality.clone(),
            describe_max_tokens: config.describe_max_tokens,
        }
    }
}

pub struct OpenAiModel {
    config: OpenAiConfig,
    client: Client,
    retry: RetryConfig,
}

impl OpenAiModel {
    pub fn new(config: OpenAiConfig, http: &HttpClientConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(http.timeout)
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {}", e)))?;

        Ok(Self {
            config,
            client,
            retry: http.retry.clone(),
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/{}", self.config.api_base_url.trim_end_matches('/'), path)
    }

    async fn post<B, T>(&self, operation: &'static str, path: &str, body: &B) -> Result<T, ProviderError>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        if self.config.api_key.expose_secret().is_empty() {
            return Err(ProviderError::NotConfigured("OPENAI_API_KEY is empty".into()));
        }

        let url = self.api_url(path);
        let start = Instant::now();
        let result = retry_async(&self.retry, operation, || async {
            let response = self
                .client
                .post(&url)
                .bearer_auth(self.config.api_key.expose_secret())
                .json(body)
                .send()
                .await
                .map_err(|e| ProviderError::NetworkError(e.to_string()))?;
            parse_response(response).await
        })
        .await;
        record_external_call("openai", operation, start.elapsed().as_secs_f64());
        result
    }
}

async fn parse_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ProviderError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| ProviderError::NetworkError(e.to_string()))?;

    if status.is_success() {
        return serde_json::from_str(&body)
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()));
    }

    let detail = serde_json::from_str::<ErrorResponse>(&body)
        .map(|r| r.error)
        .unwrap_or(ErrorDetail {
            message: body.clone(),
            code: None,
        });

    tracing::warn!(
        status = %status,
        code = ?detail.code,
        "OpenAI API request failed"
    );

    if detail.code.as_deref() == Some("content_policy_violation") {
        return Err(ProviderError::PolicyViolation(detail.message));
    }
    match status.as_u16() {
        429 => Err(ProviderError::RateLimited),
        s if s >= 500 => Err(ProviderError::ApiError(format!("{}: {}", status, detail.message))),
        _ => Err(ProviderError::InvalidRequest(detail.message)),
    }
}

#[async_trait]
impl GenerativeModel for OpenAiModel {
    async fn describe(&self, image: &str) -> Result<String, ProviderError> {
        let request = ChatCompletionRequest {
            model: &self.config.vision_model,
            messages: vec![ChatMessage {
                role: "user",
                content: vec![
                    ContentPart::ImageUrl {
                        image_url: ImageUrl { url: image },
                    },
                    ContentPart::Text {
                        text: DESCRIBE_INSTRUCTION,
                    },
                ],
            }],
            max_tokens: self.config.describe_max_tokens,
        };

        tracing::debug!(model = %self.config.vision_model, "Requesting image description");

        let response: ChatCompletionResponse =
            self.post("describe", "chat/completions", &request).await?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ProviderError::InvalidResponse("No description in response".into()))
    }

    async fn generate(&self, prompt: &str) -> Result<GeneratedImage, ProviderError> {
        let request = ImageGenerationRequest {
            model: &self.config.image_model,
            prompt,
            size: &self.config.image_size,
            quality: &self.config.image_quality,
            n: 1,
        };

        tracing::debug!(
            model = %self.config.image_model,
            prompt_len = prompt.len(),
            "Requesting image generation"
        );

        let response: ImageGenerationResponse =
            self.post("generate", "images/generations", &request).await?;

        let image = response
            .data
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::InvalidResponse("No image in response".into()))?;

        match (image.url, image.revised_prompt) {
            (Some(url), revised) => Ok(GeneratedImage {
                url,
                revised_prompt: revised.unwrap_or_else(|| prompt.to_string()),
            }),
            (None, _) => Err(ProviderError::InvalidResponse(
                "Image response carried no URL".into(),
            )),
        }
    }
}

// OpenAI API types

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: Vec<ContentPart<'a>>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl<'a> },
}

#[derive(Serialize)]
struct ImageUrl<'a> {
    url: &'a str,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Serialize)]
struct ImageGenerationRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    size: &'a str,
    quality: &'a str,
    n: u32,
}

#[derive(Deserialize)]
struct ImageGenerationResponse {
    data: Vec<ImageData>,
}

#[derive(Deserialize)]
struct ImageData {
    url: Option<String>,
    revised_prompt: Option<String>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
    code: Option<String>,
}
