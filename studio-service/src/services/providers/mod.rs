//! Generative model abstractions and implementations.
//!
//! The orchestrator only sees [`GenerativeModel`]; OpenAI backs it in
//! production and [`mock::MockModel`] in tests and local runs.

pub mod mock;
pub mod openai;

use async_trait::async_trait;
use service_core::retry::Retryable;
use thiserror::Error;

/// Error type for provider operations.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Rate limited")]
    RateLimited,

    /// The model refused the input. Carries the provider's explanation.
    #[error("Content policy violation: {0}")]
    PolicyViolation(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl Retryable for ProviderError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited | ProviderError::NetworkError(_) | ProviderError::ApiError(_)
        )
    }
}

/// A generated image, still hosted by the provider.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedImage {
    pub url: String,
    pub revised_prompt: String,
}

#[async_trait]
pub trait GenerativeModel: Send + Sync {
    /// Describe an image (data URI or URL) in prose.
    async fn describe(&self, image: &str) -> Result<String, ProviderError>;

    /// Generate one image for the prompt.
    async fn generate(&self, prompt: &str) -> Result<GeneratedImage, ProviderError>;
}
