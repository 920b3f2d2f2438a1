//! Error taxonomy for studio operations and its HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::services::billing::BillingError;
use crate::services::media::MediaError;
use crate::services::providers::ProviderError;
use crate::services::store::StoreError;

pub const QUOTA_EXCEEDED_MESSAGE: &str = "You have reached limit of free messages.";

#[derive(Debug, Error)]
pub enum StudioError {
    #[error("{0}")]
    Validation(String),

    #[error("Validation failed: {0}")]
    InvalidInput(#[from] validator::ValidationErrors),

    #[error("{0}")]
    Unauthenticated(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Authorization(String),

    #[error("{}", QUOTA_EXCEEDED_MESSAGE)]
    QuotaExceeded,

    /// The generative model refused the prompt; the reason has been recorded
    /// as an assistant message.
    #[error("Content policy violation: {reason}")]
    ContentPolicyViolation { reason: String },

    #[error("{operation} failed: {message}")]
    ExternalProvider {
        operation: &'static str,
        message: String,
        retryable: bool,
    },

    #[error("Webhook Error: {0}")]
    SignatureVerification(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl StudioError {
    pub fn code(&self) -> &'static str {
        match self {
            StudioError::Validation(_) | StudioError::InvalidInput(_) => "VALIDATION_ERROR",
            StudioError::Unauthenticated(_) => "UNAUTHORIZED",
            StudioError::NotFound(_) => "NOT_FOUND",
            StudioError::Authorization(_) => "FORBIDDEN",
            StudioError::QuotaExceeded => "QUOTA_EXCEEDED",
            StudioError::ContentPolicyViolation { .. } => "CONTENT_POLICY_VIOLATION",
            StudioError::ExternalProvider { .. } | StudioError::Internal(_) => "INTERNAL",
            StudioError::SignatureVerification(_) => "SIGNATURE_VERIFICATION",
            StudioError::Unavailable(_) => "SERVICE_UNAVAILABLE",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            StudioError::Validation(_)
            | StudioError::InvalidInput(_)
            | StudioError::SignatureVerification(_) => StatusCode::BAD_REQUEST,
            StudioError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            StudioError::NotFound(_) => StatusCode::NOT_FOUND,
            StudioError::Authorization(_) | StudioError::QuotaExceeded => StatusCode::FORBIDDEN,
            StudioError::ContentPolicyViolation { .. }
            | StudioError::ExternalProvider { .. }
            | StudioError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            StudioError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// The message shown to the caller. Provider and database detail stays in the logs.
    fn public_message(&self) -> String {
        match self {
            StudioError::ContentPolicyViolation { .. } => "Failed to generate image".to_string(),
            StudioError::ExternalProvider { operation, .. } => format!("Failed to {}", operation),
            StudioError::Unavailable(_) => "Service temporarily unavailable".to_string(),
            StudioError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }

    pub fn provider(operation: &'static str, err: impl std::fmt::Display, retryable: bool) -> Self {
        StudioError::ExternalProvider {
            operation,
            message: err.to_string(),
            retryable,
        }
    }
}

impl From<StoreError> for StudioError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) => StudioError::Unavailable(msg),
            other => StudioError::Internal(other.to_string()),
        }
    }
}

impl From<BillingError> for StudioError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::Signature(reason) => StudioError::SignatureVerification(reason),
            other => {
                let retryable = service_core::retry::Retryable::is_retryable(&other);
                StudioError::provider("reach billing provider", other, retryable)
            }
        }
    }
}

impl From<MediaError> for StudioError {
    fn from(err: MediaError) -> Self {
        let retryable = service_core::retry::Retryable::is_retryable(&err);
        StudioError::provider("store media", err, retryable)
    }
}

impl From<ProviderError> for StudioError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::PolicyViolation(reason) => StudioError::ContentPolicyViolation { reason },
            other => {
                let retryable = service_core::retry::Retryable::is_retryable(&other);
                StudioError::provider("generate image", other, retryable)
            }
        }
    }
}

impl IntoResponse for StudioError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: String,
            code: &'static str,
        }

        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, code = self.code(), "Request failed");
        } else {
            tracing::info!(error = %self, code = self.code(), "Request rejected");
        }

        if let StudioError::SignatureVerification(_) = self {
            return (status, self.to_string()).into_response();
        }

        (
            status,
            Json(ErrorResponse {
                error: self.public_message(),
                code: self.code(),
            }),
        )
            .into_response()
    }
}
