//! Billing provider abstraction.

pub mod stripe;

use async_trait::async_trait;
use service_core::retry::Retryable;
use thiserror::Error;

use crate::models::{
    BillingEvent, BillingSubscription, CreatedSubscription, Invoice, PaymentIntent, Price,
};

pub use self::stripe::{StripeClient, WebhookVerifier};

#[derive(Error, Debug)]
pub enum BillingError {
    #[error("Billing provider not configured: {0}")]
    NotConfigured(String),

    #[error("Webhook signature verification failed: {0}")]
    Signature(String),

    #[error("Malformed billing identifier: {0}")]
    InvalidId(String),

    #[error("Billing API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Rate limited by billing provider")]
    RateLimited,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Unexpected billing response: {0}")]
    Decode(String),
}

impl Retryable for BillingError {
    fn is_retryable(&self) -> bool {
        match self {
            BillingError::RateLimited | BillingError::Network(_) => true,
            BillingError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

#[async_trait]
pub trait BillingClient: Send + Sync {
    /// Verify the raw body against the signature header and parse the event.
    fn verify_event(&self, payload: &[u8], signature_header: &str)
        -> Result<BillingEvent, BillingError>;

    async fn create_customer(
        &self,
        name: Option<&str>,
        email: Option<&str>,
        user_id: &str,
    ) -> Result<String, BillingError>;

    /// Create a subscription awaiting its first payment, with the latest
    /// invoice's payment intent expanded.
    async fn create_subscription(
        &self,
        customer_id: &str,
        price_id: &str,
        user_id: &str,
    ) -> Result<CreatedSubscription, BillingError>;

    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<BillingSubscription, BillingError>;

    async fn retrieve_invoice(&self, invoice_id: &str) -> Result<Invoice, BillingError>;

    async fn retrieve_payment_intent(
        &self,
        payment_intent_id: &str,
    ) -> Result<PaymentIntent, BillingError>;

    async fn list_prices(&self) -> Result<Vec<Price>, BillingError>;

    async fn list_active_subscriptions(
        &self,
        customer_id: &str,
    ) -> Result<Vec<BillingSubscription>, BillingError>;

    /// Returns the portal URL.
    async fn create_billing_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> Result<String, BillingError>;
}
