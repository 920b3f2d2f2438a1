//! Stripe billing client on top of `async-stripe`.
//!
//! Every call is bounded by the HTTP timeout and retried on transient
//! failures. Creating calls share one idempotency key across their retries.

use ::stripe::{
    BillingPortalSession, Client, CreateBillingPortalSession, CreateCustomer,
    CreateSubscription, CreateSubscriptionItems, Customer, CustomerId, Expandable,
    ListPrices, ListSubscriptions, RequestStrategy, StripeError, SubscriptionId,
    SubscriptionPaymentBehavior, SubscriptionStatusFilter, Webhook, WebhookError,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use service_core::retry::{retry_async, RetryConfig};
use std::collections::HashMap;
use std::future::Future;
use std::str::FromStr;
use std::time::{Duration, Instant};
use uuid::Uuid;

use super::{BillingClient, BillingError};
use crate::config::{HttpClientConfig, StripeConfig};
use crate::models::{
    BillingEvent, BillingSubscription, CreatedSubscription, Invoice, PaymentIntent, Price, Product,
    SubscriptionStatus,
};
use crate::services::metrics::record_external_call;

/// Metadata key linking Stripe objects back to the studio user.
const USER_ID_METADATA_KEY: &str = "userId";

/// Verifies `Stripe-Signature` headers against the endpoint secret.
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: Secret<String>,
}

impl WebhookVerifier {
    pub fn new(secret: Secret<String>) -> Self {
        Self { secret }
    }

    /// Signature, then timestamp (five minute tolerance), then payload.
    pub fn verify(&self, payload: &[u8], header: &str) -> Result<BillingEvent, BillingError> {
        let secret = self.secret.expose_secret();
        if secret.is_empty() {
            return Err(BillingError::NotConfigured(
                "STRIPE_WEBHOOK_SECRET is empty".into(),
            ));
        }
        let payload = std::str::from_utf8(payload)
            .map_err(|e| BillingError::Signature(format!("payload is not UTF-8: {}", e)))?;

        match Webhook::construct_event(payload, header, secret) {
            Ok(_) => {}
            // Signature and timestamp held; the typed schema just lags this event.
            Err(WebhookError::BadParse(e)) => {
                tracing::debug!(error = %e, "Verified event outside the typed schema");
            }
            Err(e) => return Err(BillingError::Signature(e.to_string())),
        }

        let event: RawEvent = serde_json::from_str(payload)
            .map_err(|e| BillingError::Decode(format!("invalid event payload: {}", e)))?;
        Ok(BillingEvent {
            id: event.id,
            event_type: event.event_type,
            object: event.data.object,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: RawEventData,
}

#[derive(Debug, Deserialize)]
struct RawEventData {
    object: serde_json::Value,
}

/// Stripe client for interacting with the Stripe API.
#[derive(Clone)]
pub struct StripeClient {
    client: Client,
    config: StripeConfig,
    verifier: WebhookVerifier,
    retry: RetryConfig,
    timeout: Duration,
}

impl StripeClient {
    pub fn new(config: StripeConfig, http: &HttpClientConfig) -> Result<Self, BillingError> {
        // `Client::from_url` panics on a malformed base, so check it first.
        reqwest::Url::parse(&config.api_base_url).map_err(|e| {
            BillingError::NotConfigured(format!(
                "STRIPE_API_BASE_URL {:?}: {}",
                config.api_base_url, e
            ))
        })?;
        let client = Client::from_url(
            config.api_base_url.as_str(),
            config.secret_key.expose_secret().as_str(),
        );

        Ok(Self {
            client,
            verifier: WebhookVerifier::new(config.webhook_secret.clone()),
            config,
            retry: http.retry.clone(),
            timeout: http.timeout,
        })
    }

    /// Check if Stripe is configured (credentials are set).
    pub fn is_configured(&self) -> bool {
        !self.config.secret_key.expose_secret().is_empty()
            && !self.config.webhook_secret.expose_secret().is_empty()
    }

    /// A client whose requests carry one idempotency key for the whole operation.
    fn idempotent_client(&self, operation: &str) -> Client {
        self.client
            .clone()
            .with_strategy(RequestStrategy::Idempotent(format!(
                "{}_{}",
                operation,
                Uuid::new_v4()
            )))
    }

    async fn call<T, F, Fut>(&self, operation: &'static str, request: F) -> Result<T, BillingError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, StripeError>>,
    {
        let start = Instant::now();
        let result = retry_async(&self.retry, operation, || async {
            match tokio::time::timeout(self.timeout, request()).await {
                Ok(result) => result.map_err(BillingError::from),
                Err(_) => Err(BillingError::Network(format!(
                    "{} timed out after {:?}",
                    operation, self.timeout
                ))),
            }
        })
        .await;
        record_external_call("stripe", operation, start.elapsed().as_secs_f64());
        result
    }
}

impl From<StripeError> for BillingError {
    fn from(err: StripeError) -> Self {
        match err {
            StripeError::Stripe(request) if request.http_status == 429 => BillingError::RateLimited,
            StripeError::Stripe(request) => BillingError::Api {
                status: request.http_status,
                message: request
                    .message
                    .unwrap_or_else(|| format!("HTTP {}", request.http_status)),
            },
            StripeError::Timeout => BillingError::Network("request timed out".into()),
            StripeError::ClientError(message) => BillingError::Network(message),
            other => BillingError::Decode(other.to_string()),
        }
    }
}

fn parse_id<T: FromStr>(kind: &str, id: &str) -> Result<T, BillingError> {
    id.parse()
        .map_err(|_| BillingError::InvalidId(format!("{} {:?}", kind, id)))
}

fn user_metadata(user_id: &str) -> HashMap<String, String> {
    HashMap::from([(USER_ID_METADATA_KEY.to_string(), user_id.to_string())])
}

#[async_trait]
impl BillingClient for StripeClient {
    fn verify_event(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<BillingEvent, BillingError> {
        self.verifier.verify(payload, signature_header)
    }

    async fn create_customer(
        &self,
        name: Option<&str>,
        email: Option<&str>,
        user_id: &str,
    ) -> Result<String, BillingError> {
        let client = self.idempotent_client("create_customer");
        let mut params = CreateCustomer::new();
        params.name = name;
        params.email = email;
        params.metadata = Some(user_metadata(user_id));

        let customer = self
            .call("create_customer", || Customer::create(&client, params.clone()))
            .await?;
        tracing::info!(customer_id = %customer.id, "Stripe customer created");
        Ok(customer.id.to_string())
    }

    async fn create_subscription(
        &self,
        customer_id: &str,
        price_id: &str,
        user_id: &str,
    ) -> Result<CreatedSubscription, BillingError> {
        let customer: CustomerId = parse_id("customer", customer_id)?;
        let client = self.idempotent_client("create_subscription");
        let mut params = CreateSubscription::new(customer);
        params.items = Some(vec![CreateSubscriptionItems {
            price: Some(price_id.to_string()),
            ..Default::default()
        }]);
        params.payment_behavior = Some(SubscriptionPaymentBehavior::DefaultIncomplete);
        params.expand = &["latest_invoice.payment_intent"];
        params.metadata = Some(user_metadata(user_id));

        let subscription = self
            .call("create_subscription", || {
                ::stripe::Subscription::create(&client, params.clone())
            })
            .await?;

        let client_secret = subscription
            .latest_invoice
            .as_ref()
            .and_then(|invoice| invoice.as_object())
            .and_then(|invoice| invoice.payment_intent.as_ref())
            .and_then(|intent| intent.as_object())
            .and_then(|intent| intent.client_secret.clone());

        Ok(CreatedSubscription {
            subscription: billing_subscription(subscription)?,
            client_secret,
        })
    }

    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<BillingSubscription, BillingError> {
        let id: SubscriptionId = parse_id("subscription", subscription_id)?;
        let subscription = self
            .call("retrieve_subscription", || {
                ::stripe::Subscription::retrieve(&self.client, &id, &[])
            })
            .await?;
        billing_subscription(subscription)
    }

    async fn retrieve_invoice(&self, invoice_id: &str) -> Result<Invoice, BillingError> {
        let id: ::stripe::InvoiceId = parse_id("invoice", invoice_id)?;
        let invoice = self
            .call("retrieve_invoice", || {
                ::stripe::Invoice::retrieve(&self.client, &id, &[])
            })
            .await?;
        Ok(Invoice {
            id: invoice.id.to_string(),
            payment_intent_id: invoice.payment_intent.as_ref().map(|p| p.id().to_string()),
        })
    }

    async fn retrieve_payment_intent(
        &self,
        payment_intent_id: &str,
    ) -> Result<PaymentIntent, BillingError> {
        let id: ::stripe::PaymentIntentId = parse_id("payment intent", payment_intent_id)?;
        let intent = self
            .call("retrieve_payment_intent", || {
                ::stripe::PaymentIntent::retrieve(&self.client, &id, &[])
            })
            .await?;
        Ok(PaymentIntent {
            id: intent.id.to_string(),
            client_secret: intent.client_secret,
        })
    }

    async fn list_prices(&self) -> Result<Vec<Price>, BillingError> {
        let mut params = ListPrices::new();
        params.lookup_keys = Some(self.config.price_lookup_keys.clone());
        params.expand = &["data.product"];

        let prices = self
            .call("list_prices", || ::stripe::Price::list(&self.client, &params))
            .await?;
        Ok(prices.data.into_iter().map(price).collect())
    }

    async fn list_active_subscriptions(
        &self,
        customer_id: &str,
    ) -> Result<Vec<BillingSubscription>, BillingError> {
        let mut params = ListSubscriptions::new();
        params.customer = Some(parse_id("customer", customer_id)?);
        params.status = Some(SubscriptionStatusFilter::Active);
        params.expand = &["data.default_payment_method"];

        let list = self
            .call("list_subscriptions", || {
                ::stripe::Subscription::list(&self.client, &params)
            })
            .await?;
        list.data.into_iter().map(billing_subscription).collect()
    }

    async fn create_billing_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> Result<String, BillingError> {
        let client = self.idempotent_client("create_billing_portal_session");
        let mut params = CreateBillingPortalSession::new(parse_id("customer", customer_id)?);
        params.return_url = Some(return_url);

        let session = self
            .call("create_billing_portal_session", || {
                BillingPortalSession::create(&client, params.clone())
            })
            .await?;
        Ok(session.url)
    }
}

// ===== Conversions =====

fn timestamp(secs: i64) -> Result<Option<DateTime<Utc>>, BillingError> {
    DateTime::<Utc>::from_timestamp(secs, 0)
        .map(Some)
        .ok_or_else(|| BillingError::Decode(format!("timestamp out of range: {}", secs)))
}

fn billing_subscription(
    subscription: ::stripe::Subscription,
) -> Result<BillingSubscription, BillingError> {
    let user_id = subscription
        .metadata
        .get(USER_ID_METADATA_KEY)
        .and_then(|raw| Uuid::parse_str(raw).ok());
    let price_id = subscription
        .items
        .data
        .first()
        .and_then(|item| item.price.as_ref())
        .map(|price| price.id.to_string());

    Ok(BillingSubscription {
        customer_id: subscription.customer.id().to_string(),
        status: SubscriptionStatus::from_string(subscription.status.as_str()),
        price_id,
        current_period_start: timestamp(subscription.current_period_start)?,
        current_period_end: timestamp(subscription.current_period_end)?,
        cancel_at_period_end: subscription.cancel_at_period_end,
        latest_invoice_id: subscription
            .latest_invoice
            .as_ref()
            .map(|invoice| invoice.id().to_string()),
        user_id,
        id: subscription.id.to_string(),
    })
}

fn price(price: ::stripe::Price) -> Price {
    let product = price.product.map(|product| match product {
        Expandable::Id(id) => Product {
            id: id.to_string(),
            name: None,
            description: None,
        },
        Expandable::Object(product) => {
            let product = *product;
            Product {
                id: product.id.to_string(),
                name: product.name,
                description: product.description,
            }
        }
    });

    Price {
        id: price.id.to_string(),
        lookup_key: price.lookup_key,
        unit_amount: price.unit_amount,
        currency: price.currency.map(|c| c.to_string()).unwrap_or_default(),
        interval: price.recurring.map(|r| r.interval.to_string()),
        product,
    }
}
