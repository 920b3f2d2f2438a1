//! Reconciles local subscription rows with billing webhook events.
//!
//! Event payloads are only trusted for the subscription id they reference;
//! the canonical object is always re-fetched from the provider.

use std::sync::Arc;
use tracing::instrument;

use crate::error::StudioError;
use crate::models::{BillingEvent, UpsertOutcome};
use crate::services::billing::BillingClient;
use crate::services::metrics::record_webhook_event;
use crate::services::store::Store;

pub const CHECKOUT_SESSION_COMPLETED: &str = "checkout.session.completed";
pub const INVOICE_PAYMENT_SUCCEEDED: &str = "invoice.payment_succeeded";
pub const CUSTOMER_SUBSCRIPTION_UPDATED: &str = "customer.subscription.updated";

/// What happened to a verified event.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// Event kind we do not act on, or no subscription referenced.
    Ignored,
    Synced(UpsertOutcome),
    /// Re-fetch or write failed; logged, still acknowledged.
    Failed(String),
}

impl SyncOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncOutcome::Ignored => "ignored",
            SyncOutcome::Synced(outcome) => outcome.as_str(),
            SyncOutcome::Failed(_) => "failed",
        }
    }
}

pub struct BillingEventSynchronizer {
    store: Arc<dyn Store>,
    billing: Arc<dyn BillingClient>,
}

impl BillingEventSynchronizer {
    pub fn new(store: Arc<dyn Store>, billing: Arc<dyn BillingClient>) -> Self {
        Self { store, billing }
    }

    /// Verify and process one delivery. Only a verification failure is an
    /// error; everything after it is acknowledged.
    #[instrument(skip(self, payload, signature_header), fields(
        event_id = tracing::field::Empty,
        event_type = tracing::field::Empty
    ))]
    pub async fn handle(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<SyncOutcome, StudioError> {
        let event = match self.billing.verify_event(payload, signature_header) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(error = %e, "Webhook verification failed");
                record_webhook_event("unverified", "rejected");
                return Err(StudioError::SignatureVerification(e.to_string()));
            }
        };

        let span = tracing::Span::current();
        span.record("event_id", event.id.as_str());
        span.record("event_type", event.event_type.as_str());

        let outcome = self.process(&event).await;
        record_webhook_event(event_label(&event.event_type), outcome.as_str());

        match &outcome {
            SyncOutcome::Failed(reason) => {
                tracing::error!(reason = %reason, "Webhook event processing failed")
            }
            other => tracing::info!(outcome = other.as_str(), "Webhook event processed"),
        }
        Ok(outcome)
    }

    async fn process(&self, event: &BillingEvent) -> SyncOutcome {
        let Some(subscription_id) = subscription_reference(event) else {
            return SyncOutcome::Ignored;
        };

        let canonical = match self.billing.retrieve_subscription(&subscription_id).await {
            Ok(subscription) => subscription,
            Err(e) => return SyncOutcome::Failed(format!("retrieve subscription: {}", e)),
        };

        match self.store.upsert_subscription(&canonical.snapshot()).await {
            Ok(UpsertOutcome::UnknownCustomer) => {
                tracing::warn!(
                    customer_id = %canonical.customer_id,
                    subscription_id = %canonical.id,
                    "No local subscription for customer and no userId metadata, skipping"
                );
                SyncOutcome::Synced(UpsertOutcome::UnknownCustomer)
            }
            Ok(outcome) => SyncOutcome::Synced(outcome),
            Err(e) => SyncOutcome::Failed(format!("upsert subscription: {}", e)),
        }
    }
}

/// The subscription an event refers to, if it is a kind we act on.
pub fn subscription_reference(event: &BillingEvent) -> Option<String> {
    let reference = match event.event_type.as_str() {
        CHECKOUT_SESSION_COMPLETED | INVOICE_PAYMENT_SUCCEEDED => event.object.get("subscription"),
        CUSTOMER_SUBSCRIPTION_UPDATED => event.object.get("id"),
        _ => None,
    }?;

    // Either a bare id or an expanded object.
    match reference {
        serde_json::Value::String(id) if !id.is_empty() => Some(id.clone()),
        serde_json::Value::Object(object) => object
            .get("id")
            .and_then(|id| id.as_str())
            .map(str::to_string),
        _ => None,
    }
}

/// Bounded label set for metrics.
fn event_label(event_type: &str) -> &'static str {
    match event_type {
        CHECKOUT_SESSION_COMPLETED => CHECKOUT_SESSION_COMPLETED,
        INVOICE_PAYMENT_SUCCEEDED => INVOICE_PAYMENT_SUCCEEDED,
        CUSTOMER_SUBSCRIPTION_UPDATED => CUSTOMER_SUBSCRIPTION_UPDATED,
        _ => "other",
    }
}
