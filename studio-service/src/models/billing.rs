//! Provider-independent views of billing objects.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::{SubscriptionSnapshot, SubscriptionStatus};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Price {
    pub id: String,
    pub lookup_key: Option<String>,
    /// Minor currency units.
    pub unit_amount: Option<i64>,
    pub currency: String,
    pub interval: Option<String>,
    pub product: Option<Product>,
}

/// The provider's canonical subscription object.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BillingSubscription {
    pub id: String,
    pub customer_id: String,
    pub status: SubscriptionStatus,
    pub price_id: Option<String>,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
    #[serde(skip_serializing)]
    pub latest_invoice_id: Option<String>,
    #[serde(skip_serializing)]
    pub user_id: Option<Uuid>,
}

impl BillingSubscription {
    pub fn snapshot(&self) -> SubscriptionSnapshot {
        SubscriptionSnapshot {
            customer_id: self.customer_id.clone(),
            user_id: self.user_id,
            subscription_id: self.id.clone(),
            status: self.status.clone(),
            price_id: self.price_id.clone(),
            current_period_start: self.current_period_start,
            current_period_end: self.current_period_end,
            cancel_at_period_end: self.cancel_at_period_end,
        }
    }
}

/// A newly created subscription and the secret the client confirms payment with.
#[derive(Debug, Clone)]
pub struct CreatedSubscription {
    pub subscription: BillingSubscription,
    pub client_secret: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Invoice {
    pub id: String,
    pub payment_intent_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: Option<String>,
}

/// A verified webhook event. `object` is untrusted beyond the ids it references.
#[derive(Debug, Clone)]
pub struct BillingEvent {
    pub id: String,
    pub event_type: String,
    pub object: serde_json::Value,
}
