//! Locally cached subscription state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

/// Subscription status, mirroring the billing provider's states.
///
/// Statuses this service does not know are kept verbatim in `Other` so a new
/// provider state never fails deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SubscriptionStatus {
    Incomplete,
    IncompleteExpired,
    Trialing,
    Active,
    PastDue,
    Canceled,
    Unpaid,
    Paused,
    Other(String),
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &str {
        match self {
            SubscriptionStatus::Incomplete => "incomplete",
            SubscriptionStatus::IncompleteExpired => "incomplete_expired",
            SubscriptionStatus::Trialing => "trialing",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Canceled => "canceled",
            SubscriptionStatus::Unpaid => "unpaid",
            SubscriptionStatus::Paused => "paused",
            SubscriptionStatus::Other(raw) => raw,
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "incomplete" => SubscriptionStatus::Incomplete,
            "incomplete_expired" => SubscriptionStatus::IncompleteExpired,
            "trialing" => SubscriptionStatus::Trialing,
            "active" => SubscriptionStatus::Active,
            "past_due" => SubscriptionStatus::PastDue,
            "canceled" => SubscriptionStatus::Canceled,
            "unpaid" => SubscriptionStatus::Unpaid,
            "paused" => SubscriptionStatus::Paused,
            other => SubscriptionStatus::Other(other.to_string()),
        }
    }
}

impl From<String> for SubscriptionStatus {
    fn from(value: String) -> Self {
        SubscriptionStatus::from_string(&value)
    }
}

impl From<SubscriptionStatus> for String {
    fn from(value: SubscriptionStatus) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row per user, unique on both `user_id` and `customer_id`.
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: Uuid,
    pub user_id: Uuid,
    pub customer_id: String,
    #[sqlx(try_from = "String")]
    pub status: SubscriptionStatus,
    pub subscription_id: Option<String>,
    pub price_id: Option<String>,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Subscription {
    /// Placeholder row written on the first checkout attempt.
    pub fn stub(user_id: Uuid, customer_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            customer_id: customer_id.into(),
            status: SubscriptionStatus::Incomplete,
            subscription_id: None,
            price_id: None,
            current_period_start: None,
            current_period_end: None,
            cancel_at_period_end: false,
            created_utc: now,
            updated_utc: now,
        }
    }

    pub fn matches(&self, snapshot: &SubscriptionSnapshot) -> bool {
        self.status == snapshot.status
            && self.subscription_id.as_deref() == Some(snapshot.subscription_id.as_str())
            && self.price_id == snapshot.price_id
            && self.current_period_start == snapshot.current_period_start
            && self.current_period_end == snapshot.current_period_end
            && self.cancel_at_period_end == snapshot.cancel_at_period_end
    }

    pub fn apply(&mut self, snapshot: &SubscriptionSnapshot) {
        self.status = snapshot.status.clone();
        self.subscription_id = Some(snapshot.subscription_id.clone());
        self.price_id = snapshot.price_id.clone();
        self.current_period_start = snapshot.current_period_start;
        self.current_period_end = snapshot.current_period_end;
        self.cancel_at_period_end = snapshot.cancel_at_period_end;
        self.updated_utc = Utc::now();
    }
}

/// The canonical fields copied from the provider's subscription object.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionSnapshot {
    pub customer_id: String,
    /// From the provider object's metadata; only needed when no row exists yet.
    pub user_id: Option<Uuid>,
    pub subscription_id: String,
    pub status: SubscriptionStatus,
    pub price_id: Option<String>,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
}

/// Result of writing a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum UpsertOutcome {
    Inserted(Subscription),
    Updated(Subscription),
    Unchanged,
    /// No row for the customer and no user id to create one with.
    UnknownCustomer,
}

impl UpsertOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpsertOutcome::Inserted(_) => "inserted",
            UpsertOutcome::Updated(_) => "updated",
            UpsertOutcome::Unchanged => "unchanged",
            UpsertOutcome::UnknownCustomer => "unknown_customer",
        }
    }
}
