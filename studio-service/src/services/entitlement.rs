//! Decides whether a user may consume one generation unit.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use crate::config::QuotaConfig;
use crate::error::StudioError;
use crate::models::{Subscription, SubscriptionStatus};
use crate::services::store::{Store, StoreError};

/// Time source, injectable so period boundaries can be tested exactly.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Entitlement {
    pub subscription: Option<Subscription>,
    pub is_subscribed: bool,
    pub is_entitled: bool,
    pub count: i32,
    pub free_quota: i32,
}

impl Entitlement {
    /// Free units left; zero once the quota is spent, whatever the subscription.
    pub fn remaining(&self) -> i32 {
        (self.free_quota - self.count).max(0)
    }
}

#[derive(Clone)]
pub struct EntitlementResolver {
    store: Arc<dyn Store>,
    quota: QuotaConfig,
    clock: Clock,
}

impl EntitlementResolver {
    pub fn new(store: Arc<dyn Store>, quota: QuotaConfig) -> Self {
        Self::with_clock(store, quota, system_clock())
    }

    pub fn with_clock(store: Arc<dyn Store>, quota: QuotaConfig, clock: Clock) -> Self {
        Self {
            store,
            quota,
            clock,
        }
    }

    pub fn free_quota(&self) -> i32 {
        self.quota.free_quota
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// Active, and no later than the period end plus the grace period.
    pub fn is_subscribed_at(&self, subscription: &Subscription, now: DateTime<Utc>) -> bool {
        if subscription.status != SubscriptionStatus::Active {
            return false;
        }
        match subscription.current_period_end {
            Some(end) => now <= end + self.quota.grace_period,
            None => false,
        }
    }

    /// Resolve the user's entitlement. Any store failure denies: paid access
    /// is never granted on a guess.
    #[instrument(skip(self))]
    pub async fn resolve(&self, user_id: Uuid) -> Result<Entitlement, StudioError> {
        let user = self
            .store
            .get_user(user_id)
            .await
            .map_err(fail_closed)?
            .ok_or_else(|| StudioError::Unauthenticated("Unknown user".into()))?;

        let subscription = self
            .store
            .get_subscription(user_id)
            .await
            .map_err(fail_closed)?;

        let now = self.now();
        let is_subscribed = subscription
            .as_ref()
            .is_some_and(|s| self.is_subscribed_at(s, now));
        let is_entitled = is_subscribed || user.count < self.quota.free_quota;

        tracing::debug!(
            user_id = %user_id,
            count = user.count,
            is_subscribed,
            is_entitled,
            "Entitlement resolved"
        );

        Ok(Entitlement {
            subscription,
            is_subscribed,
            is_entitled,
            count: user.count,
            free_quota: self.quota.free_quota,
        })
    }
}

fn fail_closed(err: StoreError) -> StudioError {
    tracing::warn!(error = %err, "Entitlement lookup failed, denying");
    StudioError::Unavailable(err.to_string())
}
