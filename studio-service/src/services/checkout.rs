//! Subscription purchase flow on top of the billing client.

use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use crate::error::StudioError;
use crate::models::{BillingSubscription, Price, Subscription, SubscriptionStatus, User};
use crate::services::billing::BillingClient;
use crate::services::entitlement::{Entitlement, EntitlementResolver};
use crate::services::store::{Store, StoreError};

pub const CLIENT_SECRET_MISSING: &str = "Failed to get client secret";
pub const SUBSCRIPTION_NOT_FOUND: &str = "Subscription not found";

pub struct CheckoutService {
    store: Arc<dyn Store>,
    billing: Arc<dyn BillingClient>,
    entitlements: EntitlementResolver,
    portal_return_url: String,
}

impl CheckoutService {
    pub fn new(
        store: Arc<dyn Store>,
        billing: Arc<dyn BillingClient>,
        entitlements: EntitlementResolver,
        portal_return_url: impl Into<String>,
    ) -> Self {
        Self {
            store,
            billing,
            entitlements,
            portal_return_url: portal_return_url.into(),
        }
    }

    #[instrument(skip(self))]
    pub async fn get_prices(&self) -> Result<Vec<Price>, StudioError> {
        Ok(self.billing.list_prices().await?)
    }

    /// Client secret for confirming the first payment of a subscription.
    ///
    /// An incomplete subscription is resumed through its latest invoice's
    /// payment intent instead of creating a second one.
    #[instrument(skip(self, user), fields(user_id = %user.id))]
    pub async fn get_client_secret(
        &self,
        user: &User,
        price_id: &str,
    ) -> Result<String, StudioError> {
        let local = self.local_subscription(user).await?;

        if self
            .entitlements
            .is_subscribed_at(&local, self.entitlements.now())
        {
            return Err(StudioError::Validation(
                "Subscription is already active".into(),
            ));
        }

        if local.status == SubscriptionStatus::Incomplete {
            if let Some(subscription_id) = &local.subscription_id {
                if let Some(secret) = self.resume(subscription_id).await? {
                    return Ok(secret);
                }
            }
        }

        let created = self
            .billing
            .create_subscription(&local.customer_id, price_id, &user.id.to_string())
            .await?;

        let mut snapshot = created.subscription.snapshot();
        snapshot.user_id = Some(user.id);
        let outcome = self.store.upsert_subscription(&snapshot).await?;
        tracing::info!(
            subscription_id = %created.subscription.id,
            outcome = outcome.as_str(),
            "Subscription created"
        );

        created
            .client_secret
            .ok_or_else(|| StudioError::Validation(CLIENT_SECRET_MISSING.into()))
    }

    /// The user's row, creating the provider customer and a stub row on first use.
    async fn local_subscription(&self, user: &User) -> Result<Subscription, StudioError> {
        if let Some(existing) = self.store.get_subscription(user.id).await? {
            return Ok(existing);
        }

        let customer_id = self
            .billing
            .create_customer(
                user.name.as_deref(),
                user.email.as_deref(),
                &user.id.to_string(),
            )
            .await?;

        match self
            .store
            .insert_subscription(&Subscription::stub(user.id, customer_id))
            .await
        {
            Ok(row) => Ok(row),
            // A concurrent checkout created the row first.
            Err(StoreError::Conflict(_)) => self
                .store
                .get_subscription(user.id)
                .await?
                .ok_or_else(|| StudioError::Internal("subscription row vanished".into())),
            Err(e) => Err(e.into()),
        }
    }

    /// `None` when the provider no longer considers the subscription incomplete.
    async fn resume(&self, subscription_id: &str) -> Result<Option<String>, StudioError> {
        let remote = self.billing.retrieve_subscription(subscription_id).await?;
        if remote.status != SubscriptionStatus::Incomplete {
            tracing::info!(
                subscription_id,
                status = %remote.status,
                "Stored subscription is no longer incomplete, creating a new one"
            );
            return Ok(None);
        }

        let invoice_id = remote
            .latest_invoice_id
            .ok_or_else(|| StudioError::Validation(CLIENT_SECRET_MISSING.into()))?;
        let invoice = self.billing.retrieve_invoice(&invoice_id).await?;
        let intent_id = invoice
            .payment_intent_id
            .ok_or_else(|| StudioError::Validation(CLIENT_SECRET_MISSING.into()))?;
        let intent = self.billing.retrieve_payment_intent(&intent_id).await?;

        tracing::info!(subscription_id, "Resuming incomplete subscription");
        intent
            .client_secret
            .map(Some)
            .ok_or_else(|| StudioError::Validation(CLIENT_SECRET_MISSING.into()))
    }

    #[instrument(skip(self))]
    pub async fn get_subscription_info(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<BillingSubscription>, StudioError> {
        let local = self.require_subscription(user_id).await?;
        Ok(self
            .billing
            .list_active_subscriptions(&local.customer_id)
            .await?)
    }

    #[instrument(skip(self))]
    pub async fn get_billing_portal_url(&self, user_id: Uuid) -> Result<String, StudioError> {
        let local = self.require_subscription(user_id).await?;
        Ok(self
            .billing
            .create_billing_portal_session(&local.customer_id, &self.portal_return_url)
            .await?)
    }

    #[instrument(skip(self))]
    pub async fn get_usage(&self, user_id: Uuid) -> Result<Entitlement, StudioError> {
        self.entitlements.resolve(user_id).await
    }

    async fn require_subscription(&self, user_id: Uuid) -> Result<Subscription, StudioError> {
        self.store
            .get_subscription(user_id)
            .await?
            .ok_or_else(|| StudioError::Validation(SUBSCRIPTION_NOT_FOUND.into()))
    }
}
