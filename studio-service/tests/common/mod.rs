//! Test helper module for studio-service integration tests.
//!
//! Spawns the real router on a random port over the in-memory store, a mock
//! generative model and recording fakes for billing and media.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use reqwest::{Client, Response};
use secrecy::Secret;
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use studio_service::config::QuotaConfig;
use studio_service::models::{
    BillingEvent, BillingSubscription, Chat, CreatedSubscription, Invoice, PaymentIntent, Price,
    Product, SubscriptionStatus, User,
};
use studio_service::services::billing::{BillingClient, BillingError, WebhookVerifier};
use studio_service::services::media::{MediaError, MediaStore, StoredAsset};
use studio_service::services::providers::mock::{MockBehavior, MockModel};
use studio_service::services::{InMemoryStore, Store};
use studio_service::startup::{Adapters, AppState, Application};
use uuid::Uuid;

pub const WEBHOOK_SECRET: &str = "whsec_test_secret";
pub const PRICE_ID: &str = "price_monthly";
pub const IMAGE: &str = "data:image/png;base64,aGVsbG8=";

/// A `Stripe-Signature` header as Stripe computes it: `t=<ts>,v1=<hex hmac>`
/// over `"<ts>.<body>"`.
pub fn stripe_signature(secret: &str, timestamp: i64, body: &str) -> String {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(format!("{}.{}", timestamp, body).as_bytes());
    format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
}

// ===== Fake billing provider =====

/// In-process stand-in for Stripe. Webhooks are verified with the real verifier.
pub struct FakeBilling {
    verifier: WebhookVerifier,
    pub subscriptions: Mutex<HashMap<String, BillingSubscription>>,
    pub invoices: Mutex<HashMap<String, Invoice>>,
    pub payment_intents: Mutex<HashMap<String, PaymentIntent>>,
    pub customers_created: AtomicUsize,
    pub subscriptions_created: AtomicUsize,
    pub fail_retrieval: Mutex<bool>,
}

impl FakeBilling {
    pub fn new() -> Self {
        Self {
            verifier: WebhookVerifier::new(Secret::new(WEBHOOK_SECRET.to_string())),
            subscriptions: Mutex::new(HashMap::new()),
            invoices: Mutex::new(HashMap::new()),
            payment_intents: Mutex::new(HashMap::new()),
            customers_created: AtomicUsize::new(0),
            subscriptions_created: AtomicUsize::new(0),
            fail_retrieval: Mutex::new(false),
        }
    }

    /// Put a canonical subscription on the "provider" side.
    pub fn put_subscription(&self, subscription: BillingSubscription) {
        self.subscriptions
            .lock()
            .unwrap()
            .insert(subscription.id.clone(), subscription);
    }

    pub fn subscription(&self, id: &str) -> BillingSubscription {
        self.subscriptions.lock().unwrap()[id].clone()
    }
}

#[async_trait]
impl BillingClient for FakeBilling {
    fn verify_event(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<BillingEvent, BillingError> {
        self.verifier.verify(payload, signature_header)
    }

    async fn create_customer(
        &self,
        _name: Option<&str>,
        _email: Option<&str>,
        _user_id: &str,
    ) -> Result<String, BillingError> {
        let n = self.customers_created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("cus_fake_{}", n))
    }

    async fn create_subscription(
        &self,
        customer_id: &str,
        price_id: &str,
        user_id: &str,
    ) -> Result<CreatedSubscription, BillingError> {
        let n = self.subscriptions_created.fetch_add(1, Ordering::SeqCst) + 1;
        let invoice_id = format!("in_fake_{}", n);
        let intent_id = format!("pi_fake_{}", n);
        let secret = format!("{}_secret", intent_id);

        let subscription = BillingSubscription {
            id: format!("sub_fake_{}", n),
            customer_id: customer_id.to_string(),
            status: SubscriptionStatus::Incomplete,
            price_id: Some(price_id.to_string()),
            current_period_start: Some(Utc::now()),
            current_period_end: Some(Utc::now() + Duration::days(30)),
            cancel_at_period_end: false,
            latest_invoice_id: Some(invoice_id.clone()),
            user_id: Uuid::parse_str(user_id).ok(),
        };
        self.put_subscription(subscription.clone());
        self.invoices.lock().unwrap().insert(
            invoice_id.clone(),
            Invoice {
                id: invoice_id,
                payment_intent_id: Some(intent_id.clone()),
            },
        );
        self.payment_intents.lock().unwrap().insert(
            intent_id.clone(),
            PaymentIntent {
                id: intent_id,
                client_secret: Some(secret.clone()),
            },
        );

        Ok(CreatedSubscription {
            subscription,
            client_secret: Some(secret),
        })
    }

    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<BillingSubscription, BillingError> {
        if *self.fail_retrieval.lock().unwrap() {
            return Err(BillingError::Network("connection reset".into()));
        }
        self.subscriptions
            .lock()
            .unwrap()
            .get(subscription_id)
            .cloned()
            .ok_or_else(|| BillingError::Api {
                status: 404,
                message: format!("No such subscription: {}", subscription_id),
            })
    }

    async fn retrieve_invoice(&self, invoice_id: &str) -> Result<Invoice, BillingError> {
        self.invoices
            .lock()
            .unwrap()
            .get(invoice_id)
            .cloned()
            .ok_or_else(|| BillingError::Api {
                status: 404,
                message: format!("No such invoice: {}", invoice_id),
            })
    }

    async fn retrieve_payment_intent(
        &self,
        payment_intent_id: &str,
    ) -> Result<PaymentIntent, BillingError> {
        self.payment_intents
            .lock()
            .unwrap()
            .get(payment_intent_id)
            .cloned()
            .ok_or_else(|| BillingError::Api {
                status: 404,
                message: format!("No such payment_intent: {}", payment_intent_id),
            })
    }

    async fn list_prices(&self) -> Result<Vec<Price>, BillingError> {
        Ok(vec![Price {
            id: PRICE_ID.to_string(),
            lookup_key: Some("t3-stack-monthly".to_string()),
            unit_amount: Some(999),
            currency: "usd".to_string(),
            interval: Some("month".to_string()),
            product: Some(Product {
                id: "prod_fake".to_string(),
                name: Some("Studio Pro".to_string()),
                description: None,
            }),
        }])
    }

    async fn list_active_subscriptions(
        &self,
        customer_id: &str,
    ) -> Result<Vec<BillingSubscription>, BillingError> {
        Ok(self
            .subscriptions
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.customer_id == customer_id && s.status == SubscriptionStatus::Active)
            .cloned()
            .collect())
    }

    async fn create_billing_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> Result<String, BillingError> {
        Ok(format!(
            "https://billing.test/session/{}?return_url={}",
            customer_id, return_url
        ))
    }
}

// ===== Recording media store =====

#[derive(Default)]
pub struct RecordingMedia {
    uploads: AtomicUsize,
    pub deleted: Mutex<Vec<String>>,
    pub failing_deletes: Mutex<Vec<String>>,
}

impl RecordingMedia {
    pub fn fail_delete_of(&self, asset_id: &str) {
        self.failing_deletes
            .lock()
            .unwrap()
            .push(asset_id.to_string());
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaStore for RecordingMedia {
    async fn upload(&self, _source: &str) -> Result<StoredAsset, MediaError> {
        let n = self.uploads.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(StoredAsset {
            url: format!("https://media.test/t3stack/asset-{}.png", n),
            asset_id: format!("t3stack/asset-{}", n),
        })
    }

    async fn delete(&self, asset_id: &str) -> Result<(), MediaError> {
        if self
            .failing_deletes
            .lock()
            .unwrap()
            .iter()
            .any(|id| id == asset_id)
        {
            return Err(MediaError::Api {
                status: 500,
                message: "destroy failed".into(),
            });
        }
        self.deleted.lock().unwrap().push(asset_id.to_string());
        Ok(())
    }
}

// ===== Test application =====

pub struct TestApp {
    pub address: String,
    pub port: u16,
    pub client: Client,
    pub store: Arc<InMemoryStore>,
    pub billing: Arc<FakeBilling>,
    pub media: Arc<RecordingMedia>,
    pub model: Arc<MockModel>,
    pub user: User,
}

impl TestApp {
    /// Spawn a new test application on a random port with default quotas.
    pub async fn spawn() -> Self {
        Self::spawn_with(QuotaConfig::default(), Vec::new()).await
    }

    pub async fn spawn_with(
        quota: QuotaConfig,
        script: impl IntoIterator<Item = MockBehavior>,
    ) -> Self {
        Self::spawn_with_model(quota, MockModel::scripted(script)).await
    }

    pub async fn spawn_with_model(quota: QuotaConfig, model: MockModel) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let billing = Arc::new(FakeBilling::new());
        let media = Arc::new(RecordingMedia::default());
        let model = Arc::new(model);

        let user = store.insert_user(User::new("Ada Lovelace", "ada@example.com"));

        let state = AppState::new(
            Adapters {
                store: store.clone(),
                billing: billing.clone(),
                model: model.clone(),
                media: media.clone(),
            },
            quota,
            "http://localhost:3000/settings/billing".to_string(),
        );

        let app = Application::with_state(0, state)
            .await
            .expect("Failed to build test application");
        let port = app.http_port();
        let address = format!("http://127.0.0.1:{}", port);

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        // Wait for HTTP server to be ready by polling health endpoint
        let client = Client::new();
        let health_url = format!("{}/health", address);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(20)).await;
        }

        TestApp {
            address,
            port,
            client,
            store,
            billing,
            media,
            model,
            user,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.address, path)
    }

    pub async fn create_chat(&self) -> Chat {
        self.store
            .create_chat(&Chat::new(self.user.id, "sketches"))
            .await
            .expect("Failed to create chat")
    }

    pub async fn get(&self, path: &str) -> Response {
        self.client
            .get(self.url(path))
            .header("X-User-ID", self.user.id.to_string())
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn post(&self, path: &str, body: serde_json::Value) -> Response {
        self.post_as(self.user.id, path, body).await
    }

    pub async fn post_as(&self, user_id: Uuid, path: &str, body: serde_json::Value) -> Response {
        self.client
            .post(self.url(path))
            .header("X-User-ID", user_id.to_string())
            .json(&body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn delete(&self, path: &str) -> Response {
        self.client
            .delete(self.url(path))
            .header("X-User-ID", self.user.id.to_string())
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn send_prompt(&self, chat_id: Uuid, prompt: &str) -> Response {
        self.post(
            &format!("/chats/{}/messages", chat_id),
            serde_json::json!({ "prompt": prompt }),
        )
        .await
    }

    /// Deliver a webhook body signed with the endpoint secret.
    pub async fn deliver_webhook(&self, body: &str) -> Response {
        let header = stripe_signature(WEBHOOK_SECRET, Utc::now().timestamp(), body);
        self.deliver_webhook_with_header(body, &header).await
    }

    pub async fn deliver_webhook_with_header(&self, body: &str, header: &str) -> Response {
        self.client
            .post(self.url("/webhook"))
            .header("Stripe-Signature", header)
            .header("content-type", "application/json")
            .body(body.to_string())
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn user_count(&self) -> i32 {
        self.store
            .get_user(self.user.id)
            .await
            .expect("store error")
            .expect("user missing")
            .count
    }
}

/// A canonical active subscription for `customer_id`.
pub fn active_subscription(id: &str, customer_id: &str, user_id: Option<Uuid>) -> BillingSubscription {
    BillingSubscription {
        id: id.to_string(),
        customer_id: customer_id.to_string(),
        status: SubscriptionStatus::Active,
        price_id: Some(PRICE_ID.to_string()),
        current_period_start: Some(Utc::now() - Duration::days(1)),
        current_period_end: Some(Utc::now() + Duration::days(29)),
        cancel_at_period_end: false,
        latest_invoice_id: None,
        user_id,
    }
}

pub fn event_body(event_type: &str, object: serde_json::Value) -> String {
    serde_json::json!({
        "id": format!("evt_{}", Uuid::new_v4().simple()),
        "type": event_type,
        "data": { "object": object }
    })
    .to_string()
}
