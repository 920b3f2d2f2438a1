//! Subscription checkout integration tests.

mod common;

use common::{active_subscription, TestApp, PRICE_ID};
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::sync::atomic::Ordering;
use studio_service::models::{Subscription, SubscriptionStatus};
use studio_service::services::Store;

async fn request_secret(app: &TestApp) -> reqwest::Response {
    app.post("/billing/client-secret", json!({ "priceId": PRICE_ID }))
        .await
}

#[tokio::test]
async fn prices_are_listed() {
    let app = TestApp::spawn().await;

    let response = app.get("/billing/prices").await;
    assert_eq!(response.status(), StatusCode::OK);

    let prices: Value = response.json().await.unwrap();
    assert_eq!(prices[0]["id"], PRICE_ID);
    assert_eq!(prices[0]["lookupKey"], "t3-stack-monthly");
    assert_eq!(prices[0]["unitAmount"], 999);
    assert_eq!(prices[0]["product"]["name"], "Studio Pro");
}

#[tokio::test]
async fn first_checkout_creates_customer_and_subscription() {
    let app = TestApp::spawn().await;

    let response = request_secret(&app).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["clientSecret"], "pi_fake_1_secret");

    assert_eq!(app.billing.customers_created.load(Ordering::SeqCst), 1);
    assert_eq!(app.billing.subscriptions_created.load(Ordering::SeqCst), 1);

    let row = app.store.get_subscription(app.user.id).await.unwrap().unwrap();
    assert_eq!(row.customer_id, "cus_fake_1");
    assert_eq!(row.subscription_id.as_deref(), Some("sub_fake_1"));
    assert_eq!(row.status, SubscriptionStatus::Incomplete);
}

#[tokio::test]
async fn incomplete_subscription_is_resumed() {
    let app = TestApp::spawn().await;

    let first: Value = request_secret(&app).await.json().await.unwrap();
    let second: Value = request_secret(&app).await.json().await.unwrap();

    assert_eq!(first["clientSecret"], second["clientSecret"]);
    assert_eq!(app.billing.customers_created.load(Ordering::SeqCst), 1);
    assert_eq!(app.billing.subscriptions_created.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn expired_attempt_starts_a_new_subscription() {
    let app = TestApp::spawn().await;
    request_secret(&app).await;

    let mut expired = app.billing.subscription("sub_fake_1");
    expired.status = SubscriptionStatus::IncompleteExpired;
    app.billing.put_subscription(expired);

    let body: Value = request_secret(&app).await.json().await.unwrap();
    assert_eq!(body["clientSecret"], "pi_fake_2_secret");
    assert_eq!(app.billing.customers_created.load(Ordering::SeqCst), 1);
    assert_eq!(app.billing.subscriptions_created.load(Ordering::SeqCst), 2);

    let row = app.store.get_subscription(app.user.id).await.unwrap().unwrap();
    assert_eq!(row.subscription_id.as_deref(), Some("sub_fake_2"));
}

#[tokio::test]
async fn active_subscriber_cannot_check_out_again() {
    let app = TestApp::spawn().await;
    let mut row = Subscription::stub(app.user.id, "cus_paid");
    row.apply(&active_subscription("sub_paid", "cus_paid", Some(app.user.id)).snapshot());
    app.store.insert_subscription(&row).await.unwrap();

    let response = request_secret(&app).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "Subscription is already active");
    assert_eq!(app.billing.subscriptions_created.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn subscription_endpoints_require_a_row() {
    let app = TestApp::spawn().await;

    let response = app.get("/billing/subscriptions").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "Subscription not found");

    let response = app.post("/billing/portal", json!({})).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "Subscription not found");
}

#[tokio::test]
async fn active_subscriptions_and_portal_use_the_customer() {
    let app = TestApp::spawn().await;
    request_secret(&app).await;

    let mut paid = app.billing.subscription("sub_fake_1");
    paid.status = SubscriptionStatus::Active;
    app.billing.put_subscription(paid);

    let subscriptions: Value = app.get("/billing/subscriptions").await.json().await.unwrap();
    let subscriptions = subscriptions.as_array().unwrap();
    assert_eq!(subscriptions.len(), 1);
    assert_eq!(subscriptions[0]["id"], "sub_fake_1");
    assert_eq!(subscriptions[0]["status"], "active");

    let response = app.post("/billing/portal", json!({})).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(
        body["url"],
        "https://billing.test/session/cus_fake_1?return_url=http://localhost:3000/settings/billing"
    );
}
