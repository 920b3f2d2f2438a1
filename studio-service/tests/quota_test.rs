//! Free-quota gate integration tests.

mod common;

use common::{active_subscription, TestApp};
use reqwest::StatusCode;
use serde_json::Value;
use studio_service::models::{Subscription, SubscriptionStatus};
use studio_service::services::Store;

#[tokio::test]
async fn free_user_gets_five_prompts_then_quota_exceeded() {
    let app = TestApp::spawn().await;
    let chat = app.create_chat().await;

    for i in 0..5 {
        let response = app.send_prompt(chat.id, &format!("a red fox #{}", i)).await;
        assert_eq!(response.status(), StatusCode::CREATED, "prompt {}", i);
    }
    assert_eq!(app.user_count().await, 5);

    let response = app.send_prompt(chat.id, "one more").await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "QUOTA_EXCEEDED");
    assert_eq!(body["error"], "You have reached limit of free messages.");

    // Denied prompts write nothing and charge nothing.
    assert_eq!(app.user_count().await, 5);
    assert_eq!(app.store.message_count(), 5);
}

#[tokio::test]
async fn last_free_prompt_is_allowed() {
    let app = TestApp::spawn().await;
    let chat = app.create_chat().await;
    app.store.set_user_count(app.user.id, 4);

    let response = app.send_prompt(chat.id, "the fifth").await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(app.user_count().await, 5);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["role"], "user");
    assert_eq!(body["prompt"], "the fifth");
    assert_eq!(body["chatId"], chat.id.to_string());
}

#[tokio::test]
async fn concurrent_submits_cannot_overdraw_the_last_unit() {
    let app = TestApp::spawn().await;
    let chat = app.create_chat().await;
    app.store.set_user_count(app.user.id, 4);

    let (first, second) = tokio::join!(
        app.send_prompt(chat.id, "left"),
        app.send_prompt(chat.id, "right")
    );

    let mut statuses = vec![first.status(), second.status()];
    statuses.sort();
    assert_eq!(statuses, vec![StatusCode::CREATED, StatusCode::FORBIDDEN]);
    assert_eq!(app.user_count().await, 5);
    assert_eq!(app.store.message_count(), 1);
}

#[tokio::test]
async fn subscribed_user_is_not_limited() {
    let app = TestApp::spawn().await;
    let chat = app.create_chat().await;
    app.store.set_user_count(app.user.id, 12);

    let mut row = Subscription::stub(app.user.id, "cus_paid");
    row.apply(&active_subscription("sub_paid", "cus_paid", Some(app.user.id)).snapshot());
    app.store.insert_subscription(&row).await.unwrap();

    let response = app.send_prompt(chat.id, "still drawing").await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(app.user_count().await, 13);
}

#[tokio::test]
async fn lapsed_subscription_falls_back_to_free_quota() {
    let app = TestApp::spawn().await;
    let chat = app.create_chat().await;
    app.store.set_user_count(app.user.id, 5);

    let mut row = Subscription::stub(app.user.id, "cus_lapsed");
    let mut lapsed = active_subscription("sub_lapsed", "cus_lapsed", Some(app.user.id));
    lapsed.status = SubscriptionStatus::Canceled;
    row.apply(&lapsed.snapshot());
    app.store.insert_subscription(&row).await.unwrap();

    let response = app.send_prompt(chat.id, "denied").await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn store_outage_fails_closed() {
    let app = TestApp::spawn().await;
    let chat = app.create_chat().await;
    app.store.set_unavailable(true);

    let response = app.send_prompt(chat.id, "anything").await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "SERVICE_UNAVAILABLE");

    app.store.set_unavailable(false);
    assert_eq!(app.user_count().await, 0);
    assert_eq!(app.store.message_count(), 0);
}

#[tokio::test]
async fn usage_reports_remaining_free_prompts() {
    let app = TestApp::spawn().await;
    app.store.set_user_count(app.user.id, 3);

    let response = app.get("/usage").await;
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["count"], 3);
    assert_eq!(body["freeQuota"], 5);
    assert_eq!(body["remaining"], 2);
    assert_eq!(body["isSubscribed"], false);
}

#[tokio::test]
async fn requests_without_user_header_are_unauthorized() {
    let app = TestApp::spawn().await;
    let chat = app.create_chat().await;

    let response = app
        .client
        .post(app.url(&format!("/chats/{}/messages", chat.id)))
        .json(&serde_json::json!({ "prompt": "hi" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .post_as(uuid::Uuid::new_v4(), "/chats", serde_json::json!({ "name": "x" }))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "UNAUTHORIZED");
}
