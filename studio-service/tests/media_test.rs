//! Locally stored images are served by the service itself.

mod common;

use common::{FakeBilling, IMAGE};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use studio_service::config::QuotaConfig;
use studio_service::models::{Chat, User};
use studio_service::services::media::LocalMediaStore;
use studio_service::services::providers::mock::MockModel;
use studio_service::services::{InMemoryStore, Store};
use studio_service::startup::{Adapters, AppState, Application};
use tempfile::TempDir;

#[tokio::test]
async fn local_images_are_served_under_media() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(InMemoryStore::new());
    let user = store.insert_user(User::new("Ada Lovelace", "ada@example.com"));
    let chat = store.create_chat(&Chat::new(user.id, "local")).await.unwrap();
    let media = LocalMediaStore::new(dir.path(), "http://localhost:8080/media")
        .await
        .unwrap();

    let state = AppState::new(
        Adapters {
            store: store.clone(),
            billing: Arc::new(FakeBilling::new()),
            model: Arc::new(MockModel::new()),
            media: Arc::new(media),
        },
        QuotaConfig::default(),
        "http://localhost:3000/settings/billing".to_string(),
    )
    .with_media_dir(dir.path());

    let app = Application::with_state(0, state).await.unwrap();
    let address = format!("http://127.0.0.1:{}", app.http_port());
    tokio::spawn(async move {
        app.run_until_stopped().await.ok();
    });

    let client = Client::new();
    let response = client
        .post(format!("{}/chats/{}/generate", address, chat.id))
        .header("X-User-ID", user.id.to_string())
        .json(&json!({ "prompt": "a lighthouse", "base64Image": IMAGE }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body: Value = response.json().await.unwrap();

    let image_url = body["userMessage"]["image"].as_str().unwrap();
    let file_name = image_url.rsplit('/').next().unwrap();
    assert!(image_url.starts_with("http://localhost:8080/media/"));

    let response = client
        .get(format!("{}/media/{}", address, file_name))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "image/png");
    assert_eq!(response.bytes().await.unwrap().as_ref(), b"hello");

    let response = client
        .get(format!("{}/media/missing.png", address))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
