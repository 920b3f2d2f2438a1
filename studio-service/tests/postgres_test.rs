//! PostgreSQL store tests. Require a database:
//! `TEST_DATABASE_URL=postgres://... cargo test -- --ignored`

use chrono::{Duration, Utc};
use serial_test::serial;
use studio_service::models::{
    ChargeOutcome, Chat, MessageRole, NewMessage, SubscriptionSnapshot, SubscriptionStatus,
    UpsertOutcome, User,
};
use studio_service::services::{Database, Store};

async fn database() -> Database {
    let url = std::env::var("TEST_DATABASE_URL")
        .expect("TEST_DATABASE_URL must be set to run database tests");
    let db = Database::new(&url, 2, 1)
        .await
        .expect("Failed to connect to test database");
    db.run_migrations().await.expect("Failed to run migrations");
    db
}

async fn provision_user(db: &Database, count: i32) -> User {
    let user = User::new("Ada Lovelace", format!("{}@example.com", uuid::Uuid::new_v4()));
    sqlx::query("INSERT INTO users (id, name, email, count) VALUES ($1, $2, $3, $4)")
        .bind(user.id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(count)
        .execute(db.pool())
        .await
        .expect("Failed to insert user");
    user
}

fn user_message(chat: &Chat, prompt: &str) -> NewMessage {
    NewMessage {
        chat_id: chat.id,
        user_id: chat.user_id,
        role: MessageRole::User,
        prompt: prompt.to_string(),
        image: None,
        image_asset_id: None,
    }
}

#[tokio::test]
#[ignore]
#[serial]
async fn charged_insert_stops_at_quota() {
    let db = database().await;
    let user = provision_user(&db, 4).await;
    let chat = db.create_chat(&Chat::new(user.id, "pg")).await.unwrap();

    let outcome = db
        .insert_charged_message(user_message(&chat, "fifth"), 5, false)
        .await
        .unwrap();
    assert!(matches!(outcome, ChargeOutcome::Charged { count: 5, .. }));

    let outcome = db
        .insert_charged_message(user_message(&chat, "sixth"), 5, false)
        .await
        .unwrap();
    assert!(matches!(outcome, ChargeOutcome::QuotaExhausted));

    let messages = db.list_messages(chat.id, user.id).await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(db.get_user(user.id).await.unwrap().unwrap().count, 5);
}

#[tokio::test]
#[ignore]
#[serial]
async fn concurrent_charges_take_one_unit_each() {
    let db = database().await;
    let user = provision_user(&db, 4).await;
    let chat = db.create_chat(&Chat::new(user.id, "pg")).await.unwrap();

    let (a, b) = tokio::join!(
        db.insert_charged_message(user_message(&chat, "a"), 5, false),
        db.insert_charged_message(user_message(&chat, "b"), 5, false)
    );
    let charged = [a.unwrap(), b.unwrap()]
        .iter()
        .filter(|o| matches!(o, ChargeOutcome::Charged { .. }))
        .count();

    assert_eq!(charged, 1);
    assert_eq!(db.get_user(user.id).await.unwrap().unwrap().count, 5);
}

#[tokio::test]
#[ignore]
#[serial]
async fn concurrent_claims_of_one_prompt_have_one_winner() {
    let db = database().await;
    let user = provision_user(&db, 0).await;
    let chat = db.create_chat(&Chat::new(user.id, "pg")).await.unwrap();
    let prompt = db.insert_message(user_message(&chat, "fox")).await.unwrap();

    let (a, b) = tokio::join!(db.claim_prompt(prompt.id), db.claim_prompt(prompt.id));

    assert_eq!(a.unwrap() as u8 + b.unwrap() as u8, 1);
    assert!(!db.claim_prompt(prompt.id).await.unwrap());
}

#[tokio::test]
#[ignore]
#[serial]
async fn refund_floors_at_zero() {
    let db = database().await;
    let user = provision_user(&db, 1).await;

    assert_eq!(db.refund_generation(user.id).await.unwrap(), 0);
    assert_eq!(db.refund_generation(user.id).await.unwrap(), 0);
}

#[tokio::test]
#[ignore]
#[serial]
async fn upsert_is_idempotent() {
    let db = database().await;
    let user = provision_user(&db, 0).await;
    let customer_id = format!("cus_{}", uuid::Uuid::new_v4().simple());

    // Second-precision timestamps survive the round trip through TIMESTAMPTZ.
    let now = chrono::DateTime::from_timestamp(Utc::now().timestamp(), 0).unwrap();
    let snapshot = SubscriptionSnapshot {
        customer_id: customer_id.clone(),
        user_id: Some(user.id),
        subscription_id: "sub_pg".to_string(),
        status: SubscriptionStatus::Active,
        price_id: Some("price_monthly".to_string()),
        current_period_start: Some(now),
        current_period_end: Some(now + Duration::days(30)),
        cancel_at_period_end: false,
    };

    let first = db.upsert_subscription(&snapshot).await.unwrap();
    assert!(matches!(first, UpsertOutcome::Inserted(_)));

    let second = db.upsert_subscription(&snapshot).await.unwrap();
    assert_eq!(second, UpsertOutcome::Unchanged);

    let changed = SubscriptionSnapshot {
        cancel_at_period_end: true,
        ..snapshot.clone()
    };
    let third = db.upsert_subscription(&changed).await.unwrap();
    assert!(matches!(third, UpsertOutcome::Updated(row) if row.cancel_at_period_end));

    let unknown = SubscriptionSnapshot {
        customer_id: "cus_nobody".to_string(),
        user_id: None,
        ..snapshot
    };
    assert_eq!(
        db.upsert_subscription(&unknown).await.unwrap(),
        UpsertOutcome::UnknownCustomer
    );
}
