//! Persistence seam shared by the PostgreSQL and in-memory stores.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    ChargeOutcome, Chat, ChatSummary, Message, NewMessage, Subscription, SubscriptionSnapshot,
    UpsertOutcome, User,
};

#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached. Callers fail closed.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_) => StoreError::Unavailable(err.to_string()),
            sqlx::Error::RowNotFound => StoreError::NotFound(err.to_string()),
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::Conflict(db.message().to_string())
            }
            _ => StoreError::Database(err.to_string()),
        }
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn health_check(&self) -> Result<(), StoreError>;

    // ===== Users =====

    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>, StoreError>;

    /// Compensating decrement, floored at zero. Returns the new count.
    async fn refund_generation(&self, user_id: Uuid) -> Result<i32, StoreError>;

    // ===== Subscriptions =====

    async fn get_subscription(&self, user_id: Uuid) -> Result<Option<Subscription>, StoreError>;

    async fn insert_subscription(
        &self,
        subscription: &Subscription,
    ) -> Result<Subscription, StoreError>;

    /// Write a canonical snapshot keyed by customer id. A snapshot equal to the
    /// stored row leaves the row untouched.
    async fn upsert_subscription(
        &self,
        snapshot: &SubscriptionSnapshot,
    ) -> Result<UpsertOutcome, StoreError>;

    // ===== Chats =====

    async fn create_chat(&self, chat: &Chat) -> Result<Chat, StoreError>;

    async fn get_chat(&self, chat_id: Uuid) -> Result<Option<Chat>, StoreError>;

    /// The user's chats, most recently active first.
    async fn list_chats(&self, user_id: Uuid) -> Result<Vec<ChatSummary>, StoreError>;

    async fn rename_chat(&self, chat_id: Uuid, name: &str) -> Result<Chat, StoreError>;

    /// Deletes the chat and, by cascade, its messages.
    async fn delete_chat(&self, chat_id: Uuid) -> Result<(), StoreError>;

    // ===== Messages =====

    /// Messages of a chat owned by `user_id`, oldest first.
    async fn list_messages(&self, chat_id: Uuid, user_id: Uuid)
        -> Result<Vec<Message>, StoreError>;

    async fn last_message(&self, chat_id: Uuid) -> Result<Option<Message>, StoreError>;

    /// Insert a user message and increment the author's counter in one atomic
    /// step, provided `count < free_quota` or `subscribed`.
    async fn insert_charged_message(
        &self,
        message: NewMessage,
        free_quota: i32,
        subscribed: bool,
    ) -> Result<ChargeOutcome, StoreError>;

    async fn insert_message(&self, message: NewMessage) -> Result<Message, StoreError>;

    /// Mark a user prompt as taken by one answering run. Returns `false` when
    /// another run already holds it; each prompt is claimed at most once.
    async fn claim_prompt(&self, message_id: Uuid) -> Result<bool, StoreError>;
}

/// Most recent activity first; chats without messages last, newest first.
pub fn sort_by_activity(chats: &mut [ChatSummary]) {
    chats.sort_by(|a, b| {
        b.last_activity()
            .cmp(&a.last_activity())
            .then_with(|| b.chat.created_utc.cmp(&a.chat.created_utc))
    });
}
