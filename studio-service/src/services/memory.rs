//! In-memory store for tests and local development.
//!
//! A single mutex guards all tables, which gives the charged-message write the
//! same all-or-nothing behavior as the PostgreSQL transaction.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

use crate::models::{
    ChargeOutcome, Chat, ChatSummary, Message, NewMessage, Subscription, SubscriptionSnapshot,
    UpsertOutcome, User,
};
use crate::services::store::{sort_by_activity, Store, StoreError};

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    subscriptions: Vec<Subscription>,
    chats: HashMap<Uuid, Chat>,
    /// Insertion order doubles as the tie-breaker for equal timestamps.
    messages: Vec<Message>,
    claimed_prompts: HashSet<Uuid>,
}

#[derive(Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
    unavailable: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_user(&self, user: User) -> User {
        let mut tables = self.lock();
        tables.users.insert(user.id, user.clone());
        user
    }

    /// Simulate an outage: every subsequent call fails with `Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn set_user_count(&self, user_id: Uuid, count: i32) {
        if let Some(user) = self.lock().users.get_mut(&user_id) {
            user.count = count;
        }
    }

    pub fn message_count(&self) -> usize {
        self.lock().messages.len()
    }

    pub fn subscription_for_customer(&self, customer_id: &str) -> Option<Subscription> {
        self.lock()
            .subscriptions
            .iter()
            .find(|s| s.customer_id == customer_id)
            .cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Tables> {
        // writes are single-step, so a poisoned lock still holds consistent data
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn health_check(&self) -> Result<(), StoreError> {
        self.check_available()
    }

    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>, StoreError> {
        self.check_available()?;
        Ok(self.lock().users.get(&user_id).cloned())
    }

    async fn refund_generation(&self, user_id: Uuid) -> Result<i32, StoreError> {
        self.check_available()?;
        let mut tables = self.lock();
        let user = tables
            .users
            .get_mut(&user_id)
            .ok_or_else(|| StoreError::NotFound(format!("user {}", user_id)))?;
        user.count = (user.count - 1).max(0);
        Ok(user.count)
    }

    async fn get_subscription(&self, user_id: Uuid) -> Result<Option<Subscription>, StoreError> {
        self.check_available()?;
        Ok(self
            .lock()
            .subscriptions
            .iter()
            .find(|s| s.user_id == user_id)
            .cloned())
    }

    async fn insert_subscription(
        &self,
        subscription: &Subscription,
    ) -> Result<Subscription, StoreError> {
        self.check_available()?;
        let mut tables = self.lock();
        if tables.subscriptions.iter().any(|s| {
            s.user_id == subscription.user_id || s.customer_id == subscription.customer_id
        }) {
            return Err(StoreError::Conflict(
                "subscription already exists for user or customer".into(),
            ));
        }
        tables.subscriptions.push(subscription.clone());
        Ok(subscription.clone())
    }

    async fn upsert_subscription(
        &self,
        snapshot: &SubscriptionSnapshot,
    ) -> Result<UpsertOutcome, StoreError> {
        self.check_available()?;
        let mut tables = self.lock();

        if let Some(existing) = tables
            .subscriptions
            .iter_mut()
            .find(|s| s.customer_id == snapshot.customer_id)
        {
            if existing.matches(snapshot) {
                return Ok(UpsertOutcome::Unchanged);
            }
            existing.apply(snapshot);
            return Ok(UpsertOutcome::Updated(existing.clone()));
        }

        let Some(user_id) = snapshot.user_id else {
            return Ok(UpsertOutcome::UnknownCustomer);
        };
        if tables.subscriptions.iter().any(|s| s.user_id == user_id) {
            return Err(StoreError::Conflict(format!(
                "user {} already has a subscription",
                user_id
            )));
        }

        let mut row = Subscription::stub(user_id, snapshot.customer_id.clone());
        row.apply(snapshot);
        tables.subscriptions.push(row.clone());
        Ok(UpsertOutcome::Inserted(row))
    }

    async fn create_chat(&self, chat: &Chat) -> Result<Chat, StoreError> {
        self.check_available()?;
        self.lock().chats.insert(chat.id, chat.clone());
        Ok(chat.clone())
    }

    async fn get_chat(&self, chat_id: Uuid) -> Result<Option<Chat>, StoreError> {
        self.check_available()?;
        Ok(self.lock().chats.get(&chat_id).cloned())
    }

    async fn list_chats(&self, user_id: Uuid) -> Result<Vec<ChatSummary>, StoreError> {
        self.check_available()?;
        let tables = self.lock();
        let mut summaries: Vec<ChatSummary> = tables
            .chats
            .values()
            .filter(|c| c.user_id == user_id)
            .map(|chat| ChatSummary {
                chat: chat.clone(),
                last_message: tables
                    .messages
                    .iter()
                    .filter(|m| m.chat_id == chat.id)
                    .max_by_key(|m| m.updated_utc)
                    .cloned(),
            })
            .collect();
        sort_by_activity(&mut summaries);
        Ok(summaries)
    }

    async fn rename_chat(&self, chat_id: Uuid, name: &str) -> Result<Chat, StoreError> {
        self.check_available()?;
        let mut tables = self.lock();
        let chat = tables
            .chats
            .get_mut(&chat_id)
            .ok_or_else(|| StoreError::NotFound(format!("chat {}", chat_id)))?;
        chat.name = name.to_string();
        chat.updated_utc = Utc::now();
        Ok(chat.clone())
    }

    async fn delete_chat(&self, chat_id: Uuid) -> Result<(), StoreError> {
        self.check_available()?;
        let mut tables = self.lock();
        if tables.chats.remove(&chat_id).is_none() {
            return Err(StoreError::NotFound(format!("chat {}", chat_id)));
        }
        let Tables {
            messages,
            claimed_prompts,
            ..
        } = &mut *tables;
        messages.retain(|m| {
            let keep = m.chat_id != chat_id;
            if !keep {
                claimed_prompts.remove(&m.id);
            }
            keep
        });
        Ok(())
    }

    async fn list_messages(
        &self,
        chat_id: Uuid,
        user_id: Uuid,
    ) -> Result<Vec<Message>, StoreError> {
        self.check_available()?;
        let mut messages: Vec<Message> = self
            .lock()
            .messages
            .iter()
            .filter(|m| m.chat_id == chat_id && m.user_id == user_id)
            .cloned()
            .collect();
        // stable sort keeps insertion order for equal timestamps
        messages.sort_by_key(|m| m.created_utc);
        Ok(messages)
    }

    async fn last_message(&self, chat_id: Uuid) -> Result<Option<Message>, StoreError> {
        self.check_available()?;
        Ok(self
            .lock()
            .messages
            .iter()
            .filter(|m| m.chat_id == chat_id)
            .max_by_key(|m| m.created_utc)
            .cloned())
    }

    async fn insert_charged_message(
        &self,
        message: NewMessage,
        free_quota: i32,
        subscribed: bool,
    ) -> Result<ChargeOutcome, StoreError> {
        self.check_available()?;
        let mut tables = self.lock();
        if !tables.chats.contains_key(&message.chat_id) {
            return Err(StoreError::NotFound(format!("chat {}", message.chat_id)));
        }
        let user = tables
            .users
            .get_mut(&message.user_id)
            .ok_or_else(|| StoreError::NotFound(format!("user {}", message.user_id)))?;

        if !(user.count < free_quota || subscribed) {
            return Ok(ChargeOutcome::QuotaExhausted);
        }
        user.count += 1;
        let count = user.count;

        let message = message.into_message();
        tables.messages.push(message.clone());
        Ok(ChargeOutcome::Charged { message, count })
    }

    async fn insert_message(&self, message: NewMessage) -> Result<Message, StoreError> {
        self.check_available()?;
        let mut tables = self.lock();
        if !tables.chats.contains_key(&message.chat_id) {
            return Err(StoreError::NotFound(format!("chat {}", message.chat_id)));
        }
        let message = message.into_message();
        tables.messages.push(message.clone());
        Ok(message)
    }

    async fn claim_prompt(&self, message_id: Uuid) -> Result<bool, StoreError> {
        self.check_available()?;
        let mut tables = self.lock();
        if !tables.messages.iter().any(|m| m.id == message_id) {
            return Err(StoreError::NotFound(format!("message {}", message_id)));
        }
        Ok(tables.claimed_prompts.insert(message_id))
    }
}
