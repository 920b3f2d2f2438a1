use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

impl TryFrom<String> for MessageRole {
    type Error = UnknownRole;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            _ => Err(UnknownRole(value)),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown message role: {0}")]
pub struct UnknownRole(String);

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Chat {
    pub fn new(user_id: Uuid, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            name: name.into(),
            created_utc: now,
            updated_utc: now,
        }
    }
}

/// A chat with its most recent message, as listed in the sidebar.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSummary {
    #[serde(flatten)]
    pub chat: Chat,
    pub last_message: Option<Message>,
}

impl ChatSummary {
    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        self.last_message.as_ref().map(|m| m.updated_utc)
    }
}

/// Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub user_id: Uuid,
    #[sqlx(try_from = "String")]
    pub role: MessageRole,
    pub prompt: String,
    pub image: Option<String>,
    #[serde(skip_serializing)]
    pub image_asset_id: Option<String>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub chat_id: Uuid,
    pub user_id: Uuid,
    pub role: MessageRole,
    pub prompt: String,
    pub image: Option<String>,
    pub image_asset_id: Option<String>,
}

impl NewMessage {
    pub fn into_message(self) -> Message {
        let now = Utc::now();
        Message {
            id: Uuid::new_v4(),
            chat_id: self.chat_id,
            user_id: self.user_id,
            role: self.role,
            prompt: self.prompt,
            image: self.image,
            image_asset_id: self.image_asset_id,
            created_utc: now,
            updated_utc: now,
        }
    }
}

/// Outcome of the charged user-message write.
#[derive(Debug, Clone)]
pub enum ChargeOutcome {
    Charged { message: Message, count: i32 },
    /// The conditional increment matched nothing; nothing was written.
    QuotaExhausted,
}

/// Result of deleting a chat and its media.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatDeletion {
    pub deleted_assets: usize,
    pub failed_assets: Vec<String>,
}
