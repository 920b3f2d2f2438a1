use crate::models::Message;
use serde::{Deserialize, Serialize};
use validator::Validate;

pub const MAX_PROMPT_CHARS: u64 = 4000;
pub const MAX_CHAT_NAME_CHARS: u64 = 100;

/// Body of chat create and rename.
#[derive(Debug, Deserialize, Validate)]
pub struct ChatRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct MessageRequest {
    #[validate(length(min = 1, max = 4000))]
    pub prompt: String,
    /// `data:image/...;base64,` URI.
    pub base64_image: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationResponse {
    pub user_message: Message,
    pub assistant_message: Message,
}
