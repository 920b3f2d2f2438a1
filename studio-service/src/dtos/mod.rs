pub mod billing;
pub mod chats;

pub use billing::{ClientSecretRequest, ClientSecretResponse, PortalResponse, UsageResponse};
pub use chats::{ChatRequest, GenerationResponse, MessageRequest};
