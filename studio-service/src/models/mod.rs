//! Domain models for studio-service.

mod billing;
mod chat;
mod subscription;
mod user;

pub use billing::{
    BillingEvent, BillingSubscription, CreatedSubscription, Invoice, PaymentIntent, Price, Product,
};
pub use chat::{
    ChargeOutcome, Chat, ChatDeletion, ChatSummary, Message, MessageRole, NewMessage, UnknownRole,
};
pub use subscription::{Subscription, SubscriptionSnapshot, SubscriptionStatus, UpsertOutcome};
pub use user::User;
