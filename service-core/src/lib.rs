//! service-core: Shared infrastructure for the studio services.
pub mod config;
pub mod error;
pub mod middleware;
pub mod observability;
pub mod retry;

pub use axum;
pub use serde;
pub use tokio;
pub use tracing;
