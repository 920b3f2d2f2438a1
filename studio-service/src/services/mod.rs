pub mod billing;
pub mod checkout;
pub mod database;
pub mod entitlement;
pub mod media;
pub mod memory;
pub mod metrics;
pub mod orchestrator;
pub mod providers;
pub mod store;
pub mod sync;

pub use checkout::CheckoutService;
pub use database::Database;
pub use entitlement::{Entitlement, EntitlementResolver};
pub use memory::InMemoryStore;
pub use orchestrator::GenerationOrchestrator;
pub use store::{Store, StoreError};
pub use sync::{BillingEventSynchronizer, SyncOutcome};
