//! Application startup and lifecycle management.

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, patch, post},
    Router,
};
use secrecy::ExposeSecret;
use service_core::error::AppError;
use service_core::middleware::request_id_middleware;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::config::{MediaConfig, ModelProvider, QuotaConfig, StoreConfig, StudioConfig};
use crate::handlers::{billing, chats, health, messages, webhook};
use crate::services::billing::{BillingClient, StripeClient};
use crate::services::media::{CloudinaryStore, LocalMediaStore, MediaStore};
use crate::services::metrics::{http_metrics_middleware, init_metrics};
use crate::services::providers::mock::MockModel;
use crate::services::providers::openai::{OpenAiConfig, OpenAiModel};
use crate::services::providers::GenerativeModel;
use crate::services::{
    BillingEventSynchronizer, CheckoutService, Database, EntitlementResolver,
    GenerationOrchestrator, InMemoryStore, Store,
};

/// Generated images arrive as data URIs.
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub entitlements: EntitlementResolver,
    pub orchestrator: Arc<GenerationOrchestrator>,
    pub checkout: Arc<CheckoutService>,
    pub sync: Arc<BillingEventSynchronizer>,
    /// Served under `/media` when images are stored on local disk.
    pub media_dir: Option<PathBuf>,
}

/// The adapters a running service talks to.
pub struct Adapters {
    pub store: Arc<dyn Store>,
    pub billing: Arc<dyn BillingClient>,
    pub model: Arc<dyn GenerativeModel>,
    pub media: Arc<dyn MediaStore>,
}

impl AppState {
    pub fn new(adapters: Adapters, quota: QuotaConfig, portal_return_url: String) -> Self {
        let Adapters {
            store,
            billing,
            model,
            media,
        } = adapters;

        let entitlements = EntitlementResolver::new(store.clone(), quota.clone());
        Self::with_resolver(store, billing, model, media, quota, entitlements, portal_return_url)
    }

    /// Like [`AppState::new`] with a caller-built resolver, e.g. one on a fixed clock.
    pub fn with_resolver(
        store: Arc<dyn Store>,
        billing: Arc<dyn BillingClient>,
        model: Arc<dyn GenerativeModel>,
        media: Arc<dyn MediaStore>,
        quota: QuotaConfig,
        entitlements: EntitlementResolver,
        portal_return_url: String,
    ) -> Self {
        let orchestrator = Arc::new(GenerationOrchestrator::new(
            store.clone(),
            entitlements.clone(),
            model,
            media,
            quota,
        ));
        let checkout = Arc::new(CheckoutService::new(
            store.clone(),
            billing.clone(),
            entitlements.clone(),
            portal_return_url,
        ));
        let sync = Arc::new(BillingEventSynchronizer::new(store.clone(), billing));

        Self {
            store,
            entitlements,
            orchestrator,
            checkout,
            sync,
            media_dir: None,
        }
    }

    pub fn with_media_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.media_dir = Some(dir.into());
        self
    }
}

pub fn build_router(state: AppState) -> Router {
    let media_dir = state.media_dir.clone();
    let router = Router::new()
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        .route("/metrics", get(health::metrics_handler))
        .route("/chats", post(chats::create_chat).get(chats::get_chats))
        .route(
            "/chats/:chat_id",
            patch(chats::edit_chat).delete(chats::delete_chat),
        )
        .route(
            "/chats/:chat_id/messages",
            get(messages::get_messages).post(messages::create_user_message),
        )
        .route(
            "/chats/:chat_id/generations",
            post(messages::create_assistant_message),
        )
        .route("/chats/:chat_id/generate", post(messages::generate))
        .route("/billing/prices", get(billing::get_prices))
        .route("/billing/client-secret", post(billing::get_client_secret))
        .route("/billing/subscriptions", get(billing::get_subscription_info))
        .route("/billing/portal", post(billing::get_billing_portal_url))
        .route("/usage", get(billing::get_usage))
        .route("/webhook", post(webhook::handle_webhook))
        .route_layer(middleware::from_fn(http_metrics_middleware));

    let router = match media_dir {
        Some(dir) => router.nest_service("/media", ServeDir::new(dir)),
        None => router,
    };

    router
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

async fn build_adapters(config: &StudioConfig) -> Result<Adapters, AppError> {
    let store: Arc<dyn Store> = match &config.store {
        StoreConfig::Postgres(db_config) => {
            let db = Database::new(
                db_config.url.expose_secret(),
                db_config.max_connections,
                db_config.min_connections,
            )
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to connect to PostgreSQL");
                e
            })?;
            db.run_migrations().await.map_err(|e| {
                tracing::error!(error = %e, "Failed to run migrations");
                e
            })?;
            Arc::new(db)
        }
        StoreConfig::Memory => {
            tracing::warn!("Using in-memory store; data is lost on restart");
            Arc::new(InMemoryStore::new())
        }
    };

    let stripe = StripeClient::new(config.stripe.clone(), &config.http)
        .map_err(|e| AppError::ConfigError(anyhow::anyhow!(e)))?;
    if !stripe.is_configured() {
        tracing::warn!("Stripe credentials not set; billing calls and webhooks will fail");
    }

    let model: Arc<dyn GenerativeModel> = match config.model.provider {
        ModelProvider::OpenAi => Arc::new(
            OpenAiModel::new(OpenAiConfig::from(&config.model), &config.http)
                .map_err(|e| AppError::ConfigError(anyhow::anyhow!(e)))?,
        ),
        ModelProvider::Mock => {
            tracing::warn!("Using mock generative model");
            Arc::new(MockModel::new())
        }
    };

    let media: Arc<dyn MediaStore> = match &config.media {
        MediaConfig::Cloudinary(cloudinary) => {
            let store = CloudinaryStore::new(cloudinary.clone(), &config.http)
                .map_err(|e| AppError::ConfigError(anyhow::anyhow!(e)))?;
            if !store.is_configured() {
                tracing::warn!("Cloudinary credentials not set; image uploads will fail");
            }
            Arc::new(store)
        }
        MediaConfig::Local(local) => Arc::new(
            LocalMediaStore::new(&local.path, local.public_base_url.clone())
                .await
                .map_err(|e| AppError::ConfigError(anyhow::anyhow!(e)))?,
        ),
    };

    Ok(Adapters {
        store,
        billing: Arc::new(stripe),
        model,
        media,
    })
}

/// Application container for managing server lifecycle.
pub struct Application {
    http_port: u16,
    http_listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: StudioConfig) -> Result<Self, AppError> {
        init_metrics();

        let adapters = build_adapters(&config).await?;
        let mut state = AppState::new(
            adapters,
            config.quota.clone(),
            config.billing_portal_return_url(),
        );
        if let MediaConfig::Local(local) = &config.media {
            state = state.with_media_dir(&local.path);
        }

        Self::with_state(config.common.port, state).await
    }

    /// Bind a listener for an already assembled state. Port 0 picks a free port.
    pub async fn with_state(port: u16, state: AppState) -> Result<Self, AppError> {
        init_metrics();

        let http_addr = SocketAddr::from(([0, 0, 0, 0], port));
        let http_listener = TcpListener::bind(http_addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %http_addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let http_port = http_listener.local_addr()?.port();

        tracing::info!(http_port = http_port, "Studio service listener bound");

        Ok(Self {
            http_port,
            http_listener,
            state,
        })
    }

    /// Get the HTTP port the server is listening on.
    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let router = build_router(self.state);

        tracing::info!(
            service = "studio-service",
            version = env!("CARGO_PKG_VERSION"),
            http_port = self.http_port,
            "Service ready to accept connections"
        );

        axum::serve(self.http_listener, router).await.map_err(|e| {
            tracing::error!(error = %e, "HTTP server error");
            std::io::Error::other(format!("HTTP server error: {}", e))
        })
    }
}
