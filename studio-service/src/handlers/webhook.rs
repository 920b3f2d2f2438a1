use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};

use crate::error::StudioError;
use crate::startup::AppState;

pub const STRIPE_SIGNATURE_HEADER: &str = "Stripe-Signature";

/// Billing provider webhook. Takes the raw body, which the signature covers.
pub async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, StudioError> {
    let signature = headers
        .get(STRIPE_SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    state.sync.handle(&body, signature).await?;
    Ok((StatusCode::OK, "OK"))
}
