use axum::{extract::State, response::IntoResponse, Json};
use validator::Validate;

use crate::dtos::{ClientSecretRequest, ClientSecretResponse, PortalResponse, UsageResponse};
use crate::error::StudioError;
use crate::middleware::CurrentUser;
use crate::startup::AppState;

pub async fn get_prices(
    State(state): State<AppState>,
    _user: CurrentUser,
) -> Result<impl IntoResponse, StudioError> {
    Ok(Json(state.checkout.get_prices().await?))
}

pub async fn get_client_secret(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(req): Json<ClientSecretRequest>,
) -> Result<impl IntoResponse, StudioError> {
    req.validate()?;
    let client_secret = state.checkout.get_client_secret(&user, &req.price_id).await?;
    Ok(Json(ClientSecretResponse { client_secret }))
}

pub async fn get_subscription_info(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<impl IntoResponse, StudioError> {
    Ok(Json(state.checkout.get_subscription_info(user.id).await?))
}

pub async fn get_billing_portal_url(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<impl IntoResponse, StudioError> {
    let url = state.checkout.get_billing_portal_url(user.id).await?;
    Ok(Json(PortalResponse { url }))
}

pub async fn get_usage(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<impl IntoResponse, StudioError> {
    let entitlement = state.checkout.get_usage(user.id).await?;
    Ok(Json(UsageResponse {
        count: entitlement.count,
        free_quota: entitlement.free_quota,
        remaining: entitlement.remaining(),
        is_subscribed: entitlement.is_subscribed,
    }))
}
