use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use uuid::Uuid;

use crate::error::StudioError;
use crate::models::User;
use crate::startup::AppState;

pub const USER_ID_HEADER: &str = "X-User-ID";

/// The calling user, resolved from the `X-User-ID` header set by the gateway.
///
/// The gateway authenticates the session; this only checks that the id is
/// well formed and names a provisioned user.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = StudioError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| StudioError::Unauthenticated("Missing X-User-ID header".into()))?;

        let user_id = Uuid::parse_str(raw.trim())
            .map_err(|_| StudioError::Unauthenticated("Invalid X-User-ID header".into()))?;

        tracing::Span::current().record("user_id", raw);

        let user = state
            .store
            .get_user(user_id)
            .await?
            .ok_or_else(|| StudioError::Unauthenticated("Unknown user".into()))?;

        Ok(CurrentUser(user))
    }
}
