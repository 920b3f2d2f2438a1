use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use uuid::Uuid;
use validator::Validate;

use crate::dtos::{GenerationResponse, MessageRequest};
use crate::error::StudioError;
use crate::middleware::CurrentUser;
use crate::startup::AppState;

pub async fn get_messages(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(chat_id): Path<Uuid>,
) -> Result<impl IntoResponse, StudioError> {
    Ok(Json(state.orchestrator.get_messages(user.id, chat_id).await?))
}

pub async fn create_user_message(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(chat_id): Path<Uuid>,
    Json(req): Json<MessageRequest>,
) -> Result<impl IntoResponse, StudioError> {
    req.validate()?;
    let message = state
        .orchestrator
        .create_user_message(user.id, chat_id, &req.prompt, req.base64_image.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn create_assistant_message(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(chat_id): Path<Uuid>,
    Json(req): Json<MessageRequest>,
) -> Result<impl IntoResponse, StudioError> {
    req.validate()?;
    let message = state
        .orchestrator
        .create_assistant_message(user.id, chat_id, &req.prompt, req.base64_image.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn generate(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(chat_id): Path<Uuid>,
    Json(req): Json<MessageRequest>,
) -> Result<impl IntoResponse, StudioError> {
    req.validate()?;
    let (user_message, assistant_message) = state
        .orchestrator
        .generate(user.id, chat_id, &req.prompt, req.base64_image.as_deref())
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(GenerationResponse {
            user_message,
            assistant_message,
        }),
    ))
}
