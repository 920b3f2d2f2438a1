use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use uuid::Uuid;
use validator::Validate;

use crate::dtos::ChatRequest;
use crate::error::StudioError;
use crate::middleware::CurrentUser;
use crate::startup::AppState;

pub async fn create_chat(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(req): Json<ChatRequest>,
) -> Result<impl IntoResponse, StudioError> {
    req.validate()?;
    let chat = state.orchestrator.create_chat(user.id, &req.name).await?;
    Ok((StatusCode::CREATED, Json(chat)))
}

pub async fn get_chats(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<impl IntoResponse, StudioError> {
    Ok(Json(state.orchestrator.get_chats(user.id).await?))
}

pub async fn edit_chat(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(chat_id): Path<Uuid>,
    Json(req): Json<ChatRequest>,
) -> Result<impl IntoResponse, StudioError> {
    req.validate()?;
    let chat = state
        .orchestrator
        .edit_chat(user.id, chat_id, &req.name)
        .await?;
    Ok(Json(chat))
}

pub async fn delete_chat(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(chat_id): Path<Uuid>,
) -> Result<impl IntoResponse, StudioError> {
    Ok(Json(state.orchestrator.delete_chat(user.id, chat_id).await?))
}
