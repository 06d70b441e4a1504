use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthUser;
use crate::models::Message;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct EditMessageRequest {
    pub content: String,
}

/// Sender-only content edit.
pub async fn edit_message(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(body): Json<EditMessageRequest>,
) -> AppResult<Json<Message>> {
    if body.content.trim().is_empty() {
        return Err(AppError::Validation("message content is empty".into()));
    }
    if body.content.chars().count() > state.config.max_message_length {
        return Err(AppError::Validation(format!(
            "message exceeds {} characters",
            state.config.max_message_length
        )));
    }
    let message = state.store.edit(id, user.id, body.content).await?;
    Ok(Json(message))
}

/// Participant-only soft delete; the row is retained.
pub async fn delete_message(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    state.store.soft_delete(id, user.id).await?;
    Ok(StatusCode::NO_CONTENT)
}
