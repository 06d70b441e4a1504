use axum::extract::{Path, Query, State};
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::AppResult;
use crate::middleware::auth::AuthUser;
use crate::models::{ConversationEntry, Message};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct PageParams {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl PageParams {
    fn resolve(&self, state: &AppState) -> (u32, u32) {
        let page = self.page.unwrap_or(1).max(1);
        let page_size = self
            .page_size
            .unwrap_or(state.config.default_page_size)
            .clamp(1, 200);
        (page, page_size)
    }
}

/// Per-user conversation list, one entry per counterpart, most recent
/// activity first.
pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(params): Query<PageParams>,
) -> AppResult<Json<Vec<ConversationEntry>>> {
    let (page, page_size) = params.resolve(&state);
    let entries = state
        .store
        .list_conversations(user.id, page, page_size)
        .await?;
    Ok(Json(entries))
}

/// Paginated history with one counterpart, newest first. Offline receivers
/// catch up on missed messages through this endpoint.
pub async fn get_history(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(peer_id): Path<Uuid>,
    Query(params): Query<PageParams>,
) -> AppResult<Json<Vec<Message>>> {
    let (page, page_size) = params.resolve(&state);
    let messages = state
        .store
        .get_conversation(user.id, peer_id, page, page_size)
        .await?;
    Ok(Json(messages))
}

/// Bulk soft delete of the caller's conversation with `peer_id`.
pub async fn clear_conversation(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(peer_id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    let cleared = state.store.clear_conversation(user.id, peer_id).await?;
    Ok(Json(json!({ "cleared": cleared })))
}
