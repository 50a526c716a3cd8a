use crate::models::api::prelude::*;
use crate::services::drafts::DraftStore;
use crate::services::states::SpoolState;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use std::sync::Arc;
use uuid::Uuid;

/// Pass-through to the metadata draft collaborator; the core only checks
/// that the caller owns the session and round-trips the patch.
pub async fn update_draft(
    State(state): State<Arc<SpoolState>>,
    owner: OwnerId,
    Path(upload_id): Path<Uuid>,
    Json(patch): Json<serde_json::Value>,
) -> ApiResult<StatusCode> {
    let Some(session) = state.db.sessions().get(upload_id).await? else {
        return Err(not_found!("Upload session not found"));
    };
    if session.owner_id != owner.0 {
        return Err(forbidden!("Draft belongs to another owner"));
    }
    let Some(draft_id) = session.draft_id else {
        return Err(not_found!("Session has no draft"));
    };
    if !patch.is_object() {
        return Err(bad_request!("Draft patch must be a JSON object"));
    }
    state.drafts.update_draft(draft_id, patch).await?;
    Ok(StatusCode::NO_CONTENT)
}
