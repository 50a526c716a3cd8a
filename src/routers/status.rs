use crate::models::api::prelude::*;
use crate::models::session::SessionState;
use crate::services::states::SpoolState;
use axum::Json;
use axum::extract::{Path, State};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResp {
    pub status: SessionState,
    pub bytes_received: u64,
    pub total_bytes: u64,
    pub progress: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub playback_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_playable_ready_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hd_ready_at: Option<i64>,
}

pub async fn session_status(
    State(state): State<Arc<SpoolState>>,
    Path(upload_id): Path<Uuid>,
) -> ApiResult<Json<StatusResp>> {
    let Some(session) = state.db.sessions().get(upload_id).await? else {
        return Err(not_found!("Upload session not found"));
    };
    let playback_url = matches!(
        session.state,
        SessionState::Playable | SessionState::HdReady
    )
    .then(|| {
        format!(
            "{}/{}/master.m3u8",
            state.config.upload.public_media_base, session.upload_id
        )
    });
    Ok(Json(StatusResp {
        status: session.state,
        bytes_received: session.received_bytes,
        total_bytes: session.declared_size,
        progress: session.progress(),
        cid: session.content_address,
        playback_url,
        error_code: session.error_code,
        warning: session.warning,
        first_playable_ready_at: session.first_playable_at,
        hd_ready_at: session.hd_ready_at,
    }))
}
