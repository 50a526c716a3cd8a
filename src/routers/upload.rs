use crate::models::api::prelude::*;
use crate::models::api::{HEADER_UPLOAD_FINGERPRINT, HEADER_UPLOAD_OFFSET};
use crate::models::events::SessionEvent;
use crate::models::range::ContentRange;
use crate::models::session::{Fingerprint, SessionState, UploadSession};
use crate::routers::VIDEOS_BASE;
use crate::services::blob_store::{BlobStore, BlobStoreError};
use crate::services::drafts::DraftStore;
use crate::services::events::EventSink;
use crate::services::queue::{JobQueue, QueueError};
use crate::services::states::SpoolState;
use crate::utils::now_ts;
use axum::Json;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{AppendHeaders, IntoResponse, Response};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::io::{self, Cursor};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::io::StreamReader;
use uuid::Uuid;

/// How much of the first chunk is sniffed against the declared MIME type.
const SNIFF_LEN: u64 = 8192;

#[derive(Debug, Deserialize)]
pub struct CreateQuery {
    #[serde(rename = "uploadType")]
    pub upload_type: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionReq {
    pub filename: String,
    pub size: u64,
    pub mime_type: String,
    #[serde(default)]
    pub last_modified: Option<i64>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub visibility: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
}

impl CreateSessionReq {
    fn fingerprint(&self) -> Fingerprint {
        Fingerprint::new(&self.filename, self.size, self.last_modified.unwrap_or(0))
    }

    fn initial_metadata(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        if let Some(v) = &self.title {
            map.insert("title".into(), v.clone().into());
        }
        if let Some(v) = &self.description {
            map.insert("description".into(), v.clone().into());
        }
        if let Some(v) = &self.tags {
            map.insert("tags".into(), v.clone().into());
        }
        if let Some(v) = &self.visibility {
            map.insert("visibility".into(), v.clone().into());
        }
        if let Some(v) = &self.category {
            map.insert("category".into(), v.clone().into());
        }
        serde_json::Value::Object(map)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionResp {
    pub upload_id: Uuid,
    pub session_url: String,
    pub chunk_size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub draft_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteResp {
    pub upload_id: Uuid,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub draft_id: Option<Uuid>,
}

fn session_url(upload_id: Uuid) -> String {
    format!("{VIDEOS_BASE}/session/{upload_id}")
}

fn create_response(session: &UploadSession) -> Response {
    (
        StatusCode::CREATED,
        Json(CreateSessionResp {
            upload_id: session.upload_id,
            session_url: session_url(session.upload_id),
            chunk_size: session.chunk_size,
            draft_id: session.draft_id,
        }),
    )
        .into_response()
}

/// 308 with the authoritative offset; the client resumes from here.
fn resume_response(offset: u64) -> Response {
    let mut headers = vec![(HEADER_UPLOAD_OFFSET, offset.to_string())];
    if offset > 0 {
        headers.push(("range", format!("bytes=0-{}", offset - 1)));
    }
    (StatusCode::PERMANENT_REDIRECT, AppendHeaders(headers)).into_response()
}

/// 409 carrying the current offset: the client jumped ahead and must
/// fast-forward. Never an end-user-visible error.
fn offset_conflict(offset: u64) -> Response {
    (
        StatusCode::CONFLICT,
        AppendHeaders([(HEADER_UPLOAD_OFFSET, offset.to_string())]),
        Json(serde_json::json!({
            "message": "range does not match the current offset",
            "uploadOffset": offset,
        })),
    )
        .into_response()
}

fn complete_response(session: &UploadSession) -> Response {
    (
        StatusCode::CREATED,
        Json(CompleteResp {
            upload_id: session.upload_id,
            size: session.declared_size,
            draft_id: session.draft_id,
        }),
    )
        .into_response()
}

pub async fn create_session(
    State(state): State<Arc<SpoolState>>,
    owner: OwnerId,
    key: IdempotencyKey,
    Query(q): Query<CreateQuery>,
    Json(req): Json<CreateSessionReq>,
) -> ApiResult<Response> {
    if q.upload_type.as_deref() != Some("resumable") {
        return Err(bad_request!("Only uploadType=resumable is supported"));
    }
    if req.size == 0 {
        return Err(bad_request!("Declared size must be positive"));
    }
    if req.size > state.config.upload.max_file_size_bytes {
        return Err(payload_too_large!(format!(
            "Declared size {} exceeds the {} byte limit",
            req.size, state.config.upload.max_file_size_bytes
        )));
    }
    if !state.config.upload.mime_accepted(&req.mime_type) {
        return Err(unsupported_media!(format!(
            "MIME type {} is not accepted",
            req.mime_type
        )));
    }

    let repo = state.db.sessions();
    if let Some(existing) = repo.find_by_idempotency(&owner.0, &key.0).await? {
        return replay_or_conflict(&existing, &req);
    }

    let draft_id = state
        .drafts
        .create_draft(&owner.0, req.initial_metadata())
        .await?;
    let now = now_ts();
    let session = UploadSession {
        upload_id: Uuid::new_v4(),
        owner_id: owner.0.clone(),
        filename: req.filename.clone(),
        declared_mime: req.mime_type.clone(),
        declared_size: req.size,
        chunk_size: state.config.upload.effective_chunk_size(),
        received_bytes: 0,
        fingerprint: req.fingerprint(),
        idempotency_key: key.0.clone(),
        state: SessionState::Open,
        error_code: None,
        warning: None,
        draft_id: Some(draft_id),
        content_address: None,
        pin_size: None,
        pin_verified_at: None,
        created_at: now,
        updated_at: now,
        first_playable_at: None,
        hd_ready_at: None,
    };
    use crate::services::states::db::DataBaseError;
    match repo.insert(&session).await {
        Ok(()) => {}
        Err(DataBaseError::UniqueViolation { .. }) => {
            // lost a create race for the same key; drop the draft this
            // request created (no session references it) and serve the winner
            if let Err(e) = state.drafts.delete_draft(draft_id).await {
                tracing::warn!(%draft_id, error = %e, "orphaned draft cleanup failed");
            }
            let Some(existing) = repo.find_by_idempotency(&owner.0, &key.0).await? else {
                return Err(internal!("Idempotency race left no session behind"));
            };
            return replay_or_conflict(&existing, &req);
        }
        Err(e) => return Err(e.into()),
    }
    state.events.emit(SessionEvent::Created {
        upload_id: session.upload_id,
        owner_id: owner.0,
    });
    Ok(create_response(&session))
}

/// Replaying a create with the same key returns the original session
/// unchanged; the same key with a different file is a client bug.
fn replay_or_conflict(existing: &UploadSession, req: &CreateSessionReq) -> ApiResult<Response> {
    if existing.fingerprint == req.fingerprint() && existing.declared_mime == req.mime_type {
        Ok(create_response(existing))
    } else {
        Err(conflict!(
            "Idempotency key already used for a different file"
        ))
    }
}

/// Probe and append share the session endpoint; `Content-Range`
/// distinguishes them.
pub async fn session_entry(
    State(state): State<Arc<SpoolState>>,
    Path(upload_id): Path<Uuid>,
    headers: HeaderMap,
    body: Body,
) -> ApiResult<Response> {
    let raw_range = headers
        .get(header::CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| bad_request!("Missing Content-Range header"))?;
    let range = ContentRange::parse(raw_range).map_err(|e| bad_request!(e, "Malformed Content-Range"))?;

    let Some(session) = state.db.sessions().get(upload_id).await? else {
        return Err(not_found!("Upload session not found"));
    };
    if let Some(raw) = headers
        .get(HEADER_UPLOAD_FINGERPRINT)
        .and_then(|v| v.to_str().ok())
    {
        let fp = Fingerprint::parse_header(raw)
            .ok_or_else(|| bad_request!("Malformed X-Upload-Fingerprint header"))?;
        if fp != session.fingerprint {
            return Err(precondition_failed!(
                "Fingerprint mismatch: this session belongs to a different file"
            ));
        }
    }

    match range {
        ContentRange::Probe => probe_response(&session),
        ContentRange::Span { start, end, total } => {
            let deadline = Duration::from_secs(state.config.upload.append_deadline_secs);
            match tokio::time::timeout(
                deadline,
                append_chunk(&state, &session, start, end, total, body),
            )
            .await
            {
                Ok(res) => res,
                // the per-session lock is released with the timed-out future;
                // received_bytes did not advance, the client probes and resumes
                Err(_) => Err(service_unavailable!(
                    "Append deadline exceeded; probe for the current offset and retry"
                )),
            }
        }
    }
}

fn probe_response(session: &UploadSession) -> ApiResult<Response> {
    match session.state {
        SessionState::Open => Ok(resume_response(session.received_bytes)),
        SessionState::Aborted | SessionState::Failed => {
            Err(gone!("Upload session is no longer active"))
        }
        _ => Ok(complete_response(session)),
    }
}

async fn append_chunk(
    state: &Arc<SpoolState>,
    session: &UploadSession,
    start: u64,
    end: u64,
    total: u64,
    body: Body,
) -> ApiResult<Response> {
    let upload_id = session.upload_id;
    if total != session.declared_size {
        return Err(bad_request!(format!(
            "Content-Range total {total} does not match the declared size {}",
            session.declared_size
        )));
    }
    let len = end - start + 1;
    if len > session.chunk_size {
        return Err(bad_request!(format!(
            "Chunk of {len} bytes exceeds the session chunk size {}",
            session.chunk_size
        )));
    }
    let is_last = end + 1 == total;
    if !is_last && len != session.chunk_size {
        return Err(bad_request!(
            "Only the final chunk may be shorter than the session chunk size"
        ));
    }

    // serialize appends per session; the deadline covers the wait
    let _guard = state.locks.acquire(upload_id).await;

    let repo = state.db.sessions();
    let Some(session) = repo.get(upload_id).await? else {
        return Err(not_found!("Upload session not found"));
    };
    if !session.state.accepts_bytes() {
        return match session.state {
            SessionState::Aborted | SessionState::Failed => {
                Err(gone!("Upload session is no longer active"))
            }
            // replayed final chunk after completion: idempotent success
            _ if session.is_fully_received() => Ok(complete_response(&session)),
            _ => Err(gone!("Upload session is no longer active")),
        };
    }
    if start < session.received_bytes {
        // overlap with already-received data: nothing is written, the
        // client fast-forwards to the returned offset
        return Ok(resume_response(session.received_bytes));
    }
    if start > session.received_bytes {
        return Ok(offset_conflict(session.received_bytes));
    }

    let stream = body
        .into_data_stream()
        .map(|res| res.map_err(io::Error::other));
    let mut reader: Box<dyn AsyncRead + Send + Unpin> = Box::new(StreamReader::new(stream));
    if start == 0 {
        let sniff = len.min(SNIFF_LEN) as usize;
        let mut prefix = vec![0_u8; sniff];
        reader
            .read_exact(&mut prefix)
            .await
            .map_err(|e| bad_request!(e, "Request body shorter than the declared range"))?;
        if let Some(kind) = infer::get(&prefix)
            && kind.mime_type() != session.declared_mime
        {
            return Err(unsupported_media!(format!(
                "Body looks like {}, but the session declared {}",
                kind.mime_type(),
                session.declared_mime
            )));
        }
        reader = Box::new(Cursor::new(prefix).chain(reader));
    }

    match state.blob.append(upload_id, start, &mut *reader, len).await {
        Ok(_) => {}
        Err(BlobStoreError::ShortBody { written, expected }) => {
            return Err(bad_request!(format!(
                "Request body ended after {written} of {expected} bytes"
            )));
        }
        Err(e @ BlobStoreError::OffsetMismatch { .. }) => {
            return Err(internal!(e, "Blob store out of sync with the session"));
        }
        Err(e) => {
            return Err(service_unavailable!(e, "Blob store unavailable, retry"));
        }
    }

    let new_received = start + len;
    if !repo
        .advance_received(upload_id, start, new_received, now_ts())
        .await?
    {
        return Err(internal!("Session changed underneath a locked append"));
    }

    if new_received == session.declared_size {
        if repo
            .transition(upload_id, SessionState::Open, SessionState::Uploaded, now_ts())
            .await?
        {
            state.events.emit(SessionEvent::Uploaded {
                upload_id,
                owner_id: session.owner_id.clone(),
            });
            match state.queue.enqueue(upload_id, now_ts()).await {
                Ok(()) => {}
                Err(QueueError::Full) => {
                    // backpressure: the session stays `uploaded` and the
                    // sweeper re-attempts the enqueue
                    tracing::warn!(%upload_id, "pipeline queue full, deferring job");
                }
                Err(e) => {
                    tracing::error!(%upload_id, error = %e, "enqueue failed, deferring job");
                }
            }
        }
        Ok(complete_response(&session))
    } else {
        Ok(resume_response(new_received))
    }
}

pub async fn abort_session(
    State(state): State<Arc<SpoolState>>,
    Path(upload_id): Path<Uuid>,
) -> ApiResult<Response> {
    let repo = state.db.sessions();
    let Some(session) = repo.get(upload_id).await? else {
        return Ok(StatusCode::NO_CONTENT.into_response());
    };
    if session.state.may_abort() && repo.mark_aborted(upload_id, now_ts()).await? {
        state.events.emit(SessionEvent::Aborted {
            upload_id,
            owner_id: session.owner_id,
        });
    }
    // artifact teardown is best-effort and idempotent
    if let Err(e) = state.queue.cancel(upload_id).await {
        tracing::warn!(%upload_id, error = %e, "job cancel failed");
    }
    if let Err(e) = state.blob.delete(upload_id).await {
        tracing::warn!(%upload_id, error = %e, "blob delete failed");
    }
    let media_dir = state
        .config
        .pipeline
        .media_root
        .join(upload_id.to_string());
    if media_dir.exists()
        && let Err(e) = tokio::fs::remove_dir_all(&media_dir).await
    {
        tracing::warn!(%upload_id, error = %e, "media delete failed");
    }
    Ok(StatusCode::NO_CONTENT.into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routers::router;
    use crate::services::blob_store::BlobStore;
    use crate::services::blob_store::FsBlobStore;
    use crate::services::cas::FsCasStore;
    use crate::services::drafts::{DraftStore, SqliteDraftStore};
    use crate::services::events::TracingEventSink;
    use crate::services::queue::{JobQueue, SqliteQueue};
    use crate::services::session_locks::SessionLocks;
    use crate::services::states::config::AppConfig;
    use crate::services::states::db::DataBaseState;
    use crate::services::states::db::test_support::memory_pool;
    use axum::Router;
    use axum::body::to_bytes;
    use axum::http::Request;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    const CHUNK: u64 = 256 * 1024;

    struct Harness {
        _root: tempfile::TempDir,
        app: Router,
        state: Arc<SpoolState>,
    }

    async fn harness() -> Harness {
        let root = tempfile::tempdir().unwrap();
        let pool = memory_pool().await;
        let mut config = AppConfig::default();
        config.upload.blob_root = root.path().join("blobs");
        config.upload.chunk_size_bytes = CHUNK;
        config.pipeline.media_root = root.path().join("media");
        config.pipeline.work_root = root.path().join("work");
        config.pin.cas_root = root.path().join("cas");
        let config = Arc::new(config);
        let state = Arc::new(SpoolState {
            db: DataBaseState::new(pool.clone()),
            blob: Arc::new(FsBlobStore::new(&config.upload.blob_root)),
            cas: Arc::new(FsCasStore::new(&config.pin.cas_root)),
            queue: Arc::new(SqliteQueue::new(pool.clone(), 64)),
            drafts: Arc::new(SqliteDraftStore::new(pool)),
            events: Arc::new(TracingEventSink),
            locks: SessionLocks::new(),
            config,
        });
        let app = router(state.clone());
        Harness {
            _root: root,
            app,
            state,
        }
    }

    fn create_body(filename: &str, size: u64) -> Value {
        json!({
            "filename": filename,
            "size": size,
            "mimeType": "video/mp4",
            "lastModified": 1_722_500_000_i64,
            "title": "a title",
        })
    }

    fn create_req(owner: &str, key: &str, body: &Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/v1/videos?uploadType=resumable")
            .header("x-owner-id", owner)
            .header("idempotency-key", key)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn probe_req(session_url: &str) -> Request<Body> {
        Request::builder()
            .method("PUT")
            .uri(session_url)
            .header("content-range", "bytes */*")
            .header("content-length", "0")
            .body(Body::empty())
            .unwrap()
    }

    fn append_req(session_url: &str, start: u64, end: u64, total: u64, bytes: Vec<u8>) -> Request<Body> {
        Request::builder()
            .method("PUT")
            .uri(session_url)
            .header("content-type", "application/octet-stream")
            .header("content-range", format!("bytes {start}-{end}/{total}"))
            .header("content-length", bytes.len().to_string())
            .body(Body::from(bytes))
            .unwrap()
    }

    async fn json_of(resp: axum::response::Response) -> Value {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn offset_of(resp: &axum::response::Response) -> u64 {
        resp.headers()
            .get(HEADER_UPLOAD_OFFSET)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .expect("Upload-Offset header")
    }

    async fn create(h: &Harness, key: &str, size: u64) -> (Uuid, String, Value) {
        let resp = h
            .app
            .clone()
            .oneshot(create_req("creator-1", key, &create_body("clip.mp4", size)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body = json_of(resp).await;
        let upload_id: Uuid = body["uploadId"].as_str().unwrap().parse().unwrap();
        let session_url = body["sessionUrl"].as_str().unwrap().to_string();
        (upload_id, session_url, body)
    }

    #[tokio::test]
    async fn create_validates_inputs() {
        let h = harness().await;
        // zero size
        let resp = h
            .app
            .clone()
            .oneshot(create_req("o", "k0", &create_body("a.mp4", 0)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        // over the cap
        let too_big = h.state.config.upload.max_file_size_bytes + 1;
        let resp = h
            .app
            .clone()
            .oneshot(create_req("o", "k1", &create_body("a.mp4", too_big)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
        // exactly the cap is accepted
        let at_cap = h.state.config.upload.max_file_size_bytes;
        let resp = h
            .app
            .clone()
            .oneshot(create_req("o", "k2", &create_body("a.mp4", at_cap)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        // disallowed mime
        let mut body = create_body("a.gif", 10);
        body["mimeType"] = "image/gif".into();
        let resp = h
            .app
            .clone()
            .oneshot(create_req("o", "k3", &body))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
        // missing uploadType query
        let req = Request::builder()
            .method("POST")
            .uri("/api/v1/videos")
            .header("x-owner-id", "o")
            .header("idempotency-key", "k4")
            .header("content-type", "application/json")
            .body(Body::from(create_body("a.mp4", 10).to_string()))
            .unwrap();
        let resp = h.app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        // missing idempotency key
        let req = Request::builder()
            .method("POST")
            .uri("/api/v1/videos?uploadType=resumable")
            .header("x-owner-id", "o")
            .header("content-type", "application/json")
            .body(Body::from(create_body("a.mp4", 10).to_string()))
            .unwrap();
        let resp = h.app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn create_replay_returns_the_original_session() {
        let h = harness().await;
        let (id1, url1, body1) = create(&h, "same-key", 1000).await;
        let (id2, url2, body2) = create(&h, "same-key", 1000).await;
        assert_eq!(id1, id2);
        assert_eq!(url1, url2);
        assert_eq!(body1["chunkSize"], body2["chunkSize"]);
        assert_eq!(body1["draftId"], body2["draftId"]);
    }

    #[tokio::test]
    async fn create_conflicts_on_same_key_different_file() {
        let h = harness().await;
        let _ = create(&h, "key-x", 1000).await;
        let resp = h
            .app
            .clone()
            .oneshot(create_req("creator-1", "key-x", &create_body("clip.mp4", 1001)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn chunked_upload_with_probe_replay_and_out_of_order() {
        let h = harness().await;
        let total = 2 * CHUNK + 100;
        let (upload_id, url, _) = create(&h, "k", total).await;

        // fresh session probes at offset zero, without a Range header
        let resp = h.app.clone().oneshot(probe_req(&url)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::PERMANENT_REDIRECT);
        assert_eq!(offset_of(&resp), 0);
        assert!(resp.headers().get("range").is_none());

        // first chunk
        let chunk1 = vec![0_u8; CHUNK as usize];
        let resp = h
            .app
            .clone()
            .oneshot(append_req(&url, 0, CHUNK - 1, total, chunk1.clone()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::PERMANENT_REDIRECT);
        assert_eq!(offset_of(&resp), CHUNK);

        // replaying the same chunk is a no-op fast-forward
        let resp = h
            .app
            .clone()
            .oneshot(append_req(&url, 0, CHUNK - 1, total, chunk1))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::PERMANENT_REDIRECT);
        assert_eq!(offset_of(&resp), CHUNK);
        assert_eq!(h.state.blob.size(upload_id).await.unwrap(), CHUNK);

        // skipping ahead is rejected with the authoritative offset
        let resp = h
            .app
            .clone()
            .oneshot(append_req(
                &url,
                2 * CHUNK,
                total - 1,
                total,
                vec![2_u8; 100],
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        assert_eq!(offset_of(&resp), CHUNK);
        assert_eq!(h.state.blob.size(upload_id).await.unwrap(), CHUNK);

        // middle then final chunk
        let resp = h
            .app
            .clone()
            .oneshot(append_req(
                &url,
                CHUNK,
                2 * CHUNK - 1,
                total,
                vec![1_u8; CHUNK as usize],
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::PERMANENT_REDIRECT);
        assert_eq!(offset_of(&resp), 2 * CHUNK);
        // mid-upload probe reports the received prefix
        let resp = h.app.clone().oneshot(probe_req(&url)).await.unwrap();
        assert_eq!(offset_of(&resp), 2 * CHUNK);
        assert_eq!(
            resp.headers().get("range").unwrap().to_str().unwrap(),
            format!("bytes=0-{}", 2 * CHUNK - 1)
        );

        let resp = h
            .app
            .clone()
            .oneshot(append_req(&url, 2 * CHUNK, total - 1, total, vec![2_u8; 100]))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body = json_of(resp).await;
        assert_eq!(body["uploadId"].as_str().unwrap(), upload_id.to_string());
        assert_eq!(body["size"].as_u64().unwrap(), total);
        assert_eq!(h.state.blob.size(upload_id).await.unwrap(), total);

        // session is uploaded and a pipeline job is queued
        let session = h.state.db.sessions().get(upload_id).await.unwrap().unwrap();
        assert_eq!(session.state, SessionState::Uploaded);
        let job = h
            .state
            .queue
            .lease(Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(job.upload_id, upload_id);

        // probe after completion reports completion, not an offset
        let resp = h.app.clone().oneshot(probe_req(&url)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        // replaying the final chunk is also an idempotent completion
        let resp = h
            .app
            .clone()
            .oneshot(append_req(&url, 2 * CHUNK, total - 1, total, vec![2_u8; 100]))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        assert_eq!(h.state.blob.size(upload_id).await.unwrap(), total);
    }

    #[tokio::test]
    async fn one_byte_upload_completes() {
        let h = harness().await;
        let (upload_id, url, _) = create(&h, "tiny", 1).await;
        let resp = h
            .app
            .clone()
            .oneshot(append_req(&url, 0, 0, 1, vec![0x42]))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let session = h.state.db.sessions().get(upload_id).await.unwrap().unwrap();
        assert_eq!(session.state, SessionState::Uploaded);
        assert_eq!(session.received_bytes, 1);
    }

    #[tokio::test]
    async fn short_non_final_chunk_is_rejected() {
        let h = harness().await;
        let total = 2 * CHUNK + 100;
        let (upload_id, url, _) = create(&h, "k", total).await;
        let resp = h
            .app
            .clone()
            .oneshot(append_req(&url, 0, 999, total, vec![0_u8; 1000]))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(h.state.blob.size(upload_id).await.is_err());
    }

    #[tokio::test]
    async fn oversized_chunk_is_rejected() {
        let h = harness().await;
        let total = 2 * CHUNK + 100;
        let (_, url, _) = create(&h, "k", total).await;
        let resp = h
            .app
            .clone()
            .oneshot(append_req(&url, 0, CHUNK, total, vec![0_u8; CHUNK as usize + 1]))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn wrong_total_is_rejected() {
        let h = harness().await;
        let (_, url, _) = create(&h, "k", CHUNK + 1).await;
        let resp = h
            .app
            .clone()
            .oneshot(append_req(&url, 0, CHUNK - 1, CHUNK + 2, vec![0_u8; CHUNK as usize]))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn fingerprint_mismatch_is_a_distinct_error() {
        let h = harness().await;
        let (_, url, _) = create(&h, "k", 1000).await;
        // size differs from the bound fingerprint
        let req = Request::builder()
            .method("PUT")
            .uri(url.as_str())
            .header("content-range", "bytes */*")
            .header(HEADER_UPLOAD_FINGERPRINT, "1001-1722500000-clip.mp4")
            .body(Body::empty())
            .unwrap();
        let resp = h.app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::PRECONDITION_FAILED);
        // the bound fingerprint still probes fine
        let req = Request::builder()
            .method("PUT")
            .uri(url.as_str())
            .header("content-range", "bytes */*")
            .header(HEADER_UPLOAD_FINGERPRINT, "1000-1722500000-clip.mp4")
            .body(Body::empty())
            .unwrap();
        let resp = h.app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::PERMANENT_REDIRECT);
    }

    #[tokio::test]
    async fn abort_is_idempotent_and_closes_the_session() {
        let h = harness().await;
        let total = CHUNK + 1;
        let (upload_id, url, _) = create(&h, "k", total).await;
        let resp = h
            .app
            .clone()
            .oneshot(append_req(&url, 0, CHUNK - 1, total, vec![0_u8; CHUNK as usize]))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::PERMANENT_REDIRECT);

        let abort = || {
            Request::builder()
                .method("DELETE")
                .uri(url.as_str())
                .body(Body::empty())
                .unwrap()
        };
        let resp = h.app.clone().oneshot(abort()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        let resp = h.app.clone().oneshot(abort()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        let session = h.state.db.sessions().get(upload_id).await.unwrap().unwrap();
        assert_eq!(session.state, SessionState::Aborted);
        // received_bytes frozen at abort time
        assert_eq!(session.received_bytes, CHUNK);
        // blob object dropped
        assert!(h.state.blob.size(upload_id).await.is_err());

        // the session is gone for protocol purposes
        let resp = h.app.clone().oneshot(probe_req(&url)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::GONE);
        let resp = h
            .app
            .clone()
            .oneshot(append_req(&url, CHUNK, total - 1, total, vec![0_u8; 1]))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::GONE);
    }

    #[tokio::test]
    async fn status_reports_progress_and_missing_sessions() {
        let h = harness().await;
        let total = CHUNK * 2;
        let (upload_id, url, _) = create(&h, "k", total).await;
        h.app
            .clone()
            .oneshot(append_req(&url, 0, CHUNK - 1, total, vec![0_u8; CHUNK as usize]))
            .await
            .unwrap();

        let req = Request::builder()
            .method("GET")
            .uri(format!("/api/v1/videos/{upload_id}/status"))
            .body(Body::empty())
            .unwrap();
        let resp = h.app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_of(resp).await;
        assert_eq!(body["status"], "open");
        assert_eq!(body["bytesReceived"].as_u64().unwrap(), CHUNK);
        assert_eq!(body["totalBytes"].as_u64().unwrap(), total);
        assert!((body["progress"].as_f64().unwrap() - 0.5).abs() < 1e-9);
        assert!(body.get("cid").is_none());
        assert!(body.get("playbackUrl").is_none());

        let req = Request::builder()
            .method("GET")
            .uri(format!("/api/v1/videos/{}/status", Uuid::new_v4()))
            .body(Body::empty())
            .unwrap();
        let resp = h.app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn draft_updates_round_trip_to_the_store() {
        let h = harness().await;
        let (upload_id, _, body) = create(&h, "k", 1000).await;
        let draft_id: Uuid = body["draftId"].as_str().unwrap().parse().unwrap();

        let patch = json!({"title": "updated", "tags": ["x"]});
        let req = Request::builder()
            .method("PUT")
            .uri(format!("/api/v1/videos/{upload_id}/draft"))
            .header("x-owner-id", "creator-1")
            .header("content-type", "application/json")
            .body(Body::from(patch.to_string()))
            .unwrap();
        let resp = h.app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        let doc = h.state.drafts.read_draft(draft_id).await.unwrap();
        assert_eq!(doc["title"], "updated");
        assert_eq!(doc["tags"], json!(["x"]));

        // another owner cannot touch the draft
        let req = Request::builder()
            .method("PUT")
            .uri(format!("/api/v1/videos/{upload_id}/draft"))
            .header("x-owner-id", "someone-else")
            .header("content-type", "application/json")
            .body(Body::from(json!({"title": "nope"}).to_string()))
            .unwrap();
        let resp = h.app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn malformed_content_range_is_rejected() {
        let h = harness().await;
        let (_, url, _) = create(&h, "k", 1000).await;
        let req = Request::builder()
            .method("PUT")
            .uri(url.as_str())
            .header("content-range", "bytes what/ever")
            .body(Body::empty())
            .unwrap();
        let resp = h.app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        // no Content-Range at all
        let req = Request::builder()
            .method("PUT")
            .uri(url.as_str())
            .body(Body::empty())
            .unwrap();
        let resp = h.app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let h = harness().await;
        let url = format!("/api/v1/videos/session/{}", Uuid::new_v4());
        let resp = h.app.clone().oneshot(probe_req(&url)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
