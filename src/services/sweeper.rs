use crate::services::blob_store::BlobStore;
use crate::services::cas::ContentAddressedStore;
use crate::services::drafts::DraftStore;
use crate::services::queue::{JobQueue, QueueError};
use crate::services::states::SpoolState;
use crate::utils::now_ts;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Grace period before an `uploaded` session without a queued job counts
/// as stranded; avoids racing the append handler's own enqueue.
const STRANDED_GRACE_SECS: i64 = 30;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub requeued: usize,
    pub purged: usize,
}

pub async fn sweeper_loop(state: Arc<SpoolState>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(SWEEP_INTERVAL) => {}
        }
        match sweep_once(&state).await {
            Ok(report) if report.requeued > 0 || report.purged > 0 => {
                tracing::info!(requeued = report.requeued, purged = report.purged, "sweep done");
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "sweep failed"),
        }
    }
    tracing::debug!("sweeper stopped");
}

pub async fn sweep_once(state: &SpoolState) -> Result<SweepReport, QueueError> {
    let mut report = SweepReport::default();
    let now = now_ts();

    // sessions whose enqueue was refused under backpressure
    let stranded = state
        .db
        .sessions()
        .stranded_uploaded(now - STRANDED_GRACE_SECS)
        .await?;
    for upload_id in stranded {
        match state.queue.enqueue(upload_id, now).await {
            Ok(()) => report.requeued += 1,
            Err(QueueError::Full) => break,
            Err(e) => return Err(e),
        }
    }

    // retention: terminal sessions and their artifacts
    let retention_secs = state.upload_retention_secs();
    let expired = state.db.sessions().terminal_before(now - retention_secs).await?;
    for session in expired {
        let id = session.upload_id;
        if let Err(e) = state.blob.delete(id).await {
            tracing::warn!(upload_id = %id, error = %e, "blob purge failed");
        }
        let media_dir = state.config.pipeline.media_root.join(id.to_string());
        if media_dir.exists()
            && let Err(e) = tokio::fs::remove_dir_all(&media_dir).await
        {
            tracing::warn!(upload_id = %id, error = %e, "media purge failed");
        }
        if let Some(address) = &session.content_address
            && let Err(e) = state.cas.delete(address).await
        {
            tracing::warn!(upload_id = %id, error = %e, "pin purge failed");
        }
        if let Some(draft_id) = session.draft_id
            && let Err(e) = state.drafts.delete_draft(draft_id).await
        {
            tracing::warn!(upload_id = %id, error = %e, "draft purge failed");
        }
        state.queue.cancel(id).await?;
        state.db.sessions().delete(id).await?;
        report.purged += 1;
    }
    Ok(report)
}

impl SpoolState {
    fn upload_retention_secs(&self) -> i64 {
        self.config.upload.session_retention_days as i64 * 86_400
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::session::{Fingerprint, SessionState, UploadSession};
    use crate::services::blob_store::{BlobStore, BlobStoreError, FsBlobStore};
    use crate::services::cas::{ContentAddressedStore, FsCasStore};
    use crate::services::drafts::SqliteDraftStore;
    use crate::services::events::TracingEventSink;
    use crate::services::queue::{JobQueue, SqliteQueue};
    use crate::services::session_locks::SessionLocks;
    use crate::services::states::config::AppConfig;
    use crate::services::states::db::DataBaseState;
    use crate::services::states::db::test_support::memory_pool;
    use std::io::Cursor;
    use uuid::Uuid;

    async fn state(retention_days: u32) -> (tempfile::TempDir, Arc<SpoolState>) {
        let root = tempfile::tempdir().unwrap();
        let pool = memory_pool().await;
        let mut config = AppConfig::default();
        config.upload.blob_root = root.path().join("blobs");
        config.upload.session_retention_days = retention_days;
        config.pipeline.media_root = root.path().join("media");
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
        (root, state)
    }

    fn session(state: SessionState, updated_at: i64) -> UploadSession {
        UploadSession {
            upload_id: Uuid::new_v4(),
            owner_id: "o".into(),
            filename: "f.mp4".into(),
            declared_mime: "video/mp4".into(),
            declared_size: 8,
            chunk_size: 8,
            received_bytes: 8,
            fingerprint: Fingerprint::new("f.mp4", 8, 0),
            idempotency_key: Uuid::new_v4().to_string(),
            state,
            error_code: None,
            warning: None,
            draft_id: None,
            content_address: None,
            pin_size: None,
            pin_verified_at: None,
            created_at: updated_at,
            updated_at,
            first_playable_at: None,
            hd_ready_at: None,
        }
    }

    #[tokio::test]
    async fn stranded_uploads_are_requeued() {
        let (_root, state) = state(30).await;
        let s = session(SessionState::Uploaded, now_ts() - 120);
        state.db.sessions().insert(&s).await.unwrap();

        let report = sweep_once(&state).await.unwrap();
        assert_eq!(report.requeued, 1);
        let job = state
            .queue
            .lease(Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(job.upload_id, s.upload_id);

        // with the job queued it is no longer stranded
        let report = sweep_once(&state).await.unwrap();
        assert_eq!(report.requeued, 0);
    }

    #[tokio::test]
    async fn fresh_uploads_are_left_alone() {
        let (_root, state) = state(30).await;
        let s = session(SessionState::Uploaded, now_ts());
        state.db.sessions().insert(&s).await.unwrap();
        let report = sweep_once(&state).await.unwrap();
        assert_eq!(report.requeued, 0);
    }

    #[tokio::test]
    async fn expired_terminal_sessions_are_purged_with_artifacts() {
        let (_root, state) = state(0).await;
        let mut s = session(SessionState::Aborted, now_ts() - 10);
        state
            .blob
            .append(s.upload_id, 0, &mut Cursor::new(b"12345678".to_vec()), 8)
            .await
            .unwrap();
        let (address, _) = state
            .cas
            .put(&mut Cursor::new(b"bundle".to_vec()))
            .await
            .unwrap();
        s.content_address = Some(address.clone());
        let draft_id = state
            .drafts
            .create_draft("o", serde_json::json!({"title": "t"}))
            .await
            .unwrap();
        s.draft_id = Some(draft_id);
        state.db.sessions().insert(&s).await.unwrap();

        let report = sweep_once(&state).await.unwrap();
        assert_eq!(report.purged, 1);
        assert!(state.db.sessions().get(s.upload_id).await.unwrap().is_none());
        assert!(matches!(
            state.blob.size(s.upload_id).await,
            Err(BlobStoreError::NotFound(_))
        ));
        assert!(state.cas.open(&address).await.is_err());
        // the metadata draft goes with the session
        assert!(state.drafts.read_draft(draft_id).await.is_err());
    }

    #[tokio::test]
    async fn live_sessions_survive_the_sweep() {
        let (_root, state) = state(0).await;
        let s = session(SessionState::Playable, now_ts() - 1_000_000);
        state.db.sessions().insert(&s).await.unwrap();
        let report = sweep_once(&state).await.unwrap();
        assert_eq!(report.purged, 0);
        assert!(state.db.sessions().get(s.upload_id).await.unwrap().is_some());
    }
}
