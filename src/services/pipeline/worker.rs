use crate::models::events::SessionEvent;
use crate::models::session::{SessionState, UploadSession};
use crate::services::blob_store::{BlobStore, BlobStoreError};
use crate::services::events::EventSink;
use crate::services::media::ladder::plan_ladder;
use crate::services::media::manifest::master_manifest;
use crate::services::media::{MediaEngine, MediaEngineError};
use crate::services::pipeline::PipelineContext;
use crate::services::queue::{JobQueue, QueueError};
use crate::services::states::db::jobs::PipelineJob;
use crate::utils::backoff::backoff_delay;
use crate::utils::now_ts;
use crate::utils::workdir::Workdir;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

const STAGE_FETCH: &str = "fetch";
const STAGE_PROBE: &str = "probe";
const STAGE_MANIFEST: &str = "manifest";
const STAGE_THUMBNAILS: &str = "thumbnails";
const STAGE_PIN: &str = "pin";
const STAGE_DB: &str = "db";

fn transcode_stage(rendition: &str) -> String {
    format!("transcode:{rendition}")
}

/// Why a drive attempt stopped short of `hd_ready`.
#[derive(Debug)]
enum StageError {
    /// Abort tombstone observed; exit without promoting anything.
    Aborted,
    /// Worth re-driving: the orchestrator re-enqueues with backoff,
    /// bounded per stage.
    Transient { stage: String, msg: String },
    /// The source itself is the problem; the session fails with `code`.
    Fatal { code: &'static str, msg: String },
}

fn db_transient<E: std::fmt::Display>(e: E) -> StageError {
    StageError::Transient {
        stage: STAGE_DB.to_string(),
        msg: e.to_string(),
    }
}

fn blob_transient(e: BlobStoreError) -> StageError {
    StageError::Transient {
        stage: STAGE_FETCH.to_string(),
        msg: e.to_string(),
    }
}

fn media_err(stage: &str, e: MediaEngineError) -> StageError {
    if e.is_retryable() {
        StageError::Transient {
            stage: stage.to_string(),
            msg: e.to_string(),
        }
    } else {
        StageError::Fatal {
            code: e.error_code(),
            msg: e.to_string(),
        }
    }
}

pub async fn worker_loop(ctx: Arc<PipelineContext>, cancel: CancellationToken, worker_id: usize) {
    let poll = Duration::from_millis(ctx.state.config.pipeline.poll_interval_ms);
    let lease = Duration::from_secs(ctx.state.config.pipeline.lease_secs);
    loop {
        if cancel.is_cancelled() {
            break;
        }
        match ctx.state.queue.lease(lease).await {
            Ok(Some(job)) => {
                let span = tracing::info_span!("pipeline.job", upload_id = %job.upload_id, attempt = job.attempt);
                run_job(&ctx, &job).instrument(span).await;
            }
            Ok(None) => {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(poll) => {}
                }
            }
            Err(e) => {
                tracing::warn!(worker_id, error = %e, "queue lease failed");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(poll) => {}
                }
            }
        }
    }
    tracing::debug!(worker_id, "pipeline worker stopped");
}

pub(crate) async fn run_job(ctx: &PipelineContext, job: &PipelineJob) {
    if let Err(e) = run_job_inner(ctx, job).await {
        // bookkeeping failed; leave the lease to expire and redeliver
        tracing::error!(upload_id = %job.upload_id, error = %e, "pipeline job bookkeeping failed");
    }
}

async fn run_job_inner(ctx: &PipelineContext, job: &PipelineJob) -> Result<(), QueueError> {
    let repo = ctx.state.db.sessions();
    let id = job.upload_id;
    let Some(session) = repo.get(id).await? else {
        tracing::debug!(upload_id = %id, "session gone, dropping job");
        return ctx.state.queue.ack(job).await;
    };
    match session.state {
        SessionState::Uploaded | SessionState::Processing | SessionState::Playable => {}
        SessionState::Aborted => {
            cleanup_artifacts(ctx, id).await;
            return ctx.state.queue.ack(job).await;
        }
        other => {
            tracing::debug!(upload_id = %id, state = %other, "session not in a runnable state");
            return ctx.state.queue.ack(job).await;
        }
    }

    match drive(ctx, &session).await {
        Ok(()) => ctx.state.queue.ack(job).await,
        Err(StageError::Aborted) => {
            cleanup_artifacts(ctx, id).await;
            ctx.state.queue.ack(job).await
        }
        Err(StageError::Fatal { code, msg }) => {
            tracing::warn!(upload_id = %id, code, msg, "pipeline failed terminally");
            if repo.mark_failed(id, code, now_ts()).await? {
                ctx.state.events.emit(SessionEvent::Failed {
                    upload_id: id,
                    owner_id: session.owner_id.clone(),
                    error_code: code.to_string(),
                });
            }
            ctx.state.queue.ack(job).await
        }
        Err(StageError::Transient { stage, msg }) => {
            let cfg = &ctx.state.config.pipeline;
            let prior = if job.stage.as_deref() == Some(stage.as_str()) {
                job.attempt
            } else {
                0
            };
            if prior + 1 >= cfg.stage_retry_max {
                exhausted(ctx, job, &session, &stage, &msg).await
            } else {
                let delay = backoff_delay(
                    Duration::from_secs(cfg.retry_base_secs),
                    cfg.retry_factor,
                    Duration::from_secs(cfg.retry_cap_secs),
                    prior,
                );
                tracing::warn!(upload_id = %id, stage, msg, ?delay, "stage failed, re-enqueueing");
                ctx.state.queue.nack(job, &stage, delay).await?;
                Ok(())
            }
        }
    }
}

/// Retries for one stage ran dry. Before the publishable point that fails
/// the session; after it the session keeps its state and carries a warning.
async fn exhausted(
    ctx: &PipelineContext,
    job: &PipelineJob,
    session: &UploadSession,
    stage: &str,
    msg: &str,
) -> Result<(), QueueError> {
    let repo = ctx.state.db.sessions();
    let id = job.upload_id;
    let state = match repo.get(id).await? {
        Some(s) => s.state,
        None => return ctx.state.queue.ack(job).await,
    };
    match state {
        SessionState::Playable | SessionState::HdReady => {
            tracing::warn!(upload_id = %id, stage, msg, "retries exhausted past playable, degrading");
            repo.set_warning(id, &format!("{stage} unavailable: {msg}"), now_ts())
                .await?;
        }
        _ => {
            tracing::error!(upload_id = %id, stage, msg, "retries exhausted, failing session");
            if repo.mark_failed(id, "io_failed", now_ts()).await? {
                ctx.state.events.emit(SessionEvent::Failed {
                    upload_id: id,
                    owner_id: session.owner_id.clone(),
                    error_code: "io_failed".to_string(),
                });
            }
        }
    }
    ctx.state.queue.ack(job).await
}

/// One full pass over the stage sequence. Every output path derives from
/// the upload id and the stage, so redelivery safely overwrites.
async fn drive(ctx: &PipelineContext, session: &UploadSession) -> Result<(), StageError> {
    let cfg = &ctx.state.config.pipeline;
    let repo = ctx.state.db.sessions();
    let id = session.upload_id;
    let owner = session.owner_id.clone();

    if session.state == SessionState::Uploaded {
        // a redelivered job may find this promotion already done
        repo.transition(id, SessionState::Uploaded, SessionState::Processing, now_ts())
            .await
            .map_err(db_transient)?;
    }

    ensure_not_aborted(ctx, id).await?;
    let workdir = Workdir::create(&cfg.work_root, id).map_err(|e| StageError::Transient {
        stage: STAGE_FETCH.to_string(),
        msg: e.to_string(),
    })?;
    let source = workdir.path().join("source");
    fetch_source(ctx, id, &source).await?;

    let probe = ctx
        .engine
        .probe(&source)
        .await
        .map_err(|e| media_err(STAGE_PROBE, e))?;
    tracing::debug!(upload_id = %id, ?probe, "source probed");

    let plan = plan_ladder(&cfg.ladder, &probe);
    let media_dir = ctx.media_dir(id);
    tokio::fs::create_dir_all(&media_dir)
        .await
        .map_err(|e| StageError::Transient {
            stage: STAGE_MANIFEST.to_string(),
            msg: e.to_string(),
        })?;

    // lowest rung first: its success is the publishable moment
    ensure_not_aborted(ctx, id).await?;
    let Some(lowest) = plan.first() else {
        return Err(StageError::Fatal {
            code: "probe_failed",
            msg: "empty rendition plan".to_string(),
        });
    };
    let mut outputs = Vec::with_capacity(plan.len());
    let out = ctx
        .engine
        .transcode(&source, lowest, &media_dir.join(format!("{}.m3u8", lowest.name)))
        .await
        .map_err(|e| media_err(&transcode_stage(&lowest.name), e))?;
    outputs.push(out);

    if repo
        .transition(id, SessionState::Processing, SessionState::Playable, now_ts())
        .await
        .map_err(db_transient)?
    {
        ctx.state.events.emit(SessionEvent::Playable {
            upload_id: id,
            owner_id: owner.clone(),
        });
    }

    // remaining rungs ascending; a permanently failed rung degrades the
    // ladder instead of regressing the session below playable
    let mut unavailable = Vec::new();
    for profile in plan.iter().skip(1) {
        ensure_not_aborted(ctx, id).await?;
        let manifest = media_dir.join(format!("{}.m3u8", profile.name));
        match ctx.engine.transcode(&source, profile, &manifest).await {
            Ok(out) => outputs.push(out),
            Err(e) if e.is_retryable() => {
                return Err(StageError::Transient {
                    stage: transcode_stage(&profile.name),
                    msg: e.to_string(),
                });
            }
            Err(e) => {
                tracing::warn!(upload_id = %id, rendition = %profile.name, error = %e, "rendition failed permanently");
                unavailable.push(profile.name.clone());
            }
        }
    }
    if !unavailable.is_empty() {
        repo.set_warning(
            id,
            &format!("renditions unavailable: {}", unavailable.join(", ")),
            now_ts(),
        )
        .await
        .map_err(db_transient)?;
    }

    ensure_not_aborted(ctx, id).await?;
    let master = media_dir.join("master.m3u8");
    tokio::fs::write(&master, master_manifest(&outputs))
        .await
        .map_err(|e| StageError::Transient {
            stage: STAGE_MANIFEST.to_string(),
            msg: e.to_string(),
        })?;

    ensure_not_aborted(ctx, id).await?;
    match ctx
        .engine
        .thumbnails(
            &source,
            probe.duration_secs,
            cfg.thumbnail_count,
            &media_dir.join("thumbs"),
        )
        .await
    {
        Ok(_) => {}
        Err(e) if e.is_retryable() => {
            return Err(StageError::Transient {
                stage: STAGE_THUMBNAILS.to_string(),
                msg: e.to_string(),
            });
        }
        Err(e) => {
            // past playable: a watchable upload without thumbnails beats a failed one
            tracing::warn!(upload_id = %id, error = %e, "thumbnails failed permanently");
            repo.set_warning(id, &format!("thumbnails unavailable: {e}"), now_ts())
                .await
                .map_err(db_transient)?;
        }
    }

    ensure_not_aborted(ctx, id).await?;
    let artifacts = collect_pin_set(&media_dir)
        .await
        .map_err(|e| StageError::Transient {
            stage: STAGE_PIN.to_string(),
            msg: e.to_string(),
        })?;
    match ctx.pinner.pin(&artifacts).await {
        Ok(record) => {
            repo.set_pin(id, &record, now_ts()).await.map_err(db_transient)?;
        }
        Err(e) if e.is_retryable() => {
            return Err(StageError::Transient {
                stage: STAGE_PIN.to_string(),
                msg: e.to_string(),
            });
        }
        Err(e) => {
            // corruption-grade pin failure: keep the session playable
            tracing::error!(upload_id = %id, error = %e, "pin failed permanently");
            repo.set_warning(id, &format!("pin failed: {e}"), now_ts())
                .await
                .map_err(db_transient)?;
            return Ok(());
        }
    }

    if repo
        .transition(id, SessionState::Playable, SessionState::HdReady, now_ts())
        .await
        .map_err(db_transient)?
    {
        ctx.state.events.emit(SessionEvent::HdReady {
            upload_id: id,
            owner_id: owner,
        });
    }
    Ok(())
}

/// Tombstone check at the top of every stage: an abort lets the in-flight
/// primitive finish, then the job exits without promoting state.
async fn ensure_not_aborted(ctx: &PipelineContext, id: Uuid) -> Result<(), StageError> {
    match ctx.state.db.sessions().get(id).await {
        Ok(Some(s)) if s.state == SessionState::Aborted => Err(StageError::Aborted),
        Ok(Some(_)) => Ok(()),
        Ok(None) => Err(StageError::Aborted),
        Err(e) => Err(db_transient(e)),
    }
}

async fn fetch_source(ctx: &PipelineContext, id: Uuid, dest: &Path) -> Result<(), StageError> {
    let size = ctx.state.blob.size(id).await.map_err(blob_transient)?;
    if size == 0 {
        return Err(StageError::Fatal {
            code: "probe_failed",
            msg: "source object is empty".to_string(),
        });
    }
    let mut reader = ctx
        .state
        .blob
        .read_range(id, 0, size - 1)
        .await
        .map_err(blob_transient)?;
    let mut file = tokio::fs::File::create(dest).await.map_err(|e| StageError::Transient {
        stage: STAGE_FETCH.to_string(),
        msg: e.to_string(),
    })?;
    tokio::io::copy(&mut reader, &mut file)
        .await
        .map_err(|e| StageError::Transient {
            stage: STAGE_FETCH.to_string(),
            msg: e.to_string(),
        })?;
    Ok(())
}

/// The pinned set: master manifest, sub-manifests and segments. Thumbnails
/// live in a subdirectory and stay out of the pin.
async fn collect_pin_set(media_dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut artifacts = Vec::new();
    let mut entries = tokio::fs::read_dir(media_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let path = entry.path();
        let pinned = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("m3u8") | Some("ts")
        );
        if pinned {
            artifacts.push(path);
        }
    }
    artifacts.sort();
    Ok(artifacts)
}

async fn cleanup_artifacts(ctx: &PipelineContext, id: Uuid) {
    if let Err(e) = ctx.state.blob.delete(id).await {
        tracing::warn!(upload_id = %id, error = %e, "blob cleanup failed");
    }
    let media_dir = ctx.media_dir(id);
    if media_dir.exists()
        && let Err(e) = tokio::fs::remove_dir_all(&media_dir).await
    {
        tracing::warn!(upload_id = %id, error = %e, "media cleanup failed");
    }
}
