pub mod worker;

use crate::services::media::MediaEngine;
use crate::services::pinner::PinService;
use crate::services::states::SpoolState;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Everything a pipeline worker needs: shared state plus the media engine
/// and pinner, wired once at process start.
pub struct PipelineContext {
    pub state: Arc<SpoolState>,
    pub engine: Arc<dyn MediaEngine>,
    pub pinner: PinService,
}

impl PipelineContext {
    /// Per-upload artifact directory; every stage writes only below this,
    /// so re-running a stage overwrites its own outputs.
    pub fn media_dir(&self, upload_id: Uuid) -> PathBuf {
        self.state
            .config
            .pipeline
            .media_root
            .join(upload_id.to_string())
    }
}

pub fn spawn_workers(
    ctx: Arc<PipelineContext>,
    cancel: CancellationToken,
) -> Vec<JoinHandle<()>> {
    let n = ctx.state.config.pipeline.concurrency.max(1);
    tracing::info!("starting {n} pipeline workers");
    (0..n)
        .map(|worker_id| tokio::spawn(worker::worker_loop(ctx.clone(), cancel.clone(), worker_id)))
        .collect()
}
