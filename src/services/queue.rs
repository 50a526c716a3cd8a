use crate::services::states::db::DataBaseError;
use crate::services::states::db::jobs::{JobRepo, PipelineJob};
use crate::utils::now_ts;
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// Bounded depth reached; the session stays `uploaded` and the sweeper
    /// retries the enqueue later.
    #[error("queue is full")]
    Full,
    #[error(transparent)]
    Db(#[from] DataBaseError),
}

/// At-least-once delivery job queue with per-upload exclusivity. Handlers
/// must be idempotent: an expired lease redelivers the job.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, upload_id: Uuid, earliest_run_at: i64) -> Result<(), QueueError>;

    async fn lease(&self, visibility: Duration) -> Result<Option<PipelineJob>, QueueError>;

    async fn ack(&self, job: &PipelineJob) -> Result<(), QueueError>;

    /// Redeliver after `delay`, attributing the failure to `stage`.
    /// Returns the attempt count now recorded for that stage.
    async fn nack(
        &self,
        job: &PipelineJob,
        stage: &str,
        delay: Duration,
    ) -> Result<u32, QueueError>;

    /// Drop any active job for the upload (abort path). Idempotent.
    async fn cancel(&self, upload_id: Uuid) -> Result<(), QueueError>;
}

/// Durable queue over the `jobs` table; SQLite's single-writer semantics
/// make the claim-update atomic across worker tasks.
pub struct SqliteQueue {
    pool: SqlitePool,
    depth: usize,
}

impl SqliteQueue {
    pub fn new(pool: SqlitePool, depth: usize) -> Self {
        Self { pool, depth }
    }

    fn repo(&self) -> JobRepo<'_> {
        JobRepo::new(&self.pool)
    }
}

#[async_trait]
impl JobQueue for SqliteQueue {
    async fn enqueue(&self, upload_id: Uuid, earliest_run_at: i64) -> Result<(), QueueError> {
        let repo = self.repo();
        if repo.count_active().await? as usize >= self.depth {
            return Err(QueueError::Full);
        }
        let created = repo.insert(upload_id, earliest_run_at).await?;
        if !created {
            tracing::debug!(%upload_id, "job already queued, enqueue is a no-op");
        }
        Ok(())
    }

    async fn lease(&self, visibility: Duration) -> Result<Option<PipelineJob>, QueueError> {
        let now = now_ts();
        let leased_until = now + visibility.as_secs() as i64;
        Ok(self.repo().lease_next(now, leased_until).await?)
    }

    async fn ack(&self, job: &PipelineJob) -> Result<(), QueueError> {
        Ok(self.repo().ack(job.id).await?)
    }

    async fn nack(
        &self,
        job: &PipelineJob,
        stage: &str,
        delay: Duration,
    ) -> Result<u32, QueueError> {
        let run_at = now_ts() + delay.as_secs() as i64;
        Ok(self.repo().nack(job.id, stage, run_at).await?)
    }

    async fn cancel(&self, upload_id: Uuid) -> Result<(), QueueError> {
        Ok(self.repo().cancel_for_upload(upload_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::states::db::test_support::memory_pool;

    #[tokio::test]
    async fn enqueue_refuses_when_full() {
        let pool = memory_pool().await;
        let queue = SqliteQueue::new(pool, 2);
        queue.enqueue(Uuid::new_v4(), 0).await.unwrap();
        queue.enqueue(Uuid::new_v4(), 0).await.unwrap();
        let err = queue.enqueue(Uuid::new_v4(), 0).await.unwrap_err();
        assert!(matches!(err, QueueError::Full));
    }

    #[tokio::test]
    async fn duplicate_enqueue_is_noop() {
        let pool = memory_pool().await;
        let queue = SqliteQueue::new(pool.clone(), 8);
        let id = Uuid::new_v4();
        queue.enqueue(id, 0).await.unwrap();
        queue.enqueue(id, 0).await.unwrap();
        let job = queue.lease(Duration::from_secs(60)).await.unwrap().unwrap();
        assert_eq!(job.upload_id, id);
        assert!(queue.lease(Duration::from_secs(60)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn ack_and_nack_cycle() {
        let pool = memory_pool().await;
        let queue = SqliteQueue::new(pool, 8);
        let id = Uuid::new_v4();
        queue.enqueue(id, 0).await.unwrap();
        let job = queue.lease(Duration::from_secs(60)).await.unwrap().unwrap();

        let attempt = queue
            .nack(&job, "probe", Duration::from_secs(0))
            .await
            .unwrap();
        assert_eq!(attempt, 1);
        let job = queue.lease(Duration::from_secs(60)).await.unwrap().unwrap();
        assert_eq!(job.attempt, 1);
        queue.ack(&job).await.unwrap();
        assert!(queue.lease(Duration::from_secs(60)).await.unwrap().is_none());
    }
}
