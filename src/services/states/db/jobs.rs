use crate::services::states::db::{
    DataBaseError, DataBaseResult, SqliteBaseResultExt, SqliteQueryResultExt,
};
use sqlx::{Row, SqlitePool, query};
use uuid::Uuid;

/// One work item in the pipeline queue. `attempt` counts deliveries for the
/// stage named by `stage`; a failure in a different stage resets it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineJob {
    pub id: i64,
    pub upload_id: Uuid,
    pub attempt: u32,
    pub stage: Option<String>,
    pub earliest_run_at: i64,
}

pub struct JobRepo<'a> {
    pool: &'a SqlitePool,
}

impl<'a> JobRepo<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn count_active(&self) -> DataBaseResult<u64> {
        let row = query("SELECT COUNT(*) AS n FROM jobs WHERE done = 0")
            .fetch_one(self.pool)
            .await
            .resolve()?;
        Ok(row.get::<i64, _>("n") as u64)
    }

    /// Insert a job unless the upload already has an active one.
    /// Returns whether a row was actually created.
    pub async fn insert(&self, upload_id: Uuid, earliest_run_at: i64) -> DataBaseResult<bool> {
        let res = query(
            "INSERT OR IGNORE INTO jobs (upload_id, attempt, earliest_run_at) VALUES (?, 0, ?)",
        )
        .bind(upload_id.to_string())
        .bind(earliest_run_at)
        .execute(self.pool)
        .await
        .resolve()?;
        Ok(res.rows_affected() == 1)
    }

    /// Claim the next ready job and hide it until `leased_until`.
    /// Expired leases make the job claimable again (redelivery).
    pub async fn lease_next(
        &self,
        now: i64,
        leased_until: i64,
    ) -> DataBaseResult<Option<PipelineJob>> {
        let row = query(
            "UPDATE jobs SET leased_until = ? \
             WHERE id = ( \
                 SELECT id FROM jobs \
                 WHERE done = 0 AND earliest_run_at <= ? \
                 AND (leased_until IS NULL OR leased_until <= ?) \
                 ORDER BY earliest_run_at, id LIMIT 1 \
             ) \
             RETURNING id, upload_id, attempt, stage, earliest_run_at",
        )
        .bind(leased_until)
        .bind(now)
        .bind(now)
        .fetch_optional(self.pool)
        .await
        .resolve()?;
        row.map(|r| {
            let raw: String = r.get("upload_id");
            let upload_id = Uuid::parse_str(&raw).map_err(|_| DataBaseError::Corrupt {
                msg: format!("invalid uuid column: {raw}"),
            })?;
            Ok(PipelineJob {
                id: r.get("id"),
                upload_id,
                attempt: r.get::<i64, _>("attempt") as u32,
                stage: r.get("stage"),
                earliest_run_at: r.get("earliest_run_at"),
            })
        })
        .transpose()
    }

    pub async fn ack(&self, id: i64) -> DataBaseResult<()> {
        query("UPDATE jobs SET done = 1, leased_until = NULL WHERE id = ?")
            .bind(id)
            .execute(self.pool)
            .await
            .resolve_affected()?;
        Ok(())
    }

    /// Release the job for redelivery after `earliest_run_at`. The attempt
    /// counter continues when the failing stage is unchanged and restarts
    /// at 1 when a later stage is the one that failed.
    pub async fn nack(
        &self,
        id: i64,
        stage: &str,
        earliest_run_at: i64,
    ) -> DataBaseResult<u32> {
        let row = query(
            "UPDATE jobs SET \
                 attempt = CASE WHEN stage IS ? THEN attempt + 1 ELSE 1 END, \
                 stage = ?, earliest_run_at = ?, leased_until = NULL \
             WHERE id = ? AND done = 0 \
             RETURNING attempt",
        )
        .bind(stage)
        .bind(stage)
        .bind(earliest_run_at)
        .bind(id)
        .fetch_optional(self.pool)
        .await
        .resolve()?;
        match row {
            Some(r) => Ok(r.get::<i64, _>("attempt") as u32),
            None => Err(DataBaseError::NoAffectedRows),
        }
    }

    pub async fn cancel_for_upload(&self, upload_id: Uuid) -> DataBaseResult<()> {
        query("UPDATE jobs SET done = 1, leased_until = NULL WHERE upload_id = ? AND done = 0")
            .bind(upload_id.to_string())
            .execute(self.pool)
            .await
            .resolve()?;
        Ok(())
    }
}
