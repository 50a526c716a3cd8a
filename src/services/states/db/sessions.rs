use crate::models::media::PinRecord;
use crate::models::session::{Fingerprint, SessionState, UploadSession};
use crate::services::states::db::{DataBaseError, DataBaseResult, SqliteBaseResultExt};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool, query};
use std::str::FromStr;
use uuid::Uuid;

pub struct SessionRepo<'a> {
    pool: &'a SqlitePool,
}

const SESSION_COLS: &str = "upload_id, owner_id, filename, declared_mime, declared_size, \
     chunk_size, received_bytes, fp_filename, fp_size, fp_last_modified, idempotency_key, \
     state, error_code, warning, draft_id, content_address, pin_size, pin_verified_at, \
     created_at, updated_at, first_playable_at, hd_ready_at";

impl<'a> SessionRepo<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, s: &UploadSession) -> DataBaseResult<()> {
        let sql = format!(
            "INSERT INTO sessions ({SESSION_COLS}) VALUES \
             (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        );
        query(&sql)
            .bind(s.upload_id.to_string())
            .bind(&s.owner_id)
            .bind(&s.filename)
            .bind(&s.declared_mime)
            .bind(s.declared_size as i64)
            .bind(s.chunk_size as i64)
            .bind(s.received_bytes as i64)
            .bind(&s.fingerprint.filename)
            .bind(s.fingerprint.size as i64)
            .bind(s.fingerprint.last_modified)
            .bind(&s.idempotency_key)
            .bind(s.state.as_str())
            .bind(&s.error_code)
            .bind(&s.warning)
            .bind(s.draft_id.map(|d| d.to_string()))
            .bind(&s.content_address)
            .bind(s.pin_size.map(|v| v as i64))
            .bind(s.pin_verified_at)
            .bind(s.created_at)
            .bind(s.updated_at)
            .bind(s.first_playable_at)
            .bind(s.hd_ready_at)
            .execute(self.pool)
            .await
            .resolve()?;
        Ok(())
    }

    pub async fn get(&self, upload_id: Uuid) -> DataBaseResult<Option<UploadSession>> {
        let sql = format!("SELECT {SESSION_COLS} FROM sessions WHERE upload_id = ?");
        let row = query(&sql)
            .bind(upload_id.to_string())
            .fetch_optional(self.pool)
            .await
            .resolve()?;
        row.map(|r| row_to_session(&r)).transpose()
    }

    pub async fn find_by_idempotency(
        &self,
        owner_id: &str,
        idempotency_key: &str,
    ) -> DataBaseResult<Option<UploadSession>> {
        let sql =
            format!("SELECT {SESSION_COLS} FROM sessions WHERE owner_id = ? AND idempotency_key = ?");
        let row = query(&sql)
            .bind(owner_id)
            .bind(idempotency_key)
            .fetch_optional(self.pool)
            .await
            .resolve()?;
        row.map(|r| row_to_session(&r)).transpose()
    }

    /// Monotonic high-water advance, guarded on the previous value and the
    /// `open` state so a lost race can never rewind or double-count.
    pub async fn advance_received(
        &self,
        upload_id: Uuid,
        from: u64,
        to: u64,
        now: i64,
    ) -> DataBaseResult<bool> {
        debug_assert!(to > from);
        let res = query(
            "UPDATE sessions SET received_bytes = ?, updated_at = ? \
             WHERE upload_id = ? AND received_bytes = ? AND state = 'open' \
             AND ? <= declared_size",
        )
        .bind(to as i64)
        .bind(now)
        .bind(upload_id.to_string())
        .bind(from as i64)
        .bind(to as i64)
        .execute(self.pool)
        .await
        .resolve()?;
        Ok(res.rows_affected() == 1)
    }

    /// Compare-and-set state transition; timestamps for the playable /
    /// hd_ready promotions are recorded on first success only.
    pub async fn transition(
        &self,
        upload_id: Uuid,
        from: SessionState,
        to: SessionState,
        now: i64,
    ) -> DataBaseResult<bool> {
        if !from.can_transition(to) {
            return Ok(false);
        }
        let res = query(
            "UPDATE sessions SET state = ?, updated_at = ?, \
             first_playable_at = CASE WHEN ? = 'playable' \
                 THEN COALESCE(first_playable_at, ?) ELSE first_playable_at END, \
             hd_ready_at = CASE WHEN ? = 'hd_ready' \
                 THEN COALESCE(hd_ready_at, ?) ELSE hd_ready_at END \
             WHERE upload_id = ? AND state = ?",
        )
        .bind(to.as_str())
        .bind(now)
        .bind(to.as_str())
        .bind(now)
        .bind(to.as_str())
        .bind(now)
        .bind(upload_id.to_string())
        .bind(from.as_str())
        .execute(self.pool)
        .await
        .resolve()?;
        Ok(res.rows_affected() == 1)
    }

    pub async fn mark_failed(
        &self,
        upload_id: Uuid,
        error_code: &str,
        now: i64,
    ) -> DataBaseResult<bool> {
        let res = query(
            "UPDATE sessions SET state = 'failed', error_code = ?, updated_at = ? \
             WHERE upload_id = ? AND state IN ('uploaded', 'processing')",
        )
        .bind(error_code)
        .bind(now)
        .bind(upload_id.to_string())
        .execute(self.pool)
        .await
        .resolve()?;
        Ok(res.rows_affected() == 1)
    }

    pub async fn mark_aborted(&self, upload_id: Uuid, now: i64) -> DataBaseResult<bool> {
        let res = query(
            "UPDATE sessions SET state = 'aborted', updated_at = ? \
             WHERE upload_id = ? AND state NOT IN ('failed', 'aborted')",
        )
        .bind(now)
        .bind(upload_id.to_string())
        .execute(self.pool)
        .await
        .resolve()?;
        Ok(res.rows_affected() == 1)
    }

    pub async fn set_warning(
        &self,
        upload_id: Uuid,
        warning: &str,
        now: i64,
    ) -> DataBaseResult<()> {
        query("UPDATE sessions SET warning = ?, updated_at = ? WHERE upload_id = ?")
            .bind(warning)
            .bind(now)
            .bind(upload_id.to_string())
            .execute(self.pool)
            .await
            .resolve()?;
        Ok(())
    }

    pub async fn set_pin(
        &self,
        upload_id: Uuid,
        pin: &PinRecord,
        now: i64,
    ) -> DataBaseResult<()> {
        query(
            "UPDATE sessions SET content_address = ?, pin_size = ?, pin_verified_at = ?, \
             updated_at = ? WHERE upload_id = ?",
        )
        .bind(&pin.content_address)
        .bind(pin.size as i64)
        .bind(pin.verified_at)
        .bind(now)
        .bind(upload_id.to_string())
        .execute(self.pool)
        .await
        .resolve()?;
        Ok(())
    }

    /// Terminal sessions whose last update predates `cutoff`; retention
    /// sweeping deletes these along with their artifacts.
    pub async fn terminal_before(&self, cutoff: i64) -> DataBaseResult<Vec<UploadSession>> {
        let sql = format!(
            "SELECT {SESSION_COLS} FROM sessions \
             WHERE state IN ('hd_ready', 'failed', 'aborted') AND updated_at < ?"
        );
        let rows = query(&sql)
            .bind(cutoff)
            .fetch_all(self.pool)
            .await
            .resolve()?;
        rows.iter().map(row_to_session).collect()
    }

    /// `uploaded` sessions with no active queue entry: the enqueue was
    /// refused under backpressure and must be retried.
    pub async fn stranded_uploaded(&self, cutoff: i64) -> DataBaseResult<Vec<Uuid>> {
        let rows = query(
            "SELECT s.upload_id FROM sessions s \
             WHERE s.state = 'uploaded' AND s.updated_at < ? \
             AND NOT EXISTS (SELECT 1 FROM jobs j WHERE j.upload_id = s.upload_id AND j.done = 0)",
        )
        .bind(cutoff)
        .fetch_all(self.pool)
        .await
        .resolve()?;
        rows.iter()
            .map(|r| parse_uuid(&r.get::<String, _>("upload_id")))
            .collect()
    }

    pub async fn delete(&self, upload_id: Uuid) -> DataBaseResult<()> {
        query("DELETE FROM sessions WHERE upload_id = ?")
            .bind(upload_id.to_string())
            .execute(self.pool)
            .await
            .resolve()?;
        Ok(())
    }
}

fn parse_uuid(raw: &str) -> DataBaseResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| DataBaseError::Corrupt {
        msg: format!("invalid uuid column: {raw}"),
    })
}

fn row_to_session(row: &SqliteRow) -> DataBaseResult<UploadSession> {
    let state_raw: String = row.get("state");
    let state = SessionState::from_str(&state_raw).map_err(|e| DataBaseError::Corrupt {
        msg: e.to_string(),
    })?;
    let draft_id = row
        .get::<Option<String>, _>("draft_id")
        .map(|d| parse_uuid(&d))
        .transpose()?;
    Ok(UploadSession {
        upload_id: parse_uuid(&row.get::<String, _>("upload_id"))?,
        owner_id: row.get("owner_id"),
        filename: row.get("filename"),
        declared_mime: row.get("declared_mime"),
        declared_size: row.get::<i64, _>("declared_size") as u64,
        chunk_size: row.get::<i64, _>("chunk_size") as u64,
        received_bytes: row.get::<i64, _>("received_bytes") as u64,
        fingerprint: Fingerprint {
            filename: row.get("fp_filename"),
            size: row.get::<i64, _>("fp_size") as u64,
            last_modified: row.get("fp_last_modified"),
        },
        idempotency_key: row.get("idempotency_key"),
        state,
        error_code: row.get("error_code"),
        warning: row.get("warning"),
        draft_id,
        content_address: row.get("content_address"),
        pin_size: row.get::<Option<i64>, _>("pin_size").map(|v| v as u64),
        pin_verified_at: row.get("pin_verified_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        first_playable_at: row.get("first_playable_at"),
        hd_ready_at: row.get("hd_ready_at"),
    })
}
