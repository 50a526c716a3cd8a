use crate::services::states::db::{
    DataBaseError, DataBaseResult, SqliteBaseResultExt, SqliteQueryResultExt,
};
use sqlx::{Row, SqlitePool, query};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct DraftRow {
    pub draft_id: Uuid,
    pub owner_id: String,
    pub metadata: serde_json::Value,
    pub created_at: i64,
    pub updated_at: i64,
}

pub struct DraftRepo<'a> {
    pool: &'a SqlitePool,
}

impl<'a> DraftRepo<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(
        &self,
        draft_id: Uuid,
        owner_id: &str,
        metadata: &serde_json::Value,
        now: i64,
    ) -> DataBaseResult<()> {
        let raw = serde_json::to_string(metadata).map_err(|e| DataBaseError::Corrupt {
            msg: e.to_string(),
        })?;
        query(
            "INSERT INTO drafts (draft_id, owner_id, metadata, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(draft_id.to_string())
        .bind(owner_id)
        .bind(raw)
        .bind(now)
        .bind(now)
        .execute(self.pool)
        .await
        .resolve()?;
        Ok(())
    }

    pub async fn get(&self, draft_id: Uuid) -> DataBaseResult<Option<DraftRow>> {
        let row = query(
            "SELECT draft_id, owner_id, metadata, created_at, updated_at \
             FROM drafts WHERE draft_id = ?",
        )
        .bind(draft_id.to_string())
        .fetch_optional(self.pool)
        .await
        .resolve()?;
        row.map(|r| {
            let raw: String = r.get("metadata");
            let metadata = serde_json::from_str(&raw).map_err(|e| DataBaseError::Corrupt {
                msg: format!("draft metadata: {e}"),
            })?;
            Ok(DraftRow {
                draft_id,
                owner_id: r.get("owner_id"),
                metadata,
                created_at: r.get("created_at"),
                updated_at: r.get("updated_at"),
            })
        })
        .transpose()
    }

    pub async fn update_metadata(
        &self,
        draft_id: Uuid,
        metadata: &serde_json::Value,
        now: i64,
    ) -> DataBaseResult<()> {
        let raw = serde_json::to_string(metadata).map_err(|e| DataBaseError::Corrupt {
            msg: e.to_string(),
        })?;
        query("UPDATE drafts SET metadata = ?, updated_at = ? WHERE draft_id = ?")
            .bind(raw)
            .bind(now)
            .bind(draft_id.to_string())
            .execute(self.pool)
            .await
            .resolve_affected()?;
        Ok(())
    }

    pub async fn delete(&self, draft_id: Uuid) -> DataBaseResult<()> {
        query("DELETE FROM drafts WHERE draft_id = ?")
            .bind(draft_id.to_string())
            .execute(self.pool)
            .await
            .resolve()?;
        Ok(())
    }
}
