use crate::services::states::db::DataBaseError;
use crate::services::states::db::drafts::DraftRepo;
use crate::utils::now_ts;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::SqlitePool;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum DraftError {
    #[error("draft not found: {0}")]
    NotFound(Uuid),
    #[error("draft patch must be a JSON object")]
    InvalidPatch,
    #[error(transparent)]
    Db(#[from] DataBaseError),
}

/// Metadata draft collaborator. The core only round-trips draft ids and
/// patches; nothing in the pipeline depends on draft contents.
#[async_trait]
pub trait DraftStore: Send + Sync {
    async fn create_draft(&self, owner_id: &str, initial: Value) -> Result<Uuid, DraftError>;

    async fn update_draft(&self, draft_id: Uuid, patch: Value) -> Result<(), DraftError>;

    async fn read_draft(&self, draft_id: Uuid) -> Result<Value, DraftError>;

    /// Drop a draft that no session references anymore. Idempotent.
    async fn delete_draft(&self, draft_id: Uuid) -> Result<(), DraftError>;
}

pub struct SqliteDraftStore {
    pool: SqlitePool,
}

impl SqliteDraftStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn repo(&self) -> DraftRepo<'_> {
        DraftRepo::new(&self.pool)
    }
}

/// Shallow merge: top-level keys from `patch` overwrite `base`; a JSON
/// `null` value removes the key.
fn merge_patch(base: &mut Value, patch: &Value) {
    let (Some(base), Some(patch)) = (base.as_object_mut(), patch.as_object()) else {
        return;
    };
    for (k, v) in patch {
        if v.is_null() {
            base.remove(k);
        } else {
            base.insert(k.clone(), v.clone());
        }
    }
}

#[async_trait]
impl DraftStore for SqliteDraftStore {
    async fn create_draft(&self, owner_id: &str, initial: Value) -> Result<Uuid, DraftError> {
        if !initial.is_object() {
            return Err(DraftError::InvalidPatch);
        }
        let draft_id = Uuid::new_v4();
        self.repo()
            .insert(draft_id, owner_id, &initial, now_ts())
            .await?;
        Ok(draft_id)
    }

    async fn update_draft(&self, draft_id: Uuid, patch: Value) -> Result<(), DraftError> {
        if !patch.is_object() {
            return Err(DraftError::InvalidPatch);
        }
        let row = self
            .repo()
            .get(draft_id)
            .await?
            .ok_or(DraftError::NotFound(draft_id))?;
        let mut merged = row.metadata;
        merge_patch(&mut merged, &patch);
        match self.repo().update_metadata(draft_id, &merged, now_ts()).await {
            Ok(()) => Ok(()),
            Err(DataBaseError::NoAffectedRows) => Err(DraftError::NotFound(draft_id)),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_draft(&self, draft_id: Uuid) -> Result<Value, DraftError> {
        let row = self
            .repo()
            .get(draft_id)
            .await?
            .ok_or(DraftError::NotFound(draft_id))?;
        Ok(row.metadata)
    }

    async fn delete_draft(&self, draft_id: Uuid) -> Result<(), DraftError> {
        Ok(self.repo().delete(draft_id).await?)
    }
}
