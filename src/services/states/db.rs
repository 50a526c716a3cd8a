pub mod drafts;
pub mod jobs;
pub mod sessions;

use crate::services::states::db::drafts::DraftRepo;
use crate::services::states::db::jobs::JobRepo;
use crate::services::states::db::sessions::SessionRepo;
use sqlx::SqlitePool;
use sqlx::sqlite::SqliteQueryResult;

#[derive(Debug, thiserror::Error)]
pub enum DataBaseError {
    #[error("Row not found!")]
    RowNotFound,
    #[error("No affected rows!")]
    NoAffectedRows,
    #[error("Unique violation error! code: {code:?}, msg: {msg}")]
    UniqueViolation { code: Option<String>, msg: String },
    #[error("Corrupt row: {msg}")]
    Corrupt { msg: String },
    #[error("sqlx error: {0}")]
    SqlxOther(#[from] sqlx::Error),
}

pub type DataBaseResult<T> = Result<T, DataBaseError>;

pub trait SqliteBaseResultExt<T> {
    fn resolve(self) -> DataBaseResult<T>;
}

impl<T> SqliteBaseResultExt<T> for Result<T, sqlx::Error> {
    fn resolve(self) -> DataBaseResult<T> {
        match self {
            Ok(result) => Ok(result),
            Err(sqlx::Error::RowNotFound) => Err(DataBaseError::RowNotFound),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(DataBaseError::UniqueViolation {
                    code: e.code().map(|c| c.to_string()),
                    msg: e.message().to_string(),
                })
            }
            Err(e) => Err(DataBaseError::SqlxOther(e)),
        }
    }
}

pub trait SqliteQueryResultExt {
    fn resolve_affected(self) -> DataBaseResult<SqliteQueryResult>;
}

impl SqliteQueryResultExt for Result<SqliteQueryResult, sqlx::Error> {
    fn resolve_affected(self) -> DataBaseResult<SqliteQueryResult> {
        match self {
            Ok(res) if res.rows_affected() == 0 => Err(DataBaseError::NoAffectedRows),
            other => other.resolve(),
        }
    }
}

pub struct DataBaseState {
    pool: SqlitePool,
}

impl DataBaseState {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn sessions(&self) -> SessionRepo<'_> {
        SessionRepo::new(&self.pool)
    }

    pub fn drafts(&self) -> DraftRepo<'_> {
        DraftRepo::new(&self.pool)
    }

    pub fn jobs(&self) -> JobRepo<'_> {
        JobRepo::new(&self.pool)
    }

    pub async fn close_conn(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use sqlx::SqlitePool;
    use sqlx::sqlite::SqlitePoolOptions;

    /// Fresh in-memory database with the embedded schema applied.
    pub async fn memory_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite");
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .expect("migrations");
        pool
    }
}
