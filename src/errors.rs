#[derive(Debug, thiserror::Error)]
pub enum SpoolError {
    #[error("config error: {0}")]
    Config(#[from] Box<figment::Error>),
    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[cfg(feature = "migrate")]
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type SpoolResult<T> = Result<T, SpoolError>;
