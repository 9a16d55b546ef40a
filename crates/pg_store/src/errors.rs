use foreman_job::ParseEnumError;
use foreman_migrations::MigrateError;
use foreman_store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PgStoreError {
    /// Failed to connect to or query the PostgreSQL database
    #[error("Error occurred while querying PostgreSQL: {0}")]
    QueryError(#[from] sqlx::Error),

    /// Neither a database url nor a pool was configured
    #[error("Missing database_url configuration - must provide either database_url or pg_pool")]
    MissingDatabaseUrl,

    #[error("Error occurred while migrating the database schema: {0}")]
    MigrationError(#[from] MigrateError),

    /// A text column held a value no enum variant matches
    #[error("{0}")]
    InvalidValue(#[from] ParseEnumError),
}

impl From<PgStoreError> for StoreError {
    fn from(value: PgStoreError) -> Self {
        match value {
            PgStoreError::InvalidValue(e) => StoreError::InvalidValue(e),
            other => StoreError::backend(other),
        }
    }
}

pub type Result<T> = core::result::Result<T, PgStoreError>;
