//! Database error types, mapped onto the domain taxonomy by callers.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl From<DbError> for paasdeploy_core::Error {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(msg) => paasdeploy_core::Error::NotFound(msg),
            DbError::AlreadyExists(msg) => paasdeploy_core::Error::AlreadyExists(msg),
            DbError::Database(e) => paasdeploy_core::Error::Unavailable(e.to_string()),
            DbError::Migration(e) => paasdeploy_core::Error::Unavailable(e.to_string()),
        }
    }
}

pub type DbResult<T> = std::result::Result<T, DbError>;
