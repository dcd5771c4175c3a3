//! Storage error type.

use quarry_protocol::QuarryError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("database connection failed: {0}")]
    Connect(String),

    #[error("query failed: {0}")]
    Query(#[from] sqlx::Error),

    #[error("document serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl From<DbError> for QuarryError {
    fn from(value: DbError) -> Self {
        QuarryError::Storage(value.to_string())
    }
}
