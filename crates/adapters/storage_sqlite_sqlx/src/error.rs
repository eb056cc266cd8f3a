//! Storage-specific error type wrapping sqlx errors.

use growdash_domain::error::GrowdashError;
use growdash_domain::event::UnknownStatus;

/// Errors originating from the `SQLite` storage layer.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A query or connection failed.
    #[error("database error")]
    Database(#[from] sqlx::Error),

    /// Failed to serialize or deserialize a stored JSON value.
    #[error("JSON error")]
    Json(#[from] serde_json::Error),

    /// Failed to run migrations.
    #[error("migration error")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A stored timestamp is not RFC 3339.
    #[error("invalid stored timestamp")]
    Timestamp(#[from] chrono::ParseError),

    /// A stored status string matches no known variant.
    #[error("invalid stored status")]
    Status(#[from] UnknownStatus),
}

impl StorageError {
    /// Wrap as a row decoding failure, for use inside `FromRow`.
    pub(crate) fn into_decode(self) -> sqlx::Error {
        match self {
            Self::Database(err) => err,
            other => sqlx::Error::Decode(Box::new(other)),
        }
    }
}

impl From<StorageError> for GrowdashError {
    fn from(err: StorageError) -> Self {
        Self::Storage(Box::new(err))
    }
}
