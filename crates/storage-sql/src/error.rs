//! Error types for the SQLite storage backend.
//!
//! This module maps `rusqlite` and encoding failures onto the generic
//! [`StorageError`](coffer_storage::StorageError) taxonomy.

use coffer_storage::StorageError;
use rusqlite::ErrorCode;
use thiserror::Error;

/// Result type alias for SQLite storage operations.
pub type Result<T> = std::result::Result<T, SqlStorageError>;

/// Errors specific to the SQLite storage backend.
#[derive(Debug, Error)]
pub enum SqlStorageError {
    /// Error from SQLite.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A stored content blob could not be encoded or decoded.
    #[error("Encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// A row holds values no valid write could have produced.
    #[error("Corrupt row: {0}")]
    Corrupt(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl SqlStorageError {
    /// Maps a failure on a read path. Generic SQLite faults become
    /// [`StorageError::Read`].
    #[must_use]
    pub fn into_read_error(self) -> StorageError {
        match self {
            Self::Sqlite(source) if !is_busy(&source) => {
                StorageError::read_with_source("SQLite read failed", source)
            },
            other => other.into(),
        }
    }

    /// Maps a failure on a write path. Generic SQLite faults become
    /// [`StorageError::Write`].
    #[must_use]
    pub fn into_write_error(self) -> StorageError {
        match self {
            Self::Sqlite(source) if !is_busy(&source) => {
                StorageError::write_with_source("SQLite write failed", source)
            },
            Self::Encoding(source) => {
                StorageError::internal_with_source("failed to encode contents", source)
            },
            other => other.into(),
        }
    }
}

fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked)
    )
}

impl From<SqlStorageError> for StorageError {
    fn from(err: SqlStorageError) -> Self {
        match err {
            SqlStorageError::Sqlite(source) if is_busy(&source) => {
                tracing::warn!(error = %source, "SQLite busy timeout elapsed");
                StorageError::timeout("sqlite_busy")
            },
            SqlStorageError::Sqlite(rusqlite::Error::QueryReturnedNoRows) => {
                StorageError::not_found("row")
            },
            SqlStorageError::Sqlite(
                source @ (rusqlite::Error::FromSqlConversionFailure(..)
                | rusqlite::Error::InvalidColumnType(..)
                | rusqlite::Error::IntegralValueOutOfRange(..)),
            ) => StorageError::read_with_source("unexpected column value", source),
            SqlStorageError::Sqlite(source) => {
                StorageError::internal_with_source("SQLite error", source)
            },
            SqlStorageError::Encoding(source) => {
                StorageError::read_with_source("failed to decode contents", source)
            },
            SqlStorageError::Corrupt(message) => StorageError::read(message),
            SqlStorageError::Config(message) => StorageError::internal(format!("Config: {message}")),
        }
    }
}
