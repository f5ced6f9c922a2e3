//! Storage error types and result alias.
//!
//! Every backend maps its internal failures onto [`StorageError`], so the
//! context and backup layers can react to the same taxonomy regardless of the
//! physical medium.
//!
//! # Error Types
//!
//! - [`StorageError::Read`] - Persisted data is unreadable or corrupt
//! - [`StorageError::Write`] - A persist failed (disk or connection fault)
//! - [`StorageError::Timeout`] - A backend call exceeded its time budget
//! - [`StorageError::NotFound`] - The addressed archive or record does not exist
//! - [`StorageError::InvalidRecord`] - A record violates the container limits
//! - [`StorageError::Internal`] - Backend-specific failures that fit nowhere else
//!
//! # Example
//!
//! ```
//! use coffer_storage::{StorageError, StorageResult};
//!
//! fn lookup(name: &str) -> StorageResult<Vec<u8>> {
//!     Err(StorageError::not_found(name))
//! }
//!
//! assert!(lookup("20240101-000000-000").unwrap_err().is_not_found());
//! ```

use std::sync::Arc;

use thiserror::Error;

/// A boxed error type for source chain tracking.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
///
/// Errors preserve their source chain via the `#[source]` attribute.
///
/// # Non-exhaustive
///
/// New variants may be added in minor releases. Downstream match expressions
/// must include a wildcard arm (`_ =>`).
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum StorageError {
    /// Persisted data could not be read or decoded.
    ///
    /// Backends must raise this instead of returning partial or defaulted
    /// data when a stored record is corrupt.
    #[error("Read error: {message}")]
    Read {
        /// Description of the read failure.
        message: String,
        /// The underlying error that caused the failure.
        #[source]
        source: Option<BoxError>,
    },

    /// A write to the medium failed.
    ///
    /// The in-memory state stays authoritative; retrying is the caller's
    /// responsibility.
    #[error("Write error: {message}")]
    Write {
        /// Description of the write failure.
        message: String,
        /// The underlying error that caused the failure.
        #[source]
        source: Option<BoxError>,
    },

    /// A backend operation exceeded its configured time budget.
    #[error("Operation timeout: {operation}")]
    Timeout {
        /// Name of the operation that timed out.
        operation: &'static str,
    },

    /// The addressed record or archive does not exist.
    #[error("Not found: {key}")]
    NotFound {
        /// The key (archive name, owner, ...) that was not found.
        key: String,
    },

    /// A record violates the configured container limits.
    #[error("Invalid record: {message}")]
    InvalidRecord {
        /// Which limit was violated.
        message: String,
    },

    /// Backend-specific failure.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
        /// The underlying error that caused the failure.
        #[source]
        source: Option<BoxError>,
    },
}

impl StorageError {
    /// Creates a new `Read` error.
    #[must_use]
    pub fn read(message: impl Into<String>) -> Self {
        Self::Read { message: message.into(), source: None }
    }

    /// Creates a new `Read` error with a source error.
    #[must_use]
    pub fn read_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Read { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Write` error.
    #[must_use]
    pub fn write(message: impl Into<String>) -> Self {
        Self::Write { message: message.into(), source: None }
    }

    /// Creates a new `Write` error with a source error.
    #[must_use]
    pub fn write_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Write { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Timeout` error for the named operation.
    #[must_use]
    pub fn timeout(operation: &'static str) -> Self {
        Self::Timeout { operation }
    }

    /// Creates a new `NotFound` error.
    #[must_use]
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Creates a new `InvalidRecord` error.
    #[must_use]
    pub fn invalid_record(message: impl Into<String>) -> Self {
        Self::InvalidRecord { message: message.into() }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into(), source: None }
    }

    /// Creates a new `Internal` error with a source error.
    #[must_use]
    pub fn internal_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Internal { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Returns `true` for read failures, including timeouts.
    #[must_use]
    pub fn is_read(&self) -> bool {
        matches!(self, Self::Read { .. } | Self::Timeout { .. })
    }

    /// Returns `true` for write failures, including timeouts.
    #[must_use]
    pub fn is_write(&self) -> bool {
        matches!(self, Self::Write { .. } | Self::Timeout { .. })
    }

    /// Returns `true` if the addressed record does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns `true` if the operation exceeded its time budget.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Invalid configuration value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// A value is below its allowed minimum.
    #[error("{field} must be at least {min}, got {value}")]
    BelowMinimum {
        /// Name of the offending field.
        field: &'static str,
        /// Smallest accepted value.
        min: String,
        /// The rejected value.
        value: String,
    },

    /// A value is above its allowed maximum.
    #[error("{field} must be at most {max}, got {value}")]
    AboveMaximum {
        /// Name of the offending field.
        field: &'static str,
        /// Largest accepted value.
        max: String,
        /// The rejected value.
        value: String,
    },
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[test]
    fn timeout_counts_as_read_and_write() {
        let err = StorageError::timeout("save_container");
        assert!(err.is_read());
        assert!(err.is_write());
        assert!(err.is_timeout());
        assert_eq!(err.to_string(), "Operation timeout: save_container");
    }

    #[test]
    fn read_and_write_are_distinct() {
        assert!(StorageError::read("bad json").is_read());
        assert!(!StorageError::read("bad json").is_write());
        assert!(StorageError::write("disk full").is_write());
        assert!(!StorageError::write("disk full").is_read());
    }

    #[test]
    fn source_chain_is_preserved() {
        let io = std::io::Error::other("device gone");
        let err = StorageError::write_with_source("persist owner file", io);
        assert_eq!(err.source().unwrap().to_string(), "device gone");
    }

    #[test]
    fn config_error_display() {
        let err = ConfigError::BelowMinimum { field: "max_rows", min: "1".into(), value: "0".into() };
        assert_eq!(err.to_string(), "max_rows must be at least 1, got 0");
    }
}
