//! Error types for contexts and backups.
//!
//! # Error Types
//!
//! - [`ContextError`] - Loading, editing or saving one owner's containers
//! - [`BackupError`] - Creating, restoring or removing archives

use coffer_storage::{OwnerId, StorageError};
use thiserror::Error;

/// Errors raised by [`PlayerContext`](crate::PlayerContext) and
/// [`ContextManager`](crate::ContextManager).
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum ContextError {
    /// The ordinal is at or above the configured container maximum.
    #[error("Invalid container ordinal {ordinal} (maximum {max})")]
    InvalidOrdinal {
        /// The rejected ordinal.
        ordinal: u32,
        /// Configured container maximum.
        max: u32,
    },

    /// More containers were requested than the configuration allows.
    #[error("Cannot load {requested} containers (maximum {max})")]
    TooManyContainers {
        /// Requested count.
        requested: u32,
        /// Configured container maximum.
        max: u32,
    },

    /// A slot index lies outside the container's capacity.
    #[error("Slot {slot} outside container {ordinal} (capacity {capacity})")]
    InvalidSlot {
        /// The container.
        ordinal: u32,
        /// The rejected slot.
        slot: u32,
        /// Slot count of the container.
        capacity: u32,
    },

    /// The container's contents belong to an external inventory.
    #[error("Container {ordinal} is managed externally")]
    ExternallyManaged {
        /// The container.
        ordinal: u32,
    },

    /// Persisting one container failed.
    ///
    /// Other containers of the same save were still attempted.
    #[error("Failed to save container {ordinal} of {owner}")]
    ContainerWrite {
        /// Owner of the container.
        owner: OwnerId,
        /// The container that failed.
        ordinal: u32,
        /// The backend failure.
        #[source]
        source: StorageError,
    },

    /// A restore replaced the owner's data after this context was loaded.
    #[error("Context of {owner} was evicted by a restore")]
    Evicted {
        /// Owner of the stale context.
        owner: OwnerId,
    },

    /// A storage operation failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A programming error such as a duplicate ordinal.
    #[error("Invariant violated: {0}")]
    InvariantViolation(String),
}

/// Errors raised by the [`BackupEngine`](crate::BackupEngine).
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum BackupError {
    /// No archive with this name is registered.
    #[error("Backup not found: {name}")]
    NotFound {
        /// The requested archive.
        name: String,
    },

    /// A restore targets owners whose loaded contexts are dirty or in use.
    #[error("Owners have unsaved or open containers: {owners:?}")]
    OwnersBusy {
        /// The owners that blocked the restore.
        owners: Vec<OwnerId>,
    },

    /// One owner could not be exported; nothing was registered.
    #[error("Failed to export owner {owner}")]
    ExportFailed {
        /// The owner whose export failed.
        owner: OwnerId,
        /// The backend failure.
        #[source]
        source: StorageError,
    },

    /// A storage operation failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The background task running the operation died.
    #[error("Backup task failed: {0}")]
    Task(String),
}

impl BackupError {
    /// Returns `true` if the archive does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Storage(err) => err.is_not_found(),
            _ => false,
        }
    }
}
