//! Point-in-time archives of every owner's persisted containers.
//!
//! The [`BackupEngine`] keeps an in-memory registry of archives, built by one
//! scan when it opens and updated only by its own successful creations and
//! removals.

mod engine;
mod naming;
mod task;

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use coffer_storage::{BackupManifest, OwnerId, StorageError};
pub use engine::BackupEngine;
pub use task::{BackupTask, RemovalOutcome, RemovalState, RemovalTask, TaskState};

/// Descriptor of one archive.
///
/// Immutable once created. Ordered by creation time, then sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backup {
    manifest: BackupManifest,
}

impl Backup {
    /// Unique name of the archive.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.manifest.name
    }

    /// When the archive was created.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.manifest.created_at
    }

    /// Tiebreak counter among archives created at the same instant.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.manifest.sequence
    }

    /// Number of owners in the archive.
    #[must_use]
    pub fn owners(&self) -> u32 {
        self.manifest.owners
    }

    /// Number of containers in the archive.
    #[must_use]
    pub fn containers(&self) -> u32 {
        self.manifest.containers
    }

    /// The stored header.
    #[must_use]
    pub fn manifest(&self) -> &BackupManifest {
        &self.manifest
    }
}

impl From<BackupManifest> for Backup {
    fn from(manifest: BackupManifest) -> Self {
        Self { manifest }
    }
}

impl Ord for Backup {
    fn cmp(&self, other: &Self) -> Ordering {
        self.manifest.order_key().cmp(&other.manifest.order_key())
    }
}

impl PartialOrd for Backup {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Outcome of a restore.
#[derive(Debug, Default)]
pub struct RestoreReport {
    /// Owners whose data was replaced with the archive's.
    pub restored: Vec<OwnerId>,
    /// Live owners deleted because the archive does not contain them.
    pub removed: Vec<OwnerId>,
    /// Owners that could not be written; the others were still restored.
    pub failed: Vec<(OwnerId, StorageError)>,
}

impl RestoreReport {
    /// Returns `true` if every owner was restored or removed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}
