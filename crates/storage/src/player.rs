//! Owner-scoped storage handle.
//!
//! [`PlayerData`] binds a shared [`StorageBackend`] to one owner. Loading a
//! handle reads the owner's [`OwnerIndex`] once; container contents are only
//! read on demand.
//!
//! [`PlayerData::save_context`] persists a set of containers one by one and
//! reports per-container results in a [`SaveReport`]. A failure on one
//! container never prevents the others from being attempted.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use coffer_storage::{
//!     ContainerRecord, MemoryBackend, OwnerId, PlayerData, StorageBackend, StorageConfig,
//! };
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
//! let owner = OwnerId::new_v4();
//! let data = PlayerData::load(backend, owner, StorageConfig::default()).await.unwrap();
//!
//! assert_eq!(data.get_rows(4), 3);
//! data.save_container(&ContainerRecord::empty(4, 5)).await.unwrap();
//! assert_eq!(data.get_rows(4), 5);
//! # });
//! ```

use std::{
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    backend::StorageBackend,
    config::StorageConfig,
    error::{StorageError, StorageResult},
    types::{ContainerRecord, OwnerId, OwnerIndex, SlotMap},
};

/// Persistence handle for one owner.
pub struct PlayerData {
    backend: Arc<dyn StorageBackend>,
    owner: OwnerId,
    config: StorageConfig,
    index: RwLock<OwnerIndex>,
}

impl PlayerData {
    /// Creates the handle for `owner` and reads which ordinals are persisted.
    ///
    /// # Errors
    ///
    /// Returns the backend error if the index cannot be read.
    #[tracing::instrument(skip(backend, config), fields(owner = %owner))]
    pub async fn load(
        backend: Arc<dyn StorageBackend>,
        owner: OwnerId,
        config: StorageConfig,
    ) -> StorageResult<Self> {
        let index = backend.load_index(owner).await?;
        debug!(persisted = index.len(), "owner index loaded");
        Ok(Self { backend, owner, config, index: RwLock::new(index) })
    }

    /// The owner this handle is bound to.
    #[must_use]
    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    /// Returns `true` if this handle was constructed for `owner`.
    #[must_use]
    pub fn has_params(&self, owner: OwnerId) -> bool {
        self.owner == owner
    }

    /// Returns `true` if the ordinal had persisted data when last observed.
    #[must_use]
    pub fn is_persisted(&self, ordinal: u32) -> bool {
        self.index.read().contains(ordinal)
    }

    /// The storage configuration of this handle.
    #[must_use]
    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Reads the persisted contents of one container.
    ///
    /// Returns an empty map if nothing was ever persisted.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Read`] if the stored data is corrupt.
    #[tracing::instrument(skip(self), fields(owner = %self.owner))]
    pub async fn get_contents(&self, ordinal: u32) -> StorageResult<SlotMap> {
        let record = self.backend.get_container(self.owner, ordinal).await?;
        Ok(record.map(|r| r.contents).unwrap_or_default())
    }

    /// Persisted row count of a container, or the configured default.
    #[must_use]
    pub fn get_rows(&self, ordinal: u32) -> u8 {
        self.index.read().rows(ordinal).unwrap_or(self.config.default_rows())
    }

    /// Persists one container.
    ///
    /// # Errors
    ///
    /// Returns the backend error; the index is left untouched on failure.
    #[tracing::instrument(skip(self, record), fields(owner = %self.owner, ordinal = record.ordinal))]
    pub async fn save_container(&self, record: &ContainerRecord) -> StorageResult<()> {
        self.backend.save_container(self.owner, record).await?;
        self.index.write().insert(record.ordinal, record.rows);
        Ok(())
    }

    /// Persists every record, attempting each one even after failures.
    #[tracing::instrument(skip(self, records), fields(owner = %self.owner, containers = records.len()))]
    pub async fn save_context(&self, records: &[ContainerRecord]) -> SaveReport {
        let start = Instant::now();
        let mut results = Vec::with_capacity(records.len());

        for record in records {
            let result = self.save_container(record).await;
            if let Err(ref error) = result {
                warn!(ordinal = record.ordinal, error = %error, "container save failed");
            }
            results.push((record.ordinal, result));
        }

        let report = SaveReport::new(results, start.elapsed());
        debug!(
            succeeded = report.stats.succeeded_count,
            failed = report.stats.failed_count,
            duration_ms = report.stats.duration.as_millis() as u64,
            "context saved"
        );
        report
    }
}

impl fmt::Debug for PlayerData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlayerData")
            .field("owner", &self.owner)
            .field("persisted", &self.index.read().len())
            .finish_non_exhaustive()
    }
}

/// Statistics of one [`PlayerData::save_context`] call.
#[derive(Debug, Clone, Default)]
pub struct SaveStats {
    /// Number of containers attempted.
    pub containers_count: usize,
    /// Number of containers persisted.
    pub succeeded_count: usize,
    /// Number of containers that failed.
    pub failed_count: usize,
    /// Time taken.
    pub duration: Duration,
}

/// A container that could not be persisted.
#[derive(Debug, Clone, Error)]
#[error("failed to save container {ordinal}")]
pub struct ContainerSaveError {
    /// Ordinal of the failed container.
    pub ordinal: u32,
    /// The backend failure.
    #[source]
    pub source: StorageError,
}

/// Per-container outcome of a context save.
///
/// Entries follow the order of the records passed to
/// [`PlayerData::save_context`].
#[derive(Debug, Clone)]
pub struct SaveReport {
    results: Vec<(u32, StorageResult<()>)>,
    stats: SaveStats,
}

impl SaveReport {
    fn new(results: Vec<(u32, StorageResult<()>)>, duration: Duration) -> Self {
        let failed_count = results.iter().filter(|(_, r)| r.is_err()).count();
        let stats = SaveStats {
            containers_count: results.len(),
            succeeded_count: results.len() - failed_count,
            failed_count,
            duration,
        };
        Self { results, stats }
    }

    /// Per-container results as `(ordinal, result)` pairs.
    #[must_use = "per-container results indicate which containers failed"]
    pub fn results(&self) -> &[(u32, StorageResult<()>)] {
        &self.results
    }

    /// Save statistics.
    #[must_use]
    pub fn stats(&self) -> &SaveStats {
        &self.stats
    }

    /// Returns `true` if any container failed.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.stats.failed_count > 0
    }

    /// Ordinals of the containers that failed.
    #[must_use]
    pub fn failed_ordinals(&self) -> Vec<u32> {
        self.results.iter().filter(|(_, r)| r.is_err()).map(|(ordinal, _)| *ordinal).collect()
    }

    /// Collapses the report, returning the first failure if any.
    ///
    /// # Errors
    ///
    /// Returns a [`ContainerSaveError`] naming the first failed container.
    pub fn into_result(self) -> Result<SaveStats, ContainerSaveError> {
        for (ordinal, result) in self.results {
            if let Err(source) = result {
                return Err(ContainerSaveError { ordinal, source });
            }
        }
        Ok(self.stats)
    }
}
