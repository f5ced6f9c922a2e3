//! In-memory storage backend implementation.
//!
//! [`MemoryBackend`] keeps live data and archives in ordered maps behind
//! [`parking_lot::RwLock`]s. It is the reference implementation of
//! [`StorageBackend`] and the test double used by the engine crate.
//!
//! # Example
//!
//! ```
//! use coffer_storage::{ContainerRecord, MemoryBackend, OwnerId, StorageBackend};
//!
//! #[tokio::main]
//! async fn main() {
//!     let backend = MemoryBackend::new();
//!     let owner = OwnerId::new_v4();
//!
//!     backend.save_container(owner, &ContainerRecord::empty(0, 3)).await.unwrap();
//!     let index = backend.load_index(owner).await.unwrap();
//!
//!     assert_eq!(index.rows(0), Some(3));
//! }
//! ```
//!
//! # Limitations
//!
//! - Data is not persisted; all data is lost when the process exits

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use fail::fail_point;
use parking_lot::RwLock;

use crate::{
    backend::StorageBackend,
    error::{StorageError, StorageResult},
    limits::{ContainerLimits, validate_record},
    types::{BackupArchive, BackupManifest, ContainerRecord, OwnerId, OwnerIndex, OwnerSnapshot},
};

type OwnerData = BTreeMap<u32, ContainerRecord>;

/// In-memory storage backend.
///
/// # Cloning
///
/// `MemoryBackend` is cheaply cloneable via [`Arc`]. All clones share the
/// same underlying data.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    data: Arc<RwLock<BTreeMap<OwnerId, OwnerData>>>,
    backups: Arc<RwLock<BTreeMap<String, BackupArchive>>>,
    limits: ContainerLimits,
}

impl MemoryBackend {
    /// Creates an empty backend with default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty backend enforcing the given limits.
    #[must_use]
    pub fn with_limits(limits: ContainerLimits) -> Self {
        Self { limits, ..Self::default() }
    }

    /// Number of owners with persisted data.
    #[must_use]
    pub fn owner_count(&self) -> usize {
        self.data.read().len()
    }
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("owners", &self.data.read().len())
            .field("backups", &self.backups.read().len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    #[tracing::instrument(skip(self), fields(owner = %owner))]
    async fn load_index(&self, owner: OwnerId) -> StorageResult<OwnerIndex> {
        let data = self.data.read();
        Ok(data
            .get(&owner)
            .map(|containers| {
                OwnerIndex::from_entries(containers.values().map(|c| (c.ordinal, c.rows)))
            })
            .unwrap_or_default())
    }

    #[tracing::instrument(skip(self), fields(owner = %owner))]
    async fn get_container(
        &self,
        owner: OwnerId,
        ordinal: u32,
    ) -> StorageResult<Option<ContainerRecord>> {
        let data = self.data.read();
        Ok(data.get(&owner).and_then(|containers| containers.get(&ordinal)).cloned())
    }

    #[tracing::instrument(skip(self, record), fields(owner = %owner, ordinal = record.ordinal))]
    async fn save_container(&self, owner: OwnerId, record: &ContainerRecord) -> StorageResult<()> {
        validate_record(record, &self.limits)?;
        fail_point!("memory-save-container", |_| {
            Err(StorageError::write("injected failure before container save"))
        });

        let mut data = self.data.write();
        data.entry(owner).or_default().insert(record.ordinal, record.clone());
        Ok(())
    }

    async fn list_owners(&self) -> StorageResult<Vec<OwnerId>> {
        Ok(self.data.read().keys().copied().collect())
    }

    #[tracing::instrument(skip(self), fields(owner = %owner))]
    async fn export_owner(&self, owner: OwnerId) -> StorageResult<OwnerSnapshot> {
        let data = self.data.read();
        let containers =
            data.get(&owner).map(|containers| containers.values().cloned().collect()).unwrap_or_default();
        Ok(OwnerSnapshot::new(owner, containers))
    }

    #[tracing::instrument(skip(self, snapshot), fields(owner = %snapshot.owner))]
    async fn import_owner(&self, snapshot: &OwnerSnapshot) -> StorageResult<()> {
        for record in &snapshot.containers {
            validate_record(record, &self.limits)?;
        }

        let replacement: OwnerData =
            snapshot.containers.iter().map(|c| (c.ordinal, c.clone())).collect();
        let mut data = self.data.write();
        if replacement.is_empty() {
            data.remove(&snapshot.owner);
        } else {
            data.insert(snapshot.owner, replacement);
        }
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(owner = %owner))]
    async fn delete_owner(&self, owner: OwnerId) -> StorageResult<()> {
        self.data.write().remove(&owner);
        Ok(())
    }

    #[tracing::instrument(skip(self, manifest, owners), fields(backup = %manifest.name))]
    async fn write_backup(
        &self,
        manifest: &BackupManifest,
        owners: &[OwnerSnapshot],
    ) -> StorageResult<()> {
        fail_point!("memory-write-backup", |_| {
            Err(StorageError::write("injected failure before archive write"))
        });
        for record in owners.iter().flat_map(|s| &s.containers) {
            validate_record(record, &self.limits)?;
        }

        let mut backups = self.backups.write();
        if backups.contains_key(&manifest.name) {
            return Err(StorageError::write(format!("archive {} already exists", manifest.name)));
        }
        backups.insert(
            manifest.name.clone(),
            BackupArchive { manifest: manifest.clone(), owners: owners.to_vec() },
        );
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn read_backup(&self, name: &str) -> StorageResult<BackupArchive> {
        self.backups.read().get(name).cloned().ok_or_else(|| StorageError::not_found(name))
    }

    async fn list_backups(&self) -> StorageResult<Vec<BackupManifest>> {
        Ok(self.backups.read().values().map(|archive| archive.manifest.clone()).collect())
    }

    #[tracing::instrument(skip(self))]
    async fn remove_backup(&self, name: &str) -> StorageResult<bool> {
        Ok(self.backups.write().remove(name).is_some())
    }

    async fn health_check(&self) -> StorageResult<()> {
        fail_point!("health-check", |_| Err(StorageError::internal("injected health failure")));
        // Verify the lock is not wedged.
        let _unused = self.data.read();
        Ok(())
    }
}
