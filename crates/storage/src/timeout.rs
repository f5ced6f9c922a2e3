//! Per-call time budget for any backend.
//!
//! [`TimeoutBackend`] wraps a [`StorageBackend`] and fails every call that
//! exceeds [`StorageConfig::operation_timeout`](crate::StorageConfig::operation_timeout)
//! with [`StorageError::Timeout`]. The inner call is dropped at the deadline;
//! work already handed to a blocking thread finishes in the background.

use std::{future::Future, time::Duration};

use async_trait::async_trait;
use tracing::warn;

use crate::{
    backend::StorageBackend,
    error::{StorageError, StorageResult},
    types::{BackupArchive, BackupManifest, ContainerRecord, OwnerId, OwnerIndex, OwnerSnapshot},
};

/// Backend wrapper bounding every call by a fixed timeout.
#[derive(Debug, Clone)]
pub struct TimeoutBackend<B> {
    inner: B,
    timeout: Duration,
}

impl<B: StorageBackend> TimeoutBackend<B> {
    /// Wraps `inner` with the given per-call budget.
    #[must_use]
    pub fn new(inner: B, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    /// The wrapped backend.
    #[must_use]
    pub fn inner(&self) -> &B {
        &self.inner
    }

    /// The per-call budget.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = StorageResult<T>> + Send,
    ) -> StorageResult<T> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                warn!(operation, timeout_ms = self.timeout.as_millis() as u64, "backend call timed out");
                Err(StorageError::timeout(operation))
            },
        }
    }
}

#[async_trait]
impl<B: StorageBackend> StorageBackend for TimeoutBackend<B> {
    async fn load_index(&self, owner: OwnerId) -> StorageResult<OwnerIndex> {
        self.bounded("load_index", self.inner.load_index(owner)).await
    }

    async fn get_container(
        &self,
        owner: OwnerId,
        ordinal: u32,
    ) -> StorageResult<Option<ContainerRecord>> {
        self.bounded("get_container", self.inner.get_container(owner, ordinal)).await
    }

    async fn save_container(&self, owner: OwnerId, record: &ContainerRecord) -> StorageResult<()> {
        self.bounded("save_container", self.inner.save_container(owner, record)).await
    }

    async fn list_owners(&self) -> StorageResult<Vec<OwnerId>> {
        self.bounded("list_owners", self.inner.list_owners()).await
    }

    async fn export_owner(&self, owner: OwnerId) -> StorageResult<OwnerSnapshot> {
        self.bounded("export_owner", self.inner.export_owner(owner)).await
    }

    async fn import_owner(&self, snapshot: &OwnerSnapshot) -> StorageResult<()> {
        self.bounded("import_owner", self.inner.import_owner(snapshot)).await
    }

    async fn delete_owner(&self, owner: OwnerId) -> StorageResult<()> {
        self.bounded("delete_owner", self.inner.delete_owner(owner)).await
    }

    async fn write_backup(
        &self,
        manifest: &BackupManifest,
        owners: &[OwnerSnapshot],
    ) -> StorageResult<()> {
        self.bounded("write_backup", self.inner.write_backup(manifest, owners)).await
    }

    async fn read_backup(&self, name: &str) -> StorageResult<BackupArchive> {
        self.bounded("read_backup", self.inner.read_backup(name)).await
    }

    async fn list_backups(&self) -> StorageResult<Vec<BackupManifest>> {
        self.bounded("list_backups", self.inner.list_backups()).await
    }

    async fn remove_backup(&self, name: &str) -> StorageResult<bool> {
        self.bounded("remove_backup", self.inner.remove_backup(name)).await
    }

    async fn health_check(&self) -> StorageResult<()> {
        self.bounded("health_check", self.inner.health_check()).await
    }
}
